use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use std::time::{SystemTime, UNIX_EPOCH};

use snafu::{OptionExt, ResultExt};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};

use super::error::{
    CreateSqliteDirectorySnafu, InvalidLanguageSnafu, NotFoundSnafu, SqliteConnectOptionsSnafu,
    SqliteConnectSnafu, SqliteMigrateSnafu, SqlitePragmaSnafu, SqliteQuerySnafu, StorageError,
    StorageResult,
};
use super::types::{NewUser, UserRecord};
use super::{BoxFuture, UserRepository};

#[derive(Debug, Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
    database_url: String,
}

impl SqliteStorage {
    pub async fn open(database_location: &str) -> StorageResult<Self> {
        ensure_database_directory(database_location)?;

        let database_url = normalize_database_url(database_location);
        let connect_options = SqliteConnectOptions::from_str(&database_url)
            .context(SqliteConnectOptionsSnafu {
                stage: "sqlite-open-parse-url",
                database_url: database_url.clone(),
            })?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_millis(5_000));

        // One long-lived connection: an in-memory database only exists while it stays open.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(connect_options)
            .await
            .context(SqliteConnectSnafu {
                stage: "sqlite-open-connect",
                database_url: database_url.clone(),
            })?;

        let _: String = sqlx::query_scalar("PRAGMA journal_mode = WAL;")
            .fetch_one(&pool)
            .await
            .context(SqlitePragmaSnafu {
                stage: "sqlite-open-pragma-journal-mode",
                pragma: "journal_mode",
            })?;
        sqlx::query("PRAGMA busy_timeout = 5000;")
            .execute(&pool)
            .await
            .context(SqlitePragmaSnafu {
                stage: "sqlite-open-pragma-busy-timeout",
                pragma: "busy_timeout",
            })?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context(SqliteMigrateSnafu {
                stage: "sqlite-open-migrate",
            })?;

        tracing::debug!(database_url = %database_url, "sqlite storage opened");
        Ok(Self { pool, database_url })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    async fn load_user(
        &self,
        user_id: i64,
        stage: &'static str,
    ) -> StorageResult<Option<UserRecord>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT user_id, language, is_subscribed, created_at, updated_at FROM users WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .context(SqliteQuerySnafu { stage })?;

        row.map(user_row_to_record).transpose()
    }

    async fn require_user(&self, user_id: i64, stage: &'static str) -> StorageResult<UserRecord> {
        self.load_user(user_id, stage).await?.context(NotFoundSnafu {
            stage,
            entity: "user",
            id: user_id.to_string(),
        })
    }
}

impl UserRepository for SqliteStorage {
    fn get_user<'a>(&'a self, user_id: u64) -> BoxFuture<'a, StorageResult<Option<UserRecord>>> {
        Box::pin(async move {
            let user_id = u64_to_i64(user_id, "user-get-id")?;
            self.load_user(user_id, "user-get-query").await
        })
    }

    fn ensure_user<'a>(&'a self, input: NewUser) -> BoxFuture<'a, StorageResult<UserRecord>> {
        Box::pin(async move {
            let language = normalize_language(&input.language, "user-ensure-language")?;
            let user_id = u64_to_i64(input.user_id, "user-ensure-id")?;
            let now = unix_timestamp_seconds();

            let inserted = sqlx::query(
                "INSERT INTO users (user_id, language, is_subscribed, created_at, updated_at) VALUES (?, ?, 0, ?, ?) ON CONFLICT(user_id) DO NOTHING",
            )
            .bind(user_id)
            .bind(&language)
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await
            .context(SqliteQuerySnafu {
                stage: "user-ensure-insert",
            })?;

            if inserted.rows_affected() > 0 {
                tracing::info!(user_id, language = %language, "user registered");
            }

            self.require_user(user_id, "user-ensure-load").await
        })
    }

    fn update_language<'a>(
        &'a self,
        user_id: u64,
        language: &'a str,
    ) -> BoxFuture<'a, StorageResult<UserRecord>> {
        Box::pin(async move {
            let language = normalize_language(language, "user-update-language-validate")?;
            let user_id = u64_to_i64(user_id, "user-update-language-id")?;
            let result =
                sqlx::query("UPDATE users SET language = ?, updated_at = ? WHERE user_id = ?")
                    .bind(&language)
                    .bind(unix_timestamp_seconds())
                    .bind(user_id)
                    .execute(&self.pool)
                    .await
                    .context(SqliteQuerySnafu {
                        stage: "user-update-language-apply",
                    })?;

            if result.rows_affected() == 0 {
                return NotFoundSnafu {
                    stage: "user-update-language-missing",
                    entity: "user",
                    id: user_id.to_string(),
                }
                .fail();
            }

            self.require_user(user_id, "user-update-language-load").await
        })
    }

    fn update_subscription<'a>(
        &'a self,
        user_id: u64,
        is_subscribed: bool,
    ) -> BoxFuture<'a, StorageResult<UserRecord>> {
        Box::pin(async move {
            let user_id = u64_to_i64(user_id, "user-update-subscription-id")?;
            let result =
                sqlx::query("UPDATE users SET is_subscribed = ?, updated_at = ? WHERE user_id = ?")
                    .bind(is_subscribed)
                    .bind(unix_timestamp_seconds())
                    .bind(user_id)
                    .execute(&self.pool)
                    .await
                    .context(SqliteQuerySnafu {
                        stage: "user-update-subscription-apply",
                    })?;

            if result.rows_affected() == 0 {
                return NotFoundSnafu {
                    stage: "user-update-subscription-missing",
                    entity: "user",
                    id: user_id.to_string(),
                }
                .fail();
            }

            self.require_user(user_id, "user-update-subscription-load")
                .await
        })
    }
}

#[derive(Debug, FromRow)]
struct UserRow {
    user_id: i64,
    language: String,
    is_subscribed: bool,
    created_at: i64,
    updated_at: i64,
}

fn user_row_to_record(row: UserRow) -> StorageResult<UserRecord> {
    Ok(UserRecord {
        user_id: i64_to_u64(row.user_id, "user-row-id")?,
        language: row.language,
        is_subscribed: row.is_subscribed,
        created_at_unix_seconds: i64_to_u64(row.created_at, "user-row-created-at")?,
        updated_at_unix_seconds: i64_to_u64(row.updated_at, "user-row-updated-at")?,
    })
}

fn normalize_language(raw: &str, stage: &'static str) -> StorageResult<String> {
    let language = raw.trim().to_ascii_lowercase();
    let usable = !language.is_empty()
        && language.len() <= 16
        && language
            .chars()
            .all(|character| character.is_ascii_alphanumeric() || character == '-');
    if !usable {
        return InvalidLanguageSnafu {
            stage,
            language: raw.to_string(),
        }
        .fail();
    }

    Ok(language)
}

fn unix_timestamp_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0_i64, |duration| duration.as_secs() as i64)
}

fn i64_to_u64(value: i64, stage: &'static str) -> StorageResult<u64> {
    value
        .try_into()
        .map_err(|_| StorageError::InvariantViolation {
            stage,
            details: format!("negative sqlite integer '{value}' cannot map to u64"),
        })
}

fn u64_to_i64(value: u64, stage: &'static str) -> StorageResult<i64> {
    value
        .try_into()
        .map_err(|_| StorageError::InvariantViolation {
            stage,
            details: format!("u64 '{value}' cannot map to sqlite i64"),
        })
}

fn ensure_database_directory(database_location: &str) -> StorageResult<()> {
    if database_location.starts_with("sqlite:") || database_location == ":memory:" {
        return Ok(());
    }

    let path = Path::new(database_location);
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context(CreateSqliteDirectorySnafu {
            stage: "sqlite-open-create-directory",
            path: parent.display().to_string(),
        })?;
    }

    Ok(())
}

fn normalize_database_url(database_location: &str) -> String {
    if database_location.starts_with("sqlite:") {
        return database_location.to_string();
    }

    if database_location == ":memory:" {
        return "sqlite::memory:".to_string();
    }

    format!("sqlite://{database_location}")
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_memory() -> SqliteStorage {
        SqliteStorage::open(":memory:").await.unwrap()
    }

    #[test]
    fn database_locations_normalize_to_sqlite_urls() {
        assert_eq!(normalize_database_url(":memory:"), "sqlite::memory:");
        assert_eq!(
            normalize_database_url(".carousel/carousel.db"),
            "sqlite://.carousel/carousel.db"
        );
        assert_eq!(
            normalize_database_url("sqlite://already.db"),
            "sqlite://already.db"
        );
    }

    #[test]
    fn language_codes_are_trimmed_and_lowercased() {
        assert_eq!(normalize_language(" EN ", "test").unwrap(), "en");
        assert_eq!(normalize_language("pt-BR", "test").unwrap(), "pt-br");
        assert!(matches!(
            normalize_language("  ", "test"),
            Err(StorageError::InvalidLanguage { .. })
        ));
        assert!(normalize_language("ru; DROP TABLE users", "test").is_err());
    }

    #[tokio::test]
    async fn missing_user_reads_as_none() {
        let storage = open_memory().await;
        assert_eq!(storage.get_user(42).await.unwrap(), None);
    }

    #[tokio::test]
    async fn ensure_user_creates_once_and_keeps_existing_language() {
        let storage = open_memory().await;

        let created = storage.ensure_user(NewUser::new(42)).await.unwrap();
        assert_eq!(created.user_id, 42);
        assert_eq!(created.language, "ru");
        assert!(!created.is_subscribed);

        let again = storage
            .ensure_user(NewUser::new(42).with_language("en"))
            .await
            .unwrap();
        assert_eq!(again.language, "ru");
        assert_eq!(again.created_at_unix_seconds, created.created_at_unix_seconds);
    }

    #[tokio::test]
    async fn language_and_subscription_updates_persist() {
        let storage = open_memory().await;
        storage.ensure_user(NewUser::new(7)).await.unwrap();

        let updated = storage.update_language(7, "EN").await.unwrap();
        assert_eq!(updated.language, "en");

        let subscribed = storage.update_subscription(7, true).await.unwrap();
        assert!(subscribed.is_subscribed);
        assert_eq!(subscribed.language, "en");

        let loaded = storage.get_user(7).await.unwrap();
        assert_eq!(loaded, Some(subscribed));
    }

    #[tokio::test]
    async fn updates_for_unknown_users_fail_with_not_found() {
        let storage = open_memory().await;

        assert!(matches!(
            storage.update_language(9, "en").await,
            Err(StorageError::NotFound { entity: "user", .. })
        ));
        assert!(matches!(
            storage.update_subscription(9, true).await,
            Err(StorageError::NotFound { entity: "user", .. })
        ));
    }

    #[tokio::test]
    async fn blank_language_is_rejected_before_touching_rows() {
        let storage = open_memory().await;
        storage.ensure_user(NewUser::new(7)).await.unwrap();

        assert!(matches!(
            storage.update_language(7, " ").await,
            Err(StorageError::InvalidLanguage { .. })
        ));
        assert_eq!(
            storage.get_user(7).await.unwrap().map(|user| user.language),
            Some("ru".to_string())
        );
    }

    #[tokio::test]
    async fn ids_beyond_sqlite_range_are_invariant_violations() {
        let storage = open_memory().await;
        assert!(matches!(
            storage.get_user(u64::MAX).await,
            Err(StorageError::InvariantViolation { .. })
        ));
    }
}
