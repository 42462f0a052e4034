use std::env;
use std::path::Path;

use snafu::{OptionExt, ResultExt, Snafu};

use carousel_storage::{NewUser, SqliteStorage, StorageError, UserRepository};

#[derive(Debug, Clone)]
struct RunnerArgs {
    scenario: Scenario,
    db_path: Option<String>,
}

#[derive(Debug, Clone, Copy)]
enum Scenario {
    SchemaInit,
    UserCrud,
    LanguageGuard,
    All,
}

impl Scenario {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "schema_init" => Some(Self::SchemaInit),
            "user_crud" => Some(Self::UserCrud),
            "language_guard" => Some(Self::LanguageGuard),
            "all" => Some(Self::All),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::SchemaInit => "schema_init",
            Self::UserCrud => "user_crud",
            Self::LanguageGuard => "language_guard",
            Self::All => "all",
        }
    }
}

#[derive(Debug, Snafu)]
enum RunnerError {
    #[snafu(display("missing required --scenario argument"))]
    MissingScenario { stage: &'static str },
    #[snafu(display("missing value for argument '{arg}'"))]
    MissingArgumentValue {
        stage: &'static str,
        arg: &'static str,
    },
    #[snafu(display("unknown scenario '{raw}'"))]
    UnknownScenario { stage: &'static str, raw: String },
    #[snafu(display("unknown argument '{raw}'"))]
    UnknownArgument { stage: &'static str, raw: String },
    #[snafu(display("storage validation failed: {source}"))]
    StorageValidation {
        stage: &'static str,
        source: StorageError,
    },
    #[snafu(display("sqlite query failed: {source}"))]
    SqliteQuery {
        stage: &'static str,
        source: sqlx::Error,
    },
    #[snafu(display("scenario '{scenario}' failed: {reason}"))]
    ScenarioFailed {
        stage: &'static str,
        scenario: &'static str,
        reason: String,
    },
    #[snafu(display("file operation failed at '{path}': {source}"))]
    FileIo {
        stage: &'static str,
        path: String,
        source: std::io::Error,
    },
}

type RunnerResult<T> = Result<T, RunnerError>;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    if let Err(error) = run().await {
        println!("runner_ok=false");
        eprintln!("runner_error={error}");
        std::process::exit(1);
    }
}

async fn run() -> RunnerResult<()> {
    let args = parse_args(env::args().skip(1))?;
    println!("scenario={}", args.scenario.name());

    // Without --db every scenario runs against a throwaway in-memory database.
    let db_path = args.db_path.as_deref().unwrap_or(":memory:");
    println!("db_path={db_path}");
    if db_path != ":memory:" {
        reset_sqlite_files(db_path)?;
    }

    match args.scenario {
        Scenario::SchemaInit => run_schema_init(db_path).await,
        Scenario::UserCrud => run_user_crud(db_path).await,
        Scenario::LanguageGuard => run_language_guard(db_path).await,
        Scenario::All => {
            run_schema_init(db_path).await?;
            run_user_crud(db_path).await?;
            run_language_guard(db_path).await?;
            println!("all_passed=true");
            Ok(())
        }
    }
}

fn parse_args(args: impl IntoIterator<Item = String>) -> RunnerResult<RunnerArgs> {
    let mut scenario = None;
    let mut db_path = None;
    let mut pending = args.into_iter();

    while let Some(argument) = pending.next() {
        match argument.as_str() {
            "--scenario" => {
                let value = pending.next().context(MissingArgumentValueSnafu {
                    stage: "parse-args-scenario-value",
                    arg: "--scenario",
                })?;

                let parsed = Scenario::parse(&value).context(UnknownScenarioSnafu {
                    stage: "parse-args-scenario",
                    raw: value,
                })?;
                scenario = Some(parsed);
            }
            "--db" => {
                let value = pending.next().context(MissingArgumentValueSnafu {
                    stage: "parse-args-db-value",
                    arg: "--db",
                })?;
                db_path = Some(value);
            }
            _ => {
                return UnknownArgumentSnafu {
                    stage: "parse-args",
                    raw: argument,
                }
                .fail();
            }
        }
    }

    Ok(RunnerArgs {
        scenario: scenario.context(MissingScenarioSnafu {
            stage: "parse-args-scenario-required",
        })?,
        db_path,
    })
}

async fn open(db_path: &str, stage: &'static str) -> RunnerResult<SqliteStorage> {
    SqliteStorage::open(db_path)
        .await
        .context(StorageValidationSnafu { stage })
}

async fn run_schema_init(db_path: &str) -> RunnerResult<()> {
    let storage = open(db_path, "scenario-schema-init-open").await?;

    let discovered_tables = sqlx::query_scalar::<_, String>(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'users'",
    )
    .fetch_all(storage.pool())
    .await
    .context(SqliteQuerySnafu {
        stage: "scenario-schema-init-list-tables",
    })?;

    let users_table = discovered_tables.iter().any(|name| name == "users");
    println!("users_table={users_table}");
    if !users_table {
        return ScenarioFailedSnafu {
            stage: "scenario-schema-init-verify",
            scenario: "schema_init",
            reason: "users table is missing after migrations".to_string(),
        }
        .fail();
    }

    println!("runner_ok=true");
    Ok(())
}

async fn run_user_crud(db_path: &str) -> RunnerResult<()> {
    let storage = open(db_path, "scenario-user-crud-open").await?;

    let created = storage
        .ensure_user(NewUser::new(1001))
        .await
        .context(StorageValidationSnafu {
            stage: "scenario-user-crud-ensure",
        })?;
    let relabeled = storage
        .update_language(1001, "en")
        .await
        .context(StorageValidationSnafu {
            stage: "scenario-user-crud-language",
        })?;
    let subscribed = storage
        .update_subscription(1001, true)
        .await
        .context(StorageValidationSnafu {
            stage: "scenario-user-crud-subscription",
        })?;
    let reloaded = storage
        .get_user(1001)
        .await
        .context(StorageValidationSnafu {
            stage: "scenario-user-crud-reload",
        })?;

    let crud_ok = created.language == "ru"
        && relabeled.language == "en"
        && subscribed.is_subscribed
        && reloaded.as_ref() == Some(&subscribed);
    println!("user_crud={crud_ok}");
    if !crud_ok {
        return ScenarioFailedSnafu {
            stage: "scenario-user-crud-verify",
            scenario: "user_crud",
            reason: format!("unexpected user state: {reloaded:?}"),
        }
        .fail();
    }

    println!("runner_ok=true");
    Ok(())
}

async fn run_language_guard(db_path: &str) -> RunnerResult<()> {
    let storage = open(db_path, "scenario-language-guard-open").await?;
    storage
        .ensure_user(NewUser::new(1002))
        .await
        .context(StorageValidationSnafu {
            stage: "scenario-language-guard-ensure",
        })?;

    let blank_rejected = matches!(
        storage.update_language(1002, "   ").await,
        Err(StorageError::InvalidLanguage { .. })
    );
    let missing_rejected = matches!(
        storage.update_language(999_999, "en").await,
        Err(StorageError::NotFound { .. })
    );

    println!("blank_language_rejected={blank_rejected}");
    println!("missing_user_rejected={missing_rejected}");
    if !(blank_rejected && missing_rejected) {
        return ScenarioFailedSnafu {
            stage: "scenario-language-guard-verify",
            scenario: "language_guard",
            reason: "language updates accepted invalid input".to_string(),
        }
        .fail();
    }

    println!("runner_ok=true");
    Ok(())
}

fn reset_sqlite_files(db_path: &str) -> RunnerResult<()> {
    remove_file_if_exists(Path::new(db_path), "scenario-reset-sqlite-db")?;
    let wal_path = format!("{db_path}-wal");
    remove_file_if_exists(Path::new(&wal_path), "scenario-reset-sqlite-wal")?;
    let shm_path = format!("{db_path}-shm");
    remove_file_if_exists(Path::new(&shm_path), "scenario-reset-sqlite-shm")?;
    Ok(())
}

fn remove_file_if_exists(path: &Path, stage: &'static str) -> RunnerResult<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(source) if source.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(RunnerError::FileIo {
            stage,
            path: path.display().to_string(),
            source,
        }),
    }
}
