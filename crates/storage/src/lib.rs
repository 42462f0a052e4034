use std::future::Future;
use std::pin::Pin;

pub mod error;
pub mod sqlite;
pub mod types;

pub use error::{StorageError, StorageResult};
pub use sqlite::SqliteStorage;
pub use types::{DEFAULT_USER_LANGUAGE, NewUser, UserRecord};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait UserRepository: Send + Sync {
    fn get_user<'a>(&'a self, user_id: u64) -> BoxFuture<'a, StorageResult<Option<UserRecord>>>;

    /// Returns the existing row untouched, or inserts `input`.
    fn ensure_user<'a>(&'a self, input: NewUser) -> BoxFuture<'a, StorageResult<UserRecord>>;

    fn update_language<'a>(
        &'a self,
        user_id: u64,
        language: &'a str,
    ) -> BoxFuture<'a, StorageResult<UserRecord>>;

    fn update_subscription<'a>(
        &'a self,
        user_id: u64,
        is_subscribed: bool,
    ) -> BoxFuture<'a, StorageResult<UserRecord>>;
}
