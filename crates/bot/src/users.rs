use std::sync::Arc;

use carousel_slideshow::{BoxFuture, UserId, UserStore, UserStoreError, UserStoreResult};
use carousel_storage::UserRepository;

/// Exposes the persisted user language to the scheduler.
pub struct StoredUsers {
    repository: Arc<dyn UserRepository>,
}

impl StoredUsers {
    pub fn new(repository: Arc<dyn UserRepository>) -> Self {
        Self { repository }
    }
}

impl UserStore for StoredUsers {
    fn language<'a>(&'a self, user_id: UserId) -> BoxFuture<'a, UserStoreResult<String>> {
        Box::pin(async move {
            match self.repository.get_user(user_id.get()).await {
                Ok(Some(user)) => Ok(user.language),
                Ok(None) => Err(UserStoreError::NotFound {
                    stage: "stored-users-get",
                    user_id,
                }),
                Err(error) => Err(UserStoreError::Backend {
                    stage: "stored-users-get",
                    details: error.to_string(),
                }),
            }
        })
    }
}
