/// Language assigned to users created before they picked one.
pub const DEFAULT_USER_LANGUAGE: &str = "ru";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub user_id: u64,
    pub language: String,
    pub is_subscribed: bool,
    pub created_at_unix_seconds: u64,
    pub updated_at_unix_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub user_id: u64,
    pub language: String,
}

impl NewUser {
    pub fn new(user_id: u64) -> Self {
        Self {
            user_id,
            language: DEFAULT_USER_LANGUAGE.to_string(),
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }
}
