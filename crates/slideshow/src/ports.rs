use std::future::Future;
use std::pin::Pin;

use snafu::Snafu;

use super::ids::{ChatId, MessageId, UserId};
use super::keyboard::Keyboard;
use super::token::AckTicket;
use super::types::{CatalogItem, Surface};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub type RenderResult<T> = Result<T, RenderError>;
pub type AckResult<T> = Result<T, AckError>;
pub type UserStoreResult<T> = Result<T, UserStoreError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum RenderError {
    #[snafu(display("message {message_id} in chat {chat_id} can no longer be edited"))]
    SurfaceGone {
        stage: &'static str,
        chat_id: ChatId,
        message_id: MessageId,
    },
    #[snafu(display("render transport failed on `{stage}`: {details}"))]
    Transport {
        stage: &'static str,
        details: String,
    },
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum AckError {
    #[snafu(display("tap '{token_id}' was rejected: {reason}"))]
    Rejected {
        stage: &'static str,
        token_id: String,
        reason: String,
    },
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum UserStoreError {
    #[snafu(display("user {user_id} was not found"))]
    NotFound {
        stage: &'static str,
        user_id: UserId,
    },
    #[snafu(display("user store failed on `{stage}`: {details}"))]
    Backend {
        stage: &'static str,
        details: String,
    },
}

pub trait UserStore: Send + Sync {
    fn language<'a>(&'a self, user_id: UserId) -> BoxFuture<'a, UserStoreResult<String>>;
}

/// Ordered rotation items per language. Read on every access, so implementations may change
/// their contents at any time.
pub trait ContentCatalog: Send + Sync {
    fn items(&self, language: &str) -> Vec<CatalogItem>;
}

pub trait RenderBridge: Send + Sync {
    /// Replaces the surface's media, caption and keyboard, or sends a fresh message when the
    /// surface cannot be edited in place.
    fn edit_or_send<'a>(
        &'a self,
        surface: &'a Surface,
        item: &'a CatalogItem,
        keyboard: &'a Keyboard,
    ) -> BoxFuture<'a, RenderResult<()>>;

    fn edit_keyboard_only<'a>(
        &'a self,
        surface: &'a Surface,
        keyboard: &'a Keyboard,
    ) -> BoxFuture<'a, RenderResult<()>>;
}

/// Answers a single tap. Rejection is routine (the platform only accepts one answer per tap
/// within a short window) and callers treat it as non-fatal.
pub trait AckChannel: Send + Sync {
    /// `text` of `None` clears the tap's spinner without showing anything.
    fn acknowledge<'a>(
        &'a self,
        ticket: AckTicket,
        text: Option<String>,
    ) -> BoxFuture<'a, AckResult<()>>;
}
