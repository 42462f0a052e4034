pub mod config;
pub mod cursor;
pub mod error;
pub mod ids;
pub mod keyboard;
pub mod notice;
pub mod ports;
pub mod scheduler;
mod state;
pub mod token;
pub mod types;

pub use config::SchedulerConfig;
pub use cursor::{Direction, RotationCursor};
pub use error::{SlideshowError, SlideshowResult};
pub use ids::{ChatId, MessageId, ParseIdError, UserId};
pub use keyboard::{ButtonTarget, ControlAction, Keyboard, KeyboardButton};
pub use notice::{NoticeKind, Phrasebook, StopKind};
pub use ports::{
    AckChannel, AckError, AckResult, BoxFuture, ContentCatalog, RenderBridge, RenderError,
    RenderResult, UserStore, UserStoreError, UserStoreResult,
};
pub use scheduler::{SchedulerPorts, SlideshowScheduler, StartedRotation, StopOutcome, StopTrigger};
pub use state::SlideshowSnapshot;
pub use token::{AckTicket, InteractionToken};
pub use types::{ActionOutcome, CatalogItem, ItemLink, Surface};
