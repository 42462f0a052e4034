use serde::{Deserialize, Serialize};

use super::ids::{ChatId, MessageId};

/// The single chat message a rotation keeps editing in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Surface {
    pub chat_id: ChatId,
    pub message_id: MessageId,
}

impl Surface {
    pub fn new(chat_id: impl Into<ChatId>, message_id: impl Into<MessageId>) -> Self {
        Self {
            chat_id: chat_id.into(),
            message_id: message_id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemLink {
    pub label: String,
    pub url: String,
}

/// One rotation entry: caption text plus the media shown above it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: String,
    pub caption: String,
    pub media_url: String,
    #[serde(default)]
    pub links: Vec<ItemLink>,
}

impl CatalogItem {
    pub fn new(
        id: impl Into<String>,
        caption: impl Into<String>,
        media_url: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            caption: caption.into(),
            media_url: media_url.into(),
            links: Vec::new(),
        }
    }

    pub fn with_link(mut self, label: impl Into<String>, url: impl Into<String>) -> Self {
        self.links.push(ItemLink {
            label: label.into(),
            url: url.into(),
        });
        self
    }

    /// Same item with a notice appended below the caption after a blank line.
    pub fn with_caption_notice(&self, notice: &str) -> Self {
        let mut annotated = self.clone();
        annotated.caption = format!("{}\n\n{}", self.caption, notice);
        annotated
    }
}

/// What the rest of the bot sees after handing a tap to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    Ok,
    NotPlaying,
    ContentUnavailable,
    RenderFailed,
}
