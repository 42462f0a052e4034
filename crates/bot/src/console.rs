use std::collections::{HashMap, HashSet};
use std::time::Duration;

use carousel_slideshow::ports::{RejectedSnafu, SurfaceGoneSnafu};
use carousel_slideshow::{
    AckChannel, AckResult, AckTicket, BoxFuture, ButtonTarget, CatalogItem, ChatId,
    ControlAction, InteractionToken, Keyboard, MessageId, ParseIdError, RenderBridge,
    RenderResult, Surface, UserId,
};
use snafu::{OptionExt, ResultExt, Snafu};
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Last frame shown on a surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedSurface {
    pub item_id: Option<String>,
    pub caption: Option<String>,
    pub media_url: Option<String>,
    pub keyboard: Keyboard,
}

#[derive(Debug, Default)]
struct ConsoleSurfaces {
    frames: HashMap<Surface, RenderedSurface>,
    deleted: HashSet<Surface>,
}

/// Render bridge that logs each frame instead of talking to a chat platform. Surfaces can
/// be marked deleted to reproduce a message that no longer exists.
#[derive(Debug, Default)]
pub struct ConsoleRenderBridge {
    surfaces: Mutex<ConsoleSurfaces>,
}

impl ConsoleRenderBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn delete(&self, surface: Surface) -> bool {
        let mut surfaces = self.surfaces.lock().await;
        surfaces.frames.remove(&surface);
        surfaces.deleted.insert(surface)
    }

    pub async fn rendered(&self, surface: &Surface) -> Option<RenderedSurface> {
        self.surfaces.lock().await.frames.get(surface).cloned()
    }
}

impl RenderBridge for ConsoleRenderBridge {
    fn edit_or_send<'a>(
        &'a self,
        surface: &'a Surface,
        item: &'a CatalogItem,
        keyboard: &'a Keyboard,
    ) -> BoxFuture<'a, RenderResult<()>> {
        Box::pin(async move {
            let mut surfaces = self.surfaces.lock().await;
            if surfaces.deleted.contains(surface) {
                return SurfaceGoneSnafu {
                    stage: "console-edit-or-send",
                    chat_id: surface.chat_id,
                    message_id: surface.message_id,
                }
                .fail();
            }

            let mode = if surfaces.frames.contains_key(surface) {
                "edit"
            } else {
                "send"
            };
            surfaces.frames.insert(
                *surface,
                RenderedSurface {
                    item_id: Some(item.id.clone()),
                    caption: Some(item.caption.clone()),
                    media_url: Some(item.media_url.clone()),
                    keyboard: keyboard.clone(),
                },
            );

            tracing::info!(
                mode,
                chat_id = %surface.chat_id,
                message_id = %surface.message_id,
                item_id = %item.id,
                media_url = %item.media_url,
                caption = %item.caption,
                keyboard = %describe_keyboard(keyboard),
                "banner rendered"
            );
            Ok(())
        })
    }

    fn edit_keyboard_only<'a>(
        &'a self,
        surface: &'a Surface,
        keyboard: &'a Keyboard,
    ) -> BoxFuture<'a, RenderResult<()>> {
        Box::pin(async move {
            let mut surfaces = self.surfaces.lock().await;
            if surfaces.deleted.contains(surface) {
                return SurfaceGoneSnafu {
                    stage: "console-edit-keyboard",
                    chat_id: surface.chat_id,
                    message_id: surface.message_id,
                }
                .fail();
            }

            let frame = surfaces
                .frames
                .entry(*surface)
                .or_insert_with(|| RenderedSurface {
                    item_id: None,
                    caption: None,
                    media_url: None,
                    keyboard: Keyboard::default(),
                });
            frame.keyboard = keyboard.clone();

            tracing::info!(
                chat_id = %surface.chat_id,
                message_id = %surface.message_id,
                keyboard = %describe_keyboard(keyboard),
                "controls updated"
            );
            Ok(())
        })
    }
}

/// Mints tap tokens and answers each at most once, within `window` of its issue time.
#[derive(Debug)]
pub struct ConsoleAckChannel {
    window: Duration,
    issued: Mutex<HashMap<String, Instant>>,
}

impl ConsoleAckChannel {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            issued: Mutex::new(HashMap::new()),
        }
    }

    pub async fn issue(&self) -> InteractionToken {
        let token = InteractionToken::new(uuid::Uuid::new_v4().to_string());
        let mut issued = self.issued.lock().await;
        // Taps older than the window can never be answered again.
        let now = Instant::now();
        issued.retain(|_, issued_at| now.saturating_duration_since(*issued_at) <= self.window);
        issued.insert(token.id().to_string(), token.issue_time());
        token
    }
}

impl AckChannel for ConsoleAckChannel {
    fn acknowledge<'a>(
        &'a self,
        ticket: AckTicket,
        text: Option<String>,
    ) -> BoxFuture<'a, AckResult<()>> {
        Box::pin(async move {
            let token_id = ticket.into_id();
            let issued_at = self
                .issued
                .lock()
                .await
                .remove(&token_id)
                .context(RejectedSnafu {
                    stage: "console-ack-lookup",
                    token_id: token_id.clone(),
                    reason: "unknown or already answered",
                })?;

            if Instant::now().saturating_duration_since(issued_at) > self.window {
                return RejectedSnafu {
                    stage: "console-ack-window",
                    token_id,
                    reason: "answer window elapsed",
                }
                .fail();
            }

            match text {
                Some(text) => tracing::info!(token_id = %token_id, text = %text, "tap answered"),
                None => tracing::debug!(token_id = %token_id, "tap answered silently"),
            }
            Ok(())
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Action {
        user_id: UserId,
        action: ControlAction,
        message_id: Option<MessageId>,
    },
    Language {
        user_id: UserId,
        language: String,
    },
    Show {
        user_id: UserId,
        message_id: Option<MessageId>,
    },
    Delete {
        surface: Surface,
    },
    Reload,
    Quit,
}

impl ConsoleCommand {
    /// Parses one stdin line. Blank lines and `#` comments yield `None`.
    pub fn parse(line: &str) -> CommandResult<Option<Self>> {
        let mut words = line.split_whitespace();
        let Some(head) = words.next() else {
            return Ok(None);
        };
        if head.starts_with('#') {
            return Ok(None);
        }

        let command = match head {
            "quit" | "exit" => Self::Quit,
            "reload" => Self::Reload,
            "lang" => Self::Language {
                user_id: parse_user(words.next(), "lang")?,
                language: words
                    .next()
                    .context(MissingArgumentSnafu {
                        stage: "parse-lang-code",
                        command: "lang",
                        argument: "language",
                    })?
                    .to_string(),
            },
            "show" => Self::Show {
                user_id: parse_user(words.next(), "show")?,
                message_id: parse_message(words.next())?,
            },
            "delete" => {
                let chat_id = words.next().context(MissingArgumentSnafu {
                    stage: "parse-delete-chat",
                    command: "delete",
                    argument: "chat_id",
                })?;
                let message_id = words.next().context(MissingArgumentSnafu {
                    stage: "parse-delete-message",
                    command: "delete",
                    argument: "message_id",
                })?;
                Self::Delete {
                    surface: Surface::new(
                        ChatId::parse(chat_id).context(InvalidIdSnafu {
                            stage: "parse-delete-chat",
                        })?,
                        MessageId::parse(message_id).context(InvalidIdSnafu {
                            stage: "parse-delete-message",
                        })?,
                    ),
                }
            }
            raw_user => {
                let user_id = UserId::parse(raw_user).context(InvalidIdSnafu {
                    stage: "parse-action-user",
                })?;
                let raw_action = words.next().context(MissingArgumentSnafu {
                    stage: "parse-action-name",
                    command: "action",
                    argument: "prev|next|play|stop",
                })?;
                let action = raw_action
                    .parse::<ControlAction>()
                    .ok()
                    .context(UnknownActionSnafu {
                        stage: "parse-action-name",
                        raw: raw_action.to_string(),
                    })?;
                Self::Action {
                    user_id,
                    action,
                    message_id: parse_message(words.next())?,
                }
            }
        };

        if let Some(extra) = words.next() {
            return TrailingInputSnafu {
                stage: "parse-trailing-input",
                raw: extra.to_string(),
            }
            .fail();
        }

        Ok(Some(command))
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CommandError {
    #[snafu(display("`{command}` needs <{argument}>"))]
    MissingArgument {
        stage: &'static str,
        command: &'static str,
        argument: &'static str,
    },
    #[snafu(display("{source}"))]
    InvalidId {
        stage: &'static str,
        source: ParseIdError,
    },
    #[snafu(display("unknown action '{raw}', expected prev, next, play or stop"))]
    UnknownAction { stage: &'static str, raw: String },
    #[snafu(display("unexpected trailing input '{raw}'"))]
    TrailingInput { stage: &'static str, raw: String },
}

pub type CommandResult<T> = Result<T, CommandError>;

fn parse_user(raw: Option<&str>, command: &'static str) -> CommandResult<UserId> {
    let raw = raw.context(MissingArgumentSnafu {
        stage: "parse-user-id",
        command,
        argument: "user_id",
    })?;
    UserId::parse(raw).context(InvalidIdSnafu {
        stage: "parse-user-id",
    })
}

fn parse_message(raw: Option<&str>) -> CommandResult<Option<MessageId>> {
    raw.map(MessageId::parse)
        .transpose()
        .context(InvalidIdSnafu {
            stage: "parse-message-id",
        })
}

fn describe_keyboard(keyboard: &Keyboard) -> String {
    keyboard
        .rows
        .iter()
        .map(|row| {
            row.iter()
                .map(|button| match &button.target {
                    ButtonTarget::Callback(_) => button.label.clone(),
                    ButtonTarget::Url(url) => format!("{} <{url}>", button.label),
                })
                .collect::<Vec<_>>()
                .join(" | ")
        })
        .collect::<Vec<_>>()
        .join(" / ")
}
