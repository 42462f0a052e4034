use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::Arc;

use carousel_slideshow::{
    ChatId, ControlAction, Keyboard, MessageId, RenderBridge, SchedulerPorts, SlideshowScheduler,
    Surface, UserId,
};
use carousel_storage::{NewUser, SqliteStorage, StorageError, UserRecord, UserRepository};
use snafu::{ResultExt, Snafu};

use super::catalog::SettingsCatalog;
use super::console::{ConsoleAckChannel, ConsoleCommand, ConsoleRenderBridge};
use super::settings::SettingsStore;
use super::users::StoredUsers;

/// Message id used for a user's banner until a command names another one.
const HOME_MESSAGE_ID: i64 = 1;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum AppError {
    #[snafu(display("failed to open storage at '{path}' on `{stage}`: {source}"))]
    OpenStorage {
        stage: &'static str,
        path: String,
        source: StorageError,
    },
    #[snafu(display("storage call failed on `{stage}`: {source}"))]
    Storage {
        stage: &'static str,
        source: StorageError,
    },
    #[snafu(display("failed to read console input on `{stage}`: {source}"))]
    ReadInput {
        stage: &'static str,
        source: std::io::Error,
    },
}

pub type AppResult<T> = Result<T, AppError>;

pub struct App {
    settings: SettingsStore,
    storage: Arc<SqliteStorage>,
    scheduler: SlideshowScheduler,
    render: Arc<ConsoleRenderBridge>,
    ack: Arc<ConsoleAckChannel>,
    surfaces: HashMap<UserId, Surface>,
}

impl App {
    pub async fn bootstrap(settings: SettingsStore) -> AppResult<Self> {
        let snapshot = settings.settings();
        let storage = Arc::new(SqliteStorage::open(&snapshot.database_path).await.context(
            OpenStorageSnafu {
                stage: "bootstrap-open-storage",
                path: snapshot.database_path.clone(),
            },
        )?);
        Ok(Self::with_storage(settings, storage))
    }

    pub fn with_storage(settings: SettingsStore, storage: Arc<SqliteStorage>) -> Self {
        let snapshot = settings.settings();
        let config = snapshot.scheduler_config();
        let render = Arc::new(ConsoleRenderBridge::new());
        let ack = Arc::new(ConsoleAckChannel::new(config.ack_window));

        let scheduler = SlideshowScheduler::new(
            config,
            snapshot.phrasebook(),
            SchedulerPorts {
                users: Arc::new(StoredUsers::new(storage.clone())),
                catalog: Arc::new(SettingsCatalog::new(settings.shared())),
                render: render.clone(),
                ack: ack.clone(),
            },
        );

        Self {
            settings,
            storage,
            scheduler,
            render,
            ack,
            surfaces: HashMap::new(),
        }
    }

    pub fn scheduler(&self) -> &SlideshowScheduler {
        &self.scheduler
    }

    pub fn render(&self) -> &ConsoleRenderBridge {
        &self.render
    }

    pub async fn handle(&mut self, command: ConsoleCommand) -> AppResult<ControlFlow<()>> {
        match command {
            ConsoleCommand::Action {
                user_id,
                action,
                message_id,
            } => self.handle_action(user_id, action, message_id).await?,
            ConsoleCommand::Language { user_id, language } => {
                self.ensure_user(user_id).await?;
                let user = self
                    .storage
                    .update_language(user_id.get(), &language)
                    .await
                    .context(StorageSnafu {
                        stage: "handle-update-language",
                    })?;
                tracing::info!(user_id = %user_id, language = %user.language, "language updated");
            }
            ConsoleCommand::Show {
                user_id,
                message_id,
            } => self.handle_show(user_id, message_id).await?,
            ConsoleCommand::Delete { surface } => {
                self.render.delete(surface).await;
                tracing::info!(
                    chat_id = %surface.chat_id,
                    message_id = %surface.message_id,
                    "surface marked deleted"
                );
            }
            ConsoleCommand::Reload => match self.settings.reload() {
                Ok(settings) => {
                    let languages = settings
                        .catalog
                        .iter()
                        .map(|(language, items)| format!("{language}={}", items.len()))
                        .collect::<Vec<_>>()
                        .join(",");
                    tracing::info!(catalog = %languages, "catalog reloaded");
                }
                Err(error) => {
                    tracing::warn!(error = %error, "reload failed; keeping current settings");
                }
            },
            ConsoleCommand::Quit => return Ok(ControlFlow::Break(())),
        }

        Ok(ControlFlow::Continue(()))
    }

    /// Stops every rotation. Returns how many were running.
    pub async fn shutdown(&self) -> usize {
        self.scheduler.shutdown().await
    }

    async fn handle_action(
        &mut self,
        user_id: UserId,
        action: ControlAction,
        message_id: Option<MessageId>,
    ) -> AppResult<()> {
        self.ensure_user(user_id).await?;
        let surface = self.surface_for(user_id, message_id);
        let token = self.ack.issue().await;

        let outcome = self
            .scheduler
            .on_user_action(user_id, action, surface, token)
            .await;
        tracing::info!(user_id = %user_id, action = %action, outcome = ?outcome, "action handled");
        Ok(())
    }

    /// First display of the banner the user's cursor points at.
    async fn handle_show(
        &mut self,
        user_id: UserId,
        message_id: Option<MessageId>,
    ) -> AppResult<()> {
        let user = self.ensure_user(user_id).await?;
        let surface = self.surface_for(user_id, message_id);

        let Some(item) = self.scheduler.current_item(user_id, &user.language).await else {
            tracing::warn!(
                user_id = %user_id,
                language = %user.language,
                "no banners configured for this language"
            );
            return Ok(());
        };

        let playing = self.scheduler.is_playing(user_id).await;
        let keyboard = Keyboard::controls(playing).with_links(&item.links);
        if let Err(error) = self.render.edit_or_send(&surface, &item, &keyboard).await {
            tracing::warn!(user_id = %user_id, error = %error, "could not show banner");
        }
        Ok(())
    }

    async fn ensure_user(&self, user_id: UserId) -> AppResult<UserRecord> {
        let language = self.settings.settings().default_language.clone();
        self.storage
            .ensure_user(NewUser::new(user_id.get()).with_language(language))
            .await
            .context(StorageSnafu {
                stage: "ensure-user",
            })
    }

    // Private chats share the user's id, so the chat half of the surface is derived from it.
    fn surface_for(&mut self, user_id: UserId, message_id: Option<MessageId>) -> Surface {
        let surface = match message_id {
            Some(message_id) => Surface::new(chat_for(user_id), message_id),
            None => self.surfaces.get(&user_id).copied().unwrap_or_else(|| {
                Surface::new(chat_for(user_id), MessageId::new(HOME_MESSAGE_ID))
            }),
        };
        self.surfaces.insert(user_id, surface);
        surface
    }
}

fn chat_for(user_id: UserId) -> ChatId {
    ChatId::new(i64::try_from(user_id.get()).unwrap_or(i64::MAX))
}
