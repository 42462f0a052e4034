use std::sync::Arc;

use futures::future::join_all;
use snafu::ResultExt;
use tokio::sync::Mutex;
use tokio::time::{Instant, MissedTickBehavior};

use super::config::SchedulerConfig;
use super::cursor::{Direction, RotationCursor};
use super::error::{ContentUnavailableSnafu, RenderSnafu, SlideshowResult};
use super::ids::UserId;
use super::keyboard::{ControlAction, Keyboard};
use super::notice::{NoticeKind, Phrasebook, StopKind};
use super::ports::{AckChannel, ContentCatalog, RenderBridge, UserStore, UserStoreError};
use super::state::{
    Registry, RotationTimers, SlideshowSnapshot, SlideshowState, TimerKind, UserSlot,
};
use super::token::{AckTicket, InteractionToken};
use super::types::{ActionOutcome, CatalogItem, Surface};

/// External collaborators the scheduler talks to.
#[derive(Clone)]
pub struct SchedulerPorts {
    pub users: Arc<dyn UserStore>,
    pub catalog: Arc<dyn ContentCatalog>,
    pub render: Arc<dyn RenderBridge>,
    pub ack: Arc<dyn AckChannel>,
}

/// Who asked for a rotation to end. The stop notice is derived from elapsed time; only
/// `CatalogEmptied` changes what the pending tap is answered with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopTrigger {
    Manual,
    Expired,
    Shutdown,
    CatalogEmptied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    NotPlaying,
    Stopped(StopKind),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartedRotation {
    pub generation: u64,
    pub item: CatalogItem,
}

struct DetachedRotation {
    generation: u64,
    surface: Surface,
    language: String,
    was_playing: bool,
    last_interaction_at: Instant,
    pending_token: Option<InteractionToken>,
    item: Option<CatalogItem>,
}

enum NavigationPlan {
    Unavailable {
        token: InteractionToken,
        language: String,
    },
    Ready {
        item: CatalogItem,
        index: usize,
        language: String,
        rotation: Option<(u64, Surface)>,
        idle_token: Option<InteractionToken>,
    },
}

struct SchedulerInner {
    config: SchedulerConfig,
    phrasebook: Phrasebook,
    ports: SchedulerPorts,
    registry: Mutex<Registry>,
}

/// Starts, advances and stops per-user rotations.
///
/// Every mutation of a user's state happens while holding the registry lock and before any
/// collaborator call is awaited. Timer callbacks carry the generation of the rotation that
/// spawned them and re-check it after every await, so a callback that outlives its rotation
/// does nothing.
#[derive(Clone)]
pub struct SlideshowScheduler {
    inner: Arc<SchedulerInner>,
}

impl SlideshowScheduler {
    pub fn new(config: SchedulerConfig, phrasebook: Phrasebook, ports: SchedulerPorts) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                config: config.normalized(),
                phrasebook,
                ports,
                registry: Mutex::new(Registry::default()),
            }),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Single entry point for taps on the rotation controls.
    pub async fn on_user_action(
        &self,
        user_id: UserId,
        action: ControlAction,
        surface: Surface,
        token: InteractionToken,
    ) -> ActionOutcome {
        tracing::debug!(
            user_id = %user_id,
            action = %action,
            chat_id = %surface.chat_id,
            message_id = %surface.message_id,
            "rotation control tapped"
        );
        let language = self.resolve_language(user_id).await;

        match action {
            ControlAction::Play => self.play(user_id, surface, language, token).await,
            ControlAction::Stop => self.stop_on_request(user_id, language, token).await,
            ControlAction::Prev | ControlAction::Next => {
                let direction = action.direction().unwrap_or(Direction::Forward);
                match self
                    .on_manual_navigate(user_id, direction, surface, language, token)
                    .await
                {
                    Ok(()) => ActionOutcome::Ok,
                    Err(error) => error.outcome(),
                }
            }
        }
    }

    /// Begins a rotation on `surface`, tearing down any rotation the user already has.
    ///
    /// The tap is answered right away; no surface is rendered until the first tick.
    pub async fn start(
        &self,
        user_id: UserId,
        surface: Surface,
        language: String,
        mut token: InteractionToken,
    ) -> SlideshowResult<StartedRotation> {
        let now = Instant::now();
        let mut items = self.inner.ports.catalog.items(&language);
        if items.is_empty() {
            tracing::warn!(
                user_id = %user_id,
                language = %language,
                "cannot start rotation because the catalog is empty"
            );
            self.acknowledge(&mut token, Some(NoticeKind::ContentUnavailable), &language)
                .await;
            return ContentUnavailableSnafu {
                stage: "start-check-catalog",
                language,
            }
            .fail();
        }

        let (generation, item, previous, ticket) = {
            let mut registry = self.inner.registry.lock().await;
            let generation = registry.next_generation();
            let slot = registry.slots.entry(user_id).or_default();
            let index = slot.cursor.resolve(items.len()).unwrap_or_default();

            let previous = slot.slideshow.take().map(|previous| {
                tracing::debug!(
                    user_id = %user_id,
                    generation = previous.generation,
                    "replacing running rotation"
                );
                previous.timers.cancel(None);
                (previous.surface, previous.pending_token, previous.language)
            });

            let timers = self.spawn_timers(user_id, generation);
            let ticket = token.redeem(now, self.inner.config.ack_window);
            slot.slideshow = Some(SlideshowState {
                generation,
                surface,
                language: language.clone(),
                timers,
                started_at: now,
                last_interaction_at: now,
                last_advanced_at: None,
                pending_token: Some(token),
            });

            (generation, items.swap_remove(index), previous, ticket)
        };

        tracing::info!(
            user_id = %user_id,
            generation,
            chat_id = %surface.chat_id,
            message_id = %surface.message_id,
            language = %language,
            "rotation started"
        );

        if let Some((previous_surface, previous_token, previous_language)) = previous {
            if previous_surface != surface
                && let Err(error) = self
                    .inner
                    .ports
                    .render
                    .edit_keyboard_only(&previous_surface, &Keyboard::controls(false))
                    .await
            {
                tracing::debug!(
                    user_id = %user_id,
                    chat_id = %previous_surface.chat_id,
                    message_id = %previous_surface.message_id,
                    error = %error,
                    "could not reset controls on the previous surface"
                );
            }
            // A tap made during the replaced rotation still gets its spinner cleared.
            if let Some(mut token) = previous_token {
                self.acknowledge(&mut token, None, &previous_language).await;
            }
        }

        self.send_ack(ticket, Some(NoticeKind::Started), &language).await;

        Ok(StartedRotation { generation, item })
    }

    /// Ends the user's rotation. Safe to call when nothing is rotating.
    pub async fn stop(&self, user_id: UserId, trigger: StopTrigger) -> StopOutcome {
        let running = match trigger {
            StopTrigger::Expired => Some(TimerKind::Expiry),
            StopTrigger::Manual | StopTrigger::Shutdown | StopTrigger::CatalogEmptied => None,
        };

        let Some(detached) = self.detach(user_id, None, running).await else {
            tracing::debug!(
                user_id = %user_id,
                trigger = ?trigger,
                "stop requested but nothing is rotating"
            );
            return StopOutcome::NotPlaying;
        };

        self.settle(user_id, detached, trigger).await
    }

    /// Steps the cursor and shows the new item. A running rotation keeps its timers; the
    /// tap only refreshes the interaction time and becomes the tap answered on stop.
    pub async fn on_manual_navigate(
        &self,
        user_id: UserId,
        direction: Direction,
        surface: Surface,
        language: String,
        token: InteractionToken,
    ) -> SlideshowResult<()> {
        let now = Instant::now();
        let plan = {
            let mut registry = self.inner.registry.lock().await;
            plan_navigation(
                &mut registry,
                self.inner.ports.catalog.as_ref(),
                user_id,
                direction,
                language,
                token,
                now,
            )
        };

        let (item, index, language, rotation, idle_token) = match plan {
            NavigationPlan::Unavailable {
                mut token,
                language,
            } => {
                tracing::warn!(
                    user_id = %user_id,
                    language = %language,
                    "cannot navigate because the catalog is empty"
                );
                self.acknowledge(&mut token, Some(NoticeKind::ContentUnavailable), &language)
                    .await;
                return ContentUnavailableSnafu {
                    stage: "navigate-advance-cursor",
                    language,
                }
                .fail();
            }
            NavigationPlan::Ready {
                item,
                index,
                language,
                rotation,
                idle_token,
            } => (item, index, language, rotation, idle_token),
        };

        let keyboard = Keyboard::controls(rotation.is_some()).with_links(&item.links);
        tracing::debug!(
            user_id = %user_id,
            direction = ?direction,
            index,
            item_id = %item.id,
            rotating = rotation.is_some(),
            "manual navigation"
        );

        let rendered = self
            .inner
            .ports
            .render
            .edit_or_send(&surface, &item, &keyboard)
            .await;

        if let Err(error) = &rendered {
            tracing::warn!(
                user_id = %user_id,
                chat_id = %surface.chat_id,
                message_id = %surface.message_id,
                error = %error,
                "manual navigation could not be rendered"
            );

            let mut owed = idle_token;
            if let Some((generation, rotation_surface)) = rotation
                && rotation_surface == surface
                && let Some(detached) = self.detach(user_id, Some(generation), None).await
            {
                tracing::info!(
                    user_id = %user_id,
                    generation,
                    "rotation ended because its surface is gone"
                );
                owed = detached.pending_token;
            }
            if let Some(mut token) = owed {
                self.acknowledge(&mut token, Some(NoticeKind::RenderFailed), &language)
                    .await;
            }
        } else if let Some(mut token) = idle_token {
            self.acknowledge(&mut token, None, &language).await;
        }

        rendered.context(RenderSnafu {
            stage: "navigate-render",
        })
    }

    /// Stops every running rotation, for process shutdown. Returns how many were stopped.
    pub async fn shutdown(&self) -> usize {
        let users = {
            let registry = self.inner.registry.lock().await;
            registry
                .slots
                .iter()
                .filter(|(_, slot)| slot.slideshow.is_some())
                .map(|(user_id, _)| *user_id)
                .collect::<Vec<_>>()
        };

        let outcomes = join_all(
            users
                .iter()
                .map(|user_id| self.stop(*user_id, StopTrigger::Shutdown)),
        )
        .await;
        let stopped = outcomes
            .iter()
            .filter(|outcome| matches!(outcome, StopOutcome::Stopped(_)))
            .count();

        tracing::info!(stopped, "slideshow scheduler shut down");
        stopped
    }

    pub async fn is_playing(&self, user_id: UserId) -> bool {
        let registry = self.inner.registry.lock().await;
        registry
            .slots
            .get(&user_id)
            .and_then(|slot| slot.slideshow.as_ref())
            .is_some_and(SlideshowState::is_active)
    }

    pub async fn snapshot(&self, user_id: UserId) -> Option<SlideshowSnapshot> {
        let registry = self.inner.registry.lock().await;
        let slot = registry.slots.get(&user_id)?;
        slot.slideshow
            .as_ref()
            .map(|state| state.snapshot(slot.cursor.index()))
    }

    /// Cursor index as last stored, without repairing it against the catalog.
    pub async fn position(&self, user_id: UserId) -> usize {
        let registry = self.inner.registry.lock().await;
        registry
            .slots
            .get(&user_id)
            .map_or(0, |slot| slot.cursor.index())
    }

    /// Item the user's cursor points at. A running rotation's language wins over `language`.
    pub async fn current_item(&self, user_id: UserId, language: &str) -> Option<CatalogItem> {
        let registry = self.inner.registry.lock().await;
        let slot = registry.slots.get(&user_id);
        let language = slot
            .and_then(|slot| slot.slideshow.as_ref())
            .map_or(language, |state| state.language.as_str());
        let mut cursor = slot.map(|slot| slot.cursor).unwrap_or_default();
        let mut items = self.inner.ports.catalog.items(language);
        let index = cursor.resolve(items.len())?;
        Some(items.swap_remove(index))
    }

    async fn play(
        &self,
        user_id: UserId,
        surface: Surface,
        language: String,
        token: InteractionToken,
    ) -> ActionOutcome {
        let started = match self.start(user_id, surface, language, token).await {
            Ok(started) => started,
            Err(error) => return error.outcome(),
        };

        let keyboard = Keyboard::controls(true).with_links(&started.item.links);
        if let Err(error) = self
            .inner
            .ports
            .render
            .edit_keyboard_only(&surface, &keyboard)
            .await
        {
            tracing::warn!(
                user_id = %user_id,
                generation = started.generation,
                error = %error,
                "could not show the stop control; abandoning rotation"
            );
            self.detach(user_id, Some(started.generation), None).await;
            return ActionOutcome::RenderFailed;
        }

        ActionOutcome::Ok
    }

    async fn stop_on_request(
        &self,
        user_id: UserId,
        language: String,
        token: InteractionToken,
    ) -> ActionOutcome {
        let leftover = {
            let mut registry = self.inner.registry.lock().await;
            match registry
                .slots
                .get_mut(&user_id)
                .and_then(UserSlot::active_slideshow_mut)
            {
                Some(state) if token.is_well_formed() => {
                    state.pending_token = Some(token);
                    None
                }
                _ => Some(token),
            }
        };

        match self.stop(user_id, StopTrigger::Manual).await {
            StopOutcome::Stopped(_) => ActionOutcome::Ok,
            StopOutcome::NotPlaying => {
                if let Some(mut token) = leftover {
                    self.acknowledge(&mut token, None, &language).await;
                }
                ActionOutcome::NotPlaying
            }
        }
    }

    fn spawn_timers(&self, user_id: UserId, generation: u64) -> RotationTimers {
        let period = self.inner.config.tick_interval;
        let ticker_scheduler = self.clone();
        let tick = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !ticker_scheduler.tick(user_id, generation).await {
                    break;
                }
            }
        });

        let expires_after = self.inner.config.expiry;
        let expiry_scheduler = self.clone();
        let expiry = tokio::spawn(async move {
            tokio::time::sleep(expires_after).await;
            expiry_scheduler.expire(user_id, generation).await;
        });

        RotationTimers::new(tick, expiry)
    }

    /// One automatic advance. Returns whether the rotation should keep ticking.
    pub(crate) async fn tick(&self, user_id: UserId, generation: u64) -> bool {
        let now = Instant::now();
        let advanced = {
            let mut registry = self.inner.registry.lock().await;
            let Some(UserSlot { cursor, slideshow }) = registry.slots.get_mut(&user_id) else {
                tracing::debug!(user_id = %user_id, generation, "tick for unknown user ignored");
                return false;
            };
            let Some(state) = slideshow
                .as_mut()
                .filter(|state| state.generation == generation && state.is_active())
            else {
                tracing::debug!(user_id = %user_id, generation, "stale tick ignored");
                return false;
            };

            let mut items = self.inner.ports.catalog.items(&state.language);
            match cursor.advance(Direction::Forward.step(), items.len()) {
                Some(index) => {
                    state.last_advanced_at = Some(now);
                    Some((state.surface, items.swap_remove(index), index))
                }
                None => {
                    tracing::warn!(
                        user_id = %user_id,
                        generation,
                        language = %state.language,
                        "catalog emptied during rotation; ending it"
                    );
                    None
                }
            }
        };

        let Some((surface, item, index)) = advanced else {
            if let Some(detached) = self
                .detach(user_id, Some(generation), Some(TimerKind::Tick))
                .await
            {
                self.settle(user_id, detached, StopTrigger::CatalogEmptied).await;
            }
            return false;
        };

        let keyboard = Keyboard::controls(true).with_links(&item.links);
        if let Err(error) = self
            .inner
            .ports
            .render
            .edit_or_send(&surface, &item, &keyboard)
            .await
        {
            tracing::warn!(
                user_id = %user_id,
                generation,
                chat_id = %surface.chat_id,
                message_id = %surface.message_id,
                error = %error,
                "tick render failed; ending rotation"
            );
            self.detach(user_id, Some(generation), Some(TimerKind::Tick)).await;
            return false;
        }

        tracing::debug!(
            user_id = %user_id,
            generation,
            index,
            item_id = %item.id,
            "rotation advanced"
        );

        // A stop may have landed while the edit was in flight.
        self.is_current(user_id, generation).await
    }

    async fn expire(&self, user_id: UserId, generation: u64) {
        let Some(detached) = self
            .detach(user_id, Some(generation), Some(TimerKind::Expiry))
            .await
        else {
            tracing::debug!(user_id = %user_id, generation, "stale expiry ignored");
            return;
        };

        self.settle(user_id, detached, StopTrigger::Expired).await;
    }

    async fn is_current(&self, user_id: UserId, generation: u64) -> bool {
        let registry = self.inner.registry.lock().await;
        registry
            .slots
            .get(&user_id)
            .and_then(|slot| slot.slideshow.as_ref())
            .is_some_and(|state| state.generation == generation && state.is_active())
    }

    /// Removes the rotation (optionally only the one with `generation`) under the lock, then
    /// cancels its timers. Nothing is awaited between the two.
    async fn detach(
        &self,
        user_id: UserId,
        generation: Option<u64>,
        running: Option<TimerKind>,
    ) -> Option<DetachedRotation> {
        let (state, mut cursor): (SlideshowState, RotationCursor) = {
            let mut registry = self.inner.registry.lock().await;
            registry.take_matching(user_id, generation)?
        };

        let SlideshowState {
            generation,
            surface,
            language,
            timers,
            last_interaction_at,
            pending_token,
            ..
        } = state;
        let was_playing = timers.is_live();
        timers.cancel(running);

        let items = self.inner.ports.catalog.items(&language);
        let item = cursor
            .resolve(items.len())
            .and_then(|index| items.into_iter().nth(index));

        Some(DetachedRotation {
            generation,
            surface,
            language,
            was_playing,
            last_interaction_at,
            pending_token,
            item,
        })
    }

    /// Visible side of a stop: swap the control back to play, tell the user why, answer
    /// the pending tap. All of it is best-effort.
    async fn settle(
        &self,
        user_id: UserId,
        detached: DetachedRotation,
        trigger: StopTrigger,
    ) -> StopOutcome {
        let DetachedRotation {
            generation,
            surface,
            language,
            was_playing,
            last_interaction_at,
            pending_token,
            item,
        } = detached;

        if !was_playing {
            tracing::debug!(
                user_id = %user_id,
                generation,
                "rotation had already wound down"
            );
            return StopOutcome::NotPlaying;
        }

        let now = Instant::now();
        let kind = StopKind::classify(
            now.saturating_duration_since(last_interaction_at),
            self.inner.config.auto_stop_threshold,
        );
        let links = item
            .as_ref()
            .map(|item| item.links.as_slice())
            .unwrap_or_default();
        let keyboard = Keyboard::controls(false).with_links(links);

        let rendered = match (kind, item.as_ref()) {
            (StopKind::ByTimer, Some(item)) => {
                let notice = self.inner.phrasebook.text(&language, kind.notice());
                let annotated = item.with_caption_notice(notice);
                self.inner
                    .ports
                    .render
                    .edit_or_send(&surface, &annotated, &keyboard)
                    .await
            }
            _ => {
                self.inner
                    .ports
                    .render
                    .edit_keyboard_only(&surface, &keyboard)
                    .await
            }
        };
        if let Err(error) = rendered {
            tracing::warn!(
                user_id = %user_id,
                generation,
                chat_id = %surface.chat_id,
                message_id = %surface.message_id,
                error = %error,
                "could not update the surface after stop"
            );
        }

        let answer = match trigger {
            StopTrigger::CatalogEmptied => NoticeKind::ContentUnavailable,
            _ => kind.notice(),
        };
        if let Some(mut token) = pending_token {
            self.acknowledge(&mut token, Some(answer), &language).await;
        }

        tracing::info!(
            user_id = %user_id,
            generation,
            trigger = ?trigger,
            stop_kind = ?kind,
            "rotation stopped"
        );
        StopOutcome::Stopped(kind)
    }

    async fn resolve_language(&self, user_id: UserId) -> String {
        let fallback = || self.inner.config.default_language.clone();
        match self.inner.ports.users.language(user_id).await {
            Ok(language) if !language.trim().is_empty() => language.trim().to_string(),
            Ok(_) => fallback(),
            Err(UserStoreError::NotFound { .. }) => {
                tracing::debug!(user_id = %user_id, "unknown user; using default language");
                fallback()
            }
            Err(error) => {
                tracing::warn!(
                    user_id = %user_id,
                    error = %error,
                    "user store failed; using default language"
                );
                fallback()
            }
        }
    }

    async fn acknowledge(
        &self,
        token: &mut InteractionToken,
        notice: Option<NoticeKind>,
        language: &str,
    ) {
        let ticket = token.redeem(Instant::now(), self.inner.config.ack_window);
        self.send_ack(ticket, notice, language).await;
    }

    async fn send_ack(
        &self,
        ticket: Option<AckTicket>,
        notice: Option<NoticeKind>,
        language: &str,
    ) {
        let Some(ticket) = ticket else {
            tracing::debug!("tap already answered, malformed or aged out; skipping ack");
            return;
        };

        let text = notice
            .map(|kind| self.inner.phrasebook.text(language, kind))
            .filter(|text| !text.is_empty())
            .map(str::to_string);
        let token_id = ticket.id().to_string();
        if let Err(error) = self.inner.ports.ack.acknowledge(ticket, text).await {
            tracing::debug!(token_id = %token_id, error = %error, "tap acknowledgment rejected");
        }
    }
}

fn plan_navigation(
    registry: &mut Registry,
    catalog: &dyn ContentCatalog,
    user_id: UserId,
    direction: Direction,
    language: String,
    token: InteractionToken,
    now: Instant,
) -> NavigationPlan {
    let UserSlot { cursor, slideshow } = registry.slots.entry(user_id).or_default();
    let active = slideshow.as_mut().filter(|state| state.is_active());
    let language = match active.as_ref() {
        Some(state) => state.language.clone(),
        None => language,
    };

    let mut items = catalog.items(&language);
    let Some(index) = cursor.advance(direction.step(), items.len()) else {
        return NavigationPlan::Unavailable { token, language };
    };
    let item = items.swap_remove(index);

    match active {
        Some(state) => {
            state.last_interaction_at = now;
            // A newer tap supersedes the one still waiting for an answer.
            if token.is_well_formed() {
                state.pending_token = Some(token);
            }
            NavigationPlan::Ready {
                item,
                index,
                language,
                rotation: Some((state.generation, state.surface)),
                idle_token: None,
            }
        }
        None => NavigationPlan::Ready {
            item,
            index,
            language,
            rotation: None,
            idle_token: Some(token),
        },
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::ids::{ChatId, MessageId};
    use crate::ports::{
        AckResult, BoxFuture, NotFoundSnafu, RenderResult, SurfaceGoneSnafu, UserStoreResult,
    };

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum RenderCall {
        Edit {
            surface: Surface,
            item_id: String,
            caption: String,
            playing: bool,
        },
        KeyboardOnly {
            surface: Surface,
            playing: bool,
        },
    }

    #[derive(Default)]
    struct RecordingBridge {
        calls: StdMutex<Vec<RenderCall>>,
        fail_edits: AtomicBool,
    }

    impl RecordingBridge {
        fn calls(&self) -> Vec<RenderCall> {
            self.calls.lock().unwrap().clone()
        }

        fn edited_items(&self) -> Vec<String> {
            self.calls()
                .into_iter()
                .filter_map(|call| match call {
                    RenderCall::Edit { item_id, .. } => Some(item_id),
                    RenderCall::KeyboardOnly { .. } => None,
                })
                .collect()
        }
    }

    impl RenderBridge for RecordingBridge {
        fn edit_or_send<'a>(
            &'a self,
            surface: &'a Surface,
            item: &'a CatalogItem,
            keyboard: &'a Keyboard,
        ) -> BoxFuture<'a, RenderResult<()>> {
            Box::pin(async move {
                self.calls.lock().unwrap().push(RenderCall::Edit {
                    surface: *surface,
                    item_id: item.id.clone(),
                    caption: item.caption.clone(),
                    playing: keyboard.shows_stop(),
                });
                if self.fail_edits.load(Ordering::SeqCst) {
                    return SurfaceGoneSnafu {
                        stage: "test-edit",
                        chat_id: surface.chat_id,
                        message_id: surface.message_id,
                    }
                    .fail();
                }
                Ok(())
            })
        }

        fn edit_keyboard_only<'a>(
            &'a self,
            surface: &'a Surface,
            keyboard: &'a Keyboard,
        ) -> BoxFuture<'a, RenderResult<()>> {
            Box::pin(async move {
                self.calls.lock().unwrap().push(RenderCall::KeyboardOnly {
                    surface: *surface,
                    playing: keyboard.shows_stop(),
                });
                Ok(())
            })
        }
    }

    #[derive(Default)]
    struct RecordingAck {
        acks: StdMutex<Vec<(String, Option<String>)>>,
    }

    impl RecordingAck {
        fn acks(&self) -> Vec<(String, Option<String>)> {
            self.acks.lock().unwrap().clone()
        }
    }

    impl AckChannel for RecordingAck {
        fn acknowledge<'a>(
            &'a self,
            ticket: AckTicket,
            text: Option<String>,
        ) -> BoxFuture<'a, AckResult<()>> {
            Box::pin(async move {
                self.acks.lock().unwrap().push((ticket.into_id(), text));
                Ok(())
            })
        }
    }

    struct FixedUsers {
        languages: HashMap<UserId, String>,
    }

    impl UserStore for FixedUsers {
        fn language<'a>(&'a self, user_id: UserId) -> BoxFuture<'a, UserStoreResult<String>> {
            Box::pin(async move {
                match self.languages.get(&user_id) {
                    Some(language) => Ok(language.clone()),
                    None => NotFoundSnafu {
                        stage: "test-language",
                        user_id,
                    }
                    .fail(),
                }
            })
        }
    }

    #[derive(Default)]
    struct SharedCatalog {
        items: StdMutex<HashMap<String, Vec<CatalogItem>>>,
    }

    impl SharedCatalog {
        fn set(&self, language: &str, items: Vec<CatalogItem>) {
            self.items
                .lock()
                .unwrap()
                .insert(language.to_string(), items);
        }
    }

    impl ContentCatalog for SharedCatalog {
        fn items(&self, language: &str) -> Vec<CatalogItem> {
            self.items
                .lock()
                .unwrap()
                .get(language)
                .cloned()
                .unwrap_or_default()
        }
    }

    struct Harness {
        scheduler: SlideshowScheduler,
        bridge: Arc<RecordingBridge>,
        ack: Arc<RecordingAck>,
        catalog: Arc<SharedCatalog>,
    }

    fn banners(prefix: &str, count: usize) -> Vec<CatalogItem> {
        (0..count)
            .map(|index| {
                CatalogItem::new(
                    format!("{prefix}-{index}"),
                    format!("caption {prefix}-{index}"),
                    format!("https://media.test/{prefix}-{index}.gif"),
                )
            })
            .collect()
    }

    fn harness(languages: &[(u64, &str)]) -> Harness {
        let bridge = Arc::new(RecordingBridge::default());
        let ack = Arc::new(RecordingAck::default());
        let catalog = Arc::new(SharedCatalog::default());
        catalog.set("ru", banners("ru", 3));
        catalog.set("en", banners("en", 2));
        let users = Arc::new(FixedUsers {
            languages: languages
                .iter()
                .map(|(user_id, language)| (UserId::new(*user_id), language.to_string()))
                .collect(),
        });

        let scheduler = SlideshowScheduler::new(
            SchedulerConfig::default(),
            Phrasebook::builtin("ru"),
            SchedulerPorts {
                users,
                catalog: catalog.clone(),
                render: bridge.clone(),
                ack: ack.clone(),
            },
        );

        Harness {
            scheduler,
            bridge,
            ack,
            catalog,
        }
    }

    fn user() -> UserId {
        UserId::new(7)
    }

    fn surface(message_id: i64) -> Surface {
        Surface::new(ChatId::new(100), MessageId::new(message_id))
    }

    fn notice(language: &str, kind: NoticeKind) -> Option<String> {
        Some(Phrasebook::builtin("ru").text(language, kind).to_string())
    }

    async fn tap(
        harness: &Harness,
        action: ControlAction,
        message_id: i64,
        token: &str,
    ) -> ActionOutcome {
        harness
            .scheduler
            .on_user_action(
                user(),
                action,
                surface(message_id),
                InteractionToken::new(token),
            )
            .await
    }

    async fn wait(millis: u64) {
        tokio::time::sleep(Duration::from_millis(millis)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn play_advances_every_tick_until_manual_stop() {
        let harness = harness(&[(7, "ru")]);

        assert_eq!(tap(&harness, ControlAction::Play, 1, "tap-1").await, ActionOutcome::Ok);
        assert_eq!(
            harness.ack.acks(),
            vec![("tap-1".to_string(), notice("ru", NoticeKind::Started))]
        );
        assert_eq!(
            harness.bridge.calls(),
            vec![RenderCall::KeyboardOnly {
                surface: surface(1),
                playing: true,
            }]
        );
        assert!(harness.scheduler.is_playing(user()).await);

        wait(10_100).await;
        assert_eq!(harness.bridge.edited_items(), vec!["ru-1", "ru-2"]);

        assert_eq!(tap(&harness, ControlAction::Stop, 1, "tap-2").await, ActionOutcome::Ok);
        assert!(!harness.scheduler.is_playing(user()).await);
        assert_eq!(
            harness.bridge.calls().last(),
            Some(&RenderCall::KeyboardOnly {
                surface: surface(1),
                playing: false,
            })
        );
        assert_eq!(
            harness.ack.acks().last(),
            Some(&("tap-2".to_string(), notice("ru", NoticeKind::StoppedManual)))
        );

        let settled = harness.bridge.calls().len();
        wait(60_000).await;
        assert_eq!(harness.bridge.calls().len(), settled);
        assert_eq!(harness.scheduler.position(user()).await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_after_long_silence_reports_timer_in_caption() {
        let harness = harness(&[(7, "ru")]);
        tap(&harness, ControlAction::Play, 1, "tap-1").await;

        wait(31_000).await;
        assert_eq!(harness.bridge.edited_items().len(), 6);

        assert_eq!(tap(&harness, ControlAction::Stop, 1, "tap-2").await, ActionOutcome::Ok);

        let timer_text = Phrasebook::builtin("ru")
            .text("ru", NoticeKind::StoppedByTimer)
            .to_string();
        assert_eq!(
            harness.bridge.calls().last(),
            Some(&RenderCall::Edit {
                surface: surface(1),
                item_id: "ru-0".to_string(),
                caption: format!("caption ru-0\n\n{timer_text}"),
                playing: false,
            })
        );
        assert_eq!(
            harness.ack.acks().last(),
            Some(&("tap-2".to_string(), Some(timer_text)))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_ends_rotation_without_reusing_the_start_tap() {
        let harness = harness(&[(7, "ru")]);
        tap(&harness, ControlAction::Play, 1, "tap-1").await;

        wait(34_000).await;

        assert!(!harness.scheduler.is_playing(user()).await);
        assert!(harness.scheduler.snapshot(user()).await.is_none());
        assert_eq!(harness.bridge.edited_items().len(), 7);
        assert!(matches!(
            harness.bridge.calls().last(),
            Some(RenderCall::Edit { playing: false, caption, .. })
                if caption.ends_with("по таймеру")
        ));
        assert_eq!(harness.ack.acks().len(), 1);

        wait(30_000).await;
        assert_eq!(harness.bridge.edited_items().len(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn navigation_during_rotation_makes_expiry_look_manual() {
        let harness = harness(&[(7, "ru")]);
        tap(&harness, ControlAction::Play, 1, "tap-1").await;

        wait(20_100).await;
        assert_eq!(tap(&harness, ControlAction::Next, 1, "tap-2").await, ActionOutcome::Ok);
        assert!(harness.scheduler.is_playing(user()).await);
        assert!(matches!(
            harness.bridge.calls().last(),
            Some(RenderCall::Edit { playing: true, .. })
        ));
        assert_eq!(harness.ack.acks().len(), 1);
        let snapshot = harness.scheduler.snapshot(user()).await;
        assert!(snapshot.is_some_and(|snapshot| snapshot.has_pending_ack));

        wait(14_000).await;

        assert!(!harness.scheduler.is_playing(user()).await);
        assert_eq!(
            harness.bridge.calls().last(),
            Some(&RenderCall::KeyboardOnly {
                surface: surface(1),
                playing: false,
            })
        );
        assert_eq!(
            harness.ack.acks().last(),
            Some(&("tap-2".to_string(), notice("ru", NoticeKind::StoppedManual)))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn second_play_replaces_the_rotation_instead_of_doubling_it() {
        let harness = harness(&[(7, "ru")]);
        tap(&harness, ControlAction::Play, 1, "tap-1").await;
        tap(&harness, ControlAction::Play, 1, "tap-2").await;

        let snapshot = harness.scheduler.snapshot(user()).await;
        assert_eq!(snapshot.map(|snapshot| snapshot.generation), Some(2));

        wait(5_100).await;
        assert_eq!(harness.bridge.edited_items(), vec!["ru-1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_on_another_surface_resets_the_old_controls() {
        let harness = harness(&[(7, "ru")]);
        tap(&harness, ControlAction::Play, 1, "tap-1").await;
        tap(&harness, ControlAction::Play, 2, "tap-2").await;

        assert!(harness.bridge.calls().contains(&RenderCall::KeyboardOnly {
            surface: surface(1),
            playing: false,
        }));
        let snapshot = harness.scheduler.snapshot(user()).await;
        assert_eq!(snapshot.map(|snapshot| snapshot.surface), Some(surface(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_without_rotation_touches_nothing() {
        let harness = harness(&[(7, "ru")]);

        assert_eq!(
            harness.scheduler.stop(user(), StopTrigger::Manual).await,
            StopOutcome::NotPlaying
        );
        assert!(harness.bridge.calls().is_empty());
        assert!(harness.ack.acks().is_empty());

        assert_eq!(
            tap(&harness, ControlAction::Stop, 1, "tap-1").await,
            ActionOutcome::NotPlaying
        );
        assert!(harness.bridge.calls().is_empty());
        assert_eq!(harness.ack.acks(), vec![("tap-1".to_string(), None)]);
    }

    #[tokio::test(start_paused = true)]
    async fn callbacks_from_a_stopped_rotation_are_ignored() {
        let harness = harness(&[(7, "ru")]);
        tap(&harness, ControlAction::Play, 1, "tap-1").await;
        let generation = harness
            .scheduler
            .snapshot(user())
            .await
            .map(|snapshot| snapshot.generation)
            .unwrap();
        harness.scheduler.stop(user(), StopTrigger::Manual).await;
        let calls = harness.bridge.calls().len();
        let acks = harness.ack.acks().len();

        assert!(!harness.scheduler.tick(user(), generation).await);
        harness.scheduler.expire(user(), generation).await;

        assert_eq!(harness.bridge.calls().len(), calls);
        assert_eq!(harness.ack.acks().len(), acks);
        assert_eq!(harness.scheduler.position(user()).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_catalog_refuses_to_start() {
        let harness = harness(&[(7, "ru")]);
        harness.catalog.set("ru", Vec::new());

        assert_eq!(
            tap(&harness, ControlAction::Play, 1, "tap-1").await,
            ActionOutcome::ContentUnavailable
        );
        assert_eq!(
            harness.ack.acks(),
            vec![("tap-1".to_string(), notice("ru", NoticeKind::ContentUnavailable))]
        );
        assert!(harness.bridge.calls().is_empty());
        assert!(harness.scheduler.snapshot(user()).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn catalog_emptied_mid_rotation_resets_controls_and_answers_pending_tap() {
        let harness = harness(&[(7, "ru")]);
        tap(&harness, ControlAction::Play, 1, "tap-1").await;
        tap(&harness, ControlAction::Next, 1, "tap-2").await;
        harness.catalog.set("ru", Vec::new());

        wait(5_100).await;

        assert!(!harness.scheduler.is_playing(user()).await);
        assert!(harness.scheduler.snapshot(user()).await.is_none());
        assert_eq!(
            harness.bridge.calls().last(),
            Some(&RenderCall::KeyboardOnly {
                surface: surface(1),
                playing: false,
            })
        );
        assert_eq!(
            harness.ack.acks(),
            vec![
                ("tap-1".to_string(), notice("ru", NoticeKind::Started)),
                ("tap-2".to_string(), notice("ru", NoticeKind::ContentUnavailable)),
            ]
        );

        let settled = harness.bridge.calls().len();
        wait(60_000).await;
        assert_eq!(harness.bridge.calls().len(), settled);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_answers_the_tap_left_by_the_replaced_rotation() {
        let harness = harness(&[(7, "ru")]);
        tap(&harness, ControlAction::Play, 1, "tap-1").await;
        tap(&harness, ControlAction::Next, 1, "tap-2").await;
        tap(&harness, ControlAction::Play, 1, "tap-3").await;

        assert_eq!(
            harness.ack.acks(),
            vec![
                ("tap-1".to_string(), notice("ru", NoticeKind::Started)),
                ("tap-2".to_string(), None),
                ("tap-3".to_string(), notice("ru", NoticeKind::Started)),
            ]
        );
        assert!(harness.scheduler.is_playing(user()).await);
    }

    #[tokio::test(start_paused = true)]
    async fn current_item_does_not_touch_stored_state() {
        let harness = harness(&[(7, "ru")]);

        assert_eq!(
            harness
                .scheduler
                .current_item(UserId::new(8), "ru")
                .await
                .map(|item| item.id),
            Some("ru-0".to_string())
        );
        assert!(
            !harness
                .scheduler
                .inner
                .registry
                .lock()
                .await
                .slots
                .contains_key(&UserId::new(8))
        );

        tap(&harness, ControlAction::Prev, 1, "tap-1").await;
        harness.catalog.set("ru", banners("ru", 2));
        assert_eq!(
            harness
                .scheduler
                .current_item(user(), "ru")
                .await
                .map(|item| item.id),
            Some("ru-0".to_string())
        );
        assert_eq!(harness.scheduler.position(user()).await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_tick_render_tears_down_quietly() {
        let harness = harness(&[(7, "ru")]);
        tap(&harness, ControlAction::Play, 1, "tap-1").await;
        harness.bridge.fail_edits.store(true, Ordering::SeqCst);

        wait(5_100).await;

        assert!(!harness.scheduler.is_playing(user()).await);
        assert!(harness.scheduler.snapshot(user()).await.is_none());
        assert_eq!(harness.bridge.calls().len(), 2);
        assert_eq!(harness.ack.acks().len(), 1);

        wait(60_000).await;
        assert_eq!(harness.bridge.calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_navigation_on_rotation_surface_ends_rotation() {
        let harness = harness(&[(7, "ru")]);
        tap(&harness, ControlAction::Play, 1, "tap-1").await;
        harness.bridge.fail_edits.store(true, Ordering::SeqCst);

        assert_eq!(
            tap(&harness, ControlAction::Next, 1, "tap-2").await,
            ActionOutcome::RenderFailed
        );
        assert!(!harness.scheduler.is_playing(user()).await);
        assert_eq!(
            harness.ack.acks().last(),
            Some(&("tap-2".to_string(), notice("ru", NoticeKind::RenderFailed)))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn idle_prev_wraps_to_the_last_item() {
        let harness = harness(&[(7, "ru")]);

        assert_eq!(tap(&harness, ControlAction::Prev, 1, "tap-1").await, ActionOutcome::Ok);

        assert_eq!(
            harness.bridge.calls(),
            vec![RenderCall::Edit {
                surface: surface(1),
                item_id: "ru-2".to_string(),
                caption: "caption ru-2".to_string(),
                playing: false,
            }]
        );
        assert_eq!(harness.ack.acks(), vec![("tap-1".to_string(), None)]);
        assert_eq!(harness.scheduler.position(user()).await, 2);
        assert!(harness.scheduler.snapshot(user()).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn shrunken_catalog_restarts_from_the_first_item() {
        let harness = harness(&[(7, "ru")]);
        tap(&harness, ControlAction::Prev, 1, "tap-1").await;
        assert_eq!(harness.scheduler.position(user()).await, 2);

        harness.catalog.set("ru", banners("ru", 2));
        tap(&harness, ControlAction::Next, 1, "tap-2").await;

        assert_eq!(
            harness.bridge.edited_items(),
            vec!["ru-2".to_string(), "ru-1".to_string()]
        );
        assert_eq!(
            harness
                .scheduler
                .current_item(user(), "ru")
                .await
                .map(|item| item.id),
            Some("ru-1".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn rotation_uses_the_stored_language() {
        let harness = harness(&[(7, "en")]);
        tap(&harness, ControlAction::Play, 1, "tap-1").await;

        assert_eq!(
            harness.ack.acks(),
            vec![("tap-1".to_string(), notice("en", NoticeKind::Started))]
        );
        wait(5_100).await;
        assert_eq!(harness.bridge.edited_items(), vec!["en-1"]);
        let snapshot = harness.scheduler.snapshot(user()).await;
        assert_eq!(snapshot.map(|snapshot| snapshot.language), Some("en".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_user_falls_back_to_default_language() {
        let harness = harness(&[]);
        tap(&harness, ControlAction::Play, 1, "tap-1").await;

        assert_eq!(
            harness.ack.acks(),
            vec![("tap-1".to_string(), notice("ru", NoticeKind::Started))]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_every_rotation() {
        let harness = harness(&[(7, "ru"), (8, "en")]);
        tap(&harness, ControlAction::Play, 1, "tap-1").await;
        harness
            .scheduler
            .on_user_action(
                UserId::new(8),
                ControlAction::Play,
                surface(2),
                InteractionToken::new("tap-2"),
            )
            .await;

        assert_eq!(harness.scheduler.shutdown().await, 2);
        assert!(!harness.scheduler.is_playing(user()).await);
        assert!(!harness.scheduler.is_playing(UserId::new(8)).await);
        assert_eq!(harness.scheduler.shutdown().await, 0);
    }
}
