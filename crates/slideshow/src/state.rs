use std::collections::HashMap;

use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::cursor::RotationCursor;
use super::ids::UserId;
use super::token::InteractionToken;
use super::types::Surface;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimerKind {
    Tick,
    Expiry,
}

/// The two tasks driving one rotation.
#[derive(Debug)]
pub(crate) struct RotationTimers {
    tick: JoinHandle<()>,
    expiry: JoinHandle<()>,
}

impl RotationTimers {
    pub(crate) fn new(tick: JoinHandle<()>, expiry: JoinHandle<()>) -> Self {
        Self { tick, expiry }
    }

    pub(crate) fn is_live(&self) -> bool {
        !self.tick.is_finished() && !self.expiry.is_finished()
    }

    /// Aborts both tasks except `running`, the one executing this cancellation: aborting
    /// it would cut off the rest of its own stop handling at the next await.
    pub(crate) fn cancel(self, running: Option<TimerKind>) {
        if running != Some(TimerKind::Tick) {
            self.tick.abort();
        }
        if running != Some(TimerKind::Expiry) {
            self.expiry.abort();
        }
    }
}

/// Live rotation for one user. Absent means the user is not rotating.
#[derive(Debug)]
pub(crate) struct SlideshowState {
    /// Identity of this rotation; callbacks carrying another generation are stale.
    pub(crate) generation: u64,
    pub(crate) surface: Surface,
    pub(crate) language: String,
    pub(crate) timers: RotationTimers,
    pub(crate) started_at: Instant,
    pub(crate) last_interaction_at: Instant,
    pub(crate) last_advanced_at: Option<Instant>,
    pub(crate) pending_token: Option<InteractionToken>,
}

impl SlideshowState {
    pub(crate) fn is_active(&self) -> bool {
        self.timers.is_live()
    }

    pub(crate) fn snapshot(&self, index: usize) -> SlideshowSnapshot {
        SlideshowSnapshot {
            generation: self.generation,
            surface: self.surface,
            language: self.language.clone(),
            index,
            active: self.is_active(),
            started_at: self.started_at,
            last_interaction_at: self.last_interaction_at,
            last_advanced_at: self.last_advanced_at,
            has_pending_ack: self
                .pending_token
                .as_ref()
                .is_some_and(|token| !token.is_spent()),
        }
    }
}

/// Read-only view of a rotation, safe to hold across awaits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlideshowSnapshot {
    pub generation: u64,
    pub surface: Surface,
    pub language: String,
    pub index: usize,
    pub active: bool,
    pub started_at: Instant,
    pub last_interaction_at: Instant,
    pub last_advanced_at: Option<Instant>,
    pub has_pending_ack: bool,
}

#[derive(Debug, Default)]
pub(crate) struct UserSlot {
    pub(crate) cursor: RotationCursor,
    pub(crate) slideshow: Option<SlideshowState>,
}

impl UserSlot {
    pub(crate) fn active_slideshow_mut(&mut self) -> Option<&mut SlideshowState> {
        self.slideshow.as_mut().filter(|state| state.is_active())
    }
}

/// Every user's cursor and rotation, owned by the scheduler alone.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    pub(crate) slots: HashMap<UserId, UserSlot>,
    next_generation: u64,
}

impl Registry {
    pub(crate) fn next_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    /// Detaches the rotation only when it still is the one identified by `generation`.
    pub(crate) fn take_matching(
        &mut self,
        user_id: UserId,
        generation: Option<u64>,
    ) -> Option<(SlideshowState, RotationCursor)> {
        let slot = self.slots.get_mut(&user_id)?;
        let matches = slot
            .slideshow
            .as_ref()
            .is_some_and(|state| generation.is_none_or(|expected| state.generation == expected));
        if !matches {
            return None;
        }
        slot.slideshow.take().map(|state| (state, slot.cursor))
    }
}
