use std::time::Duration;

use tokio::time::Instant;

/// The user's most recent tap that still awaits acknowledgment.
///
/// A token can be redeemed at most once. Redeeming hands out an [`AckTicket`], which the
/// ack channel consumes by value, so the same tap cannot be answered twice.
#[derive(Debug, PartialEq, Eq)]
pub struct InteractionToken {
    id: String,
    issued_at: Instant,
    spent: bool,
}

impl InteractionToken {
    pub fn new(id: impl Into<String>) -> Self {
        Self::issued_at(id, Instant::now())
    }

    pub fn issued_at(id: impl Into<String>, issued_at: Instant) -> Self {
        Self {
            id: id.into(),
            issued_at,
            spent: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn issue_time(&self) -> Instant {
        self.issued_at
    }

    pub fn is_spent(&self) -> bool {
        self.spent
    }

    pub fn is_well_formed(&self) -> bool {
        !self.id.trim().is_empty()
    }

    pub fn is_live(&self, now: Instant, window: Duration) -> bool {
        !self.spent
            && self.is_well_formed()
            && now.saturating_duration_since(self.issued_at) <= window
    }

    /// Marks the token spent and returns the ticket, or `None` when the token is already
    /// spent, malformed, or older than `window`.
    pub fn redeem(&mut self, now: Instant, window: Duration) -> Option<AckTicket> {
        if !self.is_live(now, window) {
            return None;
        }
        self.spent = true;
        Some(AckTicket {
            id: self.id.clone(),
        })
    }
}

/// Single-use right to answer one tap.
#[derive(Debug, PartialEq, Eq)]
pub struct AckTicket {
    id: String,
}

impl AckTicket {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn into_id(self) -> String {
        self.id
    }
}
