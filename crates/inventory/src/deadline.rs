//! Soft self-timeout for a running flow.
//!
//! The event source drops deliveries that take too long. Flows check the
//! deadline before every remote call and stop early instead of risking a
//! forced connection drop being read as a failure.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    expires_at: Instant,
}

impl Deadline {
    /// Deadline `budget` after `start` (when the request arrived).
    pub fn starting_at(start: Instant, budget: Duration) -> Self {
        Self {
            expires_at: start + budget,
        }
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }
}
