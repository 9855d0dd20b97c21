//! Shared rate-limit suspension.
//!
//! When the host says the rate limit is exhausted, every request made with the
//! same credentials would fail until the reset time. The gate records that
//! time once and makes every caller wait for it before its next request.

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

/// A point in time before which no request should be sent.
#[derive(Debug, Default)]
pub struct RateLimitGate {
    blocked_until: Mutex<Option<Instant>>,
}

impl RateLimitGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks requests for `wait` from now. Never shortens an existing block.
    pub fn suspend_for(&self, wait: Duration) {
        self.suspend_until(Instant::now() + wait);
    }

    pub fn suspend_until(&self, until: Instant) {
        let mut blocked = self.blocked_until.lock().unwrap_or_else(|e| e.into_inner());
        if blocked.is_none_or(|current| current < until) {
            *blocked = Some(until);
        }
    }

    /// The instant requests resume, if currently blocked.
    pub fn blocked_until(&self) -> Option<Instant> {
        let blocked = *self.blocked_until.lock().unwrap_or_else(|e| e.into_inner());
        blocked.filter(|until| *until > Instant::now())
    }

    /// Waits until the gate is open.
    ///
    /// Loops because another caller may extend the block while this one sleeps.
    pub async fn wait(&self) {
        while let Some(until) = self.blocked_until() {
            tokio::time::sleep_until(until).await;
        }
    }
}
