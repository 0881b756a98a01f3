//! Account-wide request gate.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use dcore_core::clock::{self, Cancelled};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Length of one global window.
const WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug)]
struct GlobalState {
    remaining: u32,
    window_reset: Option<Instant>,
    blocked_until: Option<Instant>,
}

/// Fixed-window counter shared by every non-exempt route.
///
/// The lock is never held across an await.
#[derive(Debug)]
pub struct GlobalGate {
    limit: u32,
    state: Mutex<GlobalState>,
}

impl GlobalGate {
    /// A gate admitting `limit` requests per second.
    #[must_use]
    pub fn new(limit: u32) -> Self {
        let limit = limit.max(1);
        Self {
            limit,
            state: Mutex::new(GlobalState {
                remaining: limit,
                window_reset: None,
                blocked_until: None,
            }),
        }
    }

    /// Requests allowed per window.
    #[must_use]
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Wait for a slot in the current window and take it.
    ///
    /// # Errors
    ///
    /// Returns [`Cancelled`] if `cancel` fires while waiting.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), Cancelled> {
        loop {
            let wait_until = self.try_take(Instant::now());
            match wait_until {
                None => return Ok(()),
                Some(deadline) => {
                    debug!(
                        delay_ms = clock::remaining_until(deadline).as_millis(),
                        "global limit reached, waiting"
                    );
                    clock::sleep_until_or_cancel(deadline, cancel).await?;
                },
            }
        }
    }

    /// Block every route for `wait`, as instructed by a global 429.
    pub fn block_for(&self, wait: Duration) {
        let until = clock::deadline_after(wait);
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.blocked_until.is_none_or(|current| current < until) {
            warn!(delay_ms = wait.as_millis(), "global rate limit hit, blocking all routes");
            state.blocked_until = Some(until);
        }
    }

    /// Take a slot, or return the instant to retry at.
    fn try_take(&self, now: Instant) -> Option<Instant> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(until) = state.blocked_until {
            if until > now {
                return Some(until);
            }
            state.blocked_until = None;
        }

        match state.window_reset {
            Some(reset) if reset > now => {},
            _ => {
                state.remaining = self.limit;
                state.window_reset = Some(now.checked_add(WINDOW).unwrap_or(now));
            },
        }

        if state.remaining == 0 {
            return state.window_reset;
        }
        state.remaining = state.remaining.saturating_sub(1);
        None
    }
}
