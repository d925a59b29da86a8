//! Sliding-window limiter for completion calls.
//!
//! Admits at most `max_requests` calls in any rolling `window`. A caller
//! over the limit sleeps until the oldest recorded call leaves the window.
//! The limiter is shared (`Arc<RateLimiter>`) by every task that talks to
//! a model, so concurrent chunks still respect one global budget.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::debug;

pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    /// Admission times inside the current window, oldest first.
    calls: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// `max_requests` is raised to 1 if zero.
    pub fn new(max_requests: usize, window: Duration) -> Self {
        let max_requests = max_requests.max(1);
        Self {
            max_requests,
            window,
            calls: Mutex::new(VecDeque::with_capacity(max_requests)),
        }
    }

    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Wait until a call is allowed, then record it.
    ///
    /// The lock is not held while sleeping; after waking the window is
    /// re-checked because another task may have taken the freed slot.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut calls = self.calls.lock().await;
                let now = Instant::now();
                self.prune(&mut calls, now);

                if calls.len() < self.max_requests {
                    calls.push_back(now);
                    return;
                }

                match calls.front() {
                    Some(&oldest) => self.window.saturating_sub(now.duration_since(oldest)),
                    None => Duration::ZERO,
                }
            };

            debug!(
                "Rate limit reached ({} per {}s), waiting {:.1}s",
                self.max_requests,
                self.window.as_secs(),
                wait.as_secs_f64()
            );
            sleep(wait).await;
        }
    }

    /// Calls recorded within the current window.
    pub async fn recent_calls(&self) -> usize {
        let mut calls = self.calls.lock().await;
        self.prune(&mut calls, Instant::now());
        calls.len()
    }

    /// Forget all recorded calls.
    pub async fn reset(&self) {
        self.calls.lock().await.clear();
    }

    fn prune(&self, calls: &mut VecDeque<Instant>, now: Instant) {
        while calls
            .front()
            .is_some_and(|t| now.duration_since(*t) >= self.window)
        {
            calls.pop_front();
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("max_requests", &self.max_requests)
            .field("window", &self.window)
            .finish()
    }
}
