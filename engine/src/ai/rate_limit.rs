//! Sliding-window rate limiting for AI requests
//!
//! Counts admitted requests whose timestamp falls inside the last
//! `window_secs` seconds. Timestamps older than the window are pruned on
//! every check, so memory stays bounded by `max_requests`.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use sdk::errors::EngineError;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::RateLimitConfig;

pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    admitted: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            max_requests: config.max_requests,
            window: Duration::from_secs(config.window_secs),
            admitted: Mutex::new(VecDeque::with_capacity(config.max_requests)),
        }
    }

    /// Admit one request or fail with `RateLimited`.
    ///
    /// A refused request is not recorded.
    pub fn try_acquire(&self) -> Result<(), EngineError> {
        let now = Instant::now();
        let mut admitted = self.admitted.lock();

        while let Some(oldest) = admitted.front() {
            if now.duration_since(*oldest) >= self.window {
                admitted.pop_front();
            } else {
                break;
            }
        }

        let count = admitted.len();
        debug!(
            "Rate limit check: {}/{} requests in last {}s",
            count,
            self.max_requests,
            self.window.as_secs()
        );

        if count >= self.max_requests {
            warn!(
                "Rate limit exceeded: {}/{} requests in {}s",
                count,
                self.max_requests,
                self.window.as_secs()
            );
            return Err(EngineError::RateLimited {
                count,
                limit: self.max_requests,
                window_secs: self.window.as_secs(),
            });
        }

        admitted.push_back(now);
        Ok(())
    }

    /// Requests counted in the current window
    pub fn current_count(&self) -> usize {
        let now = Instant::now();
        self.admitted
            .lock()
            .iter()
            .filter(|t| now.duration_since(**t) < self.window)
            .count()
    }
}
