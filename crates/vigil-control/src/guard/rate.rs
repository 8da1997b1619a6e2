//! Fixed one-second window message counter.

use std::fmt;
use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_secs(1);

/// Returned when a connection exceeds its per-window budget.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitError {
    pub limit: u32,
    /// True only for the first rejection in a window; the caller sends one
    /// warning and drops the rest silently.
    pub notify: bool,
}

impl fmt::Display for RateLimitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rate limit exceeded: more than {} messages per second",
            self.limit
        )
    }
}

impl std::error::Error for RateLimitError {}

#[derive(Debug)]
pub struct WindowCounter {
    limit: u32,
    window_start: Instant,
    count: u32,
    warned: bool,
}

impl WindowCounter {
    pub fn new(limit: u32, now: Instant) -> Self {
        Self {
            limit,
            window_start: now,
            count: 0,
            warned: false,
        }
    }

    pub fn check(&mut self, now: Instant) -> Result<(), RateLimitError> {
        if now.duration_since(self.window_start) >= WINDOW {
            self.window_start = now;
            self.count = 0;
            self.warned = false;
        }
        if self.count >= self.limit {
            let notify = !self.warned;
            self.warned = true;
            return Err(RateLimitError {
                limit: self.limit,
                notify,
            });
        }
        self.count += 1;
        Ok(())
    }
}
