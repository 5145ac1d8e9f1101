//! Monotonic deadlines for blocking reads
//!
//! A caller timeout is `Option<Duration>`:
//! - `None` waits forever
//! - zero performs a single non-blocking check
//! - anything else bounds the total wait

use std::time::{Duration, Instant};

/// How long a single I/O attempt may block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    /// Block until data arrives
    Forever,
    /// Only look at data already available
    Poll,
    /// Block at most this long
    For(Duration),
}

/// Deadline computed once at the start of a call
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    end: Option<Instant>,
}

impl Deadline {
    pub fn start(timeout: Option<Duration>) -> Self {
        Self {
            end: timeout.map(|t| {
                Instant::now()
                    .checked_add(t)
                    .unwrap_or_else(|| Instant::now() + Duration::from_secs(86_400 * 365))
            }),
        }
    }

    /// Wait allowed for the next attempt, recomputed from the current time
    pub fn wait(&self) -> Wait {
        match self.end {
            None => Wait::Forever,
            Some(end) => {
                let remaining = end.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    Wait::Poll
                } else {
                    Wait::For(remaining)
                }
            }
        }
    }

    pub fn expired(&self) -> bool {
        self.end.is_some_and(|end| Instant::now() >= end)
    }
}
