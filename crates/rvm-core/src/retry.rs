//! Explicit retry-with-backoff state machine.
//!
//! Expressed as a value (attempt count, next delay) rather than a blocking
//! sleep loop, so the executor's status polling and the orchestrator's
//! transient-error retries compose with the bounded-concurrency scheduler.

use std::time::Duration;

// ---------------------------------------------------------------------------
// Backoff
// ---------------------------------------------------------------------------

/// Exponential backoff with a ceiling. Each call to `next_delay` returns the
/// delay to sleep before the next attempt, then doubles it up to the cap.
#[derive(Debug, Clone)]
pub struct Backoff {
    delay: Duration,
    cap: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(initial: Duration, cap: Duration) -> Self {
        Backoff {
            delay: initial,
            cap,
            attempt: 0,
        }
    }

    /// Attempts taken so far (i.e. calls to `next_delay`).
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn next_delay(&mut self) -> Duration {
        self.attempt += 1;
        let current = self.delay;
        self.delay = (self.delay * 2).min(self.cap);
        current
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
