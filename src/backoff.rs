// FPGA Memory-Mapped DMA Rust Bindings
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Retry-with-backoff for hardware polling loops.
//!
//! A poll first spins for a few iterations (cheap for conditions that clear
//! within nanoseconds, like a FIFO slot freeing up), then sleeps with an
//! exponentially growing interval capped at `max_interval`.

use crate::error::{DmaError, DmaResult};
use std::time::Duration;

/// Polling policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// `None` retries forever.
    max_attempts: Option<u32>,
    spin_iterations: u32,
    initial_interval: Duration,
    max_interval: Duration,
}

impl Backoff {
    /// Retry forever.
    pub const fn unbounded(initial_interval: Duration, max_interval: Duration) -> Self {
        Self {
            max_attempts: None,
            spin_iterations: 64,
            initial_interval,
            max_interval,
        }
    }

    /// Give up after `max_attempts` polls.
    pub const fn bounded(
        max_attempts: u32,
        initial_interval: Duration,
        max_interval: Duration,
    ) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            spin_iterations: 64,
            initial_interval,
            max_interval,
        }
    }

    /// Set the number of polls done with a spin hint instead of a sleep.
    pub const fn with_spin_iterations(mut self, iterations: u32) -> Self {
        self.spin_iterations = iterations;
        self
    }

    /// Maximum number of polls, `None` if unbounded.
    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }

    /// Poll until `poll` yields a value.
    ///
    /// `poll` returns `Ok(Some(v))` when the condition holds, `Ok(None)` to
    /// keep waiting. Errors from `poll` are returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`DmaError::Timeout`] naming `what` once the attempt budget is
    /// exhausted.
    pub fn retry<T, F>(&self, what: &'static str, mut poll: F) -> DmaResult<T>
    where
        F: FnMut() -> DmaResult<Option<T>>,
    {
        let mut attempts: u32 = 0;
        let mut interval = self.initial_interval;
        loop {
            if let Some(value) = poll()? {
                return Ok(value);
            }
            attempts = attempts.saturating_add(1);
            if let Some(max) = self.max_attempts {
                if attempts >= max {
                    return Err(DmaError::Timeout { what, attempts });
                }
            }
            if attempts <= self.spin_iterations {
                std::hint::spin_loop();
            } else {
                std::thread::sleep(interval);
                interval = (interval * 2).min(self.max_interval);
            }
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::unbounded(Duration::from_micros(1), Duration::from_millis(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_succeeds_after_polls() {
        let backoff = Backoff::bounded(10, Duration::from_micros(1), Duration::from_micros(10));
        let mut n = 0;
        let v = backoff
            .retry("counter", || {
                n += 1;
                Ok(if n == 3 { Some(n * 10) } else { None })
            })
            .unwrap();
        assert_eq!(v, 30);
        assert_eq!(n, 3);
    }

    #[test]
    fn test_retry_times_out() {
        let backoff = Backoff::bounded(5, Duration::from_micros(1), Duration::from_micros(2))
            .with_spin_iterations(2);
        let mut n = 0;
        let err = backoff
            .retry::<(), _>("never", || {
                n += 1;
                Ok(None)
            })
            .unwrap_err();
        assert!(matches!(
            err,
            DmaError::Timeout {
                what: "never",
                attempts: 5
            }
        ));
        assert_eq!(n, 5);
    }

    #[test]
    fn test_retry_propagates_poll_error() {
        let backoff = Backoff::default();
        let err = backoff
            .retry::<(), _>("status", || Err(DmaError::Exception("mmio".into())))
            .unwrap_err();
        assert!(matches!(err, DmaError::Exception(_)));
    }

    #[test]
    fn test_unbounded_has_no_limit() {
        assert_eq!(Backoff::default().max_attempts(), None);
    }
}
