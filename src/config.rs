// FPGA Memory-Mapped DMA Rust Bindings
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Engine configuration.

use crate::backoff::Backoff;
use crate::chunker::MAX_DESC_LEN;
use crate::error::{DmaError, DmaResult};
use crate::regs::BURST_BYTES;
use std::time::Duration;

/// Default number of staging buffers per channel.
pub const DEFAULT_STAGING_BUFFERS: usize = 8;

/// Default size of one staging buffer.
pub const DEFAULT_STAGING_BUFFER_SIZE: usize = 2 * 1024 * 1024;

/// Default time to wait for a channel worker to come up.
pub const DEFAULT_READINESS_TIMEOUT: Duration = Duration::from_secs(1);

/// Tunables applied to every channel an engine opens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DmaConfig {
    staging_buffers: usize,
    staging_buffer_size: usize,
    readiness_timeout: Duration,
    irq_timeout: Option<Duration>,
    fifo_backoff: Backoff,
    fence_backoff: Backoff,
    reset_backoff: Backoff,
}

impl Default for DmaConfig {
    fn default() -> Self {
        Self {
            staging_buffers: DEFAULT_STAGING_BUFFERS,
            staging_buffer_size: DEFAULT_STAGING_BUFFER_SIZE,
            readiness_timeout: DEFAULT_READINESS_TIMEOUT,
            irq_timeout: None,
            fifo_backoff: Backoff::unbounded(Duration::from_micros(1), Duration::from_millis(1)),
            fence_backoff: Backoff::bounded(
                1_000_000,
                Duration::from_micros(1),
                Duration::from_micros(100),
            )
            .with_spin_iterations(1024),
            reset_backoff: Backoff::bounded(
                1000,
                Duration::from_micros(10),
                Duration::from_millis(1),
            ),
        }
    }
}

impl DmaConfig {
    /// Set the number of staging buffers (even, at least two).
    pub fn set_staging_buffers(&mut self, count: usize) -> &mut Self {
        self.staging_buffers = count;
        self
    }

    /// Set the size of each staging buffer (multiple of 256 bytes).
    pub fn set_staging_buffer_size(&mut self, size: usize) -> &mut Self {
        self.staging_buffer_size = size;
        self
    }

    /// Set how long channel open waits for its worker.
    pub fn set_readiness_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.readiness_timeout = timeout;
        self
    }

    /// Bound the write-fence interrupt wait; `None` waits forever.
    pub fn set_irq_timeout(&mut self, timeout: Option<Duration>) -> &mut Self {
        self.irq_timeout = timeout;
        self
    }

    /// Set the policy for waiting on a full descriptor FIFO.
    pub fn set_fifo_backoff(&mut self, backoff: Backoff) -> &mut Self {
        self.fifo_backoff = backoff;
        self
    }

    /// Set the policy for polling the write-fence word after its interrupt.
    pub fn set_fence_backoff(&mut self, backoff: Backoff) -> &mut Self {
        self.fence_backoff = backoff;
        self
    }

    /// Set the policy for waiting on a dispatcher reset. Must be bounded.
    pub fn set_reset_backoff(&mut self, backoff: Backoff) -> &mut Self {
        self.reset_backoff = backoff;
        self
    }

    pub fn staging_buffers(&self) -> usize {
        self.staging_buffers
    }

    pub fn staging_buffer_size(&self) -> usize {
        self.staging_buffer_size
    }

    pub fn readiness_timeout(&self) -> Duration {
        self.readiness_timeout
    }

    pub fn irq_timeout(&self) -> Option<Duration> {
        self.irq_timeout
    }

    pub fn fifo_backoff(&self) -> Backoff {
        self.fifo_backoff
    }

    pub fn fence_backoff(&self) -> Backoff {
        self.fence_backoff
    }

    pub fn reset_backoff(&self) -> Backoff {
        self.reset_backoff
    }

    /// Check the configuration.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` describing the first bad setting.
    pub fn validate(&self) -> DmaResult<()> {
        if self.staging_buffers < 2 || self.staging_buffers % 2 != 0 {
            return Err(DmaError::InvalidParameter(format!(
                "staging buffer count must be even and at least 2, got {}",
                self.staging_buffers
            )));
        }
        let size = self.staging_buffer_size as u64;
        if size == 0 || size % BURST_BYTES != 0 || size > MAX_DESC_LEN {
            return Err(DmaError::InvalidParameter(format!(
                "staging buffer size must be a non-zero multiple of {} up to {:#x}, got {}",
                BURST_BYTES, MAX_DESC_LEN, self.staging_buffer_size
            )));
        }
        if self.readiness_timeout.is_zero() {
            return Err(DmaError::InvalidParameter(
                "readiness timeout must be non-zero".into(),
            ));
        }
        // An opener that gave up on readiness joins the worker after its reset
        if self.reset_backoff.max_attempts().is_none() {
            return Err(DmaError::InvalidParameter(
                "reset backoff must be bounded".into(),
            ));
        }
        Ok(())
    }
}
