// FPGA Memory-Mapped DMA Rust Bindings
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Write-fence completion barrier.
//!
//! The dispatcher gives no per-descriptor completion readback and each
//! channel has a single interrupt vector. To learn that everything posted so
//! far has retired, a fence descriptor copies a 64-bit sentinel from the
//! device ROM into a zeroed host word. Descriptors retire in order, so once
//! the word reads as the sentinel every earlier descriptor is done.

use crate::backoff::Backoff;
use crate::buffer::{BufferAllocator, DmaBuffer};
use crate::descriptor::{DescControl, MsgdmaDesc};
use crate::error::{DmaError, DmaResult};
use crate::event::InterruptEvent;
use crate::regs::{ALIGN_BYTES, BURST_SINGLE, WF_HOST_MASK, WF_MAGIC_NO, WF_ROM_MAGIC_NO_MASK};
use crate::submit::DescriptorPort;
use std::sync::Arc;
use std::time::Duration;

/// One channel's write fence.
pub struct WriteFence {
    buffer: DmaBuffer,
    irq: Arc<dyn InterruptEvent>,
    irq_timeout: Option<Duration>,
    poll: Backoff,
}

impl WriteFence {
    /// Allocate the fence word.
    pub fn new(
        allocator: &Arc<dyn BufferAllocator>,
        irq: Arc<dyn InterruptEvent>,
        irq_timeout: Option<Duration>,
        poll: Backoff,
    ) -> DmaResult<Self> {
        let buffer = DmaBuffer::allocate(allocator, ALIGN_BYTES as usize)?;
        Ok(Self {
            buffer,
            irq,
            irq_timeout,
            poll,
        })
    }

    /// Current value of the fence word.
    pub fn value(&self) -> u64 {
        self.buffer.read_u64_volatile(0)
    }

    /// Descriptor that writes the sentinel into the fence word.
    pub fn descriptor(&self) -> MsgdmaDesc {
        MsgdmaDesc::new(
            WF_ROM_MAGIC_NO_MASK,
            self.buffer.iova() | WF_HOST_MASK,
            ALIGN_BYTES as u32,
            BURST_SINGLE,
            DescControl::TRANSFER_IRQ_EN,
        )
    }

    /// Zero the fence word and post the fence descriptor.
    pub fn issue(&self, port: &DescriptorPort) -> DmaResult<()> {
        self.buffer.write_u64_volatile(0, 0);
        port.send(&self.descriptor())
    }

    /// Wait until every descriptor posted before the last `issue` retired.
    ///
    /// # Errors
    ///
    /// Interrupt wait failures and a fence word that never turns into the
    /// sentinel are reported as `Exception`.
    pub fn wait(&self, port: &DescriptorPort) -> DmaResult<()> {
        self.irq
            .wait(self.irq_timeout)
            .map_err(|e| DmaError::Exception(format!("write fence interrupt: {e}")))?;
        port.clear_irq()?;

        self.poll
            .retry("write fence sentinel", || {
                Ok((self.value() == WF_MAGIC_NO).then_some(()))
            })
            .map_err(|e| DmaError::Exception(e.to_string()))?;

        self.buffer.write_u64_volatile(0, 0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regs::CsrStatus;
    use crate::sim::{SimConfig, SimDevice};

    struct Setup {
        sim: SimDevice,
        port: DescriptorPort,
        fence: WriteFence,
    }

    fn setup(global_irq: bool) -> Setup {
        let sim = SimDevice::new(SimConfig::default());
        let port = DescriptorPort::new(Arc::new(sim.clone()), sim.dma_base(0), Backoff::default());
        port.set_global_irq(global_irq).unwrap();
        let handle = sim.handle();
        let irq = handle.interrupts().register(0).unwrap();
        let fence = WriteFence::new(
            handle.allocator(),
            irq,
            Some(Duration::from_millis(10)),
            Backoff::bounded(1000, Duration::from_micros(1), Duration::from_micros(10)),
        )
        .unwrap();
        Setup { sim, port, fence }
    }

    #[test]
    fn test_fence_reads_zero_before_wait() {
        let s = setup(true);
        s.fence.issue(&s.port).unwrap();
        assert_eq!(s.fence.value(), 0);
        s.fence.wait(&s.port).unwrap();
        // Reset for reuse after observing the sentinel
        assert_eq!(s.fence.value(), 0);
        assert!(!s.port.status().unwrap().contains(CsrStatus::IRQ));
    }

    #[test]
    fn test_fence_descriptor_shape() {
        let s = setup(true);
        s.fence.issue(&s.port).unwrap();
        let log = s.sim.descriptors(0);
        assert_eq!(log.len(), 1);
        assert!(log[0].is_write_fence());
        assert!(log[0].control().contains(DescControl::TRANSFER_IRQ_EN));
        assert!(!log[0].control().contains(DescControl::EARLY_DONE_EN));
        assert_eq!(log[0].len, 64);
    }

    #[test]
    fn test_fence_without_global_irq_fails() {
        let s = setup(false);
        s.fence.issue(&s.port).unwrap();
        let err = s.fence.wait(&s.port).unwrap_err();
        assert!(matches!(err, DmaError::Exception(_)));
    }

    #[test]
    fn test_fence_reusable() {
        let s = setup(true);
        for _ in 0..3 {
            s.fence.issue(&s.port).unwrap();
            s.fence.wait(&s.port).unwrap();
        }
        assert_eq!(s.sim.descriptors(0).len(), 3);
    }
}
