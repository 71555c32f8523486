// FPGA Memory-Mapped DMA Rust Bindings
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Descriptor submission and dispatcher control.
//!
//! A descriptor is committed by writing its four words to the descriptor
//! port; the dispatcher latches it when the word carrying the `GO` bit
//! arrives. Before each submission the status register is polled until the
//! descriptor FIFO has room.

use crate::backoff::Backoff;
use crate::descriptor::MsgdmaDesc;
use crate::error::{DmaError, DmaResult};
use crate::mmio::{write_block64, Mmio};
use crate::regs::{block, csr, CsrControl, CsrStatus};
use std::sync::Arc;

/// Register access to one channel's dispatcher.
pub struct DescriptorPort {
    mmio: Arc<dyn Mmio>,
    csr_base: u64,
    desc_base: u64,
    fifo_backoff: Backoff,
}

impl DescriptorPort {
    /// Create a port for the DMA block at `dma_base`.
    pub fn new(mmio: Arc<dyn Mmio>, dma_base: u64, fifo_backoff: Backoff) -> Self {
        Self {
            mmio,
            csr_base: dma_base + block::CSR,
            desc_base: dma_base + block::DESC,
            fifo_backoff,
        }
    }

    /// Read the status register.
    pub fn status(&self) -> DmaResult<CsrStatus> {
        let raw = self.mmio.read32(self.csr_base + csr::STATUS)?;
        Ok(CsrStatus::from_bits_retain(raw))
    }

    /// Read the control register.
    pub fn control(&self) -> DmaResult<CsrControl> {
        let raw = self.mmio.read32(self.csr_base + csr::CTRL)?;
        Ok(CsrControl::from_bits_retain(raw))
    }

    fn write_control(&self, ctrl: CsrControl) -> DmaResult<()> {
        self.mmio.write32(self.csr_base + csr::CTRL, ctrl.bits())
    }

    /// Post one descriptor, waiting for FIFO space first.
    ///
    /// # Errors
    ///
    /// Propagates MMIO failures and `Timeout` if the FIFO backoff is bounded
    /// and the FIFO stays full.
    pub fn send(&self, desc: &MsgdmaDesc) -> DmaResult<()> {
        self.fifo_backoff.retry("descriptor FIFO space", || {
            let status = self.status()?;
            Ok((!status.contains(CsrStatus::DESC_BUF_FULL)).then_some(()))
        })?;

        log::trace!(
            "desc rd={:#x} wr={:#x} len={} burst={} ctrl={:#010x}",
            desc.read_address(),
            desc.write_address(),
            desc.len,
            desc.rd_burst_count,
            desc.control
        );
        write_block64(self.mmio.as_ref(), self.desc_base, &desc.to_qwords())
    }

    /// Acknowledge a pending interrupt (write-one-to-clear).
    pub fn clear_irq(&self) -> DmaResult<()> {
        self.mmio
            .write32(self.csr_base + csr::STATUS, CsrStatus::IRQ.bits())
    }

    /// Set or clear the dispatcher's global interrupt enable.
    pub fn set_global_irq(&self, enable: bool) -> DmaResult<()> {
        let mut ctrl = self.control()?;
        ctrl.set(CsrControl::GLOBAL_INTR_EN_MASK, enable);
        self.write_control(ctrl)
    }

    /// Reset the dispatcher and wait for the reset to finish.
    ///
    /// # Errors
    ///
    /// Returns `Exception` if the dispatcher is still resetting after the
    /// `backoff` budget.
    pub fn reset(&self, backoff: &Backoff) -> DmaResult<()> {
        let ctrl = self.control()?;
        self.write_control(ctrl | CsrControl::RESET_DISPATCHER)?;
        backoff
            .retry("dispatcher reset", || {
                let status = self.status()?;
                Ok((!status.contains(CsrStatus::RESETTING)).then_some(()))
            })
            .map_err(|e| match e {
                DmaError::Timeout { .. } => DmaError::Exception(e.to_string()),
                other => other,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::DescControl;
    use crate::sim::{SimConfig, SimDevice};
    use std::time::Duration;

    fn port(sim: &SimDevice) -> DescriptorPort {
        let base = sim.dma_base(0);
        DescriptorPort::new(Arc::new(sim.clone()), base, Backoff::default())
    }

    #[test]
    fn test_send_logs_descriptor() {
        let sim = SimDevice::new(SimConfig::default());
        let port = port(&sim);
        let d = MsgdmaDesc::new(0x40, 0x1000, 128, 1, DescControl::EARLY_DONE_EN);
        port.send(&d).unwrap();
        assert_eq!(sim.descriptors(0), vec![d]);
    }

    #[test]
    fn test_send_waits_for_fifo_space() {
        let sim = SimDevice::new(SimConfig {
            fifo_depth: 2,
            ..SimConfig::default()
        });
        let port = port(&sim);
        for i in 0..6u64 {
            let d = MsgdmaDesc::new(0, 0x1000 + i * 64, 64, 1, DescControl::empty());
            port.send(&d).unwrap();
        }
        assert_eq!(sim.descriptors(0).len(), 6);
        assert!(sim.pending(0) <= 2);
    }

    #[test]
    fn test_global_irq_toggle() {
        let sim = SimDevice::new(SimConfig::default());
        let port = port(&sim);
        port.set_global_irq(true).unwrap();
        assert!(port.control().unwrap().contains(CsrControl::GLOBAL_INTR_EN_MASK));
        port.set_global_irq(false).unwrap();
        assert!(!port.control().unwrap().contains(CsrControl::GLOBAL_INTR_EN_MASK));
    }

    #[test]
    fn test_reset_completes() {
        let sim = SimDevice::new(SimConfig {
            reset_polls: 3,
            ..SimConfig::default()
        });
        let port = port(&sim);
        port.reset(&Backoff::bounded(10, Duration::from_micros(1), Duration::from_micros(1)))
            .unwrap();
        assert!(!port.status().unwrap().contains(CsrStatus::RESETTING));
    }

    #[test]
    fn test_reset_timeout_is_exception() {
        let sim = SimDevice::new(SimConfig {
            reset_polls: u32::MAX,
            ..SimConfig::default()
        });
        let port = port(&sim);
        let err = port
            .reset(&Backoff::bounded(4, Duration::from_micros(1), Duration::from_micros(1)))
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Exception);
    }
}
