// FPGA Memory-Mapped DMA Rust Bindings
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Address span expander: register-width access to device memory.
//!
//! The expander exposes a relocatable 4 KiB window of the device address
//! space. It is far slower than DMA and only carries the sub-64-byte head
//! and tail of a transfer.

use crate::error::DmaResult;
use crate::mmio::Mmio;
use crate::regs::block;
use std::sync::Arc;

/// Windowed MMIO access to device memory.
pub struct SpanExpander {
    mmio: Arc<dyn Mmio>,
    cntl: u64,
    data: u64,
    /// Page the window currently points at.
    cur_page: Option<u64>,
}

impl SpanExpander {
    pub fn new(mmio: Arc<dyn Mmio>, dma_base: u64) -> Self {
        Self {
            mmio,
            cntl: dma_base + block::ASE_CNTL,
            data: dma_base + block::ASE_DATA,
            cur_page: None,
        }
    }

    /// MMIO offset of `addr` through the window, moving the window if needed.
    fn window(&mut self, addr: u64) -> DmaResult<u64> {
        let page = addr & !block::ASE_WINDOW_MASK;
        if self.cur_page != Some(page) {
            self.mmio.write64(self.cntl, page)?;
            self.cur_page = Some(page);
        }
        Ok(self.data + (addr & block::ASE_WINDOW_MASK))
    }

    /// Splice `bytes` into the qword containing `addr`.
    fn write_partial(&mut self, addr: u64, bytes: &[u8]) -> DmaResult<()> {
        let base = addr & !7;
        let shift = (addr & 7) as usize;
        debug_assert!(shift + bytes.len() <= 8);
        let off = self.window(base)?;
        let mut word = self.mmio.read64(off)?.to_le_bytes();
        word[shift..shift + bytes.len()].copy_from_slice(bytes);
        self.mmio.write64(off, u64::from_le_bytes(word))
    }

    fn read_partial(&mut self, addr: u64, bytes: &mut [u8]) -> DmaResult<()> {
        let base = addr & !7;
        let shift = (addr & 7) as usize;
        debug_assert!(shift + bytes.len() <= 8);
        let off = self.window(base)?;
        let word = self.mmio.read64(off)?.to_le_bytes();
        bytes.copy_from_slice(&word[shift..shift + bytes.len()]);
        Ok(())
    }

    /// Copy `src` to device address `dev_addr`.
    pub fn write_from_host(&mut self, dev_addr: u64, src: &[u8]) -> DmaResult<()> {
        log::trace!("ase write {} bytes at {:#x}", src.len(), dev_addr);
        let mut pos = 0;
        while pos < src.len() {
            let addr = dev_addr + pos as u64;
            let rem = src.len() - pos;
            if addr % 8 == 0 && rem >= 8 {
                let mut word = [0u8; 8];
                word.copy_from_slice(&src[pos..pos + 8]);
                let off = self.window(addr)?;
                self.mmio.write64(off, u64::from_le_bytes(word))?;
                pos += 8;
            } else if addr % 4 == 0 && rem >= 4 {
                let mut word = [0u8; 4];
                word.copy_from_slice(&src[pos..pos + 4]);
                let off = self.window(addr)?;
                self.mmio.write32(off, u32::from_le_bytes(word))?;
                pos += 4;
            } else {
                let n = rem.min(8 - (addr % 8) as usize);
                self.write_partial(addr, &src[pos..pos + n])?;
                pos += n;
            }
        }
        Ok(())
    }

    /// Copy from device address `dev_addr` into `dst`.
    pub fn read_to_host(&mut self, dst: &mut [u8], dev_addr: u64) -> DmaResult<()> {
        log::trace!("ase read {} bytes at {:#x}", dst.len(), dev_addr);
        let mut pos = 0;
        while pos < dst.len() {
            let addr = dev_addr + pos as u64;
            let rem = dst.len() - pos;
            if addr % 8 == 0 && rem >= 8 {
                let off = self.window(addr)?;
                dst[pos..pos + 8].copy_from_slice(&self.mmio.read64(off)?.to_le_bytes());
                pos += 8;
            } else if addr % 4 == 0 && rem >= 4 {
                let off = self.window(addr)?;
                dst[pos..pos + 4].copy_from_slice(&self.mmio.read32(off)?.to_le_bytes());
                pos += 4;
            } else {
                let n = rem.min(8 - (addr % 8) as usize);
                self.read_partial(addr, &mut dst[pos..pos + n])?;
                pos += n;
            }
        }
        Ok(())
    }
}
