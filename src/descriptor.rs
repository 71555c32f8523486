// FPGA Memory-Mapped DMA Rust Bindings
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! mSGDMA extended descriptor.
//!
//! The dispatcher accepts 32-byte descriptors written as four 64-bit words to
//! the descriptor port. The `GO` bit lives in the last word, so the descriptor
//! is only committed once the final word has been written.

use crate::regs::{ALIGN_BYTES, HOST_MASK, WF_ROM_MAGIC_NO_MASK};
use bitflags::bitflags;

bitflags! {
    /// Descriptor control word (last 32 bits of the descriptor).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DescControl: u32 {
        /// Transmit channel (bits 7:0), unused by memory-mapped transfers.
        const TX_CHANNEL = 0xff;
        const GEN_SOP = 1 << 8;
        const GEN_EOP = 1 << 9;
        const PARK_READS = 1 << 10;
        const PARK_WRITES = 1 << 11;
        const END_ON_EOP = 1 << 12;
        const EOP_RCVD_IRQ_EN = 1 << 13;
        /// Raise the channel interrupt when this descriptor retires.
        const TRANSFER_IRQ_EN = 1 << 14;
        const EARLY_TERM_IRQ_EN = 1 << 15;
        /// Transmit error interrupt mask (bits 23:16).
        const TRANS_ERROR_IRQ_EN = 0xff << 16;
        /// Let the next descriptor start reading before this one's writes retire.
        const EARLY_DONE_EN = 1 << 24;
        const WAIT_FOR_WR_RSP = 1 << 25;
        /// Commit the descriptor.
        const GO = 1 << 31;
    }
}

/// 32-byte hardware descriptor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct MsgdmaDesc {
    /// Read address, low 32 bits.
    pub rd_address: u32,
    /// Write address, low 32 bits.
    pub wr_address: u32,
    /// Transfer length in bytes.
    pub len: u32,
    pub seq_num: u16,
    pub rd_burst_count: u8,
    pub wr_burst_count: u8,
    pub rd_stride: u16,
    pub wr_stride: u16,
    /// Read address, high 32 bits.
    pub rd_address_ext: u32,
    /// Write address, high 32 bits.
    pub wr_address_ext: u32,
    pub control: u32,
}

// Compile-time layout check
const _: () = assert!(core::mem::size_of::<MsgdmaDesc>() == 32);

impl MsgdmaDesc {
    /// Build a committed descriptor copying `len` bytes from `src` to `dst`.
    ///
    /// Both addresses are split into low/extension words. Strides are fixed
    /// at one and the sequence number at zero; `GO` is always set.
    pub fn new(src: u64, dst: u64, len: u32, burst: u8, control: DescControl) -> Self {
        Self {
            rd_address: src as u32,
            wr_address: dst as u32,
            len,
            seq_num: 0,
            rd_burst_count: burst,
            wr_burst_count: burst,
            rd_stride: 1,
            wr_stride: 1,
            rd_address_ext: (src >> 32) as u32,
            wr_address_ext: (dst >> 32) as u32,
            control: (control | DescControl::GO).bits(),
        }
    }

    /// Full 64-bit read address.
    #[inline]
    pub fn read_address(&self) -> u64 {
        ((self.rd_address_ext as u64) << 32) | self.rd_address as u64
    }

    /// Full 64-bit write address.
    #[inline]
    pub fn write_address(&self) -> u64 {
        ((self.wr_address_ext as u64) << 32) | self.wr_address as u64
    }

    /// Control flags.
    #[inline]
    pub fn control(&self) -> DescControl {
        DescControl::from_bits_retain(self.control)
    }

    /// True if this descriptor reads the write-fence sentinel ROM.
    pub fn is_write_fence(&self) -> bool {
        let src = self.read_address();
        src & WF_ROM_MAGIC_NO_MASK != 0 && src & HOST_MASK == 0
    }

    /// True if every address and the length honour the 64-byte rule.
    pub fn is_aligned(&self) -> bool {
        self.read_address() % ALIGN_BYTES == 0
            && self.write_address() % ALIGN_BYTES == 0
            && self.len as u64 % ALIGN_BYTES == 0
    }

    /// Serialize into the four little-endian words written to the port.
    pub fn to_qwords(&self) -> [u64; 4] {
        [
            (self.rd_address as u64) | ((self.wr_address as u64) << 32),
            (self.len as u64)
                | ((self.seq_num as u64) << 32)
                | ((self.rd_burst_count as u64) << 48)
                | ((self.wr_burst_count as u64) << 56),
            (self.rd_stride as u64)
                | ((self.wr_stride as u64) << 16)
                | ((self.rd_address_ext as u64) << 32),
            (self.wr_address_ext as u64) | ((self.control as u64) << 32),
        ]
    }

    /// Inverse of [`MsgdmaDesc::to_qwords`].
    pub fn from_qwords(q: [u64; 4]) -> Self {
        Self {
            rd_address: q[0] as u32,
            wr_address: (q[0] >> 32) as u32,
            len: q[1] as u32,
            seq_num: (q[1] >> 32) as u16,
            rd_burst_count: (q[1] >> 48) as u8,
            wr_burst_count: (q[1] >> 56) as u8,
            rd_stride: q[2] as u16,
            wr_stride: (q[2] >> 16) as u16,
            rd_address_ext: (q[2] >> 32) as u32,
            wr_address_ext: q[3] as u32,
            control: (q[3] >> 32) as u32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_size() {
        assert_eq!(core::mem::size_of::<MsgdmaDesc>(), 32);
    }

    #[test]
    fn test_address_split() {
        let d = MsgdmaDesc::new(
            0x0002_1234_5678_9a40,
            0x0000_0001_0000_0080,
            4096,
            4,
            DescControl::empty(),
        );
        assert_eq!(d.rd_address, 0x5678_9a40);
        assert_eq!(d.rd_address_ext, 0x0002_1234);
        assert_eq!(d.wr_address, 0x80);
        assert_eq!(d.wr_address_ext, 1);
        assert_eq!(d.read_address(), 0x0002_1234_5678_9a40);
        assert_eq!(d.write_address(), 0x0000_0001_0000_0080);
        assert_eq!((d.rd_stride, d.wr_stride, d.seq_num), (1, 1, 0));
        assert_eq!((d.rd_burst_count, d.wr_burst_count), (4, 4));
    }

    #[test]
    fn test_go_always_set() {
        let d = MsgdmaDesc::new(0, 0, 64, 1, DescControl::EARLY_DONE_EN);
        assert!(d.control().contains(DescControl::GO | DescControl::EARLY_DONE_EN));
        assert!(!d.control().contains(DescControl::TRANSFER_IRQ_EN));
    }

    #[test]
    fn test_qword_layout() {
        let d = MsgdmaDesc::new(0x40, 0x80, 0x100, 4, DescControl::TRANSFER_IRQ_EN);
        let q = d.to_qwords();
        assert_eq!(q[0], 0x0000_0080_0000_0040);
        assert_eq!(q[1], 0x0404_0000_0000_0100);
        assert_eq!(q[2], 0x0000_0000_0001_0001);
        // GO and TRANSFER_IRQ_EN in the upper dword of the last word
        assert_eq!(q[3] >> 32, (1 << 31) | (1 << 14));
        assert_eq!(MsgdmaDesc::from_qwords(q), d);
    }

    #[test]
    fn test_write_fence_detection() {
        let fence = MsgdmaDesc::new(
            WF_ROM_MAGIC_NO_MASK,
            0x1000 | crate::regs::WF_HOST_MASK,
            64,
            1,
            DescControl::TRANSFER_IRQ_EN,
        );
        assert!(fence.is_write_fence());
        let data = MsgdmaDesc::new(0x1000 | HOST_MASK, 0, 64, 1, DescControl::empty());
        assert!(!data.is_write_fence());
    }

    #[test]
    fn test_alignment_check() {
        assert!(MsgdmaDesc::new(0x40, 0x80, 64, 1, DescControl::empty()).is_aligned());
        assert!(!MsgdmaDesc::new(0x41, 0x80, 64, 1, DescControl::empty()).is_aligned());
        assert!(!MsgdmaDesc::new(0x40, 0x80, 65, 1, DescControl::empty()).is_aligned());
    }
}
