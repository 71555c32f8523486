// FPGA Memory-Mapped DMA Rust Bindings
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Register map of the memory-mapped DMA basic building block.
//!
//! All offsets are byte offsets relative to the base of the DMA feature
//! header, which is discovered at runtime by walking the device feature
//! list (see [`crate::device`]).

use bitflags::bitflags;

/// Hardware alignment for descriptor addresses and lengths.
pub const ALIGN_BYTES: u64 = 64;

/// Host-facing burst granularity (four cache lines).
pub const BURST_BYTES: u64 = 256;

/// Burst count used for full four-cache-line bursts.
pub const BURST_FULL: u8 = 4;

/// Burst count used for single-cache-line head/tail descriptors.
pub const BURST_SINGLE: u8 = 1;

/// Address bit selecting host memory on the Avalon side of the engine.
pub const HOST_MASK: u64 = 0x2_0000_0000_0000;

/// Write-fence destination mask (host memory, write-fence port).
pub const WF_HOST_MASK: u64 = 0x3_0000_0000_0000;

/// Read address of the on-chip ROM holding the write-fence sentinel.
pub const WF_ROM_MAGIC_NO_MASK: u64 = 0x1_0000_0000_0000;

/// Sentinel written by a write-fence descriptor ("Wrt_Sync").
pub const WF_MAGIC_NO: u64 = 0x5772_745F_5379_6E63;

/// Device feature header layout.
pub mod dfh {
    /// Header word.
    pub const HEADER: u64 = 0x00;
    /// Low 64 bits of the feature UUID.
    pub const UUID_L: u64 = 0x08;
    /// High 64 bits of the feature UUID.
    pub const UUID_H: u64 = 0x10;

    /// Feature type of an accelerator function unit header.
    pub const TYPE_AFU: u8 = 1;
    /// Feature type of a basic building block.
    pub const TYPE_BBB: u8 = 2;

    const NEXT_MASK: u64 = 0x00ff_ffff;

    /// Feature type (bits 63:60).
    #[inline]
    pub const fn feature_type(header: u64) -> u8 {
        ((header >> 60) & 0xf) as u8
    }

    /// End-of-list flag (bit 40).
    #[inline]
    pub const fn is_eol(header: u64) -> bool {
        (header >> 40) & 1 == 1
    }

    /// Byte offset to the next header (bits 39:16).
    #[inline]
    pub const fn next_offset(header: u64) -> u64 {
        (header >> 16) & NEXT_MASK
    }

    /// Compose a header word.
    #[inline]
    pub const fn encode(feature_type: u8, next_offset: u64, eol: bool) -> u64 {
        ((feature_type as u64 & 0xf) << 60) | ((eol as u64) << 40) | ((next_offset & NEXT_MASK) << 16)
    }
}

/// Feature UUIDs of the DMA building blocks, as `(high, low)` words.
pub mod uuid {
    /// Memory-mapped (memory to memory) DMA.
    pub const MM_DMA: (u64, u64) = (0xef82_def7_f6ec_40fc, 0xa914_9a35_bace_01ea);
    /// Memory to stream (TX) DMA.
    pub const M2S_DMA: (u64, u64) = (0xfee6_9b44_2f77_43ed, 0x9ff4_9b8c_f9ee_6335);
    /// Stream to memory (RX) DMA.
    pub const S2M_DMA: (u64, u64) = (0xf118_209a_d59a_4b3f, 0xa66c_d700_a658_a015);
}

/// Block offsets from the DMA feature base.
pub mod block {
    /// Dispatcher CSR block.
    pub const CSR: u64 = 0x40;
    /// Descriptor submission port.
    pub const DESC: u64 = 0x60;
    /// Address span expander window-control register.
    pub const ASE_CNTL: u64 = 0x200;
    /// Address span expander data window.
    pub const ASE_DATA: u64 = 0x1000;
    /// Size of the span expander data window.
    pub const ASE_DATA_SIZE: u64 = 0x1000;
    /// Offset-within-window mask.
    pub const ASE_WINDOW_MASK: u64 = ASE_DATA_SIZE - 1;
}

/// Register offsets within the dispatcher CSR block.
pub mod csr {
    pub const STATUS: u64 = 0x00;
    pub const CTRL: u64 = 0x04;
    pub const FILL_LEVEL: u64 = 0x08;
    pub const RSP_LEVEL: u64 = 0x0c;
    pub const SEQ_NUM: u64 = 0x10;
}

bitflags! {
    /// Dispatcher status register.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CsrStatus: u32 {
        const BUSY = 1 << 0;
        const DESC_BUF_EMPTY = 1 << 1;
        /// Descriptor FIFO cannot accept another descriptor.
        const DESC_BUF_FULL = 1 << 2;
        const RSP_BUF_EMPTY = 1 << 3;
        const RSP_BUF_FULL = 1 << 4;
        const STOPPED = 1 << 5;
        /// Dispatcher reset still in progress.
        const RESETTING = 1 << 6;
        const STOPPED_ON_ERROR = 1 << 7;
        const STOPPED_ON_EARLY_TERM = 1 << 8;
        /// Interrupt pending; write 1 to clear.
        const IRQ = 1 << 9;
    }
}

bitflags! {
    /// Dispatcher control register.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CsrControl: u32 {
        const STOP_DISPATCHER = 1 << 0;
        const RESET_DISPATCHER = 1 << 1;
        const STOP_ON_ERROR = 1 << 2;
        const STOP_ON_EARLY_TERM = 1 << 3;
        /// Global interrupt enable for the dispatcher.
        const GLOBAL_INTR_EN_MASK = 1 << 4;
        const STOP_DESCRIPTORS = 1 << 5;
        const FLUSH_DESCRIPTORS = 1 << 6;
        const FLUSH_RD = 1 << 7;
        const FLUSH_WR = 1 << 8;
    }
}
