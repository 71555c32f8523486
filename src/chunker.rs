// FPGA Memory-Mapped DMA Rust Bindings
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Decomposition of an aligned transfer into hardware descriptors.
//!
//! Host-facing addresses must be issued in four-cache-line bursts. A run
//! that starts mid-burst is split into a single-line head up to the next
//! 256-byte boundary, a four-line bulk, and a single-line tail.

use crate::descriptor::{DescControl, MsgdmaDesc};
use crate::error::{DmaError, DmaResult};
use crate::regs::{ALIGN_BYTES, BURST_BYTES, BURST_FULL, BURST_SINGLE};

/// Largest length put in a single bulk descriptor.
pub const MAX_DESC_LEN: u64 = 0x8000_0000;

/// Transfer direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    HostToFpga,
    FpgaToHost,
    FpgaToFpga,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Direction::HostToFpga => "host-to-fpga",
            Direction::FpgaToHost => "fpga-to-host",
            Direction::FpgaToFpga => "fpga-to-fpga",
        };
        f.write_str(name)
    }
}

/// Burst split of a run starting at a host address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostSegments {
    /// Bytes up to the next 256-byte boundary (single-line bursts).
    pub head: u64,
    /// Multiple of 256 bytes (four-line bursts).
    pub bulk: u64,
    /// Remainder below 256 bytes (single-line bursts).
    pub tail: u64,
}

impl HostSegments {
    pub fn split(host_addr: u64, count: u64) -> Self {
        let offset = host_addr % BURST_BYTES;
        let head = if offset != 0 {
            (BURST_BYTES - offset).min(count)
        } else {
            0
        };
        let rest = count - head;
        let bulk = rest - rest % BURST_BYTES;
        Self {
            head,
            bulk,
            tail: rest - bulk,
        }
    }

    pub fn total(&self) -> u64 {
        self.head + self.bulk + self.tail
    }
}

fn check_aligned(what: &'static str, value: u64) -> DmaResult<()> {
    if value % ALIGN_BYTES != 0 {
        return Err(DmaError::misaligned(what, value, ALIGN_BYTES));
    }
    Ok(())
}

/// Build the descriptor chain moving `count` bytes from `src` to `dst`.
///
/// Host addresses already carry the host address bit. `EARLY_DONE_EN` is
/// set on every descriptor except the last one of a chain that ends a
/// batch (`ends_batch`), which the write fence follows. None request an
/// interrupt.
///
/// # Errors
///
/// Returns `Misaligned` (an invalid parameter) if `src`, `dst` or `count` is
/// not a multiple of 64.
pub fn build_mm_descriptors(
    direction: Direction,
    src: u64,
    dst: u64,
    count: u64,
    ends_batch: bool,
) -> DmaResult<Vec<MsgdmaDesc>> {
    check_aligned("source address", src)?;
    check_aligned("destination address", dst)?;
    check_aligned("transfer length", count)?;

    fn push_bulk(pieces: &mut Vec<(u64, u8)>, mut len: u64) {
        while len > 0 {
            let n = len.min(MAX_DESC_LEN);
            pieces.push((n, BURST_FULL));
            len -= n;
        }
    }

    // (length, burst) pieces in order
    let mut pieces: Vec<(u64, u8)> = Vec::new();

    match direction {
        Direction::FpgaToFpga => push_bulk(&mut pieces, count),
        Direction::HostToFpga | Direction::FpgaToHost => {
            let host = if direction == Direction::HostToFpga {
                src
            } else {
                dst
            };
            let seg = HostSegments::split(host, count);
            if seg.head > 0 {
                pieces.push((seg.head, BURST_SINGLE));
            }
            push_bulk(&mut pieces, seg.bulk);
            if seg.tail > 0 {
                pieces.push((seg.tail, BURST_SINGLE));
            }
        }
    }

    let last = pieces.len().saturating_sub(1);
    let mut off = 0u64;
    let descs = pieces
        .iter()
        .enumerate()
        .map(|(i, &(len, burst))| {
            let control = if ends_batch && i == last {
                DescControl::empty()
            } else {
                DescControl::EARLY_DONE_EN
            };
            let d = MsgdmaDesc::new(src + off, dst + off, len as u32, burst, control);
            off += len;
            d
        })
        .collect();
    Ok(descs)
}

/// Reject device-to-device copies whose destination starts inside the source.
///
/// A forward chunked copy with `src < dst < src + count` overwrites source
/// bytes before they are read.
pub fn check_overlap(src: u64, dst: u64, count: u64) -> DmaResult<()> {
    if src < dst && dst < src.saturating_add(count) {
        return Err(DmaError::NotSupported(format!(
            "overlapping fpga-to-fpga copy: src={src:#x} dst={dst:#x} count={count:#x}"
        )));
    }
    Ok(())
}
