// FPGA Memory-Mapped DMA Rust Bindings
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Memory-mapped transfer execution, run on a channel's worker thread.
//!
//! A request is split into an unaligned head and tail, carried by the
//! address span expander, and a 64-byte aligned body carried by DMA. Bodies
//! from ordinary host memory are staged through the channel's pinned pool:
//! the pool is used as two halves, with one write fence per half, so the host
//! copies one half while the device works on the other. Bodies in a pinned
//! [`DmaBuffer`](crate::buffer::DmaBuffer) whose alignment matches the device
//! address are transferred in place.

use crate::ase::SpanExpander;
use crate::buffer::{DmaBuffer, StagingPool};
use crate::chunker::{build_mm_descriptors, check_overlap, Direction};
use crate::error::{DmaError, DmaResult};
use crate::fence::WriteFence;
use crate::regs::{ALIGN_BYTES, HOST_MASK};
use crate::submit::DescriptorPort;

const ALIGN: usize = ALIGN_BYTES as usize;

/// Host memory referenced by a queued request.
///
/// The pointer stays valid until the submitting caller has received the
/// request's completion; the caller blocks on it while holding the borrow.
#[derive(Debug, Clone, Copy)]
pub(crate) struct HostSpan {
    ptr: *mut u8,
    len: usize,
    /// Device address of `ptr` when the memory is pinned.
    iova: Option<u64>,
}

// SAFETY: see the type-level contract; the worker is the only user of the
// pointer while the request is outstanding.
unsafe impl Send for HostSpan {}

impl HostSpan {
    pub fn from_slice(data: &[u8]) -> Self {
        Self {
            ptr: data.as_ptr() as *mut u8,
            len: data.len(),
            iova: None,
        }
    }

    pub fn from_mut_slice(data: &mut [u8]) -> Self {
        Self {
            ptr: data.as_mut_ptr(),
            len: data.len(),
            iova: None,
        }
    }

    /// `len` bytes at `ptr`, for callers holding raw host addresses.
    pub fn from_raw(ptr: *mut u8, len: usize) -> Self {
        Self {
            ptr,
            len,
            iova: None,
        }
    }

    fn check_range(buf: &DmaBuffer, offset: usize, count: usize) -> DmaResult<()> {
        match offset.checked_add(count) {
            Some(end) if end <= buf.len() => Ok(()),
            _ => Err(DmaError::InvalidParameter(format!(
                "range {offset}+{count} outside of {}-byte buffer",
                buf.len()
            ))),
        }
    }

    pub fn from_buffer(buf: &DmaBuffer, offset: usize, count: usize) -> DmaResult<Self> {
        Self::check_range(buf, offset, count)?;
        Ok(Self {
            ptr: buf.as_slice()[offset..].as_ptr() as *mut u8,
            len: count,
            iova: Some(buf.iova() + offset as u64),
        })
    }

    pub fn from_buffer_mut(buf: &mut DmaBuffer, offset: usize, count: usize) -> DmaResult<Self> {
        Self::check_range(buf, offset, count)?;
        Ok(Self {
            ptr: buf.as_mut_slice()[offset..].as_mut_ptr(),
            len: count,
            iova: Some(buf.iova() + offset as u64),
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// # Safety
    ///
    /// The span must still be valid and not written by anyone else.
    unsafe fn slice<'a>(&self, offset: usize, len: usize) -> &'a [u8] {
        debug_assert!(offset + len <= self.len);
        if len == 0 {
            return &[];
        }
        std::slice::from_raw_parts(self.ptr.add(offset), len)
    }

    /// # Safety
    ///
    /// The span must still be valid and not accessed by anyone else.
    #[allow(clippy::mut_from_ref)]
    unsafe fn slice_mut<'a>(&self, offset: usize, len: usize) -> &'a mut [u8] {
        debug_assert!(offset + len <= self.len);
        if len == 0 {
            return &mut [];
        }
        std::slice::from_raw_parts_mut(self.ptr.add(offset), len)
    }
}

/// One unit of work for a memory-mapped channel.
#[derive(Debug)]
pub(crate) enum TransferRequest {
    HostToFpga { dst: u64, src: HostSpan },
    FpgaToHost { dst: HostSpan, src: u64 },
    FpgaToFpga { dst: u64, src: u64, count: u64 },
}

impl TransferRequest {
    pub fn direction(&self) -> Direction {
        match self {
            TransferRequest::HostToFpga { .. } => Direction::HostToFpga,
            TransferRequest::FpgaToHost { .. } => Direction::FpgaToHost,
            TransferRequest::FpgaToFpga { .. } => Direction::FpgaToFpga,
        }
    }

    pub fn count(&self) -> u64 {
        match self {
            TransferRequest::HostToFpga { src, .. } => src.len() as u64,
            TransferRequest::FpgaToHost { dst, .. } => dst.len() as u64,
            TransferRequest::FpgaToFpga { count, .. } => *count,
        }
    }
}

/// Split `count` bytes at device address `addr` into the expander head,
/// the aligned body length and the expander tail length.
fn edges(addr: u64, count: usize) -> (usize, usize, usize) {
    let head = if count < ALIGN {
        count
    } else {
        ((ALIGN_BYTES - addr % ALIGN_BYTES) % ALIGN_BYTES) as usize
    };
    let body = (count - head) / ALIGN * ALIGN;
    (head, body, count - head - body)
}

/// Worker-owned state of a memory-mapped channel.
pub(crate) struct MmTransfer {
    port: DescriptorPort,
    ase: SpanExpander,
    fence: WriteFence,
    pool: StagingPool,
}

impl MmTransfer {
    pub fn new(port: DescriptorPort, ase: SpanExpander, fence: WriteFence, pool: StagingPool) -> Self {
        Self {
            port,
            ase,
            fence,
            pool,
        }
    }

    pub fn port(&self) -> &DescriptorPort {
        &self.port
    }

    /// Run `request` to completion and return the bytes moved.
    ///
    /// # Safety
    ///
    /// Every [`HostSpan`] in `request` must be valid for the whole call.
    pub unsafe fn execute(&mut self, request: &TransferRequest) -> DmaResult<usize> {
        log::debug!(
            "{} transfer of {} bytes",
            request.direction(),
            request.count()
        );
        match *request {
            TransferRequest::HostToFpga { dst, src } => {
                let data = src.slice(0, src.len());
                match src.iova {
                    Some(iova) if iova % ALIGN_BYTES == dst % ALIGN_BYTES => {
                        self.host_to_fpga_pinned(dst, data, iova)?
                    }
                    _ => self.host_to_fpga(dst, data)?,
                }
                Ok(src.len())
            }
            TransferRequest::FpgaToHost { dst, src } => {
                match dst.iova {
                    Some(iova) if iova % ALIGN_BYTES == src % ALIGN_BYTES => {
                        self.fpga_to_pinned(dst, iova, src)?
                    }
                    _ => self.fpga_to_host(dst.slice_mut(0, dst.len()), src)?,
                }
                Ok(dst.len())
            }
            TransferRequest::FpgaToFpga { dst, src, count } => {
                self.fpga_to_fpga(dst, src, count)?;
                Ok(count as usize)
            }
        }
    }

    /// Build and post the descriptor chain for an aligned run.
    ///
    /// `ends_batch` marks the chain a write fence follows.
    fn post(
        &self,
        direction: Direction,
        src: u64,
        dst: u64,
        count: u64,
        ends_batch: bool,
    ) -> DmaResult<()> {
        for desc in build_mm_descriptors(direction, src, dst, count, ends_batch)? {
            self.port.send(&desc)?;
        }
        Ok(())
    }

    /// True if a fence closes the batch ending at chunk `i`.
    ///
    /// Transfers that fit the pool need a single fence; larger ones fence
    /// every half pool so a half is never refilled before it drained.
    fn batch_ends(&self, i: usize, chunks: usize) -> bool {
        i + 1 == chunks || (chunks > self.pool.len() && (i + 1) % self.pool.half() == 0)
    }

    fn chunk(&self, i: usize, len: usize) -> (usize, usize) {
        let off = i * self.pool.slot_size();
        (off, self.pool.slot_size().min(len - off))
    }

    /// Copy host memory to the device.
    pub fn host_to_fpga(&mut self, dst: u64, src: &[u8]) -> DmaResult<()> {
        let (head, body, tail) = edges(dst, src.len());
        if head > 0 {
            self.ase.write_from_host(dst, &src[..head])?;
        }
        self.staged_to_fpga(dst + head as u64, &src[head..head + body])?;
        if tail > 0 {
            self.ase
                .write_from_host(dst + (head + body) as u64, &src[head + body..])?;
        }
        Ok(())
    }

    fn staged_to_fpga(&mut self, dst: u64, data: &[u8]) -> DmaResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        let chunks = data.len().div_ceil(self.pool.slot_size());
        let mut fence_pending = false;
        for i in 0..chunks {
            let (off, n) = self.chunk(i, data.len());
            let slot = self.pool.slot_mut(i);
            slot.copy_from(0, &data[off..off + n]);
            let iova = slot.iova();
            log::trace!("h2f chunk {i}/{chunks}: {n} bytes to {:#x}", dst + off as u64);
            let ends_batch = self.batch_ends(i, chunks);
            self.post(
                Direction::HostToFpga,
                iova | HOST_MASK,
                dst + off as u64,
                n as u64,
                ends_batch,
            )?;

            if ends_batch {
                if fence_pending {
                    self.fence.wait(&self.port)?;
                }
                self.fence.issue(&self.port)?;
                fence_pending = true;
            }
        }
        if fence_pending {
            self.fence.wait(&self.port)?;
        }
        Ok(())
    }

    /// Copy device memory into host memory.
    pub fn fpga_to_host(&mut self, dst: &mut [u8], src: u64) -> DmaResult<()> {
        let (head, body, tail) = edges(src, dst.len());
        let (head_buf, rest) = dst.split_at_mut(head);
        let (body_buf, tail_buf) = rest.split_at_mut(body);
        if head > 0 {
            self.ase.read_to_host(head_buf, src)?;
        }
        self.staged_from_fpga(body_buf, src + head as u64)?;
        if tail > 0 {
            self.ase.read_to_host(tail_buf, src + (head + body) as u64)?;
        }
        Ok(())
    }

    fn staged_from_fpga(&mut self, out: &mut [u8], src: u64) -> DmaResult<()> {
        if out.is_empty() {
            return Ok(());
        }
        let chunks = out.len().div_ceil(self.pool.slot_size());
        // Chunk range covered by the outstanding fence
        let mut pending: Option<(usize, usize)> = None;
        let mut batch_start = 0;
        for i in 0..chunks {
            let (off, n) = self.chunk(i, out.len());
            let iova = self.pool.slot(i).iova();
            log::trace!("f2h chunk {i}/{chunks}: {n} bytes from {:#x}", src + off as u64);
            let ends_batch = self.batch_ends(i, chunks);
            self.post(
                Direction::FpgaToHost,
                src + off as u64,
                iova | HOST_MASK,
                n as u64,
                ends_batch,
            )?;

            if ends_batch {
                if let Some((first, end)) = pending.take() {
                    self.fence.wait(&self.port)?;
                    self.drain(out, first, end);
                }
                self.fence.issue(&self.port)?;
                pending = Some((batch_start, i + 1));
                batch_start = i + 1;
            }
        }
        if let Some((first, end)) = pending {
            self.fence.wait(&self.port)?;
            self.drain(out, first, end);
        }
        Ok(())
    }

    /// Copy fenced chunks `first..end` out of the pool.
    fn drain(&self, out: &mut [u8], first: usize, end: usize) {
        for i in first..end {
            let (off, n) = self.chunk(i, out.len());
            self.pool.slot(i).copy_to(0, &mut out[off..off + n]);
        }
    }

    /// Copy a pinned host buffer to the device without staging.
    ///
    /// `iova` and `dst` must agree modulo 64.
    fn host_to_fpga_pinned(&mut self, dst: u64, src: &[u8], iova: u64) -> DmaResult<()> {
        let (head, body, tail) = edges(dst, src.len());
        if head > 0 {
            self.ase.write_from_host(dst, &src[..head])?;
        }
        if body > 0 {
            log::trace!("h2f direct: {body} bytes from iova {:#x}", iova + head as u64);
            self.post(
                Direction::HostToFpga,
                (iova + head as u64) | HOST_MASK,
                dst + head as u64,
                body as u64,
                true,
            )?;
            self.fence.issue(&self.port)?;
            self.fence.wait(&self.port)?;
        }
        if tail > 0 {
            self.ase
                .write_from_host(dst + (head + body) as u64, &src[head + body..])?;
        }
        Ok(())
    }

    /// Copy device memory into a pinned host buffer without staging.
    ///
    /// # Safety
    ///
    /// `dst` must be valid for the whole call.
    unsafe fn fpga_to_pinned(&mut self, dst: HostSpan, iova: u64, src: u64) -> DmaResult<()> {
        let (head, body, tail) = edges(src, dst.len());
        if head > 0 {
            self.ase.read_to_host(dst.slice_mut(0, head), src)?;
        }
        if body > 0 {
            log::trace!("f2h direct: {body} bytes to iova {:#x}", iova + head as u64);
            self.post(
                Direction::FpgaToHost,
                src + head as u64,
                (iova + head as u64) | HOST_MASK,
                body as u64,
                true,
            )?;
            self.fence.issue(&self.port)?;
            self.fence.wait(&self.port)?;
        }
        if tail > 0 {
            self.ase
                .read_to_host(dst.slice_mut(head + body, tail), src + (head + body) as u64)?;
        }
        Ok(())
    }

    /// Copy between two device regions.
    pub fn fpga_to_fpga(&mut self, dst: u64, src: u64, count: u64) -> DmaResult<()> {
        check_overlap(src, dst, count)?;
        if count == 0 {
            return Ok(());
        }

        let aligned = src % ALIGN_BYTES == 0 && dst % ALIGN_BYTES == 0 && count % ALIGN_BYTES == 0;
        if aligned {
            let slot = self.pool.slot_size() as u64;
            let chunks = count.div_ceil(slot) as usize;
            for i in 0..chunks {
                let off = i as u64 * slot;
                let n = slot.min(count - off);
                let ends_batch = (i + 1) % self.pool.len() == 0 || i + 1 == chunks;
                self.post(Direction::FpgaToFpga, src + off, dst + off, n, ends_batch)?;
                if ends_batch {
                    self.fence.issue(&self.port)?;
                    self.fence.wait(&self.port)?;
                }
            }
            return Ok(());
        }

        // Misaligned: bounce through host memory one pool's worth at a time.
        let step = (self.pool.slot_size() * self.pool.len()) as u64;
        let mut bounce = vec![0u8; step.min(count) as usize];
        let mut off = 0u64;
        while off < count {
            let n = step.min(count - off) as usize;
            self.fpga_to_host(&mut bounce[..n], src + off)?;
            self.host_to_fpga(dst + off, &bounce[..n])?;
            off += n as u64;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::Backoff;
    use crate::buffer::DmaBuffer;
    use crate::descriptor::DescControl;
    use crate::error::ErrorKind;
    use crate::sim::{SimConfig, SimDevice};
    use std::sync::Arc;

    struct Rig {
        sim: SimDevice,
        mm: MmTransfer,
    }

    fn rig(slots: usize, slot_size: usize, fifo_depth: usize) -> Rig {
        let sim = SimDevice::new(SimConfig {
            fifo_depth,
            ..SimConfig::default()
        });
        let handle = sim.handle();
        let base = sim.dma_base(0);
        let port = DescriptorPort::new(handle.mmio().clone(), base, Backoff::default());
        port.set_global_irq(true).unwrap();
        let irq = handle.interrupts().register(0).unwrap();
        let fence = WriteFence::new(handle.allocator(), irq, None, Backoff::default()).unwrap();
        let pool = StagingPool::allocate(handle.allocator(), slots, slot_size).unwrap();
        let ase = SpanExpander::new(handle.mmio().clone(), base);
        Rig {
            sim,
            mm: MmTransfer::new(port, ase, fence, pool),
        }
    }

    fn pattern(len: usize, seed: u8) -> Vec<u8> {
        (0..len)
            .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
            .collect()
    }

    fn fences(sim: &SimDevice) -> usize {
        sim.descriptors(0)
            .iter()
            .filter(|d| d.is_write_fence())
            .count()
    }

    #[test]
    fn test_round_trip_counts_and_offsets() {
        let mut r = rig(4, 256, 8);
        for count in [0usize, 1, 7, 8, 63, 64, 65, 200, 256, 1000, 4104, 10_000] {
            for dev in [0x1_0000u64, 0x1_0008, 0x1_0040, 0x1_00f8] {
                let src = pattern(count, count as u8);
                r.mm.host_to_fpga(dev, &src).unwrap();
                assert_eq!(r.sim.read_mem(dev, count), src, "count={count} dev={dev:#x}");
                let mut back = vec![0u8; count];
                r.mm.fpga_to_host(&mut back, dev).unwrap();
                assert_eq!(back, src, "count={count} dev={dev:#x}");
            }
        }
        assert!(r.sim.faults().is_empty(), "{:?}", r.sim.faults());
        assert!(r.sim.descriptors(0).iter().all(|d| d.is_aligned()));
    }

    #[test]
    fn test_small_unaligned_uses_expander_only() {
        let mut r = rig(4, 256, 8);
        let src = pattern(40, 3);
        r.mm.host_to_fpga(0x2003, &src).unwrap();
        let mut back = vec![0u8; 40];
        r.mm.fpga_to_host(&mut back, 0x2003).unwrap();
        assert_eq!(back, src);
        assert!(r.sim.descriptors(0).is_empty());
    }

    #[test]
    fn test_ping_pong_fences_per_half() {
        // 10 chunks over a 4-slot pool: fences after chunks 2, 4, 6, 8, 10
        let mut r = rig(4, 256, 3);
        let src = pattern(2560, 9);
        r.mm.host_to_fpga(0x8000, &src).unwrap();
        assert_eq!(fences(&r.sim), 5);
        assert_eq!(r.sim.descriptors(0).len(), 15);
        assert_eq!(r.sim.read_mem(0x8000, 2560), src);

        r.sim.clear_descriptors(0);
        let mut back = vec![0u8; 2560];
        r.mm.fpga_to_host(&mut back, 0x8000).unwrap();
        assert_eq!(back, src);
        assert_eq!(fences(&r.sim), 5);
        assert!(r.sim.faults().is_empty());
    }

    /// Only the descriptor a fence follows runs without early done.
    fn assert_early_done_until_fence(sim: &SimDevice) {
        let log = sim.descriptors(0);
        for (i, d) in log.iter().enumerate().filter(|(_, d)| !d.is_write_fence()) {
            let before_fence = log.get(i + 1).is_some_and(|n| n.is_write_fence());
            assert_eq!(
                d.control().contains(DescControl::EARLY_DONE_EN),
                !before_fence,
                "descriptor {i}"
            );
        }
    }

    #[test]
    fn test_early_done_within_batch() {
        // 8 chunks of 4 KiB fit the pool: one batch, one fence
        let mut r = rig(8, 4096, 16);
        let src = pattern(32 * 1024, 12);
        r.mm.host_to_fpga(0x10_0000, &src).unwrap();
        let log = r.sim.descriptors(0);
        assert_eq!(log.len(), 9);
        assert!(log[..7]
            .iter()
            .all(|d| d.control().contains(DescControl::EARLY_DONE_EN)));
        assert!(!log[7].control().contains(DescControl::EARLY_DONE_EN));
        assert!(log[8].is_write_fence());
        assert_early_done_until_fence(&r.sim);

        r.sim.clear_descriptors(0);
        let mut back = vec![0u8; src.len()];
        r.mm.fpga_to_host(&mut back, 0x10_0000).unwrap();
        assert_eq!(back, src);
        assert_early_done_until_fence(&r.sim);
    }

    #[test]
    fn test_early_done_across_ping_pong_batches() {
        let mut r = rig(4, 256, 3);
        r.mm.host_to_fpga(0x8000, &pattern(2560, 9)).unwrap();
        assert_early_done_until_fence(&r.sim);

        r.sim.clear_descriptors(0);
        r.sim.write_mem(0x1_0000, &pattern(1536, 4));
        r.mm.fpga_to_fpga(0x2_0000, 0x1_0000, 1536).unwrap();
        assert_early_done_until_fence(&r.sim);
    }

    #[test]
    fn test_fits_pool_single_fence() {
        let mut r = rig(4, 256, 16);
        let src = pattern(3 * 256 + 64, 1);
        r.mm.host_to_fpga(0x8000, &src).unwrap();
        assert_eq!(fences(&r.sim), 1);
        let last = r.sim.descriptors(0).pop().unwrap();
        assert!(last.is_write_fence());
    }

    #[test]
    fn test_pinned_direct_two_mib() {
        let mut r = rig(4, 4096, 16);
        let alloc: Arc<dyn crate::buffer::BufferAllocator> = r.sim.allocator().clone();
        let count = 2 * 1024 * 1024;
        let mut buf = DmaBuffer::allocate(&alloc, count + 256).unwrap();
        let src = pattern(count, 5);
        buf.copy_from(64, &src);

        let span = HostSpan::from_buffer(&buf, 64, count).unwrap();
        let req = TransferRequest::HostToFpga {
            dst: 0x40_0000,
            src: span,
        };
        assert_eq!(unsafe { r.mm.execute(&req) }.unwrap(), count);

        let log = r.sim.descriptors(0);
        let lens: Vec<u32> = log.iter().map(|d| d.len).collect();
        assert_eq!(lens, vec![192, (count - 256) as u32, 64, 64]);
        assert_eq!(log[0].read_address(), (buf.iova() + 64) | HOST_MASK);
        assert!(log[3].is_write_fence());
        assert_eq!(r.sim.read_mem(0x40_0000, count), src);
    }

    #[test]
    fn test_pinned_read_back() {
        let mut r = rig(4, 256, 16);
        let alloc: Arc<dyn crate::buffer::BufferAllocator> = r.sim.allocator().clone();
        let src = pattern(3000, 11);
        r.sim.write_mem(0x9010, &src);

        let mut buf = DmaBuffer::allocate(&alloc, 4096).unwrap();
        let span = HostSpan::from_buffer_mut(&mut buf, 16, src.len()).unwrap();
        let req = TransferRequest::FpgaToHost { dst: span, src: 0x9010 };
        unsafe { r.mm.execute(&req) }.unwrap();
        assert_eq!(&buf.as_slice()[16..16 + src.len()], &src[..]);
        // Direct path: one data chain and one fence, no staging
        assert_eq!(fences(&r.sim), 1);
        assert!(r.sim.faults().is_empty());
    }

    #[test]
    fn test_pinned_mismatched_alignment_is_staged() {
        let mut r = rig(4, 256, 16);
        let alloc: Arc<dyn crate::buffer::BufferAllocator> = r.sim.allocator().clone();
        let mut buf = DmaBuffer::allocate(&alloc, 4096).unwrap();
        let src = pattern(1024, 2);
        buf.copy_from(0, &src);

        let span = HostSpan::from_buffer(&buf, 0, 1024).unwrap();
        let req = TransferRequest::HostToFpga { dst: 0x6020, src: span };
        unsafe { r.mm.execute(&req) }.unwrap();
        assert_eq!(r.sim.read_mem(0x6020, 1024), src);
        let staged = r
            .sim
            .descriptors(0)
            .iter()
            .filter(|d| !d.is_write_fence())
            .all(|d| d.read_address() & !HOST_MASK != buf.iova());
        assert!(staged);
    }

    #[test]
    fn test_fpga_to_fpga_aligned() {
        let mut r = rig(2, 256, 16);
        let src = pattern(1536, 4);
        r.sim.write_mem(0x1_0000, &src);
        r.mm.fpga_to_fpga(0x2_0000, 0x1_0000, 1536).unwrap();
        assert_eq!(r.sim.read_mem(0x2_0000, 1536), src);
        // 6 chunks, fenced every 2
        assert_eq!(fences(&r.sim), 3);
        assert!(r
            .sim
            .descriptors(0)
            .iter()
            .filter(|d| !d.is_write_fence())
            .all(|d| d.len == 256 && d.rd_burst_count == crate::regs::BURST_FULL));
    }

    #[test]
    fn test_fpga_to_fpga_misaligned() {
        let mut r = rig(2, 256, 16);
        let src = pattern(1000, 8);
        r.sim.write_mem(0x1_0003, &src);
        r.mm.fpga_to_fpga(0x3_0005, 0x1_0003, 1000).unwrap();
        assert_eq!(r.sim.read_mem(0x3_0005, 1000), src);
        assert!(r.sim.faults().is_empty());
    }

    #[test]
    fn test_fpga_to_fpga_overlap_rejected() {
        let mut r = rig(2, 256, 16);
        let err = r.mm.fpga_to_fpga(0x1100, 0x1000, 0x400).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotSupported);
        assert!(r.sim.descriptors(0).is_empty());
        assert_eq!(r.sim.ase_page_writes(0), 0);
    }

    #[test]
    fn test_fpga_to_fpga_lower_destination() {
        let mut r = rig(2, 256, 16);
        let src = pattern(0x400, 6);
        r.sim.write_mem(0x2000, &src);
        r.mm.fpga_to_fpga(0x1f00, 0x2000, 0x400).unwrap();
        assert_eq!(r.sim.read_mem(0x1f00, 0x400), src);
    }

    #[test]
    fn test_port_failure_aborts() {
        let mut r = rig(4, 256, 16);
        r.sim.fail_descriptors_after(0, 2);
        let err = r.mm.host_to_fpga(0x8000, &pattern(2560, 0)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Exception);
        assert_eq!(r.sim.descriptors(0).len(), 2);
    }

    #[test]
    fn test_edges() {
        assert_eq!(edges(0x1003, 40), (40, 0, 0));
        assert_eq!(edges(0x1003, 200), (61, 128, 11));
        assert_eq!(edges(0x1000, 200), (0, 192, 8));
        assert_eq!(edges(0x1000, 0), (0, 0, 0));
    }
}
