// FPGA Memory-Mapped DMA Rust Bindings
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Pinned, IOVA-mapped host buffers.
//!
//! Buffers come from a [`BufferAllocator`] (in production the VFIO/IOMMU
//! buffer manager) and are returned to it when the owning [`DmaBuffer`] is
//! dropped. The engine uses them for its staging pool and write-fence word,
//! and callers may allocate their own for zero-copy transfers.

use crate::error::{DmaError, DmaResult};
use std::ptr::NonNull;
use std::sync::Arc;

/// Raw description of a pinned allocation.
#[derive(Debug)]
pub struct PinnedBuffer {
    va: NonNull<u8>,
    iova: u64,
    len: usize,
}

impl PinnedBuffer {
    /// Describe an existing pinned allocation.
    ///
    /// # Safety
    ///
    /// `va` must point to `len` bytes that stay valid and pinned at `iova`
    /// until the buffer is handed back to the allocator that produced it.
    pub unsafe fn from_raw_parts(va: NonNull<u8>, iova: u64, len: usize) -> Self {
        Self { va, iova, len }
    }

    pub fn va(&self) -> NonNull<u8> {
        self.va
    }

    pub fn iova(&self) -> u64 {
        self.iova
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

// SAFETY: a pinned allocation is plain process memory with no thread affinity.
unsafe impl Send for PinnedBuffer {}
// SAFETY: shared access only hands out raw pointers; all dereferences go
// through `DmaBuffer`, which enforces borrowing.
unsafe impl Sync for PinnedBuffer {}

/// Source of pinned host memory visible to the device.
pub trait BufferAllocator: Send + Sync {
    /// Allocate and pin `len` bytes, zero-filled.
    fn allocate(&self, len: usize) -> DmaResult<PinnedBuffer>;

    /// Unpin and release a buffer previously returned by `allocate`.
    fn free(&self, buffer: PinnedBuffer);
}

/// Owned pinned buffer, freed on drop.
pub struct DmaBuffer {
    raw: Option<PinnedBuffer>,
    allocator: Arc<dyn BufferAllocator>,
}

impl std::fmt::Debug for DmaBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DmaBuffer")
            .field("va", &format_args!("{:p}", self.as_ptr()))
            .field("iova", &format_args!("{:#x}", self.iova()))
            .field("len", &self.len())
            .finish()
    }
}

impl DmaBuffer {
    /// Allocate `len` bytes from `allocator`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` for a zero length and propagates allocator
    /// failures (normally `NoMemory`).
    pub fn allocate(allocator: &Arc<dyn BufferAllocator>, len: usize) -> DmaResult<Self> {
        if len == 0 {
            return Err(DmaError::InvalidParameter("zero-length buffer".into()));
        }
        let raw = allocator.allocate(len)?;
        if raw.len() < len {
            let got = raw.len();
            allocator.free(raw);
            return Err(DmaError::NoMemory(format!(
                "allocator returned {got} bytes, {len} requested"
            )));
        }
        Ok(Self {
            raw: Some(raw),
            allocator: Arc::clone(allocator),
        })
    }

    fn raw(&self) -> &PinnedBuffer {
        // Only `Drop` takes the raw buffer out.
        match &self.raw {
            Some(raw) => raw,
            None => unreachable!("DmaBuffer used after free"),
        }
    }

    /// Device-visible address of the first byte.
    pub fn iova(&self) -> u64 {
        self.raw().iova()
    }

    pub fn len(&self) -> usize {
        self.raw().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.raw().va().as_ptr()
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.raw().va().as_ptr()
    }

    /// Host view of the buffer.
    ///
    /// Contents are only meaningful once every device write to the buffer
    /// has been fenced.
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the allocation is valid for `len` bytes while `self` lives
        unsafe { std::slice::from_raw_parts(self.as_ptr(), self.len()) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        let len = self.len();
        // SAFETY: the allocation is valid for `len` bytes and `&mut self`
        // guarantees exclusive host access
        unsafe { std::slice::from_raw_parts_mut(self.as_mut_ptr(), len) }
    }

    /// Volatile read of the aligned 64-bit word at byte `offset`.
    ///
    /// Used for words the device writes behind the host's back.
    pub fn read_u64_volatile(&self, offset: usize) -> u64 {
        assert!(offset % 8 == 0 && offset + 8 <= self.len());
        // SAFETY: in bounds and 8-byte aligned (allocations are page aligned)
        unsafe { std::ptr::read_volatile(self.as_ptr().add(offset) as *const u64) }
    }

    /// Volatile write of the aligned 64-bit word at byte `offset`.
    pub fn write_u64_volatile(&self, offset: usize, value: u64) {
        assert!(offset % 8 == 0 && offset + 8 <= self.len());
        // SAFETY: in bounds and 8-byte aligned; no host slice is live while
        // the engine owns the buffer
        unsafe { std::ptr::write_volatile(self.as_ptr().add(offset) as *mut u64, value) }
    }

    /// Copy `src` into the buffer at `offset`.
    pub(crate) fn copy_from(&mut self, offset: usize, src: &[u8]) {
        self.as_mut_slice()[offset..offset + src.len()].copy_from_slice(src);
    }

    /// Copy from the buffer at `offset` into `dst`.
    pub(crate) fn copy_to(&self, offset: usize, dst: &mut [u8]) {
        dst.copy_from_slice(&self.as_slice()[offset..offset + dst.len()]);
    }
}

impl Drop for DmaBuffer {
    fn drop(&mut self) {
        if let Some(raw) = self.raw.take() {
            log::trace!("freeing pinned buffer iova={:#x} len={}", raw.iova(), raw.len());
            self.allocator.free(raw);
        }
    }
}

/// Fixed set of equally sized staging buffers, used as two halves.
pub struct StagingPool {
    slots: Vec<DmaBuffer>,
    slot_size: usize,
}

impl StagingPool {
    /// Allocate `count` buffers of `slot_size` bytes.
    ///
    /// On failure every buffer allocated so far is released.
    pub fn allocate(
        allocator: &Arc<dyn BufferAllocator>,
        count: usize,
        slot_size: usize,
    ) -> DmaResult<Self> {
        if count < 2 || count % 2 != 0 {
            return Err(DmaError::InvalidParameter(format!(
                "staging pool needs an even number of buffers, got {count}"
            )));
        }
        let slots = (0..count)
            .map(|_| DmaBuffer::allocate(allocator, slot_size))
            .collect::<DmaResult<Vec<_>>>()?;
        log::debug!("allocated staging pool: {count} x {slot_size} bytes");
        Ok(Self { slots, slot_size })
    }

    /// Number of buffers in the pool.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of buffers per pipeline half.
    pub fn half(&self) -> usize {
        self.slots.len() / 2
    }

    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    /// Slot used by chunk number `chunk`.
    pub fn slot(&self, chunk: usize) -> &DmaBuffer {
        &self.slots[chunk % self.slots.len()]
    }

    pub fn slot_mut(&mut self, chunk: usize) -> &mut DmaBuffer {
        let n = self.slots.len();
        &mut self.slots[chunk % n]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimAllocator;

    fn allocator() -> (Arc<SimAllocator>, Arc<dyn BufferAllocator>) {
        let sim = Arc::new(SimAllocator::new());
        let dyn_alloc: Arc<dyn BufferAllocator> = sim.clone();
        (sim, dyn_alloc)
    }

    #[test]
    fn test_buffer_zeroed_and_freed() {
        let (sim, alloc) = allocator();
        {
            let mut buf = DmaBuffer::allocate(&alloc, 4096).unwrap();
            assert_eq!(buf.len(), 4096);
            assert!(buf.as_slice().iter().all(|&b| b == 0));
            buf.as_mut_slice()[10] = 7;
            assert_eq!(buf.as_slice()[10], 7);
            assert_eq!(sim.live_buffers(), 1);
        }
        assert_eq!(sim.live_buffers(), 0);
    }

    #[test]
    fn test_zero_length_rejected() {
        let (_sim, alloc) = allocator();
        assert!(matches!(
            DmaBuffer::allocate(&alloc, 0),
            Err(DmaError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_volatile_word() {
        let (_sim, alloc) = allocator();
        let buf = DmaBuffer::allocate(&alloc, 64).unwrap();
        buf.write_u64_volatile(8, 0xdead_beef);
        assert_eq!(buf.read_u64_volatile(8), 0xdead_beef);
        assert_eq!(buf.read_u64_volatile(0), 0);
    }

    #[test]
    fn test_pool_slots_wrap() {
        let (sim, alloc) = allocator();
        let pool = StagingPool::allocate(&alloc, 4, 256).unwrap();
        assert_eq!(pool.len(), 4);
        assert_eq!(pool.half(), 2);
        assert_eq!(pool.slot(1).iova(), pool.slot(5).iova());
        assert_ne!(pool.slot(0).iova(), pool.slot(1).iova());
        assert_eq!(sim.live_buffers(), 4);
        drop(pool);
        assert_eq!(sim.live_buffers(), 0);
    }

    #[test]
    fn test_pool_rolls_back_on_failure() {
        let sim = Arc::new(SimAllocator::with_limit(3));
        let alloc: Arc<dyn BufferAllocator> = sim.clone();
        let err = StagingPool::allocate(&alloc, 4, 256).err().unwrap();
        assert!(matches!(err, DmaError::NoMemory(_)));
        assert_eq!(sim.live_buffers(), 0);
    }

    #[test]
    fn test_pool_rejects_odd_count() {
        let (_sim, alloc) = allocator();
        assert!(StagingPool::allocate(&alloc, 3, 256).is_err());
    }
}
