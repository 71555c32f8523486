// FPGA Memory-Mapped DMA Rust Bindings
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! High-level DMA engine API.

use crate::buffer::DmaBuffer;
use crate::channel::{Channel, ChannelState, DmaBackend};
use crate::chunker::Direction;
use crate::config::DmaConfig;
use crate::device::{discover_channels, ChannelDesc, ChannelType, FpgaHandle};
use crate::error::{DmaError, DmaResult};
use crate::transfer::{HostSpan, TransferRequest};
use parking_lot::Mutex;
use std::sync::Arc;

/// Index of a channel within an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelHandle(usize);

impl ChannelHandle {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl From<usize> for ChannelHandle {
    fn from(index: usize) -> Self {
        Self(index)
    }
}

/// One synchronous transfer.
///
/// Device addresses are byte offsets in the accelerator's memory. Host
/// memory is borrowed for the duration of the call.
#[derive(Debug)]
pub enum Transfer<'a> {
    /// Copy host memory into device memory at `dst`.
    HostToFpga { dst: u64, src: &'a [u8] },
    /// Copy device memory at `src` into host memory.
    FpgaToHost { dst: &'a mut [u8], src: u64 },
    /// Copy `count` bytes within device memory.
    FpgaToFpga { dst: u64, src: u64, count: u64 },
    /// Copy `count` bytes at `offset` of a pinned buffer into device memory.
    /// Skips the staging copy when the buffer and `dst` share their
    /// 64-byte alignment.
    PinnedToFpga {
        dst: u64,
        src: &'a DmaBuffer,
        offset: usize,
        count: usize,
    },
    /// Copy `count` bytes of device memory into a pinned buffer at `offset`.
    FpgaToPinned {
        dst: &'a mut DmaBuffer,
        offset: usize,
        src: u64,
        count: usize,
    },
}

impl Transfer<'_> {
    fn into_request(self) -> DmaResult<TransferRequest> {
        Ok(match self {
            Transfer::HostToFpga { dst, src } => TransferRequest::HostToFpga {
                dst,
                src: HostSpan::from_slice(src),
            },
            Transfer::FpgaToHost { dst, src } => TransferRequest::FpgaToHost {
                dst: HostSpan::from_mut_slice(dst),
                src,
            },
            Transfer::FpgaToFpga { dst, src, count } => {
                TransferRequest::FpgaToFpga { dst, src, count }
            }
            Transfer::PinnedToFpga {
                dst,
                src,
                offset,
                count,
            } => TransferRequest::HostToFpga {
                dst,
                src: HostSpan::from_buffer(src, offset, count)?,
            },
            Transfer::FpgaToPinned {
                dst,
                offset,
                src,
                count,
            } => TransferRequest::FpgaToHost {
                dst: HostSpan::from_buffer_mut(dst, offset, count)?,
                src,
            },
        })
    }
}

/// Memory-mapped DMA engine bound to one accelerator.
///
/// The engine walks the accelerator's feature list once at open and keeps
/// the DMA blocks it finds. Channels are opened individually; each open
/// channel runs a worker thread that executes transfers in submission
/// order. The engine is `Sync`, so several threads may transfer on the same
/// channel concurrently; their requests are serialised by the worker.
///
/// # Example
///
/// ```rust
/// # #[cfg(feature = "sim")]
/// # fn main() -> Result<(), fpga_mmdma::DmaError> {
/// use fpga_mmdma::sim::{SimConfig, SimDevice};
/// use fpga_mmdma::{DmaEngine, Transfer};
///
/// let sim = SimDevice::new(SimConfig::default());
/// let engine = DmaEngine::open(sim.handle())?;
/// let ch = engine.open_channel(0)?;
///
/// let data = vec![0x5a; 4096];
/// engine.transfer_sync(ch, Transfer::HostToFpga { dst: 0x1000, src: &data })?;
///
/// let mut back = vec![0; 4096];
/// engine.transfer_sync(ch, Transfer::FpgaToHost { dst: &mut back, src: 0x1000 })?;
/// assert_eq!(back, data);
///
/// engine.close()
/// # }
/// # #[cfg(not(feature = "sim"))]
/// # fn main() {}
/// ```
pub struct DmaEngine {
    handle: FpgaHandle,
    config: DmaConfig,
    descs: Vec<ChannelDesc>,
    channels: Mutex<Vec<Slot>>,
    closed: bool,
}

/// Entry of the channel table.
///
/// A slot is reserved as `Opening` while its channel starts up, so the table
/// lock is not held across the readiness handshake.
enum Slot {
    Closed,
    Opening,
    Open(Arc<Channel>),
}

impl Slot {
    fn open(&self) -> Option<&Arc<Channel>> {
        match self {
            Slot::Open(ch) => Some(ch),
            Slot::Closed | Slot::Opening => None,
        }
    }
}

impl DmaEngine {
    /// Open an engine with the default configuration.
    ///
    /// # Errors
    ///
    /// See [`DmaEngine::open_with_config`].
    pub fn open(handle: FpgaHandle) -> DmaResult<Self> {
        Self::open_with_config(handle, DmaConfig::default())
    }

    /// Open an engine on `handle`.
    ///
    /// # Errors
    ///
    /// - `InvalidParameter` if `config` does not validate
    /// - `Busy` if another engine already drives this device
    /// - `FeatureNotFound` if the device exposes no memory-mapped DMA block
    pub fn open_with_config(handle: FpgaHandle, config: DmaConfig) -> DmaResult<Self> {
        config.validate()?;
        handle.claim()?;
        let release = scopeguard::guard(&handle, |h| h.release());

        let descs = discover_channels(handle.mmio().as_ref())?;
        if !descs.iter().any(|d| d.channel_type == ChannelType::Mm) {
            return Err(DmaError::FeatureNotFound);
        }
        scopeguard::ScopeGuard::into_inner(release);

        log::info!("DMA engine opened with {} channel(s)", descs.len());
        let slots = descs.iter().map(|_| Slot::Closed).collect();
        Ok(Self {
            handle,
            config,
            descs,
            channels: Mutex::new(slots),
            closed: false,
        })
    }

    /// DMA blocks found on the device, in feature-list order.
    pub fn channels(&self) -> &[ChannelDesc] {
        &self.descs
    }

    pub fn config(&self) -> &DmaConfig {
        &self.config
    }

    /// State of channel `index`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` for an index with no DMA block.
    pub fn channel_state(&self, index: usize) -> DmaResult<ChannelState> {
        self.check_index(index)?;
        Ok(match &self.channels.lock()[index] {
            Slot::Closed => ChannelState::Closed,
            Slot::Opening => ChannelState::Opening,
            Slot::Open(ch) => ch.header().state(),
        })
    }

    fn check_index(&self, index: usize) -> DmaResult<()> {
        if index >= self.descs.len() {
            return Err(DmaError::InvalidParameter(format!(
                "channel {index} does not exist ({} found)",
                self.descs.len()
            )));
        }
        Ok(())
    }

    /// Open channel `index` and start its worker.
    ///
    /// # Errors
    ///
    /// - `InvalidParameter` for an index with no DMA block
    /// - `Busy` if the channel is already open or being opened
    /// - `NotSupported` for streaming channels
    /// - `NoMemory` if staging or fence buffers cannot be allocated
    /// - `Exception` if the worker fails to come up
    pub fn open_channel(&self, index: usize) -> DmaResult<ChannelHandle> {
        self.check_index(index)?;
        {
            let mut channels = self.channels.lock();
            if !matches!(channels[index], Slot::Closed) {
                return Err(DmaError::Busy(format!("channel {index} is already open")));
            }
            channels[index] = Slot::Opening;
        }

        let opened = Channel::open(self.descs[index], &self.handle, &self.config);
        let mut channels = self.channels.lock();
        match opened {
            Ok(channel) => {
                channels[index] = Slot::Open(Arc::new(channel));
                Ok(ChannelHandle(index))
            }
            Err(e) => {
                channels[index] = Slot::Closed;
                Err(e)
            }
        }
    }

    /// Stop the channel's worker and release its resources.
    ///
    /// Transfers already queued run to completion first.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if the channel is not open.
    pub fn close_channel(&self, channel: ChannelHandle) -> DmaResult<()> {
        self.check_index(channel.0)?;
        let taken = {
            let mut channels = self.channels.lock();
            match std::mem::replace(&mut channels[channel.0], Slot::Closed) {
                Slot::Open(ch) => Some(ch),
                other => {
                    channels[channel.0] = other;
                    None
                }
            }
        };
        match taken {
            Some(ch) => ch.close(),
            None => Err(DmaError::InvalidParameter(format!(
                "channel {} is not open",
                channel.0
            ))),
        }
    }

    fn channel(&self, channel: ChannelHandle) -> DmaResult<Arc<Channel>> {
        self.check_index(channel.0)?;
        self.channels.lock()[channel.0].open().cloned().ok_or_else(|| {
            DmaError::InvalidParameter(format!("channel {} is not open", channel.0))
        })
    }

    /// Run `transfer` on `channel` and wait for it; returns the bytes moved.
    ///
    /// # Errors
    ///
    /// - `InvalidParameter` if the channel is not open or a buffer range is
    ///   out of bounds
    /// - `NotSupported` for a device-to-device copy whose destination
    ///   starts inside its source
    /// - `Exception` for device, interrupt or fence failures
    pub fn transfer_sync(&self, channel: ChannelHandle, transfer: Transfer<'_>) -> DmaResult<usize> {
        let ch = self.channel(channel)?;
        ch.transfer_sync(transfer.into_request()?)
    }

    /// Transfer between raw addresses.
    ///
    /// For [`Direction::HostToFpga`] `src` is a host virtual address and
    /// `dst` a device address; [`Direction::FpgaToHost`] is the reverse.
    /// Both are device addresses for [`Direction::FpgaToFpga`].
    ///
    /// # Safety
    ///
    /// Host addresses must be valid for `count` bytes of reads (source) or
    /// writes (destination) until the call returns, and not be accessed
    /// elsewhere meanwhile.
    ///
    /// # Errors
    ///
    /// As [`DmaEngine::transfer_sync`].
    pub unsafe fn transfer_sync_raw(
        &self,
        channel: ChannelHandle,
        dst: u64,
        src: u64,
        count: usize,
        direction: Direction,
    ) -> DmaResult<usize> {
        let request = match direction {
            Direction::HostToFpga => TransferRequest::HostToFpga {
                dst,
                src: HostSpan::from_raw(src as usize as *mut u8, count),
            },
            Direction::FpgaToHost => TransferRequest::FpgaToHost {
                dst: HostSpan::from_raw(dst as usize as *mut u8, count),
                src,
            },
            Direction::FpgaToFpga => TransferRequest::FpgaToFpga {
                dst,
                src,
                count: count as u64,
            },
        };
        self.channel(channel)?.transfer_sync(request)
    }

    /// Asynchronous transfers are not available.
    ///
    /// # Errors
    ///
    /// Always returns `NotSupported` for an open channel.
    pub fn transfer_async(&self, channel: ChannelHandle, transfer: Transfer<'_>) -> DmaResult<()> {
        let ch = self.channel(channel)?;
        ch.transfer_async(transfer.into_request()?)
    }

    /// Allocate a pinned buffer for zero-copy transfers.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` for `len == 0` and `NoMemory` if the
    /// allocator fails.
    pub fn allocate_buffer(&self, len: usize) -> DmaResult<DmaBuffer> {
        DmaBuffer::allocate(self.handle.allocator(), len)
    }

    /// Close every open channel and release the device.
    ///
    /// # Errors
    ///
    /// Returns the first channel close error; remaining channels are still
    /// closed.
    pub fn close(mut self) -> DmaResult<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> DmaResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let open: Vec<Arc<Channel>> = self
            .channels
            .get_mut()
            .iter_mut()
            .filter_map(|slot| match std::mem::replace(slot, Slot::Closed) {
                Slot::Open(ch) => Some(ch),
                Slot::Closed | Slot::Opening => None,
            })
            .collect();
        let mut first_err = None;
        for ch in open {
            if let Err(e) = ch.close() {
                log::warn!("channel {}: close failed: {e}", ch.header().desc().index);
                first_err.get_or_insert(e);
            }
        }
        self.handle.release();
        log::info!("DMA engine closed");
        first_err.map_or(Ok(()), Err)
    }
}

impl Drop for DmaEngine {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::warn!("DMA engine teardown: {e}");
        }
    }
}
