// FPGA Memory-Mapped DMA Rust Bindings
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! # FPGA Memory-Mapped DMA
//!
//! User-space driver for the memory-mapped DMA basic building block found on
//! OPAE-style FPGA accelerators. The engine moves data between host memory
//! and the accelerator's local memory, and within the accelerator, using the
//! block's descriptor FIFO.
//!
//! ## Supported Operations
//!
//! - Host to FPGA copy
//! - FPGA to host copy
//! - FPGA to FPGA copy
//! - Zero-copy transfers from and into pinned [`DmaBuffer`]s
//!
//! Arbitrary addresses and lengths are accepted. The 64-byte aligned body of
//! a transfer goes through DMA; unaligned edges are written through the
//! address span expander, a 4 KiB register window onto device memory. Host
//! data is staged through a pool of pinned buffers used in two alternating
//! halves, and every batch is closed by a write fence: a descriptor that
//! writes a magic number into host memory and raises an interrupt.
//!
//! ## Platform Support
//!
//! | Platform | Hardware access        | Software model |
//! |----------|------------------------|----------------|
//! | Linux    | `mmap` + `eventfd`     | `sim` feature  |
//! | Other    | Not available          | `sim` feature  |
//!
//! The crate does not enumerate or open PCIe devices itself. The caller
//! builds an [`FpgaHandle`] from three collaborators: the register space
//! ([`Mmio`], e.g. [`MappedMmio`]), a pinned-memory allocator
//! ([`BufferAllocator`]) and an interrupt source ([`InterruptSource`]).
//!
//! ## Example
//!
//! ```rust
//! # #[cfg(feature = "sim")]
//! # fn main() -> Result<(), fpga_mmdma::DmaError> {
//! use fpga_mmdma::sim::{SimConfig, SimDevice};
//! use fpga_mmdma::{DmaEngine, Transfer};
//!
//! // A software model stands in for the accelerator
//! let sim = SimDevice::new(SimConfig::default());
//! let engine = DmaEngine::open(sim.handle())?;
//! let ch = engine.open_channel(0)?;
//!
//! let data = b"Hello, FPGA!";
//! engine.transfer_sync(ch, Transfer::HostToFpga { dst: 0x1003, src: data })?;
//!
//! let mut back = [0u8; 12];
//! engine.transfer_sync(ch, Transfer::FpgaToHost { dst: &mut back, src: 0x1003 })?;
//! assert_eq!(&back, data);
//!
//! engine.close()
//! # }
//! # #[cfg(not(feature = "sim"))]
//! # fn main() {}
//! ```

// Module declarations
pub mod ase;
pub mod backoff;
pub mod buffer;
mod channel;
pub mod chunker;
pub mod config;
pub mod descriptor;
pub mod device;
pub mod engine;
pub mod error;
pub mod event;
pub mod fence;
pub mod mmio;
pub mod queue;
pub mod regs;
#[cfg(any(test, feature = "sim"))]
pub mod sim;
pub mod submit;
mod transfer;

// Re-exports for convenient access
pub use backoff::Backoff;
pub use buffer::{BufferAllocator, DmaBuffer, PinnedBuffer};
pub use channel::ChannelState;
pub use chunker::Direction;
pub use config::DmaConfig;
pub use descriptor::{DescControl, MsgdmaDesc};
pub use device::{discover_channels, ChannelDesc, ChannelType, FpgaHandle};
pub use engine::{ChannelHandle, DmaEngine, Transfer};
pub use error::{DmaError, DmaResult, ErrorKind};
pub use event::{InterruptEvent, InterruptSource};
#[cfg(target_os = "linux")]
pub use event::EventFd;
pub use mmio::{MappedMmio, Mmio};
