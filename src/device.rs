// FPGA Memory-Mapped DMA Rust Bindings
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Device handle and DMA feature discovery.
//!
//! The accelerator describes its building blocks with a linked list of
//! device feature headers (DFH). Each header holds its feature type, an
//! end-of-list flag and the byte offset of the next header; a building
//! block's 128-bit UUID follows at `+0x08`/`+0x10`.

use crate::buffer::BufferAllocator;
use crate::error::{DmaError, DmaResult};
use crate::event::InterruptSource;
use crate::mmio::Mmio;
use crate::regs::{dfh, uuid};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Kind of DMA building block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelType {
    /// Memory-mapped (memory to memory) transfers.
    Mm,
    /// Memory to stream.
    TxStreaming,
    /// Stream to memory.
    RxStreaming,
}

impl ChannelType {
    /// Match a feature UUID against the known DMA building blocks.
    pub fn from_uuid(high: u64, low: u64) -> Option<Self> {
        match (high, low) {
            uuid::MM_DMA => Some(ChannelType::Mm),
            uuid::M2S_DMA => Some(ChannelType::TxStreaming),
            uuid::S2M_DMA => Some(ChannelType::RxStreaming),
            _ => None,
        }
    }

    /// `(high, low)` UUID words of this block.
    pub fn uuid(&self) -> (u64, u64) {
        match self {
            ChannelType::Mm => uuid::MM_DMA,
            ChannelType::TxStreaming => uuid::M2S_DMA,
            ChannelType::RxStreaming => uuid::S2M_DMA,
        }
    }
}

impl std::fmt::Display for ChannelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ChannelType::Mm => "mm",
            ChannelType::TxStreaming => "tx-st",
            ChannelType::RxStreaming => "rx-st",
        };
        f.write_str(name)
    }
}

/// A discovered DMA building block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelDesc {
    /// Position among the discovered DMA blocks; also the interrupt vector.
    pub index: usize,
    pub channel_type: ChannelType,
    /// MMIO offset of the block's feature header.
    pub base: u64,
}

/// Walk the feature list starting at offset 0 and collect every DMA block.
///
/// The walk ends at the end-of-list flag, or at a zero next-offset so a
/// malformed list cannot loop.
pub fn discover_channels(mmio: &dyn Mmio) -> DmaResult<Vec<ChannelDesc>> {
    let mut channels = Vec::new();
    let mut offset = 0u64;
    loop {
        let header = mmio.read64(offset + dfh::HEADER)?;
        if dfh::feature_type(header) == dfh::TYPE_BBB {
            let low = mmio.read64(offset + dfh::UUID_L)?;
            let high = mmio.read64(offset + dfh::UUID_H)?;
            if let Some(channel_type) = ChannelType::from_uuid(high, low) {
                log::debug!(
                    "found {} DMA block at {:#x}",
                    channel_type,
                    offset
                );
                channels.push(ChannelDesc {
                    index: channels.len(),
                    channel_type,
                    base: offset,
                });
            }
        }

        let next = dfh::next_offset(header);
        if dfh::is_eol(header) || next == 0 {
            break;
        }
        offset += next;
    }
    Ok(channels)
}

/// Everything the engine needs from an opened accelerator.
///
/// Bundles the register space, the pinned buffer manager and the interrupt
/// subsystem. Clones share the same device and the same engine claim.
#[derive(Clone)]
pub struct FpgaHandle {
    mmio: Arc<dyn Mmio>,
    allocator: Arc<dyn BufferAllocator>,
    interrupts: Arc<dyn InterruptSource>,
    claimed: Arc<AtomicBool>,
}

impl FpgaHandle {
    pub fn new(
        mmio: Arc<dyn Mmio>,
        allocator: Arc<dyn BufferAllocator>,
        interrupts: Arc<dyn InterruptSource>,
    ) -> Self {
        Self {
            mmio,
            allocator,
            interrupts,
            claimed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn mmio(&self) -> &Arc<dyn Mmio> {
        &self.mmio
    }

    pub fn allocator(&self) -> &Arc<dyn BufferAllocator> {
        &self.allocator
    }

    pub fn interrupts(&self) -> &Arc<dyn InterruptSource> {
        &self.interrupts
    }

    /// Mark the device as driven by an engine.
    pub(crate) fn claim(&self) -> DmaResult<()> {
        self.claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| DmaError::Busy("a DMA engine is already open on this device".into()))
    }

    pub(crate) fn release(&self) {
        self.claimed.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimConfig, SimDevice};

    #[test]
    fn test_discover_default_layout() {
        let sim = SimDevice::new(SimConfig::default());
        let channels = discover_channels(&sim).unwrap();
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].channel_type, ChannelType::Mm);
        assert_eq!(channels[0].base, sim.dma_base(0));
    }

    #[test]
    fn test_discover_mixed_blocks() {
        let sim = SimDevice::new(SimConfig {
            channels: vec![ChannelType::Mm, ChannelType::TxStreaming, ChannelType::Mm],
            ..SimConfig::default()
        });
        let channels = discover_channels(&sim).unwrap();
        let types: Vec<_> = channels.iter().map(|c| c.channel_type).collect();
        assert_eq!(
            types,
            vec![ChannelType::Mm, ChannelType::TxStreaming, ChannelType::Mm]
        );
        assert_eq!(channels[2].index, 2);
        assert_eq!(channels[2].base, sim.dma_base(2));
    }

    #[test]
    fn test_discover_none() {
        let sim = SimDevice::new(SimConfig {
            channels: vec![],
            ..SimConfig::default()
        });
        assert!(discover_channels(&sim).unwrap().is_empty());
    }

    /// Feature list of a single MM block with a zero next offset and no
    /// end-of-list flag.
    struct Unterminated;

    impl Mmio for Unterminated {
        fn read32(&self, _offset: u64) -> DmaResult<u32> {
            Ok(0)
        }
        fn read64(&self, offset: u64) -> DmaResult<u64> {
            Ok(match offset {
                dfh::HEADER => dfh::encode(dfh::TYPE_BBB, 0, false),
                dfh::UUID_L => uuid::MM_DMA.1,
                dfh::UUID_H => uuid::MM_DMA.0,
                _ => 0,
            })
        }
        fn write32(&self, _offset: u64, _value: u32) -> DmaResult<()> {
            Ok(())
        }
        fn write64(&self, _offset: u64, _value: u64) -> DmaResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_discover_stops_on_zero_next() {
        let channels = discover_channels(&Unterminated).unwrap();
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].base, 0);
    }

    #[test]
    fn test_uuid_roundtrip() {
        for t in [ChannelType::Mm, ChannelType::TxStreaming, ChannelType::RxStreaming] {
            let (h, l) = t.uuid();
            assert_eq!(ChannelType::from_uuid(h, l), Some(t));
        }
        assert_eq!(ChannelType::from_uuid(1, 2), None);
    }

    #[test]
    fn test_claim_is_exclusive() {
        let sim = SimDevice::new(SimConfig::default());
        let handle = sim.handle();
        let other = handle.clone();
        handle.claim().unwrap();
        assert!(matches!(other.claim(), Err(DmaError::Busy(_))));
        handle.release();
        other.claim().unwrap();
    }
}
