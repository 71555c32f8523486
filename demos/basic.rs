// FPGA Memory-Mapped DMA Rust Bindings
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Basic example driving the MM DMA engine against the software device model.
//!
//! Run with: `cargo run --example basic --features sim`

use fpga_mmdma::sim::{SimConfig, SimDevice};
use fpga_mmdma::{ChannelType, DmaConfig, DmaEngine, Transfer};

fn main() {
    println!("FPGA MM DMA Basic Example");
    println!("=========================\n");

    let sim = SimDevice::new(SimConfig {
        channels: vec![ChannelType::Mm, ChannelType::RxStreaming],
        ..SimConfig::default()
    });

    // Open the engine and list the DMA blocks it found
    println!("Opening DMA engine...");
    let mut config = DmaConfig::default();
    config.set_staging_buffers(4).set_staging_buffer_size(64 * 1024);
    let engine = match DmaEngine::open_with_config(sim.handle(), config) {
        Ok(engine) => engine,
        Err(e) => {
            println!("  Failed to open DMA engine: {}", e);
            return;
        }
    };
    for desc in engine.channels() {
        println!(
            "  Channel {}: {} block at {:#x}",
            desc.index, desc.channel_type, desc.base
        );
    }
    println!();

    let ch = match engine.open_channel(0) {
        Ok(ch) => ch,
        Err(e) => {
            println!("  Failed to open channel 0: {}", e);
            return;
        }
    };
    if let Err(e) = engine.open_channel(1) {
        println!("Opening streaming channel 1: {} ({:?})\n", e, e.kind());
    }

    // Host -> FPGA -> host with an unaligned device address
    println!("Testing host round trip...");
    let src: Vec<u8> = (0..300_000u32).map(|i| (i % 251) as u8).collect();
    let mut back = vec![0u8; src.len()];
    let result = engine
        .transfer_sync(ch, Transfer::HostToFpga { dst: 0x1_0028, src: &src })
        .and_then(|_| {
            engine.transfer_sync(ch, Transfer::FpgaToHost { dst: &mut back, src: 0x1_0028 })
        });
    match result {
        Ok(n) => println!("  Moved {} bytes each way, data matches: {}", n, src == back),
        Err(e) => println!("  Transfer failed: {}", e),
    }
    println!();

    // Device-internal copy
    println!("Testing FPGA to FPGA copy...");
    match engine.transfer_sync(
        ch,
        Transfer::FpgaToFpga {
            dst: 0x100_0000,
            src: 0x1_0000,
            count: 0x4_0000,
        },
    ) {
        Ok(n) => println!("  Copied {} bytes inside the device", n),
        Err(e) => println!("  Copy failed: {}", e),
    }
    match engine.transfer_sync(
        ch,
        Transfer::FpgaToFpga {
            dst: 0x1_0100,
            src: 0x1_0000,
            count: 0x4_0000,
        },
    ) {
        Ok(_) => println!("  Overlapping copy unexpectedly succeeded"),
        Err(e) => println!("  Overlapping copy rejected: {}", e),
    }
    println!();

    // Zero-copy from a pinned buffer
    println!("Testing pinned buffer transfer...");
    match engine.allocate_buffer(1024 * 1024) {
        Ok(mut buffer) => {
            buffer.as_mut_slice().fill(0xA5);
            let count = buffer.len();
            match engine.transfer_sync(
                ch,
                Transfer::PinnedToFpga {
                    dst: 0x200_0000,
                    src: &buffer,
                    offset: 0,
                    count,
                },
            ) {
                Ok(n) => println!(
                    "  Sent {} bytes, {} descriptors posted so far",
                    n,
                    sim.descriptors(0).len()
                ),
                Err(e) => println!("  Pinned transfer failed: {}", e),
            }
        }
        Err(e) => println!("  Buffer allocation failed: {}", e),
    }
    println!();

    match engine.close() {
        Ok(()) => println!("Done!"),
        Err(e) => println!("Close failed: {}", e),
    }
}
