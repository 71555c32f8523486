// FPGA Memory-Mapped DMA Rust Bindings
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Benchmarks of the transfer paths against the simulated device.
//!
//! The numbers measure host-side overhead (chunking, staging copies,
//! descriptor submission, fencing); the device model itself is a memcpy.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use fpga_mmdma::sim::{SimConfig, SimDevice};
use fpga_mmdma::{DmaConfig, DmaEngine, Transfer};

const SIZES: [usize; 5] = [
    4 * 1024,        // 4 KB
    64 * 1024,       // 64 KB
    256 * 1024,      // 256 KB
    1024 * 1024,     // 1 MB
    4 * 1024 * 1024, // 4 MB
];

fn open_engine(sim: &SimDevice) -> DmaEngine {
    let mut cfg = DmaConfig::default();
    cfg.set_staging_buffers(4).set_staging_buffer_size(256 * 1024);
    DmaEngine::open_with_config(sim.handle(), cfg).unwrap()
}

/// Host to FPGA: staged through the pool vs zero-copy from a pinned buffer.
fn bench_host_to_fpga(c: &mut Criterion) {
    let sim = SimDevice::new(SimConfig::default());
    let engine = open_engine(&sim);
    let ch = engine.open_channel(0).unwrap();

    let mut group = c.benchmark_group("host_to_fpga");
    for size in SIZES {
        let data: Vec<u8> = (0..size).map(|i| (i & 0xFF) as u8).collect();
        let mut pinned = engine.allocate_buffer(size).unwrap();
        pinned.as_mut_slice().copy_from_slice(&data);

        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::new("staged", size), &data, |b, data| {
            b.iter(|| {
                engine
                    .transfer_sync(ch, Transfer::HostToFpga { dst: 0, src: data })
                    .unwrap()
            });
        });

        group.bench_with_input(BenchmarkId::new("pinned", size), &pinned, |b, pinned| {
            b.iter(|| {
                engine
                    .transfer_sync(
                        ch,
                        Transfer::PinnedToFpga {
                            dst: 0,
                            src: pinned,
                            offset: 0,
                            count: size,
                        },
                    )
                    .unwrap()
            });
        });

        // Unaligned destination: head and tail go through the expander
        group.bench_with_input(BenchmarkId::new("unaligned", size), &data, |b, data| {
            b.iter(|| {
                engine
                    .transfer_sync(ch, Transfer::HostToFpga { dst: 0x13, src: data })
                    .unwrap()
            });
        });
    }
    group.finish();
}

/// FPGA to host, with a plain memcpy as the software baseline.
fn bench_fpga_to_host(c: &mut Criterion) {
    let sim = SimDevice::new(SimConfig::default());
    let engine = open_engine(&sim);
    let ch = engine.open_channel(0).unwrap();

    let mut group = c.benchmark_group("fpga_to_host");
    for size in SIZES {
        let src: Vec<u8> = (0..size).map(|i| (i & 0xFF) as u8).collect();
        sim.write_mem(0, &src);
        let mut dst = vec![0u8; size];

        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::new("std_copy", size), &src, |b, src| {
            b.iter(|| dst.copy_from_slice(src));
        });

        group.bench_function(BenchmarkId::new("dma", size), |b| {
            b.iter(|| {
                engine
                    .transfer_sync(ch, Transfer::FpgaToHost { dst: &mut dst, src: 0 })
                    .unwrap()
            });
        });
    }
    group.finish();
}

/// Device-internal copies.
fn bench_fpga_to_fpga(c: &mut Criterion) {
    let sim = SimDevice::new(SimConfig::default());
    let engine = open_engine(&sim);
    let ch = engine.open_channel(0).unwrap();

    let mut group = c.benchmark_group("fpga_to_fpga");
    for size in SIZES {
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(BenchmarkId::new("aligned", size), |b| {
            b.iter(|| {
                engine
                    .transfer_sync(
                        ch,
                        Transfer::FpgaToFpga {
                            dst: 0x1000_0000,
                            src: 0,
                            count: size as u64,
                        },
                    )
                    .unwrap()
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_host_to_fpga,
    bench_fpga_to_host,
    bench_fpga_to_fpga
);
criterion_main!(benches);
