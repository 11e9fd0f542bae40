//! # Device Benchmarks
//!
//! Custo de codificar e transmitir frames MPSSE sobre o barramento simulado.
//!
//! Run: `cargo bench --bench device_bench`

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use lux_device::mpsse;
use lux_device::{DeviceConfig, DeviceOutputPort, FtdiProvider, MockFtdiBus, RGB8};
use std::time::Duration;

fn open_port() -> (FtdiProvider<MockFtdiBus>, MockFtdiBus) {
    let bus = MockFtdiBus::with_devices(vec![MockFtdiBus::device(0x0403, 0x6014, "BENCH")]);
    let mut port = FtdiProvider::new(bus.clone()).with_close_delay(Duration::ZERO);
    port.init(&DeviceConfig::default()).unwrap();
    port.open().unwrap();
    (port, bus)
}

/// Cabeçalho e divisor
fn bench_encoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("mpsse");

    group.bench_function("frame_header", |b| {
        b.iter(|| black_box(mpsse::frame_header(black_box(900))))
    });

    group.bench_function("clock_divisor", |b| {
        b.iter(|| black_box(mpsse::clock_divisor(mpsse::REFERENCE_CLOCK_HZ, black_box(1_000_000))))
    });

    group.finish();
}

/// Frames completos (cabeçalho + payload + trailer)
fn bench_write_colors(c: &mut Criterion) {
    let mut group = c.benchmark_group("write_colors");

    for leds in [60usize, 300, 1000] {
        let colors = vec![RGB8::new(255, 128, 7); leds];
        let (mut port, bus) = open_port();

        group.bench_with_input(BenchmarkId::from_parameter(leds), &colors, |b, colors| {
            b.iter(|| {
                port.write_colors(black_box(colors)).unwrap();
                bus.clear_calls();
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_encoding, bench_write_colors);
criterion_main!(benches);
