//! Integration benchmark for the climate beacon processing pipeline.
//!
//! Benchmarks the full application loop using the same patterns as the
//! integration tests in app.rs - with a FakeSource replaying advertisements
//! through run_with_io.

use clap::Parser;
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use climate_beacon_listener::app::{Options, run_with_io};
use climate_beacon_listener::scanner::ScanFuture;
use climate_beacon_listener::{DeviceAddress, ScanEvent, ScanSettings, ScanSource, ServiceFilter};
use std::time::SystemTime;
use tokio::runtime::Runtime;
use tokio::sync::mpsc;

/// Climate beacon record with temperature 0x1A2B and 10 lux
fn climate_record() -> Vec<u8> {
    vec![
        0x02, 0x01, 0x06, // flags
        0x07, 0x03, 0x08, 0x56, 0x0E, 0x56, 0x14, 0x56, // 16-bit UUID list
        0x11, 0x16, 0x08, 0x56, // service data for 0x5608
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
        0x1A, 0x2B, 0x00, 0x0A, 0x6A, 0x10,
    ]
}

fn event(address: DeviceAddress) -> ScanEvent {
    ScanEvent {
        address,
        name: Some("Climate_8B6".to_string()),
        rssi: -67,
        record: climate_record(),
        received_at: SystemTime::UNIX_EPOCH,
    }
}

/// A fake source that sends its batch on start and then closes the stream.
struct FakeSource {
    events: Option<(mpsc::Sender<ScanEvent>, Vec<ScanEvent>)>,
}

impl ScanSource for FakeSource {
    fn start<'a>(&'a mut self, _: &'a ServiceFilter, _: &'a ScanSettings) -> ScanFuture<'a> {
        let replay = self.events.take();
        Box::pin(async move {
            if let Some((tx, batch)) = replay {
                for event in batch {
                    let _ = tx.send(event).await;
                }
            }
            Ok(())
        })
    }

    fn stop(&mut self) -> ScanFuture<'_> {
        Box::pin(async { Ok(()) })
    }
}

fn options(format: &str) -> Options {
    Options::parse_from(["bench", "--format", format])
}

/// Run one batch through decode -> registry -> format -> write
fn run_batch(rt: &Runtime, format: &str, batch: Vec<ScanEvent>) -> Vec<u8> {
    let (tx, rx) = mpsc::channel(batch.len().max(1));
    let source = FakeSource {
        events: Some((tx, batch)),
    };
    let mut out = Vec::<u8>::with_capacity(512);
    let mut err = Vec::<u8>::new();

    rt.block_on(async {
        run_with_io(
            options(format),
            Box::new(source),
            rx,
            std::future::pending(),
            &mut out,
            &mut err,
        )
        .await
        .unwrap();
    });
    out
}

/// Benchmark batch processing through the full pipeline
fn bench_batch_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_pipeline");
    let rt = Runtime::new().unwrap();
    let address = DeviceAddress([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);

    for batch_size in [1, 10, 100] {
        group.throughput(Throughput::Elements(batch_size as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(batch_size),
            &batch_size,
            |b, &size| {
                let batch: Vec<ScanEvent> = (0..size).map(|_| event(address)).collect();
                b.iter(|| black_box(run_batch(&rt, "influxdb", batch.clone())))
            },
        );
    }

    group.finish();
}

/// Benchmark list output where every update re-renders all known beacons
fn bench_multi_device_list(c: &mut Criterion) {
    let mut group = c.benchmark_group("multi_device_list");
    let rt = Runtime::new().unwrap();

    let batch: Vec<ScanEvent> = (0..10u8)
        .map(|i| event(DeviceAddress([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, i])))
        .collect();

    group.throughput(Throughput::Elements(10));
    group.bench_function("10_different_devices", |b| {
        b.iter(|| black_box(run_batch(&rt, "list", batch.clone())))
    });

    group.finish();
}

criterion_group!(benches, bench_batch_pipeline, bench_multi_device_list);
criterion_main!(benches);
