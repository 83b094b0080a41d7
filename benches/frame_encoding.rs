//! Benchmarks for the hot paths of a streaming session
//!
//! - Sensor frame encoding per checksum algorithm
//! - Receive cache appends with UTF-8 decoding
//! - One full poll over every sensor slot
//!
//! Platform: Cross-platform (in-memory transport, CI-safe)

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use evolink::test_utils::{FixedSensors, demo_peripherals};
use evolink::transports::MockTransport;
use evolink::{
    ChecksumKind, FrameCodec, PeripheralId, RxCache, SensorKind, SensorPoller, Transport,
    UartChannel,
};
use std::hint::black_box;
use std::sync::Arc;

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_encode");

    for checksum in [ChecksumKind::Bluefruit, ChecksumKind::AdditiveSum] {
        let codec = FrameCodec::new(checksum);
        group.bench_with_input(
            BenchmarkId::new("quaternion", format!("{:?}", checksum)),
            &codec,
            |b, codec| {
                b.iter(|| codec.encode(black_box(b"!Q"), black_box(&[0.0, 0.7071, 0.0, 0.7071])))
            },
        );
    }

    let codec = FrameCodec::default();
    let frame = codec.encode(b"!A", &[0.1, 0.2, 0.3]);
    group.bench_function("decode_accelerometer", |b| {
        b.iter(|| codec.decode_sensor(black_box(&frame), 2).map(|f| f.values.len()))
    });

    group.finish();
}

fn bench_rx_append(c: &mut Criterion) {
    let line = "pace=5:12/km hr=152 cadence=178\n".repeat(4);
    let mut group = c.benchmark_group("rx_cache");
    group.throughput(Throughput::Bytes(line.len() as u64));

    group.bench_function("append_and_consume", |b| {
        let cache = RxCache::new();
        let id = PeripheralId::new("EV-BENCH");
        b.iter(|| {
            let appended = cache.append(&id, black_box(line.as_bytes()));
            cache.consume_first(&id, appended.raw_len);
            if cache.text_snapshot(&id).len() > 1 << 20 {
                cache.reset(&id);
            }
            black_box(appended)
        })
    });

    group.finish();
}

fn bench_poll_once(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap();
    let transport = Arc::new(MockTransport::with_peripherals(demo_peripherals()));
    let id = PeripheralId::new("EV-0001");
    runtime.block_on(transport.connect(&id)).unwrap();

    let uart = UartChannel::new(id, transport.clone(), Arc::new(RxCache::new()), FrameCodec::default());
    let poller = SensorPoller::new(uart, Arc::new(FixedSensors::demo()));
    for kind in SensorKind::ALL {
        poller.set_enabled(kind, true);
    }

    c.bench_function("poll_all_slots", |b| {
        b.iter(|| {
            let sent = poller.poll_once();
            transport.take_writes();
            black_box(sent)
        })
    });
}

criterion_group!(benches, bench_encode, bench_rx_append, bench_poll_once);
criterion_main!(benches);
