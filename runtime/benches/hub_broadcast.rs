//! Live hub benchmarks: fan-out cost and wire codec overhead
//!
//! Run with: `cargo bench --bench hub_broadcast`

#![allow(missing_docs)] // Benchmarks don't need extensive docs
#![allow(clippy::expect_used)] // Benchmarks can use expect for setup

use chrono::{TimeZone, Utc};
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use lending_core::event::LifecycleEvent;
use lending_core::types::{BorrowerId, ItemId, LoanId};
use lending_runtime::{HubConfig, LiveHub};
use std::time::Duration;

// ============================================================================
// Benchmark Fixtures
// ============================================================================

fn sample_event() -> LifecycleEvent {
    let at = Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).single().expect("valid timestamp");
    LifecycleEvent::borrowed(ItemId::new(42), BorrowerId::new(7), LoanId::new(1001), at)
}

// ============================================================================
// Benchmarks
// ============================================================================

/// Broadcast 100 messages to N clients that drain their queues concurrently.
fn bench_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("hub_fan_out");
    group.measurement_time(Duration::from_secs(10));

    let runtime = tokio::runtime::Runtime::new().expect("Failed to create runtime");
    let payload = String::from_utf8(sample_event().encode()).expect("utf-8 payload");

    for clients in [1_usize, 10, 100] {
        group.throughput(Throughput::Elements(100 * clients as u64));
        group.bench_with_input(BenchmarkId::from_parameter(clients), &clients, |b, &clients| {
            b.to_async(&runtime).iter(|| {
                let payload = payload.clone();
                async move {
                    let (hub, _task) = LiveHub::spawn(HubConfig::default());
                    let mut readers = Vec::with_capacity(clients);
                    for _ in 0..clients {
                        let mut client = hub.register().await.expect("hub running");
                        readers.push(tokio::spawn(async move {
                            let mut seen = 0_usize;
                            while seen < 100 && client.recv().await.is_some() {
                                seen += 1;
                            }
                            seen
                        }));
                    }

                    for _ in 0..100 {
                        hub.broadcast(black_box(payload.as_str())).await.expect("hub running");
                    }
                    for reader in readers {
                        black_box(reader.await.expect("reader task"));
                    }
                }
            });
        });
    }

    group.finish();
}

/// Baseline: broadcast with nobody connected.
fn bench_broadcast_no_clients(c: &mut Criterion) {
    let mut group = c.benchmark_group("hub_baseline");
    let runtime = tokio::runtime::Runtime::new().expect("Failed to create runtime");

    group.bench_function("no_clients_100_broadcasts", |b| {
        b.to_async(&runtime).iter(|| async {
            let (hub, _task) = LiveHub::spawn(HubConfig::default());
            for _ in 0..100 {
                hub.broadcast(black_box("{}")).await.expect("hub running");
            }
            black_box(hub.connected_count().await.expect("hub running"));
        });
    });

    group.finish();
}

/// Wire encode and strict decode of a lifecycle event.
fn bench_event_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_codec");
    let event = sample_event();
    let bytes = event.encode();

    group.bench_function("encode", |b| b.iter(|| black_box(&event).encode()));
    group.bench_function("decode", |b| {
        b.iter(|| LifecycleEvent::decode(black_box(&bytes)).expect("valid payload"));
    });

    group.finish();
}

criterion_group!(benches, bench_fan_out, bench_broadcast_no_clients, bench_event_codec);
criterion_main!(benches);
