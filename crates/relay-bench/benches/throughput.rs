//! Throughput benchmarks for Payrelay.
//!
//! These benchmarks measure the raw throughput of the registry and the
//! broadcaster without any network I/O.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use payrelay_bench::{drain, populate, sample_payment};
use payrelay_core::{Broadcaster, Registry, Subscriber};
use payrelay_protocol::codec;
use tokio::sync::mpsc;

/// Benchmark registry operations.
fn bench_registry(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry");

    group.bench_function("register", |b| {
        let mut registry = Registry::new();
        let (subscriber, _outbound) = Subscriber::new(1);
        let mut channel = 0u64;
        b.iter(|| {
            channel += 1;
            registry.register(black_box(&subscriber), black_box(channel))
        });
    });

    group.bench_function("register_duplicate", |b| {
        let mut registry = Registry::new();
        let _members = populate(&mut registry, 1, 100, 1);
        let (subscriber, _outbound) = Subscriber::new(1);
        registry.register(&subscriber, 1);
        b.iter(|| registry.register(black_box(&subscriber), black_box(1)));
    });

    // Unregister from a registry of 1000 channels with 10 members each.
    group.bench_function("unregister_1000_channels", |b| {
        b.iter_batched(
            || {
                let mut registry = Registry::new();
                let members: Vec<_> = (0..1000)
                    .flat_map(|channel| populate(&mut registry, channel, 10, 1))
                    .collect();
                let target = members[5].0.clone();
                (registry, target, members)
            },
            |(mut registry, target, _members)| registry.unregister(&target),
            criterion::BatchSize::LargeInput,
        );
    });

    group.finish();
}

/// Benchmark fan-out scenarios.
fn bench_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("fanout");
    let event = sample_payment(1, 100);

    for size in [10, 100, 1000, 10000].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let (evictions, _rx) = mpsc::unbounded_channel();
            let broadcaster = Broadcaster::new(evictions);
            let mut registry = Registry::new();
            let mut members = populate(&mut registry, 1, size, 1024);
            let (sender, _outbound) = Subscriber::new(1);

            b.iter(|| {
                let report = broadcaster
                    .broadcast(&registry, 1, black_box(&sender), black_box(&event))
                    .unwrap();
                drain(&mut members);
                report
            });
        });
    }

    group.finish();
}

/// Benchmark fan-out of a pre-encoded payload.
fn bench_fanout_bytes(c: &mut Criterion) {
    let payload = codec::encode_payment(&sample_payment(1, 100)).unwrap();

    c.bench_function("fanout_bytes_100", |b| {
        let (evictions, _rx) = mpsc::unbounded_channel();
        let broadcaster = Broadcaster::new(evictions);
        let mut registry = Registry::new();
        let mut members = populate(&mut registry, 1, 100, 1024);
        let (sender, _outbound) = Subscriber::new(1);

        b.iter(|| {
            let report = broadcaster.broadcast_bytes(&registry, 1, &sender, payload.clone());
            drain(&mut members);
            report
        });
    });
}

criterion_group!(benches, bench_registry, bench_fanout, bench_fanout_bytes);
criterion_main!(benches);
