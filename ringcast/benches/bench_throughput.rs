//! Ring buffer throughput: one producer, N consumers, per wait strategy
//!
//! Run: cargo bench --bench bench_throughput

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ringcast::{
    consumer_fn, BlockingWaitStrategy, BusySpinWaitStrategy, Position, RingBuffer,
    RingBufferBuilder, ThreadExecutor, WaitStrategy,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const RING_SIZE: usize = 16 * 1024;
const EVENTS: u64 = 100_000;
const BATCH_SIZE: usize = 64;

fn build(strategy: impl WaitStrategy, consumers: usize) -> (RingBuffer<u64>, Arc<AtomicU64>) {
    let ring = RingBufferBuilder::new(ThreadExecutor::new())
        .size(RING_SIZE)
        .named("bench")
        .wait_strategy(strategy)
        .build::<u64>()
        .unwrap();
    let received = Arc::new(AtomicU64::new(0));
    for _ in 0..consumers {
        let received = received.clone();
        ring.add_consumer(consumer_fn(move |entry: &u64, _: Position, _: Position| {
            std::hint::black_box(*entry);
            received.fetch_add(1, Ordering::Relaxed);
            true
        }))
        .unwrap();
    }
    (ring, received)
}

/// Publish `EVENTS` one at a time and drain
fn run_single(strategy: impl WaitStrategy, consumers: usize) -> u64 {
    let (mut ring, received) = build(strategy, consumers);
    for i in 0..EVENTS {
        ring.add(i);
    }
    ring.shutdown(true);
    received.load(Ordering::Relaxed)
}

/// Publish `EVENTS` in batches and drain
fn run_batched(strategy: impl WaitStrategy, consumers: usize) -> u64 {
    let (mut ring, received) = build(strategy, consumers);
    let mut next = 0u64;
    while next < EVENTS {
        let end = (next + BATCH_SIZE as u64).min(EVENTS);
        ring.add_batch((next..end).collect()).unwrap();
        next = end;
    }
    ring.shutdown(true);
    received.load(Ordering::Relaxed)
}

fn bench_wait_strategies(c: &mut Criterion) {
    let mut group = c.benchmark_group("wait_strategy");
    group.throughput(Throughput::Elements(EVENTS));
    group.sample_size(10);

    group.bench_function("blocking", |b| {
        b.iter(|| run_single(BlockingWaitStrategy::new(), 1))
    });
    group.bench_function("busy_spin", |b| {
        b.iter(|| run_single(BusySpinWaitStrategy::new(), 1))
    });
    group.finish();
}

fn bench_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("fanout");
    group.sample_size(10);

    for consumers in [1usize, 2, 4] {
        group.throughput(Throughput::Elements(EVENTS * consumers as u64));
        group.bench_with_input(
            BenchmarkId::new("single", consumers),
            &consumers,
            |b, &n| b.iter(|| run_single(BlockingWaitStrategy::new(), n)),
        );
        group.bench_with_input(
            BenchmarkId::new("batched", consumers),
            &consumers,
            |b, &n| b.iter(|| run_batched(BlockingWaitStrategy::new(), n)),
        );
    }
    group.finish();
}

criterion_group!(benches, bench_wait_strategies, bench_fanout);
criterion_main!(benches);
