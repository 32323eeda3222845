//! Fan-out - 1 producer, 3 consumers, every consumer sees every entry
//!
//! One consumer sums, one tracks the maximum, one is deliberately slow. The
//! producer is throttled by the slow one once the ring fills up.

use ringcast::{consumer_fn, ConsumeResult, Consumer, Position, RingBufferBuilder, ThreadExecutor};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const RING_SIZE: usize = 256;
const MAX_NUMBER: u64 = 10_000;

/// Sleeps now and then; reports how far it got when closed.
struct Slow {
    seen: u64,
}

impl Consumer<u64> for Slow {
    fn consume(&mut self, entry: &u64, _position: Position, _max: Position) -> ConsumeResult {
        if entry % 1_000 == 0 {
            std::thread::sleep(Duration::from_millis(5));
        }
        self.seen += 1;
        Ok(true)
    }

    fn close(&mut self) {
        println!("  slow consumer closed after {} entries", self.seen);
    }
}

fn main() -> ringcast::Result<()> {
    println!("Fan-out: 1 producer, 3 consumers, ring of {RING_SIZE}\n");

    let mut ring = RingBufferBuilder::new(ThreadExecutor::new())
        .size(RING_SIZE)
        .named("fanout")
        .garbage_collect(true)
        .build::<u64>()?;

    let sum = Arc::new(AtomicU64::new(0));
    let max = Arc::new(AtomicU64::new(0));
    {
        let sum = sum.clone();
        ring.add_consumer(consumer_fn(move |n: &u64, _: Position, _: Position| {
            sum.fetch_add(*n, Ordering::Relaxed);
            true
        }))?;
    }
    {
        let max = max.clone();
        ring.add_consumer(consumer_fn(move |n: &u64, _: Position, _: Position| {
            max.fetch_max(*n, Ordering::Relaxed);
            true
        }))?;
    }
    ring.add_consumer(Slow { seen: 0 })?;

    let start = Instant::now();
    for n in 1..=MAX_NUMBER {
        if !ring.add(n) {
            break;
        }
    }
    ring.shutdown(true);
    let elapsed = start.elapsed();

    let expected = MAX_NUMBER * (MAX_NUMBER + 1) / 2;
    println!("  sum = {} (expected {})", sum.load(Ordering::Relaxed), expected);
    println!("  max = {}", max.load(Ordering::Relaxed));
    println!("  {:?} for {} entries", elapsed, MAX_NUMBER);
    println!("  state = {:?}", ring.state());
    Ok(())
}
