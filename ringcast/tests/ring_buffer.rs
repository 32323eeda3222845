//! End-to-end ring buffer behavior: ordering, back pressure, shutdown modes,
//! consumer lifecycle and garbage collection.

use parking_lot::Mutex;
use ringcast::{
    consumer_fn, BufferState, ConsumeError, ConsumeResult, Consumer, Position, RingBuffer,
    RingBufferBuilder, RingError, ThreadExecutor, TimeoutBlockingWaitStrategy,
};
use ringcast_test_support::{payload, ChaosMonkey, DataVerifier, SequenceChecker};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

fn ring<T: Send + Sync + 'static>(size: usize) -> RingBuffer<T> {
    RingBufferBuilder::new(ThreadExecutor::new())
        .size(size)
        .named("test")
        .build()
        .unwrap()
}

fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..1000 {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    false
}

/// Counts entries and close calls; optionally sleeps per entry.
struct Recording<T> {
    seen: Arc<Mutex<Vec<T>>>,
    closed: Arc<AtomicUsize>,
    delay: Duration,
}

impl<T: Clone + Send + 'static> Recording<T> {
    fn new(delay: Duration) -> (Self, Arc<Mutex<Vec<T>>>, Arc<AtomicUsize>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(AtomicUsize::new(0));
        let consumer = Self {
            seen: seen.clone(),
            closed: closed.clone(),
            delay,
        };
        (consumer, seen, closed)
    }
}

impl<T: Clone + Send + 'static> Consumer<T> for Recording<T> {
    fn consume(&mut self, entry: &T, _position: Position, _max: Position) -> ConsumeResult {
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        self.seen.lock().push(entry.clone());
        Ok(true)
    }

    fn close(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_capacity_four_five_entries_in_order() {
    let mut ring = ring::<String>(4);
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let seen = Arc::new(Mutex::new(Vec::new()));
    {
        let seen = seen.clone();
        let mut gate = Some(release_rx);
        ring.add_consumer(consumer_fn(move |entry: &String, _pos: Position, _max: Position| {
            // Hold the first entry until the test lets go
            if let Some(rx) = gate.take() {
                rx.recv().unwrap();
            }
            seen.lock().push(entry.clone());
            true
        }))
        .unwrap();
    }
    let handle = ring.handle();

    let (done_tx, done_rx) = mpsc::channel();
    let producer = thread::spawn(move || {
        for entry in ["A", "B", "C", "D", "E"] {
            assert!(ring.add(entry.to_string()));
            done_tx.send(entry).unwrap();
        }
        ring
    });

    for expected in ["A", "B", "C", "D"] {
        assert_eq!(done_rx.recv_timeout(Duration::from_secs(5)).unwrap(), expected);
    }
    // E needs slot 0, still held by A
    assert!(done_rx.recv_timeout(Duration::from_millis(100)).is_err());

    release_tx.send(()).unwrap();
    assert_eq!(done_rx.recv_timeout(Duration::from_secs(5)).unwrap(), "E");

    let ring = producer.join().unwrap();
    ring.shutdown(true);
    assert_eq!(*seen.lock(), vec!["A", "B", "C", "D", "E"]);
    assert_eq!(handle.state(), BufferState::Terminated);
}

#[test]
fn test_fast_and_slow_consumers_see_everything_intact() {
    const COUNT: i64 = 1000;
    let mut ring = ring::<Vec<u8>>(64);
    let verifier = Arc::new(DataVerifier::new());
    let fast_order = Arc::new(SequenceChecker::new());
    let slow_order = Arc::new(SequenceChecker::new());

    {
        let order = fast_order.clone();
        ring.add_consumer(consumer_fn(move |_: &Vec<u8>, position: Position, _max: Position| {
            order.check(position);
            true
        }))
        .unwrap();
    }
    {
        let order = slow_order.clone();
        let verifier = verifier.clone();
        let mut monkey = ChaosMonkey::slow(11);
        ring.add_consumer(consumer_fn(move |entry: &Vec<u8>, position: Position, _max: Position| {
            monkey.maybe_delay();
            order.check(position);
            verifier.verify(position, entry);
            true
        }))
        .unwrap();
    }

    for position in 0..COUNT {
        let data = payload(position, 32);
        verifier.expect(position, &data);
        assert!(ring.add(data));
    }
    ring.shutdown(true);

    for order in [&fast_order, &slow_order] {
        assert!(order.stats().is_perfect());
        assert_eq!(order.next_expected(), COUNT);
    }
    let stats = verifier.stats();
    assert!(!verifier.has_errors());
    assert_eq!(stats.verified_count, COUNT as u64);
    assert_eq!(stats.delivery_rate(), 1.0);
    assert!(!ring.has_consumers());
}

#[test]
fn test_graceful_shutdown_drains_everything() {
    let mut ring = ring::<u32>(128);
    let (consumer, seen, closed) = Recording::new(Duration::from_millis(1));
    ring.add_consumer(consumer).unwrap();

    for i in 0..100 {
        assert!(ring.add(i));
    }
    ring.shutdown(true);

    assert_eq!(*seen.lock(), (0..100).collect::<Vec<_>>());
    assert_eq!(closed.load(Ordering::SeqCst), 1);
    assert_eq!(ring.state(), BufferState::Terminated);
}

#[test]
fn test_forced_shutdown_stops_early() {
    let mut ring = ring::<u32>(128);
    let (consumer, seen, closed) = Recording::new(Duration::from_millis(5));
    ring.add_consumer(consumer).unwrap();

    for i in 0..100 {
        assert!(ring.add(i));
    }
    ring.shutdown_now();

    let processed = seen.lock().len();
    assert!(processed < 100, "processed {processed}");
    assert_eq!(closed.load(Ordering::SeqCst), 1);
    assert_eq!(ring.state(), BufferState::Terminated);
    assert!(!ring.add(100));
}

#[test]
fn test_shutdown_is_idempotent() {
    let mut ring = ring::<u32>(16);
    let (consumer, seen, closed) = Recording::new(Duration::ZERO);
    ring.add_consumer(consumer).unwrap();
    for i in 0..10 {
        ring.add(i);
    }

    ring.shutdown(true);
    ring.shutdown(true);
    ring.shutdown_now();

    assert_eq!(seen.lock().len(), 10);
    assert_eq!(closed.load(Ordering::SeqCst), 1);
    assert_eq!(ring.state(), BufferState::Terminated);
}

#[test]
fn test_non_blocking_shutdown_then_await() {
    let mut ring = ring::<u32>(64);
    let (consumer, seen, _closed) = Recording::new(Duration::from_millis(1));
    ring.add_consumer(consumer).unwrap();
    for i in 0..50 {
        ring.add(i);
    }

    ring.shutdown(false);
    assert!(matches!(ring.state(), BufferState::Draining | BufferState::Terminated));
    assert!(ring.await_termination(Duration::from_secs(10)));
    assert_eq!(seen.lock().len(), 50);
    assert_eq!(ring.state(), BufferState::Terminated);
}

/// Fails on multiples of 3, panics on 7, records the rest.
struct Flaky {
    seen: Arc<Mutex<Vec<u32>>>,
    errors: Arc<Mutex<Vec<(Position, bool)>>>,
}

impl Consumer<u32> for Flaky {
    fn consume(&mut self, entry: &u32, _position: Position, _max: Position) -> ConsumeResult {
        if *entry == 7 {
            panic!("seven");
        }
        if *entry % 3 == 0 {
            return Err(ConsumeError::failed(format!("bad entry {entry}")));
        }
        self.seen.lock().push(*entry);
        Ok(true)
    }

    fn handle_error(&mut self, error: ConsumeError, position: Position, _max: Position) {
        let panicked = matches!(error, ConsumeError::Panicked(_));
        self.errors.lock().push((position, panicked));
    }
}

#[test]
fn test_consumer_failures_are_isolated() {
    let mut ring = ring::<u32>(16);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let errors = Arc::new(Mutex::new(Vec::new()));
    ring.add_consumer(Flaky {
        seen: seen.clone(),
        errors: errors.clone(),
    })
    .unwrap();

    for i in 1..=10 {
        assert!(ring.add(i));
    }
    ring.shutdown(true);

    assert_eq!(*seen.lock(), vec![1, 2, 4, 5, 8, 10]);
    assert_eq!(
        *errors.lock(),
        vec![(2, false), (5, false), (6, true), (8, false)]
    );
}

#[test]
fn test_chaotic_consumer_keeps_going() {
    let mut ring = ring::<u64>(32);
    let handled = Arc::new(AtomicUsize::new(0));

    struct Chaotic {
        monkey: ChaosMonkey,
        order: Arc<SequenceChecker>,
        handled: Arc<AtomicUsize>,
    }

    impl Consumer<u64> for Chaotic {
        fn consume(&mut self, _entry: &u64, position: Position, _max: Position) -> ConsumeResult {
            self.order.check(position);
            match self.monkey.decide() {
                ringcast_test_support::ChaosEvent::Fail => Err(ConsumeError::failed("chaos")),
                ringcast_test_support::ChaosEvent::Panic => panic!("chaos"),
                ringcast_test_support::ChaosEvent::Delay(d) => {
                    thread::sleep(d);
                    Ok(true)
                }
                ringcast_test_support::ChaosEvent::None => Ok(true),
            }
        }

        fn handle_error(&mut self, _error: ConsumeError, _position: Position, _max: Position) {
            self.handled.fetch_add(1, Ordering::SeqCst);
        }
    }

    let order = Arc::new(SequenceChecker::new());
    ring.add_consumer(Chaotic {
        monkey: ChaosMonkey::faulty(99),
        order: order.clone(),
        handled: handled.clone(),
    })
    .unwrap();

    for i in 0..500 {
        assert!(ring.add(i));
    }
    ring.shutdown(true);

    // Every entry is handed out exactly once, failures included
    assert!(order.stats().is_perfect());
    assert_eq!(order.next_expected(), 500);
}

#[test]
fn test_remove_stops_consumer_and_frees_producer() {
    let mut ring = ring::<u32>(4);
    let (consumer, seen, closed) = Recording::new(Duration::ZERO);
    let id = ring.add_consumer(consumer).unwrap();
    assert_eq!(ring.consumer_count(), 1);

    for i in 0..3 {
        ring.add(i);
    }
    assert!(eventually(|| seen.lock().len() == 3));

    assert!(ring.remove(id));
    assert_eq!(closed.load(Ordering::SeqCst), 1);
    assert!(!ring.has_consumers());
    assert!(!ring.remove(id));

    // Nobody gates the producer anymore
    for i in 3..20 {
        assert!(ring.add(i));
    }
    assert_eq!(seen.lock().len(), 3);
    ring.shutdown(true);
}

#[test]
fn test_consumer_returning_false_deregisters() {
    let mut ring = ring::<u32>(4);
    let closed = Arc::new(AtomicBool::new(false));

    struct StopAtThree {
        count: usize,
        closed: Arc<AtomicBool>,
    }

    impl Consumer<u32> for StopAtThree {
        fn consume(&mut self, _entry: &u32, _position: Position, _max: Position) -> ConsumeResult {
            self.count += 1;
            Ok(self.count < 3)
        }

        fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    ring.add_consumer(StopAtThree {
        count: 0,
        closed: closed.clone(),
    })
    .unwrap();

    for i in 0..3 {
        assert!(ring.add(i));
    }
    assert!(eventually(|| !ring.has_consumers()));
    assert!(closed.load(Ordering::SeqCst));

    for i in 3..20 {
        assert!(ring.add(i));
    }
    ring.shutdown(true);
}

#[test]
fn test_late_consumer_sees_only_new_entries() {
    let mut ring = ring::<u32>(8);
    for i in 0..3 {
        ring.add(i);
    }

    let positions = Arc::new(Mutex::new(Vec::new()));
    {
        let positions = positions.clone();
        ring.add_consumer(consumer_fn(move |_: &u32, position: Position, _max: Position| {
            positions.lock().push(position);
            true
        }))
        .unwrap();
    }
    ring.add(3);
    ring.add(4);
    ring.shutdown(true);

    assert_eq!(*positions.lock(), vec![3, 4]);
}

#[test]
fn test_operations_after_shutdown() {
    let mut ring = ring::<u32>(8);
    ring.shutdown(true);

    assert!(!ring.add(1));
    assert!(!ring.add_batch(vec![1, 2]).unwrap());
    let result = ring.add_consumer(consumer_fn(|_: &u32, _: Position, _: Position| true));
    assert!(matches!(result, Err(RingError::ShutDown)));
}

#[test]
fn test_shutdown_releases_blocked_producer() {
    let mut ring = ring::<u32>(2);
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let mut gate = Some(release_rx);
    ring.add_consumer(consumer_fn(move |_: &u32, _: Position, _: Position| {
        if let Some(rx) = gate.take() {
            rx.recv().unwrap();
        }
        true
    }))
    .unwrap();
    let handle = ring.handle();

    let producer = thread::spawn(move || {
        let accepted: Vec<bool> = (0..3).map(|i| ring.add(i)).collect();
        (ring, accepted)
    });

    thread::sleep(Duration::from_millis(50));
    handle.shutdown(false);
    let (ring, accepted) = producer.join().unwrap();
    assert_eq!(accepted, vec![true, true, false]);

    release_tx.send(()).unwrap();
    assert!(ring.await_termination(Duration::from_secs(5)));
}

#[test]
fn test_rejected_entries_are_never_delivered() {
    for round in 0..50u64 {
        let mut ring = ring::<u64>(64);
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = seen.clone();
            ring.add_consumer(consumer_fn(move |entry: &u64, _: Position, _: Position| {
                seen.lock().push(*entry);
                true
            }))
            .unwrap();
        }
        let handle = ring.handle();

        let producer = thread::spawn(move || {
            let mut accepted = Vec::new();
            for value in 0.. {
                if !ring.add(value) {
                    break;
                }
                accepted.push(value);
            }
            (ring, accepted)
        });

        thread::sleep(Duration::from_micros(100 * (round % 10)));
        handle.shutdown(true);
        let (_ring, accepted) = producer.join().unwrap();

        assert_eq!(*seen.lock(), accepted, "round {round}");
    }
}

#[test]
fn test_batches_are_published_together() {
    let mut ring = ring::<u32>(16);
    let batches = Arc::new(Mutex::new(Vec::new()));
    {
        let batches = batches.clone();
        ring.add_consumer(consumer_fn(move |entry: &u32, position: Position, max: Position| {
            batches.lock().push((*entry, position, max));
            true
        }))
        .unwrap();
    }

    assert!(ring.add_batch(vec![10, 11, 12, 13]).unwrap());
    ring.shutdown(true);

    let batches = batches.lock();
    let entries: Vec<u32> = batches.iter().map(|(e, _, _)| *e).collect();
    assert_eq!(entries, vec![10, 11, 12, 13]);
    // Each entry was handed out with a max at or beyond its own position
    assert!(batches.iter().all(|(_, position, max)| max >= position && *max <= 3));
}

#[test]
fn test_timeout_retries_exhausted() {
    let ring = RingBufferBuilder::new(ThreadExecutor::new())
        .size(8)
        .wait_strategy(TimeoutBlockingWaitStrategy::new(Duration::from_millis(5)))
        .build::<u32>()
        .unwrap();

    let (consumer, seen, closed) = Recording::<u32>::new(Duration::ZERO);
    ring.add_consumer_with_retries(consumer, 2).unwrap();

    assert!(eventually(|| !ring.has_consumers()));
    assert_eq!(closed.load(Ordering::SeqCst), 1);
    assert!(seen.lock().is_empty());
    ring.shutdown(true);
}

#[test]
fn test_timeout_budget_resets_on_progress() {
    let mut ring = RingBufferBuilder::new(ThreadExecutor::new())
        .size(8)
        .wait_strategy(TimeoutBlockingWaitStrategy::new(Duration::from_millis(20)))
        .retries_on_timeout(3)
        .build::<u32>()
        .unwrap();

    let (consumer, seen, _closed) = Recording::<u32>::new(Duration::ZERO);
    ring.add_consumer(consumer).unwrap();

    // Each pause is shorter than the full budget of four waits
    for i in 0..5 {
        thread::sleep(Duration::from_millis(30));
        assert!(ring.add(i));
    }
    ring.shutdown(true);
    assert_eq!(*seen.lock(), vec![0, 1, 2, 3, 4]);
}

/// Counts drops so collection can be observed.
struct Tracked {
    drops: Arc<AtomicUsize>,
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_garbage_collection_releases_consumed_entries() {
    let mut ring = RingBufferBuilder::new(ThreadExecutor::new())
        .size(8)
        .named("gc")
        .garbage_collect(true)
        .build::<Tracked>()
        .unwrap();
    let drops = Arc::new(AtomicUsize::new(0));
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let mut gate = Some(release_rx);
    ring.add_consumer(consumer_fn(move |_: &Tracked, _: Position, _: Position| {
        if let Some(rx) = gate.take() {
            rx.recv().unwrap();
        }
        true
    }))
    .unwrap();

    for _ in 0..5 {
        assert!(ring.add(Tracked {
            drops: drops.clone(),
        }));
    }

    // Held by the consumer: nothing collected yet
    thread::sleep(Duration::from_millis(30));
    assert_eq!(drops.load(Ordering::SeqCst), 0);

    release_tx.send(()).unwrap();
    // Slots are never reused, so only the GC task can drop these. It trails
    // one behind the consumer's last position while the consumer is attached.
    assert!(eventually(|| drops.load(Ordering::SeqCst) == 4));

    ring.shutdown(true);
    assert_eq!(drops.load(Ordering::SeqCst), 5);
    assert_eq!(ring.state(), BufferState::Terminated);
}

#[test]
fn test_garbage_collection_without_consumers() {
    let mut ring = RingBufferBuilder::new(ThreadExecutor::new())
        .size(4)
        .garbage_collect(true)
        .build::<Tracked>()
        .unwrap();
    let drops = Arc::new(AtomicUsize::new(0));

    for _ in 0..10 {
        assert!(ring.add(Tracked {
            drops: drops.clone(),
        }));
    }
    ring.shutdown(true);
    assert_eq!(drops.load(Ordering::SeqCst), 10);
}

#[test]
fn test_garbage_collection_needs_two_slots() {
    let result = RingBufferBuilder::new(ThreadExecutor::new())
        .size(1)
        .garbage_collect(true)
        .build::<u32>();
    assert!(matches!(result, Err(RingError::Config(_))));
}

#[test]
fn test_garbage_collection_smallest_ring_keeps_moving() {
    let mut ring = RingBufferBuilder::new(ThreadExecutor::new())
        .size(2)
        .garbage_collect(true)
        .build::<u32>()
        .unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    {
        let seen = seen.clone();
        ring.add_consumer(consumer_fn(move |entry: &u32, _: Position, _: Position| {
            seen.lock().push(*entry);
            true
        }))
        .unwrap();
    }
    let handle = ring.handle();

    let (tx, rx) = mpsc::channel();
    let producer = thread::spawn(move || {
        for value in 0..8 {
            assert!(ring.add(value));
        }
        tx.send(()).unwrap();
        ring
    });

    assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
    let _ring = producer.join().unwrap();
    handle.shutdown(true);
    assert_eq!(*seen.lock(), (0..8).collect::<Vec<_>>());
}
