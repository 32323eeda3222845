//! Producer-side coordination: claim, publish, stay behind readers, complete.

use crate::error::{Result, RingError};
use crate::ring::barrier::PointerBarrier;
use crate::ring::pointer::{Pointer, PointerSet, PositionSource};
use crate::ring::wait::WaitStrategy;
use crate::ring::{validate_size, Position, NO_POSITION};
use crossbeam_utils::Backoff;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Park interval while the ring is full.
const CLAIM_PARK: Duration = Duration::from_micros(1);

/// `final_position` before `complete()` has recorded it.
const FINAL_UNSET: Position = i64::MIN;

/// Hands out positions to the producer and tracks which readers it must not lap.
///
/// `SingleProducerCursor` is the provided implementation. A multi-producer
/// cursor would override `highest_published_position` to scan for gaps.
pub trait Cursor: Send + Sync + 'static {
    fn buffer_size(&self) -> usize;

    /// Claim the next position, blocking while the ring is full.
    fn claim(&self) -> Result<Position> {
        self.claim_n(1)
    }

    /// Claim `count` consecutive positions and return the highest one.
    fn claim_n(&self, count: usize) -> Result<Position>;

    /// Make everything up to `position` visible. `false` once complete.
    fn publish(&self, position: Position) -> bool;

    /// Highest contiguous published position in `lower..=upper`.
    fn highest_published_position(&self, lower: Position, upper: Position) -> Position;

    /// Last published position.
    fn current(&self) -> Position {
        self.current_pointer().get()
    }

    fn current_pointer(&self) -> &Arc<Pointer>;

    fn wait_strategy(&self) -> &dyn WaitStrategy;

    /// Barrier that waits on published positions and reports completion.
    fn new_barrier(self: Arc<Self>) -> PointerBarrier;

    /// Barrier that trails `dependent` and ignores completion (closed explicitly).
    fn new_trailing_barrier(self: Arc<Self>, dependent: Arc<dyn PositionSource>) -> PointerBarrier;

    /// Allocate a reader pointer at the current position and stay behind it.
    fn new_pointer(&self) -> Arc<Pointer> {
        let pointer = Arc::new(Pointer::new(self.current()));
        self.stay_behind(&[pointer.clone()]);
        pointer
    }

    fn stay_behind(&self, pointers: &[Arc<Pointer>]);

    fn ignore(&self, pointer: &Arc<Pointer>) -> bool;

    /// Freeze the final position and wake every waiter. Idempotent.
    fn complete(&self);

    fn is_complete(&self) -> bool;

    /// Like `is_complete`, but ordered after every published position the
    /// caller has already read. A `false` here means `complete()` will record
    /// a final position at or beyond those positions.
    fn confirm_complete(&self) -> bool;

    /// The position frozen by `complete()`, once recorded.
    fn final_position(&self) -> Option<Position>;

    /// Spin until `complete()` has recorded the final position. Only call
    /// once the cursor is complete.
    fn await_final_position(&self) -> Position {
        let backoff = Backoff::new();
        loop {
            if let Some(position) = self.final_position() {
                return position;
            }
            backoff.snooze();
        }
    }

    fn signal_consumers(&self) {
        self.wait_strategy().signal_all_when_blocking();
    }
}

// ============================================================================
// SingleProducerCursor
// ============================================================================

pub struct SingleProducerCursor {
    buffer_size: usize,
    wait_strategy: Arc<dyn WaitStrategy>,
    /// Published position, read by every consumer.
    current: Arc<Pointer>,
    /// Last claimed position. Only the producer thread touches it.
    next_position: AtomicI64,
    /// Cached minimum of `stay_behinds` (the minimum never decreases).
    gate_cache: AtomicI64,
    stay_behinds: PointerSet,
    completed: AtomicBool,
    final_position: AtomicI64,
}

impl SingleProducerCursor {
    pub fn new(buffer_size: usize, wait_strategy: Arc<dyn WaitStrategy>) -> Result<Self> {
        validate_size(buffer_size)?;
        Ok(Self {
            buffer_size,
            wait_strategy,
            current: Arc::new(Pointer::new(NO_POSITION)),
            next_position: AtomicI64::new(NO_POSITION),
            gate_cache: AtomicI64::new(NO_POSITION),
            stay_behinds: PointerSet::new(),
            completed: AtomicBool::new(false),
            final_position: AtomicI64::new(FINAL_UNSET),
        })
    }

    /// Number of pointers currently bounding the producer.
    pub fn stay_behind_count(&self) -> usize {
        self.stay_behinds.len()
    }
}

impl Cursor for SingleProducerCursor {
    fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    fn claim_n(&self, count: usize) -> Result<Position> {
        if count == 0 {
            return Err(RingError::invalid_argument("claim count must be positive"));
        }
        if count > self.buffer_size {
            return Err(RingError::invalid_argument(format!(
                "cannot claim {} positions in a ring of {}",
                count, self.buffer_size
            )));
        }
        if self.is_complete() {
            return Err(RingError::ShutDown);
        }

        let claimed = self.next_position.load(Ordering::Relaxed) + count as i64;
        let wrap_point = claimed - self.buffer_size as i64;

        if wrap_point > self.gate_cache.load(Ordering::Relaxed) {
            let backoff = Backoff::new();
            loop {
                match self.stay_behinds.minimum() {
                    None => break,
                    Some(min) if wrap_point <= min => {
                        self.gate_cache.store(min, Ordering::Relaxed);
                        break;
                    }
                    Some(_) => {}
                }
                if self.is_complete() {
                    return Err(RingError::ShutDown);
                }
                if backoff.is_completed() {
                    thread::park_timeout(CLAIM_PARK);
                } else {
                    backoff.snooze();
                }
            }
        }

        self.next_position.store(claimed, Ordering::Relaxed);
        Ok(claimed)
    }

    fn publish(&self, position: Position) -> bool {
        if self.completed.load(Ordering::Acquire) {
            return false;
        }
        self.current.set(position);
        // RMW on `completed` orders us against complete(). If we come first,
        // its read of `current` sees this position. Otherwise the final
        // position it recorded decides whether the entry made it in.
        let accepted = if self.completed.fetch_or(false, Ordering::AcqRel) {
            self.await_final_position() >= position
        } else {
            true
        };
        self.wait_strategy.signal_all_when_blocking();
        accepted
    }

    #[inline]
    fn highest_published_position(&self, _lower: Position, upper: Position) -> Position {
        upper
    }

    fn current_pointer(&self) -> &Arc<Pointer> {
        &self.current
    }

    fn wait_strategy(&self) -> &dyn WaitStrategy {
        self.wait_strategy.as_ref()
    }

    fn new_barrier(self: Arc<Self>) -> PointerBarrier {
        PointerBarrier::new(self)
    }

    fn new_trailing_barrier(self: Arc<Self>, dependent: Arc<dyn PositionSource>) -> PointerBarrier {
        PointerBarrier::trailing(self, dependent)
    }

    fn stay_behind(&self, pointers: &[Arc<Pointer>]) {
        self.stay_behinds.add(pointers, &self.current);
    }

    fn ignore(&self, pointer: &Arc<Pointer>) -> bool {
        self.stay_behinds.remove(pointer)
    }

    fn complete(&self) {
        if self.completed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.final_position
            .store(self.current.get(), Ordering::Release);
        self.wait_strategy.signal_all_when_blocking();
    }

    fn is_complete(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    fn confirm_complete(&self) -> bool {
        self.completed.fetch_or(false, Ordering::AcqRel)
    }

    fn final_position(&self) -> Option<Position> {
        match self.final_position.load(Ordering::Acquire) {
            FINAL_UNSET => None,
            position => Some(position),
        }
    }
}
