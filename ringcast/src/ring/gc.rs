//! Background collection of slots every consumer has moved past.
//!
//! The task trails the slowest registered consumer and calls its
//! `Collectable` once per position. Its own pointer sits in the cursor's
//! stay-behind set, so the producer never reuses a slot before it is collected.

use crate::error::{panic_message, Result, WaitError};
use crate::executor::Executor;
use crate::ring::barrier::PointerBarrier;
use crate::ring::cursor::Cursor;
use crate::ring::latch::Latch;
use crate::ring::pointer::{Pointer, PositionSource, TrailingPointer};
use crate::ring::Position;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Releases whatever is held at a position.
pub trait Collectable: Send + Sync + 'static {
    fn collect(&self, position: Position);
}

impl<F> Collectable for F
where
    F: Fn(Position) + Send + Sync + 'static,
{
    fn collect(&self, position: Position) {
        self(position)
    }
}

/// Highest position no consumer will read again.
///
/// With consumers registered this is the trailing pointer. Without any, it is
/// the published position: a consumer attaching later starts after whatever
/// was published when it attached.
struct CollectHorizon {
    published: Arc<Pointer>,
    trailing: TrailingPointer,
}

impl PositionSource for CollectHorizon {
    fn get(&self) -> Position {
        // Read the published position before checking membership; a consumer
        // attaching in between starts at or after this value.
        let published = self.published.get();
        if self.trailing.is_empty() {
            published
        } else {
            self.trailing.get()
        }
    }
}

pub struct GarbageCollectingConsumer {
    cursor: Arc<dyn Cursor>,
    horizon: Arc<CollectHorizon>,
    pointer: Arc<Pointer>,
    barrier: PointerBarrier,
    collectable: Box<dyn Collectable>,
    stopping: AtomicBool,
    drain: AtomicBool,
    stopped: Latch,
}

impl GarbageCollectingConsumer {
    /// Create the collector and make the cursor stay behind it.
    pub fn new(cursor: Arc<dyn Cursor>, collectable: impl Collectable) -> Arc<Self> {
        let published = cursor.current_pointer().clone();
        let horizon = Arc::new(CollectHorizon {
            trailing: TrailingPointer::new(published.clone()),
            published,
        });
        let pointer = cursor.new_pointer();
        let barrier = cursor
            .clone()
            .new_trailing_barrier(horizon.clone() as Arc<dyn PositionSource>);
        Arc::new(Self {
            cursor,
            horizon,
            pointer,
            barrier,
            collectable: Box::new(collectable),
            stopping: AtomicBool::new(false),
            drain: AtomicBool::new(false),
            stopped: Latch::new(),
        })
    }

    /// Start the collection loop on `executor`.
    pub fn start(self: &Arc<Self>, executor: &dyn Executor, name: String) -> Result<()> {
        let gc = Arc::clone(self);
        executor.execute(name, Box::new(move || gc.run()))
    }

    /// Track a consumer pointer; nothing it has not passed is collected.
    ///
    /// The pointer is moved to the published position, so register it before
    /// its reader starts.
    pub(crate) fn stay_behind(&self, pointer: &Arc<Pointer>) {
        self.horizon.trailing.stay_behind(std::slice::from_ref(pointer));
    }

    pub fn ignore(&self, pointer: &Arc<Pointer>) -> bool {
        self.horizon.trailing.ignore(pointer)
    }

    /// Last collected position.
    pub fn position(&self) -> Position {
        self.pointer.get()
    }

    /// Stop after collecting up to the current horizon. Idempotent.
    pub fn finish(&self) {
        self.stop(true);
    }

    /// Stop without collecting further. Idempotent.
    pub fn close(&self) {
        self.stop(false);
    }

    fn stop(&self, drain: bool) {
        if self.stopping.swap(true, Ordering::AcqRel) {
            return;
        }
        self.drain.store(drain, Ordering::Release);
        self.barrier.close();
    }

    pub fn wait_for_completion(&self) {
        self.stopped.wait();
    }

    /// Returns whether the task stopped before the timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.stopped.wait_timeout(timeout)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.is_released()
    }

    fn run(&self) {
        trace_debug!("garbage collector started");
        loop {
            let next = self.pointer.get() + 1;
            match self.barrier.wait_for(next) {
                Ok(available) if available >= next => self.collect_range(next, available),
                Ok(_) if self.barrier.is_closed() => break,
                Ok(_) | Err(WaitError::Timeout) => {}
            }
        }

        if self.drain.load(Ordering::Acquire) {
            let next = self.pointer.get() + 1;
            let end = self.horizon.get();
            if end >= next {
                self.collect_range(next, end);
            }
        }

        self.cursor.ignore(&self.pointer);
        trace_debug!(position = self.pointer.get(), "garbage collector stopped");
        self.stopped.release();
    }

    fn collect_range(&self, from: Position, to: Position) {
        for position in from..=to {
            if let Err(payload) =
                catch_unwind(AssertUnwindSafe(|| self.collectable.collect(position)))
            {
                let message = panic_message(payload.as_ref());
                trace_warn!(position, %message, "collect panicked");
            }
        }
        self.pointer.set(to);
    }
}
