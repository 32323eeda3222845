//! Consumers and the per-consumer run loop.

use crate::error::{panic_message, ConsumeError, WaitError};
use crate::ring::barrier::PointerBarrier;
use crate::ring::buffer::Inner;
use crate::ring::latch::Latch;
use crate::ring::pointer::Pointer;
use crate::ring::Position;
use parking_lot::Mutex;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

/// `Ok(true)` to keep consuming, `Ok(false)` to stop and deregister.
pub type ConsumeResult = std::result::Result<bool, ConsumeError>;

/// Processes entries on a thread owned by the ring buffer.
pub trait Consumer<T>: Send + 'static {
    /// Handle the entry at `position`. `max_position` is the last position of
    /// the batch currently being handed out (`>= position`).
    fn consume(&mut self, entry: &T, position: Position, max_position: Position) -> ConsumeResult;

    /// Called when `consume` returned an error or panicked. The entry is skipped.
    fn handle_error(&mut self, error: ConsumeError, position: Position, max_position: Position) {
        trace_warn!(position, max_position, %error, "consumer failed, skipping entry");
    }

    /// Called exactly once when the consumer stops, whatever the reason.
    fn close(&mut self) {}
}

/// Consumer built from a closure, see [`consumer_fn`].
pub struct FnConsumer<F>(F);

/// Wrap a `FnMut(&T, position, max_position) -> bool` as a consumer.
pub fn consumer_fn<F>(f: F) -> FnConsumer<F> {
    FnConsumer(f)
}

impl<T, F> Consumer<T> for FnConsumer<F>
where
    F: FnMut(&T, Position, Position) -> bool + Send + 'static,
{
    fn consume(&mut self, entry: &T, position: Position, max_position: Position) -> ConsumeResult {
        Ok((self.0)(entry, position, max_position))
    }
}

/// Stable handle for a registered consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConsumerId(pub(crate) u64);

impl ConsumerId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "consumer-{}", self.0)
    }
}

// ============================================================================
// Runner state shared between the registry and the consumer thread
// ============================================================================

pub(crate) struct ConsumerRunner {
    pub(crate) id: ConsumerId,
    pub(crate) pointer: Arc<Pointer>,
    barrier: PointerBarrier,
    running: AtomicBool,
    thread: Mutex<Option<ThreadId>>,
    stopped: Latch,
}

impl ConsumerRunner {
    pub(crate) fn new(id: ConsumerId, pointer: Arc<Pointer>, barrier: PointerBarrier) -> Self {
        Self {
            id,
            pointer,
            barrier,
            running: AtomicBool::new(true),
            thread: Mutex::new(None),
            stopped: Latch::new(),
        }
    }

    #[inline]
    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Ask the loop to stop after the entry in hand.
    pub(crate) fn request_stop(&self) {
        if self.running.swap(false, Ordering::AcqRel) {
            self.barrier.close();
        }
    }

    /// Stop and wait for the close sequence to finish.
    ///
    /// From the consumer's own thread this only requests the stop; waiting
    /// there would never return.
    pub(crate) fn close(&self) {
        self.request_stop();
        if !self.is_current_thread() {
            self.stopped.wait();
        }
    }

    /// Whether the caller is this consumer's own task.
    pub(crate) fn is_current_thread(&self) -> bool {
        *self.thread.lock() == Some(thread::current().id())
    }

    pub(crate) fn wait_for_completion(&self) {
        self.stopped.wait();
    }

    pub(crate) fn wait_timeout(&self, timeout: Duration) -> bool {
        self.stopped.wait_timeout(timeout)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    /// `consume` returned `Ok(false)`
    Finished,
    /// Buffer complete and everything published was consumed
    Drained,
    /// Removed or forced shutdown
    Stopped,
    /// Timeout retry budget exhausted
    TimedOut,
}

/// Cleanup that must run however the loop exits.
struct RunnerExit<T: Send + Sync + 'static> {
    inner: Arc<Inner<T>>,
    runner: Arc<ConsumerRunner>,
    consumer: Box<dyn Consumer<T>>,
}

impl<T: Send + Sync + 'static> Drop for RunnerExit<T> {
    fn drop(&mut self) {
        self.inner.cursor.ignore(&self.runner.pointer);

        let consumer = &mut self.consumer;
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| consumer.close())) {
            let message = panic_message(payload.as_ref());
            trace_error!(consumer = %self.runner.id, %message, "consumer panicked while closing");
        }

        self.inner.disconnect(&self.runner);
        self.runner.stopped.release();
    }
}

/// Body of a consumer task.
pub(crate) fn run<T: Send + Sync + 'static>(
    inner: Arc<Inner<T>>,
    runner: Arc<ConsumerRunner>,
    consumer: Box<dyn Consumer<T>>,
    retries_on_timeout: u32,
) {
    *runner.thread.lock() = Some(thread::current().id());
    trace_debug!(ring = %inner.name, consumer = %runner.id, "consumer started");

    let mut exit = RunnerExit {
        inner,
        runner,
        consumer,
    };
    let reason = run_loop(
        &exit.inner,
        &exit.runner,
        exit.consumer.as_mut(),
        retries_on_timeout,
    );

    trace_debug!(ring = %exit.inner.name, consumer = %exit.runner.id, ?reason, "consumer stopped");
    drop(exit);
}

fn run_loop<T: Send + Sync + 'static>(
    inner: &Inner<T>,
    runner: &ConsumerRunner,
    consumer: &mut dyn Consumer<T>,
    retries_on_timeout: u32,
) -> StopReason {
    let mut retries = retries_on_timeout;

    while runner.is_running() {
        let mut next = runner.pointer.get() + 1;
        let max_position = match runner.barrier.wait_for(next) {
            Ok(max) if max < 0 => {
                return if runner.is_running() {
                    StopReason::Drained
                } else {
                    StopReason::Stopped
                };
            }
            Ok(max) => max,
            Err(WaitError::Timeout) => {
                if retries == 0 {
                    return StopReason::TimedOut;
                }
                retries -= 1;
                continue;
            }
        };

        while next <= max_position {
            if !runner.is_running() {
                return StopReason::Stopped;
            }
            // Safety: `next` is published and our pointer keeps the producer
            // (and the GC task) off this slot until we advance past it.
            match unsafe { inner.entry(next) } {
                Some(entry) => {
                    if !dispatch(consumer, entry, next, max_position) {
                        return StopReason::Finished;
                    }
                }
                None => {
                    trace_debug!(ring = %inner.name, consumer = %runner.id, position = next, "entry no longer available");
                }
            }
            next = runner.pointer.increment_and_get() + 1;
            retries = retries_on_timeout;
        }
    }
    StopReason::Stopped
}

/// Returns `false` when the consumer asked to stop.
fn dispatch<T: 'static>(
    consumer: &mut dyn Consumer<T>,
    entry: &T,
    position: Position,
    max_position: Position,
) -> bool {
    let outcome = catch_unwind(AssertUnwindSafe(|| consumer.consume(entry, position, max_position)));
    let error = match outcome {
        Ok(Ok(keep_going)) => return keep_going,
        Ok(Err(error)) => error,
        Err(payload) => ConsumeError::from_panic(payload),
    };
    if catch_unwind(AssertUnwindSafe(|| consumer.handle_error(error, position, max_position))).is_err() {
        trace_error!(position, "consumer panicked in handle_error");
    }
    true
}
