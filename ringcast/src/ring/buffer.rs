//! RingBuffer - slot storage, producer API and consumer lifecycle
//!
//! - `RingBuffer<T>` - owned by the single producer (`add` takes `&mut self`)
//! - `RingHandle<T>` - cloneable handle for registering consumers and shutting
//!   down from other threads
//!
//! Every registered consumer sees every entry published after it registered.
//! The producer blocks in `add` while the slowest consumer (or the GC task) is
//! a full ring behind.

use crate::error::{Result, RingError};
use crate::executor::Executor;
use crate::ring::consumer::{self, Consumer, ConsumerId, ConsumerRunner};
use crate::ring::cursor::Cursor;
use crate::ring::gc::GarbageCollectingConsumer;
use crate::ring::Position;
use parking_lot::Mutex;
use std::cell::UnsafeCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Lifecycle of a buffer. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    /// Accepting entries and consumers
    Active,
    /// Shut down; consumers or the GC task are still running
    Draining,
    /// Every consumer and the GC task have exited
    Terminated,
}

// ============================================================================
// Slots - fixed circular storage indexed by masked position
// ============================================================================

pub(crate) struct Slots<T> {
    cells: Box<[UnsafeCell<Option<T>>]>,
    size: usize,
    mask: usize,
}

// Safety: a slot is written only by the producer before publish (or by the GC
// task after every consumer passed it) and read only after publish. The
// cursor's stay-behind gate keeps those accesses disjoint in time.
unsafe impl<T: Send + Sync> Sync for Slots<T> {}

impl<T> Slots<T> {
    pub(crate) fn new(size: usize) -> Self {
        let cells = (0..size)
            .map(|_| UnsafeCell::new(None))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            cells,
            size,
            mask: size - 1,
        }
    }

    #[inline]
    fn cell(&self, position: Position) -> &UnsafeCell<Option<T>> {
        &self.cells[(position as usize) & self.mask]
    }

    /// The slot for `position` has been reused once the cursor is a full ring past it.
    #[inline]
    fn overwritten(&self, position: Position, current: Position) -> bool {
        position <= current - self.size as i64
    }

    /// # Safety
    /// Caller is the producer and holds a claim on `position`.
    #[inline]
    pub(crate) unsafe fn put(&self, position: Position, entry: T) {
        *self.cell(position).get() = Some(entry);
    }

    /// `None` when the slot was already overwritten or collected.
    ///
    /// # Safety
    /// `position` is published and the caller's pointer is still behind it.
    #[inline]
    pub(crate) unsafe fn get(&self, position: Position, current: Position) -> Option<&T> {
        if self.overwritten(position, current) {
            return None;
        }
        (*self.cell(position).get()).as_ref()
    }

    /// Drop the value at `position`, unless the slot already holds a newer entry.
    ///
    /// # Safety
    /// Every consumer has passed `position` and the producer is gated behind the caller.
    pub(crate) unsafe fn clear(&self, position: Position, current: Position) {
        if self.overwritten(position, current) {
            return;
        }
        *self.cell(position).get() = None;
    }
}

// ============================================================================
// Inner - state shared by the producer, handles and runner tasks
// ============================================================================

pub(crate) struct Inner<T> {
    pub(crate) name: String,
    slots: Arc<Slots<T>>,
    pub(crate) cursor: Arc<dyn Cursor>,
    executor: Arc<dyn Executor>,
    accepting: AtomicBool,
    consumers: Mutex<HashMap<ConsumerId, Arc<ConsumerRunner>>>,
    next_id: AtomicU64,
    gc: Option<Arc<GarbageCollectingConsumer>>,
    retries_on_timeout: u32,
}

impl<T: Send + Sync + 'static> Inner<T> {
    pub(crate) fn new(
        name: String,
        slots: Arc<Slots<T>>,
        cursor: Arc<dyn Cursor>,
        executor: Arc<dyn Executor>,
        gc: Option<Arc<GarbageCollectingConsumer>>,
        retries_on_timeout: u32,
    ) -> Self {
        Self {
            name,
            slots,
            cursor,
            executor,
            accepting: AtomicBool::new(true),
            consumers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            gc,
            retries_on_timeout,
        }
    }

    /// Start the GC task, if configured.
    pub(crate) fn start_gc(&self) -> Result<()> {
        match &self.gc {
            Some(gc) => gc.start(self.executor.as_ref(), format!("{}-gc", self.name)),
            None => Ok(()),
        }
    }

    /// # Safety
    /// See [`Slots::get`].
    #[inline]
    pub(crate) unsafe fn entry(&self, position: Position) -> Option<&T> {
        self.slots.get(position, self.cursor.current())
    }

    fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    fn add(&self, entry: T) -> bool {
        if !self.is_accepting() {
            return false;
        }
        let Ok(position) = self.cursor.claim() else {
            return false;
        };
        // Safety: claimed, so no reader or the GC task is on this slot
        unsafe { self.slots.put(position, entry) };
        self.cursor.publish(position)
    }

    fn add_batch(&self, entries: Vec<T>) -> Result<bool> {
        if entries.is_empty() {
            return Err(RingError::invalid_argument("batch must not be empty"));
        }
        if !self.is_accepting() {
            return Ok(false);
        }
        let count = entries.len();
        let last = match self.cursor.claim_n(count) {
            Ok(position) => position,
            Err(RingError::ShutDown) => return Ok(false),
            Err(e) => return Err(e),
        };
        let first = last - count as i64 + 1;
        for (position, entry) in (first..=last).zip(entries) {
            // Safety: the whole range is claimed
            unsafe { self.slots.put(position, entry) };
        }
        Ok(self.cursor.publish(last))
    }

    fn add_consumer(
        self: &Arc<Self>,
        consumer: Box<dyn Consumer<T>>,
        retries_on_timeout: u32,
    ) -> Result<ConsumerId> {
        if !self.is_accepting() {
            return Err(RingError::ShutDown);
        }

        let id = ConsumerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let pointer = self.cursor.new_pointer();
        if let Some(gc) = &self.gc {
            gc.stay_behind(&pointer);
        }
        let barrier = self.cursor.clone().new_barrier();
        let runner = Arc::new(ConsumerRunner::new(id, pointer, barrier));

        {
            let mut consumers = self.consumers.lock();
            // Re-check under the lock: shutdown snapshots the registry after
            // clearing the flag, so a runner inserted here is always awaited.
            if !self.is_accepting() {
                drop(consumers);
                self.rollback(&runner);
                return Err(RingError::ShutDown);
            }
            consumers.insert(id, runner.clone());
        }

        let task = {
            let inner = Arc::clone(self);
            let runner = runner.clone();
            Box::new(move || consumer::run(inner, runner, consumer, retries_on_timeout))
        };
        if let Err(e) = self.executor.execute(format!("{}-{}", self.name, id), task) {
            trace_error!(ring = %self.name, consumer = %id, error = %e, "failed to start consumer");
            self.rollback(&runner);
            return Err(e);
        }

        trace_debug!(ring = %self.name, consumer = %id, retries_on_timeout, "consumer added");
        Ok(id)
    }

    fn rollback(&self, runner: &Arc<ConsumerRunner>) {
        self.cursor.ignore(&runner.pointer);
        self.disconnect(runner);
    }

    /// Called by a runner on its way out, after it stopped bounding the cursor.
    pub(crate) fn disconnect(&self, runner: &Arc<ConsumerRunner>) {
        if let Some(gc) = &self.gc {
            gc.ignore(&runner.pointer);
        }
        let last_out = {
            let mut consumers = self.consumers.lock();
            consumers.remove(&runner.id);
            consumers.is_empty() && !self.is_accepting()
        };
        if last_out {
            self.finish_gc();
        }
    }

    fn finish_gc(&self) {
        if let Some(gc) = &self.gc {
            gc.finish();
        }
    }

    fn remove(&self, id: ConsumerId) -> bool {
        let runner = self.consumers.lock().get(&id).cloned();
        match runner {
            Some(runner) => {
                runner.close();
                true
            }
            None => false,
        }
    }

    fn snapshot(&self) -> Vec<Arc<ConsumerRunner>> {
        self.consumers.lock().values().cloned().collect()
    }

    fn shutdown(&self, block: bool) {
        if self.accepting.swap(false, Ordering::AcqRel) {
            trace_debug!(ring = %self.name, position = self.cursor.current(), "shutting down");
        }
        self.cursor.complete();

        let runners = {
            let consumers = self.consumers.lock();
            if consumers.is_empty() {
                // Nobody left to disconnect; the GC task drains on its own
                self.finish_gc();
            }
            consumers.values().cloned().collect::<Vec<_>>()
        };

        if block {
            self.await_tasks(&runners);
            trace_debug!(ring = %self.name, "shutdown complete");
        }
    }

    fn shutdown_now(&self) {
        if self.accepting.swap(false, Ordering::AcqRel) {
            trace_debug!(ring = %self.name, position = self.cursor.current(), "shutting down now");
        }
        self.cursor.complete();
        if let Some(gc) = &self.gc {
            gc.close();
        }

        let runners = self.snapshot();
        for runner in &runners {
            runner.request_stop();
        }
        self.await_tasks(&runners);
        trace_debug!(ring = %self.name, "shutdown complete");
    }

    /// Wait for `runners` and the GC task. Called from a consumer's own task,
    /// it skips that consumer (and the GC task, which waits for it).
    fn await_tasks(&self, runners: &[Arc<ConsumerRunner>]) {
        let mut on_consumer_thread = false;
        for runner in runners {
            if runner.is_current_thread() {
                on_consumer_thread = true;
                continue;
            }
            runner.wait_for_completion();
        }
        if !on_consumer_thread {
            if let Some(gc) = &self.gc {
                gc.wait_for_completion();
            }
        }
    }

    fn await_termination(&self, timeout: Duration) -> bool {
        if self.is_accepting() {
            return false;
        }
        let deadline = Instant::now() + timeout;
        for runner in self.snapshot() {
            if !runner.wait_timeout(deadline.saturating_duration_since(Instant::now())) {
                return false;
            }
        }
        match &self.gc {
            Some(gc) => gc.wait_timeout(deadline.saturating_duration_since(Instant::now())),
            None => true,
        }
    }

    fn state(&self) -> BufferState {
        if self.is_accepting() {
            return BufferState::Active;
        }
        let consumers_done = self.consumers.lock().is_empty();
        let gc_done = self.gc.as_ref().map_or(true, |gc| gc.is_stopped());
        if consumers_done && gc_done {
            BufferState::Terminated
        } else {
            BufferState::Draining
        }
    }

    fn consumer_count(&self) -> usize {
        self.consumers.lock().len()
    }
}

// ============================================================================
// RingHandle<T> - shared control surface
// ============================================================================

/// Cloneable handle to a ring buffer for everything except producing.
pub struct RingHandle<T: Send + Sync + 'static> {
    inner: Arc<Inner<T>>,
}

impl<T: Send + Sync + 'static> Clone for RingHandle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + Sync + 'static> RingHandle<T> {
    /// Register `consumer` and start it on the buffer's executor, retrying
    /// timed-out waits as configured for the buffer.
    ///
    /// The consumer sees every entry published after this call returns.
    /// Fails with `RingError::ShutDown` once the buffer is shutting down.
    pub fn add_consumer<C: Consumer<T>>(&self, consumer: C) -> Result<ConsumerId> {
        self.inner
            .add_consumer(Box::new(consumer), self.inner.retries_on_timeout)
    }

    /// Like [`add_consumer`](Self::add_consumer), giving up after
    /// `retries_on_timeout` consecutive timed-out waits.
    pub fn add_consumer_with_retries<C: Consumer<T>>(
        &self,
        consumer: C,
        retries_on_timeout: u32,
    ) -> Result<ConsumerId> {
        self.inner.add_consumer(Box::new(consumer), retries_on_timeout)
    }

    /// Stop a consumer and block until its `close` hook has run.
    ///
    /// Returns `false` if it was not registered (it may already have finished).
    pub fn remove(&self, id: ConsumerId) -> bool {
        self.inner.remove(id)
    }

    /// Stop accepting entries and let consumers drain what was published.
    /// With `block`, returns once every consumer and the GC task exited.
    pub fn shutdown(&self, block: bool) {
        self.inner.shutdown(block)
    }

    /// Stop accepting entries and stop consumers after the entry in hand.
    /// Always blocks until they exited.
    pub fn shutdown_now(&self) {
        self.inner.shutdown_now()
    }

    /// Wait for consumers and the GC task after a shutdown. Returns `false`
    /// on timeout, or immediately if the buffer was never shut down.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        self.inner.await_termination(timeout)
    }

    pub fn state(&self) -> BufferState {
        self.inner.state()
    }

    pub fn has_consumers(&self) -> bool {
        self.inner.consumer_count() > 0
    }

    pub fn consumer_count(&self) -> usize {
        self.inner.consumer_count()
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn buffer_size(&self) -> usize {
        self.inner.slots.size
    }

    /// Last published position.
    pub fn current(&self) -> Position {
        self.inner.cursor.current()
    }
}

// ============================================================================
// RingBuffer<T> - producer side
// ============================================================================

/// Single-producer broadcast ring buffer. Build one with
/// [`RingBufferBuilder`](crate::ring::RingBufferBuilder).
///
/// Dropping the buffer shuts it down without blocking; consumers still drain
/// what was published.
pub struct RingBuffer<T: Send + Sync + 'static> {
    handle: RingHandle<T>,
}

impl<T: Send + Sync + 'static> RingBuffer<T> {
    pub(crate) fn from_inner(inner: Arc<Inner<T>>) -> Self {
        Self {
            handle: RingHandle { inner },
        }
    }

    /// Add an entry, blocking while the ring is full.
    ///
    /// Returns `false` once the buffer is shutting down: stop producing.
    pub fn add(&mut self, entry: T) -> bool {
        self.handle.inner.add(entry)
    }

    /// Add entries as one contiguous batch, published together.
    ///
    /// `Ok(false)` once the buffer is shutting down. An empty batch or one
    /// larger than the ring is rejected without blocking.
    pub fn add_batch(&mut self, entries: Vec<T>) -> Result<bool> {
        self.handle.inner.add_batch(entries)
    }

    /// Handle for other threads.
    pub fn handle(&self) -> RingHandle<T> {
        self.handle.clone()
    }

    pub fn add_consumer<C: Consumer<T>>(&self, consumer: C) -> Result<ConsumerId> {
        self.handle.add_consumer(consumer)
    }

    pub fn add_consumer_with_retries<C: Consumer<T>>(
        &self,
        consumer: C,
        retries_on_timeout: u32,
    ) -> Result<ConsumerId> {
        self.handle.add_consumer_with_retries(consumer, retries_on_timeout)
    }

    pub fn remove(&self, id: ConsumerId) -> bool {
        self.handle.remove(id)
    }

    pub fn shutdown(&self, block: bool) {
        self.handle.shutdown(block)
    }

    pub fn shutdown_now(&self) {
        self.handle.shutdown_now()
    }

    pub fn await_termination(&self, timeout: Duration) -> bool {
        self.handle.await_termination(timeout)
    }

    pub fn state(&self) -> BufferState {
        self.handle.state()
    }

    pub fn has_consumers(&self) -> bool {
        self.handle.has_consumers()
    }

    pub fn consumer_count(&self) -> usize {
        self.handle.consumer_count()
    }

    pub fn name(&self) -> &str {
        self.handle.name()
    }

    pub fn buffer_size(&self) -> usize {
        self.handle.buffer_size()
    }

    pub fn current(&self) -> Position {
        self.handle.current()
    }
}

impl<T: Send + Sync + 'static> Drop for RingBuffer<T> {
    fn drop(&mut self) {
        self.handle.inner.shutdown(false);
    }
}
