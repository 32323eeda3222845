//! Builder wiring config, cursor, slots and the GC task into a `RingBuffer`.

use crate::error::Result;
use crate::executor::Executor;
use crate::ring::buffer::{Inner, RingBuffer, Slots};
use crate::ring::cursor::{Cursor, SingleProducerCursor};
use crate::ring::gc::GarbageCollectingConsumer;
use crate::ring::wait::{BlockingWaitStrategy, WaitStrategy};
use crate::ring::{Position, RingBufferConfig};
use std::sync::Arc;

/// Assembles a [`RingBuffer`] from a config, a wait strategy and an executor.
///
/// ```rust,ignore
/// let ring = RingBufferBuilder::new(ThreadExecutor::new())
///     .size(256)
///     .named("events")
///     .garbage_collect(true)
///     .build::<Event>()?;
/// ```
pub struct RingBufferBuilder {
    config: RingBufferConfig,
    executor: Arc<dyn Executor>,
    wait_strategy: Option<Arc<dyn WaitStrategy>>,
}

impl RingBufferBuilder {
    pub fn new(executor: impl Executor) -> Self {
        Self::with_executor(Arc::new(executor))
    }

    /// Share one executor between several buffers.
    pub fn with_executor(executor: Arc<dyn Executor>) -> Self {
        Self {
            config: RingBufferConfig::default(),
            executor,
            wait_strategy: None,
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: RingBufferConfig) -> Self {
        self.config = config;
        self
    }

    /// Number of slots; must be a power of two. Checked by `build`.
    pub fn size(mut self, size: usize) -> Self {
        self.config.size = size;
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Defaults to [`BlockingWaitStrategy`].
    pub fn wait_strategy(mut self, strategy: impl WaitStrategy) -> Self {
        self.wait_strategy = Some(Arc::new(strategy));
        self
    }

    /// Drop each entry once every consumer has passed it, instead of when
    /// its slot is reused.
    pub fn garbage_collect(mut self, enabled: bool) -> Self {
        self.config.garbage_collect = enabled;
        self
    }

    /// Timeout retries for consumers added without an explicit budget.
    pub fn retries_on_timeout(mut self, retries: u32) -> Self {
        self.config.retries_on_timeout = retries;
        self
    }

    pub fn build<T: Send + Sync + 'static>(self) -> Result<RingBuffer<T>> {
        self.config.validate()?;
        let RingBufferConfig {
            name,
            size,
            garbage_collect,
            retries_on_timeout,
        } = self.config;

        let wait_strategy = self
            .wait_strategy
            .unwrap_or_else(|| Arc::new(BlockingWaitStrategy::new()));
        let cursor: Arc<dyn Cursor> = Arc::new(SingleProducerCursor::new(size, wait_strategy)?);
        let slots = Arc::new(Slots::<T>::new(size));

        let gc = garbage_collect.then(|| {
            let slots = Arc::clone(&slots);
            let published = Arc::clone(&cursor);
            GarbageCollectingConsumer::new(Arc::clone(&cursor), move |position: Position| {
                // Safety: the GC task only reaches positions every consumer passed,
                // and its pointer keeps the producer off the slot.
                unsafe { slots.clear(position, published.current()) }
            })
        });

        let inner = Arc::new(Inner::new(
            name,
            slots,
            cursor,
            self.executor,
            gc,
            retries_on_timeout,
        ));
        inner.start_gc()?;
        trace_debug!(ring = %inner.name, size, garbage_collect, "ring buffer created");
        Ok(RingBuffer::from_inner(inner))
    }
}
