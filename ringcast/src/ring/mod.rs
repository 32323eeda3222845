//! Broadcast ring buffer (Disruptor pattern, single producer).
//!
//! - `Pointer` / `TrailingPointer` - positions in the unbounded sequence
//! - `WaitStrategy` - how readers block until a position is published
//! - `Cursor` - producer side: claim, publish, stay behind consumers
//! - `PointerBarrier` - per-reader wait handle bound to a cursor
//! - `RingBuffer<T>` - slot storage, consumer lifecycle, shutdown
//! - `GarbageCollectingConsumer` - clears slots once every consumer passed them

mod barrier;
mod buffer;
mod builder;
mod consumer;
mod cursor;
mod gc;
mod latch;
mod pointer;
mod wait;

// Re-exports
pub use barrier::PointerBarrier;
pub use buffer::{BufferState, RingBuffer, RingHandle};
pub use builder::RingBufferBuilder;
pub use consumer::{consumer_fn, ConsumeResult, Consumer, ConsumerId, FnConsumer};
pub use cursor::{Cursor, SingleProducerCursor};
pub use gc::{Collectable, GarbageCollectingConsumer};
pub use pointer::{Pointer, PositionSource, TrailingPointer};
pub use wait::{
    Alertable, BlockingWaitStrategy, BusySpinWaitStrategy, TimeoutBlockingWaitStrategy,
    WaitStrategy,
};

use crate::error::{Result, RingError};

/// Default ring buffer size (must be power of 2)
pub const DEFAULT_RING_BUFFER_SIZE: usize = 1024;

/// Default number of retries a consumer makes after timing out.
pub const DEFAULT_RETRIES_ON_TIMEOUT: u32 = 1;

/// Logical position in the unbounded entry sequence. Slot = `position & mask`.
pub type Position = i64;

/// "No entry" sentinel. Also returned by barriers once no more data will come.
pub const NO_POSITION: Position = -1;

/// Configuration for ring buffer behavior
#[derive(Debug, Clone)]
pub struct RingBufferConfig {
    /// Name used for thread names and log fields
    pub name: String,
    /// Size of the ring buffer (must be power of 2)
    pub size: usize,
    /// Run a background task that clears consumed slots
    pub garbage_collect: bool,
    /// Default timeout retries for consumers added without an explicit budget
    pub retries_on_timeout: u32,
}

impl Default for RingBufferConfig {
    fn default() -> Self {
        Self {
            name: "ring".to_string(),
            size: DEFAULT_RING_BUFFER_SIZE,
            garbage_collect: false,
            retries_on_timeout: DEFAULT_RETRIES_ON_TIMEOUT,
        }
    }
}

impl RingBufferConfig {
    /// Create a new configuration with the specified size
    pub fn new(size: usize) -> Result<Self> {
        validate_size(size)?;
        Ok(Self {
            size,
            ..Default::default()
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_garbage_collection(mut self, enabled: bool) -> Self {
        self.garbage_collect = enabled;
        self
    }

    pub fn with_retries_on_timeout(mut self, retries: u32) -> Self {
        self.retries_on_timeout = retries;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        validate_size(self.size)?;
        // The GC task trails one position behind the slowest consumer and the
        // producer stays behind the GC task, so it needs a spare slot.
        if self.garbage_collect && self.size < 2 {
            return Err(RingError::config(
                "Ring buffer size must be at least 2 with garbage collection",
            ));
        }
        Ok(())
    }
}

pub(crate) fn validate_size(size: usize) -> Result<()> {
    if size == 0 {
        return Err(RingError::config("Ring buffer size must be greater than 0"));
    }
    if !size.is_power_of_two() {
        return Err(RingError::config("Ring buffer size must be power of 2"));
    }
    if size > (i64::MAX as usize) {
        return Err(RingError::config("Ring buffer size overflows position space"));
    }
    Ok(())
}
