//! Ringcast - single-producer, multi-consumer broadcast ring buffer
//!
//! One producer publishes entries; every registered consumer sees every entry
//! in publish order, each on its own thread and at its own pace. The producer
//! never laps the slowest consumer.
//!
//! ```rust,ignore
//! use ringcast::{consumer_fn, RingBufferBuilder, ThreadExecutor};
//!
//! let mut ring = RingBufferBuilder::new(ThreadExecutor::new()).size(1024).build()?;
//! ring.add_consumer(consumer_fn(|entry: &u64, _pos, _max| {
//!     println!("{entry}");
//!     true
//! }))?;
//! if !ring.add(42) {
//!     // shutting down
//! }
//! ring.shutdown(true);
//! ```

// Tracing macros - no-op when feature disabled
#[cfg(feature = "tracing")]
macro_rules! trace_debug { ($($arg:tt)*) => { tracing::debug!($($arg)*) } }
#[cfg(not(feature = "tracing"))]
macro_rules! trace_debug { ($($arg:tt)*) => {} }

#[cfg(feature = "tracing")]
macro_rules! trace_warn { ($($arg:tt)*) => { tracing::warn!($($arg)*) } }
#[cfg(not(feature = "tracing"))]
macro_rules! trace_warn { ($($arg:tt)*) => {} }

#[cfg(feature = "tracing")]
macro_rules! trace_error { ($($arg:tt)*) => { tracing::error!($($arg)*) } }
#[cfg(not(feature = "tracing"))]
macro_rules! trace_error { ($($arg:tt)*) => {} }

pub mod error;
pub mod executor;
pub mod ring;

// Re-export main components
pub use error::{ConsumeError, Result, RingError, WaitError};
pub use executor::{Executor, FnExecutor, Task, ThreadExecutor};
pub use ring::{
    consumer_fn, Alertable, BlockingWaitStrategy, BufferState, BusySpinWaitStrategy, Collectable,
    ConsumeResult, Consumer, ConsumerId, Cursor, FnConsumer, GarbageCollectingConsumer, Pointer,
    PointerBarrier, Position, PositionSource, RingBuffer, RingBufferBuilder, RingBufferConfig,
    RingHandle, SingleProducerCursor, TimeoutBlockingWaitStrategy, TrailingPointer, WaitStrategy,
    NO_POSITION,
};
