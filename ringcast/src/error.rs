//! Error types for ringcast.

use std::any::Any;
use std::error::Error as StdError;
use std::io;

/// Result type for ringcast operations.
pub type Result<T> = std::result::Result<T, RingError>;

/// Ring buffer errors.
#[derive(Debug, thiserror::Error)]
pub enum RingError {
    /// Invalid configuration (size not a power of two, zero size, ...).
    #[error("config error: {0}")]
    Config(String),

    /// Precondition violated by the caller.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The buffer has been shut down and no longer accepts consumers.
    #[error("ring buffer has been shut down")]
    ShutDown,

    /// The executor could not start a task.
    #[error("failed to spawn task: {0}")]
    Spawn(#[from] io::Error),
}

impl RingError {
    pub fn config(msg: impl Into<String>) -> Self {
        RingError::Config(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        RingError::InvalidArgument(msg.into())
    }
}

/// Outcome of a wait that did not produce a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum WaitError {
    #[error("timed out waiting for position")]
    Timeout,
}

/// Failure raised by a consumer while processing one entry.
#[derive(Debug, thiserror::Error)]
pub enum ConsumeError {
    #[error("consumer failed: {0}")]
    Failed(#[source] Box<dyn StdError + Send + Sync>),

    #[error("consumer panicked: {0}")]
    Panicked(String),
}

impl ConsumeError {
    pub fn failed<E>(err: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        ConsumeError::Failed(err.into())
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        ConsumeError::Panicked(panic_message(payload.as_ref()))
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
