//! Execution facility for consumer and GC tasks.
//!
//! The ring buffer never owns a thread pool. Callers hand it an `Executor`
//! and every consumer (and the optional GC task) is started through it.

use crate::error::Result;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

/// A unit of work started by the ring buffer. Runs until its loop exits.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs long-lived ring buffer tasks.
///
/// Tasks block for their whole lifetime, so implementations must give each
/// task its own thread (or a pool large enough to hold all of them).
pub trait Executor: Send + Sync + 'static {
    fn execute(&self, name: String, task: Task) -> Result<()>;
}

/// Spawns one named OS thread per task.
#[derive(Debug, Default)]
pub struct ThreadExecutor {
    stack_size: Option<usize>,
    spawned: AtomicU64,
}

impl ThreadExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    /// Number of threads started so far.
    pub fn spawned(&self) -> u64 {
        self.spawned.load(Ordering::Relaxed)
    }
}

impl Executor for ThreadExecutor {
    fn execute(&self, name: String, task: Task) -> Result<()> {
        let mut builder = thread::Builder::new().name(name);
        if let Some(size) = self.stack_size {
            builder = builder.stack_size(size);
        }
        // Detached: completion is tracked by the runner's latch, not the JoinHandle.
        builder.spawn(task)?;
        self.spawned.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Adapts a closure into an `Executor`, e.g. to route tasks to an existing pool.
pub struct FnExecutor<F>(F);

impl<F> FnExecutor<F>
where
    F: Fn(String, Task) -> Result<()> + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> Executor for FnExecutor<F>
where
    F: Fn(String, Task) -> Result<()> + Send + Sync + 'static,
{
    fn execute(&self, name: String, task: Task) -> Result<()> {
        (self.0)(name, task)
    }
}
