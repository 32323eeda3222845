//! Wait strategies: how a reader blocks until a position is available.
//!
//! Contract for `wait_for(position, cursor, dependent, barrier)`:
//! - returns `Ok(available)` with `available >= position` once `dependent`
//!   has reached `position`;
//! - returns `Ok(available)` with `available < position` promptly after the
//!   barrier is alerted (closed or cursor complete);
//! - may return `Err(WaitError::Timeout)` if the strategy bounds its waits.
//!
//! `cursor` is the producer's published position. `dependent` is what the
//! caller actually trails: the cursor itself for consumers, the slowest
//! consumer for the GC task.

use crate::error::WaitError;
use crate::ring::pointer::{Pointer, PositionSource};
use crate::ring::Position;
use crossbeam_utils::Backoff;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{fence, AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Park interval once the dependent-phase backoff is exhausted.
const DEPENDENT_PARK: Duration = Duration::from_micros(50);

/// Something that can tell a waiting thread to give up.
pub trait Alertable {
    fn is_alerted(&self) -> bool;
}

impl Alertable for AtomicBool {
    fn is_alerted(&self) -> bool {
        self.load(Ordering::Acquire)
    }
}

/// Pluggable blocking policy.
pub trait WaitStrategy: Send + Sync + 'static {
    fn wait_for(
        &self,
        position: Position,
        cursor: &Pointer,
        dependent: &dyn PositionSource,
        barrier: &dyn Alertable,
    ) -> Result<Position, WaitError>;

    /// Wake every thread parked in `wait_for`. Called on publish, completion and close.
    fn signal_all_when_blocking(&self);
}

/// Spin, then yield, then park briefly until `dependent` reaches `position`.
fn wait_for_dependent(
    position: Position,
    dependent: &dyn PositionSource,
    barrier: &dyn Alertable,
    deadline: Option<Instant>,
) -> Result<Position, WaitError> {
    let backoff = Backoff::new();
    loop {
        let available = dependent.get();
        if available >= position || barrier.is_alerted() {
            return Ok(available);
        }
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                return Err(WaitError::Timeout);
            }
        }
        if backoff.is_completed() {
            thread::park_timeout(DEPENDENT_PARK);
        } else {
            backoff.snooze();
        }
    }
}

// ============================================================================
// BlockingWaitStrategy - mutex + condvar
// ============================================================================

/// Parks waiters on a condition variable; every publish wakes them all.
///
/// Publishers only take the lock when someone is actually parked.
#[derive(Default)]
pub struct BlockingWaitStrategy {
    lock: Mutex<()>,
    blocked: Condvar,
    waiters: AtomicUsize,
}

impl BlockingWaitStrategy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WaitStrategy for BlockingWaitStrategy {
    fn wait_for(
        &self,
        position: Position,
        cursor: &Pointer,
        dependent: &dyn PositionSource,
        barrier: &dyn Alertable,
    ) -> Result<Position, WaitError> {
        if cursor.get() < position {
            let mut guard = self.lock.lock();
            self.waiters.fetch_add(1, Ordering::SeqCst);
            // Pairs with the fence in signal_all_when_blocking: either we see the
            // new cursor value or the signaller sees us registered.
            fence(Ordering::SeqCst);
            let result = loop {
                let available = cursor.get();
                if available >= position {
                    break None;
                }
                if barrier.is_alerted() {
                    break Some(available);
                }
                self.blocked.wait(&mut guard);
            };
            self.waiters.fetch_sub(1, Ordering::SeqCst);
            drop(guard);
            if let Some(available) = result {
                return Ok(available);
            }
        }
        wait_for_dependent(position, dependent, barrier, None)
    }

    fn signal_all_when_blocking(&self) {
        fence(Ordering::SeqCst);
        if self.waiters.load(Ordering::SeqCst) > 0 {
            let _guard = self.lock.lock();
            self.blocked.notify_all();
        }
    }
}

// ============================================================================
// TimeoutBlockingWaitStrategy - condvar with a deadline
// ============================================================================

/// Like `BlockingWaitStrategy`, but gives up with `WaitError::Timeout`.
pub struct TimeoutBlockingWaitStrategy {
    timeout: Duration,
    lock: Mutex<()>,
    blocked: Condvar,
    waiters: AtomicUsize,
}

impl TimeoutBlockingWaitStrategy {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            lock: Mutex::new(()),
            blocked: Condvar::new(),
            waiters: AtomicUsize::new(0),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl WaitStrategy for TimeoutBlockingWaitStrategy {
    fn wait_for(
        &self,
        position: Position,
        cursor: &Pointer,
        dependent: &dyn PositionSource,
        barrier: &dyn Alertable,
    ) -> Result<Position, WaitError> {
        let deadline = Instant::now() + self.timeout;
        if cursor.get() < position {
            let mut guard = self.lock.lock();
            self.waiters.fetch_add(1, Ordering::SeqCst);
            fence(Ordering::SeqCst);
            let result = loop {
                let available = cursor.get();
                if available >= position {
                    break None;
                }
                if barrier.is_alerted() {
                    break Some(Ok(available));
                }
                if self.blocked.wait_until(&mut guard, deadline).timed_out()
                    && cursor.get() < position
                    && !barrier.is_alerted()
                {
                    break Some(Err(WaitError::Timeout));
                }
            };
            self.waiters.fetch_sub(1, Ordering::SeqCst);
            drop(guard);
            if let Some(result) = result {
                return result;
            }
        }
        wait_for_dependent(position, dependent, barrier, Some(deadline))
    }

    fn signal_all_when_blocking(&self) {
        fence(Ordering::SeqCst);
        if self.waiters.load(Ordering::SeqCst) > 0 {
            let _guard = self.lock.lock();
            self.blocked.notify_all();
        }
    }
}

// ============================================================================
// BusySpinWaitStrategy - never parks on a lock
// ============================================================================

/// Spins (then yields) on the dependent position. Lowest latency, burns a core.
#[derive(Debug, Default, Clone, Copy)]
pub struct BusySpinWaitStrategy;

impl BusySpinWaitStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl WaitStrategy for BusySpinWaitStrategy {
    fn wait_for(
        &self,
        position: Position,
        _cursor: &Pointer,
        dependent: &dyn PositionSource,
        barrier: &dyn Alertable,
    ) -> Result<Position, WaitError> {
        let backoff = Backoff::new();
        loop {
            let available = dependent.get();
            if available >= position || barrier.is_alerted() {
                return Ok(available);
            }
            backoff.snooze();
        }
    }

    fn signal_all_when_blocking(&self) {}
}
