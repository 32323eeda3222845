//! Positions in the unbounded sequence space.
//!
//! A `Pointer` is owned by exactly one mutator (the producer's published
//! position, one consumer, or the GC task) and read by everyone else. A
//! `TrailingPointer` derives its value from a dynamic set of other pointers.

use crate::ring::{Position, NO_POSITION};
use arc_swap::ArcSwap;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Anything that can report a position to a wait strategy.
pub trait PositionSource: Send + Sync {
    fn get(&self) -> Position;
}

// ============================================================================
// Pointer - cache-line padded atomic position
// ============================================================================

/// Atomic holder of a position.
///
/// `set` publishes with Release and `get` observes with Acquire, so whatever
/// the owner wrote before moving its pointer is visible to any thread that
/// reads the new value.
#[repr(align(128))]
pub struct Pointer {
    value: AtomicI64,
}

impl Pointer {
    pub fn new(initial: Position) -> Self {
        Self {
            value: AtomicI64::new(initial),
        }
    }

    #[inline]
    pub fn get(&self) -> Position {
        self.value.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set(&self, position: Position) {
        self.value.store(position, Ordering::Release);
    }

    /// Increment by one and return the new value.
    #[inline]
    pub fn increment_and_get(&self) -> Position {
        self.value.fetch_add(1, Ordering::AcqRel) + 1
    }
}

impl Default for Pointer {
    fn default() -> Self {
        Self::new(NO_POSITION)
    }
}

impl fmt::Debug for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Pointer").field(&self.get()).finish()
    }
}

impl PositionSource for Pointer {
    #[inline]
    fn get(&self) -> Position {
        Pointer::get(self)
    }
}

// ============================================================================
// PointerSet - copy-on-write set of pointers, updated by CAS
// ============================================================================

/// Dynamic set of pointers a producer or trailing pointer must stay behind.
///
/// Readers take a snapshot without locking. Writers build a new vector and
/// swap it in with compare-and-swap, retrying when another writer won.
pub(crate) struct PointerSet {
    pointers: ArcSwap<Vec<Arc<Pointer>>>,
}

impl PointerSet {
    pub(crate) fn new() -> Self {
        Self {
            pointers: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// Append `additions`, initializing each to `anchor`'s value at the moment
    /// of attachment so a joining reader never appears behind.
    pub(crate) fn add(&self, additions: &[Arc<Pointer>], anchor: &Pointer) {
        if additions.is_empty() {
            return;
        }
        loop {
            let current = self.pointers.load_full();
            let mut updated = Vec::with_capacity(current.len() + additions.len());
            updated.extend(current.iter().cloned());
            for pointer in additions {
                pointer.set(anchor.get());
                updated.push(Arc::clone(pointer));
            }
            let prev = self.pointers.compare_and_swap(&current, Arc::new(updated));
            if Arc::ptr_eq(&*prev, &current) {
                // Re-anchor once visible: anyone who missed the new members
                // read `anchor` no later than this.
                let position = anchor.get();
                for pointer in additions {
                    pointer.set(position);
                }
                return;
            }
        }
    }

    /// Remove one instance of `pointer` (by identity). Returns whether it was present.
    pub(crate) fn remove(&self, pointer: &Arc<Pointer>) -> bool {
        loop {
            let current = self.pointers.load_full();
            let Some(idx) = current.iter().position(|p| Arc::ptr_eq(p, pointer)) else {
                return false;
            };
            let mut updated = Vec::with_capacity(current.len() - 1);
            updated.extend(current[..idx].iter().cloned());
            updated.extend(current[idx + 1..].iter().cloned());
            let prev = self.pointers.compare_and_swap(&current, Arc::new(updated));
            if Arc::ptr_eq(&*prev, &current) {
                return true;
            }
        }
    }

    /// Minimum over the current snapshot, or `None` when the set is empty.
    #[inline]
    pub(crate) fn minimum(&self) -> Option<Position> {
        self.pointers.load().iter().map(|p| p.get()).min()
    }

    pub(crate) fn len(&self) -> usize {
        self.pointers.load().len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pointers.load().is_empty()
    }
}

// ============================================================================
// TrailingPointer - one behind the slowest of a set of pointers
// ============================================================================

/// Virtual pointer equal to `min(stay_behinds) - 1`, never below `-1`.
///
/// An empty set yields `-1`.
pub struct TrailingPointer {
    anchor: Arc<Pointer>,
    stay_behinds: PointerSet,
}

impl TrailingPointer {
    /// `anchor` is the published-position pointer new members are initialized from.
    pub fn new(anchor: Arc<Pointer>) -> Self {
        Self {
            anchor,
            stay_behinds: PointerSet::new(),
        }
    }

    #[inline]
    pub fn get(&self) -> Position {
        match self.stay_behinds.minimum() {
            Some(min) => (min - 1).max(NO_POSITION),
            None => NO_POSITION,
        }
    }

    /// Track `pointers`. Each is moved to the anchor's position, so add a
    /// reader's pointer before the reader starts.
    pub fn stay_behind(&self, pointers: &[Arc<Pointer>]) {
        self.stay_behinds.add(pointers, &self.anchor);
    }

    pub fn ignore(&self, pointer: &Arc<Pointer>) -> bool {
        self.stay_behinds.remove(pointer)
    }

    pub fn is_empty(&self) -> bool {
        self.stay_behinds.is_empty()
    }

    pub fn len(&self) -> usize {
        self.stay_behinds.len()
    }
}

impl PositionSource for TrailingPointer {
    #[inline]
    fn get(&self) -> Position {
        TrailingPointer::get(self)
    }
}

impl fmt::Debug for TrailingPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrailingPointer")
            .field("value", &self.get())
            .field("stay_behinds", &self.len())
            .finish()
    }
}
