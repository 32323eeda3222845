//! Delivery verification: payload integrity and position ordering.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Mutex;

/// Deterministic payload for a position, so a reader can tell whether a slot
/// still holds what the producer wrote.
pub fn payload(position: i64, len: usize) -> Vec<u8> {
    let seed = (position as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15);
    (0..len)
        .map(|i| (seed.rotate_left((i % 64) as u32) as u8) ^ (i as u8))
        .collect()
}

/// Verifies payload contents per position.
pub struct DataVerifier {
    /// Expected hash per position
    expected: Mutex<HashMap<i64, u64>>,
    verified: Mutex<HashSet<i64>>,
    mismatches: AtomicU64,
    duplicates: AtomicU64,
}

impl Default for DataVerifier {
    fn default() -> Self {
        Self::new()
    }
}

impl DataVerifier {
    pub fn new() -> Self {
        Self {
            expected: Mutex::new(HashMap::new()),
            verified: Mutex::new(HashSet::new()),
            mismatches: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
        }
    }

    /// Register what was written at `position`
    pub fn expect(&self, position: i64, data: &[u8]) {
        self.expected
            .lock()
            .unwrap()
            .insert(position, fnv1a(data));
    }

    /// Check what a consumer read at `position`
    pub fn verify(&self, position: i64, data: &[u8]) -> VerifyResult {
        if !self.verified.lock().unwrap().insert(position) {
            self.duplicates.fetch_add(1, Ordering::Relaxed);
            return VerifyResult::Duplicate;
        }

        let Some(&expected) = self.expected.lock().unwrap().get(&position) else {
            return VerifyResult::Unexpected;
        };
        let actual = fnv1a(data);
        if actual != expected {
            self.mismatches.fetch_add(1, Ordering::Relaxed);
            return VerifyResult::Mismatch {
                position,
                expected,
                actual,
            };
        }
        VerifyResult::Ok
    }

    pub fn stats(&self) -> VerifyStats {
        VerifyStats {
            verified_count: self.verified.lock().unwrap().len() as u64,
            expected_count: self.expected.lock().unwrap().len() as u64,
            mismatches: self.mismatches.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
        }
    }

    pub fn has_errors(&self) -> bool {
        self.mismatches.load(Ordering::Relaxed) > 0 || self.duplicates.load(Ordering::Relaxed) > 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyResult {
    Ok,
    Mismatch {
        position: i64,
        expected: u64,
        actual: u64,
    },
    Duplicate,
    /// Nothing was registered for this position
    Unexpected,
}

#[derive(Debug, Clone)]
pub struct VerifyStats {
    pub verified_count: u64,
    pub expected_count: u64,
    pub mismatches: u64,
    pub duplicates: u64,
}

impl VerifyStats {
    pub fn delivery_rate(&self) -> f64 {
        if self.expected_count > 0 {
            (self.verified_count as f64) / (self.expected_count as f64)
        } else {
            1.0
        }
    }
}

fn fnv1a(data: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for &byte in data {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// Checks that positions arrive contiguous and in order.
///
/// One checker per consumer; `check` is called from that consumer's thread
/// only, the stats from anywhere.
pub struct SequenceChecker {
    next_expected: AtomicI64,
    gaps: Mutex<Vec<(i64, i64)>>,
    total_seen: AtomicU64,
    out_of_order: AtomicU64,
}

impl Default for SequenceChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl SequenceChecker {
    pub fn new() -> Self {
        Self::with_start(0)
    }

    pub fn with_start(start: i64) -> Self {
        Self {
            next_expected: AtomicI64::new(start),
            gaps: Mutex::new(Vec::new()),
            total_seen: AtomicU64::new(0),
            out_of_order: AtomicU64::new(0),
        }
    }

    pub fn check(&self, position: i64) -> SequenceStatus {
        self.total_seen.fetch_add(1, Ordering::Relaxed);
        let expected = self.next_expected.load(Ordering::Relaxed);

        if position == expected {
            self.next_expected.store(position + 1, Ordering::Relaxed);
            SequenceStatus::InOrder
        } else if position < expected {
            self.out_of_order.fetch_add(1, Ordering::Relaxed);
            SequenceStatus::OutOfOrder
        } else {
            let gap = (expected, position - 1);
            self.gaps.lock().unwrap().push(gap);
            self.next_expected.store(position + 1, Ordering::Relaxed);
            SequenceStatus::Gap {
                start: gap.0,
                end: gap.1,
            }
        }
    }

    /// Next position this checker expects; equals the count seen when started at 0.
    pub fn next_expected(&self) -> i64 {
        self.next_expected.load(Ordering::Relaxed)
    }

    pub fn gaps(&self) -> Vec<(i64, i64)> {
        self.gaps.lock().unwrap().clone()
    }

    pub fn stats(&self) -> SequenceStats {
        let gaps = self.gaps.lock().unwrap();
        SequenceStats {
            total_seen: self.total_seen.load(Ordering::Relaxed),
            gap_count: gaps.len() as u64,
            total_missing: gaps.iter().map(|(s, e)| (e - s + 1) as u64).sum(),
            out_of_order: self.out_of_order.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequenceStatus {
    InOrder,
    OutOfOrder,
    Gap { start: i64, end: i64 },
}

#[derive(Debug, Clone)]
pub struct SequenceStats {
    pub total_seen: u64,
    pub gap_count: u64,
    pub total_missing: u64,
    pub out_of_order: u64,
}

impl SequenceStats {
    pub fn is_perfect(&self) -> bool {
        self.gap_count == 0 && self.out_of_order == 0
    }
}
