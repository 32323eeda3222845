//! Chaos helpers for consumer tests - random delays and injected failures.
//!
//! Seeded so a failing run can be replayed.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

/// What a chaotic consumer should do with the entry in hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChaosEvent {
    /// Sleep this long, then process normally
    Delay(Duration),
    /// Return an error from `consume`
    Fail,
    /// Panic inside `consume`
    Panic,
    None,
}

/// Decides, per entry, whether to delay or fail.
///
/// # Example
///
/// ```
/// use ringcast_test_support::chaos::{ChaosEvent, ChaosMonkey};
///
/// let mut monkey = ChaosMonkey::seeded(7)
///     .with_delay_probability(0.1)
///     .with_failure_probability(0.01);
///
/// if let ChaosEvent::Fail = monkey.decide() {
///     // return an error from consume
/// }
/// ```
pub struct ChaosMonkey {
    delay_probability: f64,
    delay_min_us: u64,
    delay_max_us: u64,
    failure_probability: f64,
    panic_probability: f64,
    rng: StdRng,
    events_triggered: usize,
}

impl Default for ChaosMonkey {
    fn default() -> Self {
        Self::new()
    }
}

impl ChaosMonkey {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            delay_probability: 0.0,
            delay_min_us: 10,
            delay_max_us: 1_000,
            failure_probability: 0.0,
            panic_probability: 0.0,
            rng,
            events_triggered: 0,
        }
    }

    /// Slow consumer: frequent short delays, no failures
    pub fn slow(seed: u64) -> Self {
        Self::seeded(seed)
            .with_delay_probability(0.2)
            .with_delay_range(50, 500)
    }

    /// Faulty consumer: occasional errors and panics
    pub fn faulty(seed: u64) -> Self {
        Self::seeded(seed)
            .with_failure_probability(0.05)
            .with_panic_probability(0.01)
    }

    pub fn with_delay_probability(mut self, prob: f64) -> Self {
        self.delay_probability = prob.clamp(0.0, 1.0);
        self
    }

    pub fn with_delay_range(mut self, min_us: u64, max_us: u64) -> Self {
        self.delay_min_us = min_us;
        self.delay_max_us = max_us.max(min_us);
        self
    }

    pub fn with_failure_probability(mut self, prob: f64) -> Self {
        self.failure_probability = prob.clamp(0.0, 1.0);
        self
    }

    pub fn with_panic_probability(mut self, prob: f64) -> Self {
        self.panic_probability = prob.clamp(0.0, 1.0);
        self
    }

    /// Maybe sleep. Returns whether it did.
    pub fn maybe_delay(&mut self) -> bool {
        if self.rng.gen::<f64>() < self.delay_probability {
            std::thread::sleep(self.delay());
            self.events_triggered += 1;
            return true;
        }
        false
    }

    fn delay(&mut self) -> Duration {
        Duration::from_micros(self.rng.gen_range(self.delay_min_us..=self.delay_max_us))
    }

    /// Pick at most one event for the next entry.
    pub fn decide(&mut self) -> ChaosEvent {
        let roll = self.rng.gen::<f64>();
        let mut threshold = 0.0;

        threshold += self.panic_probability;
        if roll < threshold {
            self.events_triggered += 1;
            return ChaosEvent::Panic;
        }

        threshold += self.failure_probability;
        if roll < threshold {
            self.events_triggered += 1;
            return ChaosEvent::Fail;
        }

        threshold += self.delay_probability;
        if roll < threshold {
            self.events_triggered += 1;
            return ChaosEvent::Delay(self.delay());
        }

        ChaosEvent::None
    }

    pub fn events_triggered(&self) -> usize {
        self.events_triggered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_chaos_by_default() {
        let mut monkey = ChaosMonkey::seeded(1);
        for _ in 0..1000 {
            assert_eq!(monkey.decide(), ChaosEvent::None);
            assert!(!monkey.maybe_delay());
        }
        assert_eq!(monkey.events_triggered(), 0);
    }

    #[test]
    fn test_always_fail() {
        let mut monkey = ChaosMonkey::seeded(2).with_failure_probability(1.0);
        for _ in 0..10 {
            assert_eq!(monkey.decide(), ChaosEvent::Fail);
        }
        assert_eq!(monkey.events_triggered(), 10);
    }

    #[test]
    fn test_delay_within_range() {
        let mut monkey = ChaosMonkey::seeded(3)
            .with_delay_probability(1.0)
            .with_delay_range(5, 9);
        for _ in 0..50 {
            match monkey.decide() {
                ChaosEvent::Delay(d) => {
                    assert!(d >= Duration::from_micros(5) && d <= Duration::from_micros(9))
                }
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn test_seeded_is_reproducible() {
        let mut a = ChaosMonkey::faulty(42);
        let mut b = ChaosMonkey::faulty(42);
        for _ in 0..200 {
            assert_eq!(a.decide(), b.decide());
        }
    }

    #[test]
    fn test_probability_clamped() {
        let mut monkey = ChaosMonkey::seeded(4).with_panic_probability(5.0);
        assert_eq!(monkey.decide(), ChaosEvent::Panic);
    }
}
