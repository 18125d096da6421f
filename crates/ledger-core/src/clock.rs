//! Clock and id-generation abstractions.
//!
//! Live trading and backtesting share the same services; the difference is
//! injected here. Nothing on the simulation hot path reads wall time or
//! draws random ids, which is what makes two backtest runs bit-identical.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use uuid::Uuid;

/// Source of "now" for every timestamp the services write.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time, for live trading.
#[derive(Debug, Default)]
pub struct WallClock;

impl Clock for WallClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock advanced explicitly by the backtest engine.
#[derive(Debug)]
pub struct SimulatedClock {
    now: RwLock<DateTime<Utc>>,
}

impl SimulatedClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(start),
        }
    }

    /// Advance (or rewind) the simulated time.
    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.write().expect("clock lock poisoned") = now;
    }
}

impl Clock for SimulatedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read().expect("clock lock poisoned")
    }
}

/// Source of entity ids.
pub trait IdGenerator: Send + Sync {
    fn next(&self) -> Uuid;
}

/// Random v4 ids for live trading. The order service re-draws on the
/// (astronomically unlikely) collision with an existing id.
#[derive(Debug, Default)]
pub struct RandomIds;

impl IdGenerator for RandomIds {
    fn next(&self) -> Uuid {
        Uuid::new_v4()
    }
}

/// Deterministic counter-derived ids for backtesting.
#[derive(Debug)]
pub struct SequentialIds {
    counter: AtomicU64,
}

impl SequentialIds {
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// Start the counter above `offset`. Lets resumed simulations use a
    /// disjoint id range from the runs they were seeded with.
    pub fn starting_at(offset: u64) -> Self {
        Self {
            counter: AtomicU64::new(offset + 1),
        }
    }
}

impl Default for SequentialIds {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator for SequentialIds {
    fn next(&self) -> Uuid {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        Uuid::from_u128(n as u128)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_simulated_clock_advances_only_when_set() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = SimulatedClock::new(start);
        assert_eq!(clock.now(), start);

        let later = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        clock.set(later);
        assert_eq!(clock.now(), later);
    }

    #[test]
    fn test_sequential_ids_are_deterministic() {
        let a = SequentialIds::new();
        let b = SequentialIds::new();
        for _ in 0..5 {
            assert_eq!(a.next(), b.next());
        }
    }

    #[test]
    fn test_random_ids_are_distinct() {
        let ids = RandomIds;
        assert_ne!(ids.next(), ids.next());
    }
}
