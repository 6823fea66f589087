#![forbid(unsafe_code)]

use chrono::{DateTime, Duration, Utc};
use std::sync::RwLock;

/// All deadline math in the engine routes through this trait so tests can
/// drive time deterministically.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually-advanced clock for tests.
pub struct ManualClock {
    current: RwLock<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            current: RwLock::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut current = self.current.write().expect("lock poisoned");
        *current = *current + by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        let mut current = self.current.write().expect("lock poisoned");
        *current = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current.read().expect("lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advance() {
        let clock = ManualClock::new(Utc::now());
        let before = clock.now();
        clock.advance(Duration::hours(3));
        assert_eq!(clock.now() - before, Duration::hours(3));
    }
}
