//! Wall-clock source shared by every time-based decision

use crate::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;

/// Source of the current time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// `from` plus `minutes`, or `Error::Command` when the result is not representable
pub fn minutes_after(from: DateTime<Utc>, minutes: u64) -> Result<DateTime<Utc>> {
    i64::try_from(minutes)
        .ok()
        .and_then(Duration::try_minutes)
        .and_then(|offset| from.checked_add_signed(offset))
        .ok_or_else(|| Error::Command(format!("duration of {} minutes out of range", minutes)))
}

/// Clock backed by the system time
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for simulating elapsed time
#[derive(Debug)]
pub struct ManualClock {
    now: RwLock<DateTime<Utc>>,
}

impl ManualClock {
    /// Create a clock frozen at `start`
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(start),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        *self.now.write() += by;
    }

    /// Jump to an absolute instant
    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.write() = to;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::default();
        let start = clock.now();
        clock.advance(Duration::milliseconds(1500));
        assert_eq!(clock.now() - start, Duration::milliseconds(1500));
    }

    #[test]
    fn test_minutes_after_rejects_overflow() {
        let now = Utc::now();
        assert_eq!(minutes_after(now, 90).unwrap(), now + Duration::minutes(90));
        assert!(minutes_after(now, u64::MAX).is_err());
        assert!(minutes_after(now, 100_000_000_000_000_000).is_err());
        assert!(minutes_after(now, i64::MAX as u64 / 60_000).is_err());
    }
}
