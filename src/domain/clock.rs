use chrono::{DateTime, TimeDelta, Utc};
use std::sync::{Mutex, PoisonError};

/// Source of the current time for everything that schedules work.
pub trait Clock: Send + Sync {
    fn utc_now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn utc_now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A settable clock, used by tests and by the simulator to fast-forward
/// through scheduled notifications.
#[derive(Debug)]
pub struct ClockMock {
    now: Mutex<DateTime<Utc>>,
}

impl ClockMock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set_time(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = now;
    }

    pub fn add_delta(&self, delta: TimeDelta) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += delta;
    }
}

impl Clock for ClockMock {
    fn utc_now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_mock_moves_forward() {
        let start = Utc::now();
        let clock = ClockMock::new(start);
        assert_eq!(clock.utc_now(), start);

        clock.add_delta(TimeDelta::minutes(5));
        assert_eq!(clock.utc_now(), start + TimeDelta::minutes(5));

        clock.set_time(start);
        assert_eq!(clock.utc_now(), start);
    }
}
