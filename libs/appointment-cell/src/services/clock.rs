// libs/appointment-cell/src/services/clock.rs
use chrono::{DateTime, Duration, Local, NaiveDateTime, TimeZone, Utc};
use std::sync::Mutex;

/// Source of "now". Appointments are booked in local wall-clock terms, so
/// detection compares against `now()`; audit timestamps use `now_utc()`.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;

    fn now_utc(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }

    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Settable clock for tests and administrative replays.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<NaiveDateTime>,
}

impl FixedClock {
    pub fn new(now: NaiveDateTime) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub fn set(&self, now: NaiveDateTime) {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn now_utc(&self) -> DateTime<Utc> {
        Utc.from_utc_datetime(&self.now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock_advances() {
        let start = NaiveDateTime::parse_from_str("2025-06-01 09:00:00", "%Y-%m-%d %H:%M:%S").unwrap();
        let clock = FixedClock::new(start);

        clock.advance(Duration::minutes(90));
        assert_eq!(clock.now().format("%H:%M").to_string(), "10:30");
        assert_eq!(clock.now_utc().naive_utc(), clock.now());
    }
}
