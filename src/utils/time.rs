//! Time and timestamp utilities

use std::time::SystemTime;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use parking_lot::Mutex;

/// Source of "now" for entry timestamps and retention cutoffs
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to. Useful for back-dating entries.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Instant `days` whole days before `now`
pub fn days_before(now: DateTime<Utc>, days: u32) -> DateTime<Utc> {
    now - Duration::days(i64::from(days))
}

/// Suffix used for rotated partition names, e.g. `20240101T120000123`
pub fn rotation_stamp(now: DateTime<Utc>) -> String {
    now.format("%Y%m%dT%H%M%S%3f").to_string()
}

pub fn to_system_time(ts: DateTime<Utc>) -> SystemTime {
    SystemTime::from(ts)
}

pub fn from_system_time(ts: SystemTime) -> DateTime<Utc> {
    DateTime::<Utc>::from(ts)
}

/// Parse a CLI/user supplied instant
///
/// Accepts RFC 3339 (`2024-01-01T10:00:00Z`) or a bare date. A bare date
/// means the start of that day, or its last second when `end_of_day` is set.
pub fn parse_instant(input: &str, end_of_day: bool) -> Option<DateTime<Utc>> {
    let input = input.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(input) {
        return Some(ts.with_timezone(&Utc));
    }

    let date = NaiveDate::parse_from_str(input, "%Y-%m-%d").ok()?;
    let time = if end_of_day {
        date.and_hms_opt(23, 59, 59)?
    } else {
        date.and_hms_opt(0, 0, 0)?
    };
    Some(Utc.from_utc_datetime(&time))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        assert_eq!(clock.now(), start);

        clock.advance(Duration::hours(25));
        assert_eq!(clock.now().date_naive(), NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
    }

    #[test]
    fn test_days_before() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        assert_eq!(
            days_before(now, 30),
            Utc.with_ymd_and_hms(2024, 1, 31, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_rotation_stamp() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 9, 5, 7).unwrap();
        assert_eq!(rotation_stamp(ts), "20240101T090507000");
    }

    #[test]
    fn test_parse_instant() {
        assert_eq!(
            parse_instant("2024-01-01", false),
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(
            parse_instant("2024-01-01", true),
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 23, 59, 59).unwrap())
        );
        assert_eq!(
            parse_instant("2024-01-01T10:00:00+02:00", false),
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap())
        );
        assert_eq!(parse_instant("yesterday", false), None);
    }

    #[test]
    fn test_system_time_round_trip() {
        let ts = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        assert_eq!(from_system_time(to_system_time(ts)), ts);
    }
}
