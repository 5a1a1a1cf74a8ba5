//! Calendar and clock values.
//!
//! These mirror the usual civil date/time family: naive or offset-aware
//! times, dates, their combination, signed durations and fixed offsets.

use crate::util::datetime::days_in_month;

const SECONDS_PER_DAY: i64 = 86_400;
const MICROS_PER_SECOND: i64 = 1_000_000;

/// A signed duration normalized so that `0 <= seconds < 86400` and
/// `0 <= microseconds < 1_000_000`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TimeDelta {
    days: i64,
    seconds: i64,
    microseconds: i64,
}

impl TimeDelta {
    /// Creates a duration, carrying overflow between the components.
    pub fn new(days: i64, seconds: i64, microseconds: i64) -> Self {
        let carry_s = microseconds.div_euclid(MICROS_PER_SECOND);
        let microseconds = microseconds.rem_euclid(MICROS_PER_SECOND);
        let seconds = seconds + carry_s;
        let carry_d = seconds.div_euclid(SECONDS_PER_DAY);
        let seconds = seconds.rem_euclid(SECONDS_PER_DAY);
        Self {
            days: days + carry_d,
            seconds,
            microseconds,
        }
    }

    pub fn from_seconds(seconds: i64) -> Self {
        Self::new(0, seconds, 0)
    }

    pub fn days(&self) -> i64 {
        self.days
    }

    pub fn seconds(&self) -> i64 {
        self.seconds
    }

    pub fn microseconds(&self) -> i64 {
        self.microseconds
    }

    /// Total length in microseconds.
    pub fn total_microseconds(&self) -> i128 {
        (self.days as i128 * SECONDS_PER_DAY as i128 + self.seconds as i128)
            * MICROS_PER_SECOND as i128
            + self.microseconds as i128
    }
}

/// A fixed UTC offset with an optional display name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TimeZone {
    pub offset: TimeDelta,
    pub name: Option<String>,
}

impl TimeZone {
    /// Creates an offset, which must lie strictly within one day of UTC.
    pub fn new(offset: TimeDelta, name: Option<String>) -> Option<Self> {
        let limit = SECONDS_PER_DAY as i128 * MICROS_PER_SECOND as i128;
        if offset.total_microseconds().abs() >= limit {
            return None;
        }
        Some(Self { offset, name })
    }

    pub fn utc() -> Self {
        Self {
            offset: TimeDelta::default(),
            name: None,
        }
    }
}

/// A proleptic Gregorian calendar date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Date {
    pub year: i32,
    pub month: u8,
    pub day: u8,
}

impl Date {
    /// Creates a date, returning `None` when the day does not exist.
    pub fn new(year: i32, month: u8, day: u8) -> Option<Self> {
        if !(1..=9999).contains(&year) || !(1..=12).contains(&month) {
            return None;
        }
        if day == 0 || day as u32 > days_in_month(year, month as u32) {
            return None;
        }
        Some(Self { year, month, day })
    }
}

/// A time of day, optionally tied to a fixed offset.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Time {
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub microsecond: u32,
    pub tz: Option<TimeZone>,
}

impl Time {
    /// Creates a time, returning `None` when a component is out of range.
    pub fn new(hour: u8, minute: u8, second: u8, microsecond: u32, tz: Option<TimeZone>) -> Option<Self> {
        if hour > 23 || minute > 59 || second > 59 || microsecond > 999_999 {
            return None;
        }
        Some(Self {
            hour,
            minute,
            second,
            microsecond,
            tz,
        })
    }
}

/// A date combined with a time of day.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DateTime {
    pub date: Date,
    pub time: Time,
}

/// Any value of the calendar family.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Temporal {
    Date(Date),
    Time(Time),
    DateTime(DateTime),
    TimeDelta(TimeDelta),
    TimeZone(TimeZone),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timedelta_normalizes_negative() {
        let d = TimeDelta::new(0, -1, 0);
        assert_eq!((d.days(), d.seconds(), d.microseconds()), (-1, 86_399, 0));

        let d = TimeDelta::new(1, 0, -1);
        assert_eq!((d.days(), d.seconds(), d.microseconds()), (0, 86_399, 999_999));
        assert_eq!(d.total_microseconds(), 86_400_000_000 - 1);
    }

    #[test]
    fn test_date_validation() {
        assert!(Date::new(2024, 2, 29).is_some());
        assert!(Date::new(2023, 2, 29).is_none());
        assert!(Date::new(2023, 13, 1).is_none());
        assert!(Date::new(0, 1, 1).is_none());
    }

    #[test]
    fn test_timezone_bounds() {
        assert!(TimeZone::new(TimeDelta::from_seconds(-5 * 3600), None).is_some());
        assert!(TimeZone::new(TimeDelta::new(1, 0, 0), None).is_none());
    }

    #[test]
    fn test_time_validation() {
        assert!(Time::new(23, 59, 59, 999_999, None).is_some());
        assert!(Time::new(24, 0, 0, 0, None).is_none());
    }
}
