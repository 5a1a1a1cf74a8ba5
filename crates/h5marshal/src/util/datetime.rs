//! Civil calendar helpers.
//!
//! Gregorian date arithmetic on days since the Unix epoch (1970-01-01), used
//! to validate stored calendar values and to stamp the compat header banner.

const SECONDS_PER_DAY: i64 = 86_400;

const WEEKDAYS: [&str; 7] = ["Thu", "Fri", "Sat", "Sun", "Mon", "Tue", "Wed"];
const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Returns true if the given year is a leap year.
pub fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || (year % 400 == 0)
}

/// Returns the number of days in a given month (1-indexed), or 0 for an
/// invalid month.
pub fn days_in_month(year: i32, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 => {
            if is_leap_year(year) {
                29
            } else {
                28
            }
        }
        _ => 0,
    }
}

/// Calculates days since Unix epoch for a given date.
pub fn date_to_days(year: i32, month: u32, day: u32) -> i64 {
    // Howard Hinnant's days_from_civil
    let y = if month <= 2 { year - 1 } else { year } as i64;
    let m = if month <= 2 {
        month as i64 + 9
    } else {
        month as i64 - 3
    };

    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = y - era * 400;
    let doy = (153 * m + 2) / 5 + day as i64 - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;

    era * 146097 + doe - 719468
}

/// Converts days since Unix epoch to (year, month, day).
pub fn days_to_date(days: i64) -> (i32, u32, u32) {
    let z = days + 719468;
    let era = if z >= 0 { z } else { z - 146096 } / 146097;
    let doe = z - era * 146097;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };

    let year = if m <= 2 { y + 1 } else { y } as i32;
    (year, m as u32, d as u32)
}

/// Formats seconds since the Unix epoch (UTC) like C `asctime`,
/// e.g. `"Mon Oct 19 09:05:03 2026"`.
pub fn format_asctime(epoch_secs: i64) -> String {
    let days = epoch_secs.div_euclid(SECONDS_PER_DAY);
    let secs = epoch_secs.rem_euclid(SECONDS_PER_DAY);
    let (year, month, day) = days_to_date(days);
    let weekday = WEEKDAYS[days.rem_euclid(7) as usize];
    format!(
        "{} {} {:>2} {:02}:{:02}:{:02} {}",
        weekday,
        MONTHS[(month - 1) as usize],
        day,
        secs / 3600,
        secs % 3600 / 60,
        secs % 60,
        year
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_days_in_month() {
        assert_eq!(days_in_month(2024, 2), 29);
        assert_eq!(days_in_month(1900, 2), 28);
        assert_eq!(days_in_month(2000, 2), 29);
        assert_eq!(days_in_month(2023, 4), 30);
        assert_eq!(days_in_month(2023, 13), 0);
    }

    #[test]
    fn test_date_roundtrip() {
        for (y, m, d) in [(1970, 1, 1), (2000, 2, 29), (1969, 12, 31), (1, 1, 1), (9999, 12, 31)] {
            let days = date_to_days(y, m, d);
            assert_eq!(days_to_date(days), (y, m, d));
        }
        assert_eq!(date_to_days(1970, 1, 1), 0);
        assert_eq!(date_to_days(1970, 1, 2), 1);
    }

    #[test]
    fn test_format_asctime() {
        assert_eq!(format_asctime(0), "Thu Jan  1 00:00:00 1970");
        // 2026-10-19T09:05:03Z
        let secs = date_to_days(2026, 10, 19) * SECONDS_PER_DAY + 9 * 3600 + 5 * 60 + 3;
        assert_eq!(format_asctime(secs), "Mon Oct 19 09:05:03 2026");
    }
}
