/// Minute arithmetic on the local business day.
///
/// All times are minutes since local midnight. There is no timezone handling
/// anywhere in the core; the business runs on one wall clock.

use chrono::{NaiveDate, NaiveTime, Timelike};

use crate::error::ValidationError;

pub const MINUTES_PER_DAY: i64 = 1440;

/// Parse `HH:MM` into minutes since midnight.
pub fn time_to_minutes(time: &str) -> Result<i64, ValidationError> {
    parse_time("time", time).map(minutes_of)
}

/// Format minutes since midnight as `HH:MM`.
///
/// Values are not wrapped; keeping them inside `[0, 1440)` is up to the caller.
pub fn minutes_to_time(minutes: i64) -> String {
    format!("{:02}:{:02}", minutes.div_euclid(60), minutes.rem_euclid(60))
}

/// Parse a strict `HH:MM` field into a `NaiveTime`.
pub fn parse_time(field: &'static str, value: &str) -> Result<NaiveTime, ValidationError> {
    let invalid = || ValidationError::InvalidTime {
        field,
        value: value.to_string(),
    };

    let (hours, minutes) = value.trim().split_once(':').ok_or_else(invalid)?;
    if hours.is_empty()
        || hours.len() > 2
        || minutes.len() != 2
        || !hours.bytes().chain(minutes.bytes()).all(|b| b.is_ascii_digit())
    {
        return Err(invalid());
    }

    let hours: u32 = hours.parse().map_err(|_| invalid())?;
    let minutes: u32 = minutes.parse().map_err(|_| invalid())?;
    NaiveTime::from_hms_opt(hours, minutes, 0).ok_or_else(invalid)
}

/// Parse a `YYYY-MM-DD` field.
pub fn parse_date(field: &'static str, value: &str) -> Result<NaiveDate, ValidationError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|_| ValidationError::InvalidDate {
        field,
        value: value.to_string(),
    })
}

/// Minutes since midnight of a wall-clock time. Seconds are dropped.
pub fn minutes_of(time: NaiveTime) -> i64 {
    i64::from(time.hour()) * 60 + i64::from(time.minute())
}

/// Inverse of [`minutes_of`]; `None` outside `[0, 1440)`.
pub fn time_from_minutes(minutes: i64) -> Option<NaiveTime> {
    if !(0..MINUTES_PER_DAY).contains(&minutes) {
        return None;
    }
    NaiveTime::from_hms_opt((minutes / 60) as u32, (minutes % 60) as u32, 0)
}

/// Round down to the grid.
pub fn snap_down(minutes: i64, grid: i64) -> i64 {
    if grid <= 0 {
        return minutes;
    }
    minutes.div_euclid(grid) * grid
}

/// Round up to the grid line at or after `minutes`.
pub fn snap_up(minutes: i64, grid: i64) -> i64 {
    if grid <= 0 {
        return minutes;
    }
    -(-minutes).div_euclid(grid) * grid
}

/// Round to the nearest grid line, halves going up.
pub fn snap_nearest(minutes: i64, grid: i64) -> i64 {
    if grid <= 0 {
        return minutes;
    }
    (minutes + grid / 2).div_euclid(grid) * grid
}

/// Strict overlap of `[start_a, end_a)` and `[start_b, end_b)`.
///
/// Touching endpoints do not overlap, so back-to-back bookings are legal.
pub fn intervals_overlap(start_a: i64, end_a: i64, start_b: i64, end_b: i64) -> bool {
    start_a < end_b && end_a > start_b
}

/// Whether `[start, end)` lies entirely inside `[outer_start, outer_end]`.
pub fn within(start: i64, end: i64, outer_start: i64, outer_end: i64) -> bool {
    start >= outer_start && end <= outer_end
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_formats_times() {
        assert_eq!(time_to_minutes("09:00").unwrap(), 540);
        assert_eq!(time_to_minutes("9:05").unwrap(), 545);
        assert_eq!(time_to_minutes("23:59").unwrap(), 1439);
        assert_eq!(minutes_to_time(540), "09:00");
        assert_eq!(minutes_to_time(1439), "23:59");
        assert_eq!(minutes_to_time(1440), "24:00");
    }

    #[test]
    fn rejects_malformed_times() {
        for bad in ["", "9", "09:0", "24:00", "12:60", "ab:cd", "-1:30", "09:00:00"] {
            assert!(
                matches!(time_to_minutes(bad), Err(ValidationError::InvalidTime { .. })),
                "accepted {bad:?}"
            );
        }
    }

    #[test]
    fn rejects_malformed_dates() {
        assert!(parse_date("date", "2024-02-30").is_err());
        assert!(parse_date("date", "06/01/2024").is_err());
        assert_eq!(
            parse_date("date", "2024-01-06").unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 6).unwrap()
        );
    }

    #[test]
    fn snapping() {
        assert_eq!(snap_down(585, 30), 570);
        assert_eq!(snap_down(570, 30), 570);
        assert_eq!(snap_down(-10, 30), -30);
        assert_eq!(snap_up(580, 30), 600);
        assert_eq!(snap_up(600, 30), 600);
        assert_eq!(snap_up(-10, 30), 0);
        assert_eq!(snap_nearest(585, 30), 600);
        assert_eq!(snap_nearest(584, 30), 570);
        assert_eq!(snap_nearest(67, 15), 60);
        assert_eq!(snap_nearest(68, 15), 75);
    }

    #[test]
    fn snap_down_is_idempotent() {
        for x in -120..1600 {
            let once = snap_down(x, 30);
            assert_eq!(snap_down(once, 30), once);
            assert_eq!(once % 30, 0);
        }
    }

    #[test]
    fn back_to_back_does_not_overlap() {
        assert!(!intervals_overlap(540, 600, 600, 660));
        assert!(!intervals_overlap(600, 660, 540, 600));
        assert!(intervals_overlap(540, 601, 600, 660));
        assert!(intervals_overlap(540, 700, 600, 660));
    }

    #[test]
    fn minute_time_conversions() {
        let t = NaiveTime::from_hms_opt(13, 45, 30).unwrap();
        assert_eq!(minutes_of(t), 825);
        assert_eq!(time_from_minutes(825), NaiveTime::from_hms_opt(13, 45, 0));
        assert_eq!(time_from_minutes(1440), None);
        assert_eq!(time_from_minutes(-1), None);
    }
}
