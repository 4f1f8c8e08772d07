//! Common utilities shared across modules.
//!
//! Date and weekday helpers over `chrono`, plus data-directory resolution.
//! All of these take explicit instants; "now" always comes from the
//! caller's [`crate::clock::Clock`].

use chrono::{DateTime, Datelike, Local, TimeZone, Timelike};
use std::path::PathBuf;

/// Gets the application data directory using XDG Base Directory specification.
///
/// Returns `~/.local/share/timewarden/` on Unix-like systems.
pub fn get_data_dir() -> PathBuf {
    let base_dir = dirs::data_dir().unwrap_or_else(|| {
        // Fallback if dirs crate fails
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(".local").join("share")
    });

    base_dir.join("timewarden")
}

/// Calendar date of an epoch timestamp, as the `YYYY-MM-DD` string used
/// for (limit, date) buckets and override rows.
pub fn date_of_epoch(epoch: i64) -> String {
    Local
        .timestamp_opt(epoch, 0)
        .single()
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "1970-01-01".to_string())
}

/// Date string of an instant.
pub fn date_of(dt: &DateTime<Local>) -> String {
    dt.format("%Y-%m-%d").to_string()
}

/// Three-letter lowercase weekday key (`mon` .. `sun`), the suffix used by
/// `minutes_<weekday>` and `times_<weekday>` config keys.
pub fn weekday_key(dt: &DateTime<Local>) -> &'static str {
    use chrono::Weekday::*;
    match dt.weekday() {
        Mon => "mon",
        Tue => "tue",
        Wed => "wed",
        Thu => "thu",
        Fri => "fri",
        Sat => "sat",
        Sun => "sun",
    }
}

/// Seconds elapsed since local midnight.
pub fn seconds_into_day(dt: &DateTime<Local>) -> u32 {
    dt.num_seconds_from_midnight()
}

/// Epoch timestamp of local midnight on the given instant's date.
pub fn start_of_day(dt: &DateTime<Local>) -> i64 {
    dt.timestamp() - i64::from(dt.num_seconds_from_midnight())
}

/// Epoch timestamp of Monday 00:00 local time in the instant's week.
/// Weekly minute caps sum spent time from here.
pub fn start_of_week(dt: &DateTime<Local>) -> i64 {
    let days_back = i64::from(dt.weekday().num_days_from_monday());
    start_of_day(dt) - days_back * 86_400
}
