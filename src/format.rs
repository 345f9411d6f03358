//! Human-readable renderings of durations and timestamps.

use chrono::{DateTime, Local, TimeZone, Utc};

/// Placeholder shown when there is no time to render
pub const NO_TIME: &str = "--:--";

/// Format seconds as a stopwatch reading: "MM:SS", or "HH:MM:SS" from one hour up.
pub fn format_clock(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{:02}:{:02}", minutes, secs)
    }
}

/// Format an optional duration, e.g. a best time that may not exist yet.
pub fn format_clock_opt(seconds: Option<u64>) -> String {
    seconds.map(format_clock).unwrap_or_else(|| NO_TIME.to_string())
}

/// Format seconds as "Xh Ym Zs" (omits leading zero units)
pub fn format_duration(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}

/// Format seconds as "Xh Ym Zs" with every unit present
pub fn format_duration_raw(seconds: u64) -> String {
    format!("{}h {}m {}s", seconds / 3600, (seconds % 3600) / 60, seconds % 60)
}

/// Format a timestamp as a 12-hour local time of day ("09:05 AM").
pub fn format_time_of_day(timestamp: Option<DateTime<Utc>>) -> String {
    format_time_of_day_in(timestamp, &Local)
}

/// Same as [`format_time_of_day`] in an explicit timezone.
pub fn format_time_of_day_in<Tz>(timestamp: Option<DateTime<Utc>>, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    match timestamp {
        Some(ts) => ts.with_timezone(tz).format("%I:%M %p").to_string(),
        None => NO_TIME.to_string(),
    }
}

/// Parse an RFC 3339 timestamp and format it as a local time of day.
pub fn format_iso_time_of_day(iso: &str) -> String {
    let parsed = DateTime::parse_from_rfc3339(iso.trim())
        .ok()
        .map(|ts| ts.with_timezone(&Utc));
    format_time_of_day(parsed)
}
