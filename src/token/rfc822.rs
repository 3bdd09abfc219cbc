//! RFC 822 timestamps as stored next to tokens, e.g. `16 Oct 26 09:05 UTC`.
//!
//! Timestamps are always written in UTC. Parsing accepts the RFC 822 zone
//! names and numeric `+hhmm` offsets; unknown alphabetic zone names are read
//! as UTC.

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};

const DATE_TIME_LAYOUT: &str = "%d %b %y %H:%M";

pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    format!("{} UTC", ts.format(DATE_TIME_LAYOUT))
}

pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let (date_time, zone) = value.trim().rsplit_once(' ')?;
    let naive = NaiveDateTime::parse_from_str(date_time.trim(), DATE_TIME_LAYOUT).ok()?;
    let offset = FixedOffset::east_opt(zone_offset_secs(zone)?)?;
    let local = offset.from_local_datetime(&naive).single()?;
    Some(local.with_timezone(&Utc))
}

fn zone_offset_secs(zone: &str) -> Option<i32> {
    const HOUR: i32 = 3600;
    match zone {
        "UT" | "UTC" | "GMT" | "Z" => Some(0),
        "EDT" => Some(-4 * HOUR),
        "EST" | "CDT" => Some(-5 * HOUR),
        "CST" | "MDT" => Some(-6 * HOUR),
        "MST" | "PDT" => Some(-7 * HOUR),
        "PST" => Some(-8 * HOUR),
        _ => {
            if let Some(digits) = zone.strip_prefix('+') {
                numeric_offset(digits)
            } else if let Some(digits) = zone.strip_prefix('-') {
                numeric_offset(digits).map(|secs| -secs)
            } else if (3..=5).contains(&zone.len()) && zone.chars().all(|c| c.is_ascii_uppercase())
            {
                Some(0)
            } else {
                None
            }
        }
    }
}

fn numeric_offset(digits: &str) -> Option<i32> {
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let hours: i32 = digits[..2].parse().ok()?;
    let minutes: i32 = digits[2..].parse().ok()?;
    if minutes >= 60 {
        return None;
    }
    Some(hours * 3600 + minutes * 60)
}
