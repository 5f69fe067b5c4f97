//! Date normalization for the date strings shown in related lists.
//!
//! Source pages mix a known export format (`DD/MM/YYYY HH:MM`, 24h clock) with
//! free-form strings. [`parse_date_string`] tries the strict format first and
//! only then falls back to a generic parse, so the common case is never
//! misread as a US `MM/DD/YYYY` date.
//!
//! # Known gap
//!
//! The strict format checks each component's range but not the length of the
//! month: `31/02/2023 10:00` is accepted and rolls forward to `2023-03-03 10:00`.

use chrono::{DateTime, Days, NaiveDate, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

static STRICT_DATE: Lazy<Regex> = Lazy::new(|| {
    // `\d` would also match non-ASCII digits.
    Regex::new(r"([0-9]{2})/([0-9]{2})/([0-9]{4})\s+([0-9]{2}):([0-9]{2})").expect("strict date pattern is valid")
});

/// Date-time layouts accepted by the fallback parse, read as UTC.
const FALLBACK_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%m/%d/%Y %I:%M %p",
    "%B %d, %Y %I:%M %p",
    "%b %d, %Y %I:%M %p",
    "%B %d, %Y %H:%M",
    "%b %d, %Y %H:%M",
    "%d %B %Y %H:%M",
    "%d %b %Y %H:%M",
];

/// Date-only layouts accepted by the fallback parse, read as midnight UTC.
const FALLBACK_DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%m/%d/%Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%d %B %Y",
    "%d %b %Y",
];

/// Parse a related-list date string into a UTC timestamp.
///
/// Returns `None` for missing or empty input and for strings neither the
/// strict nor the fallback parse understands. Never panics.
pub fn parse_date_string(date_string: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = date_string?;
    if raw.is_empty() {
        return None;
    }

    if let Some(parsed) = parse_strict(raw) {
        return Some(parsed);
    }

    if let Some(parsed) = parse_fallback(raw.trim()) {
        warn!(date = raw, "Used fallback date parse");
        return Some(parsed);
    }

    warn!(date = raw, "Could not parse date format");
    None
}

/// `DD/MM/YYYY HH:MM` anywhere in the string.
fn parse_strict(raw: &str) -> Option<DateTime<Utc>> {
    let caps = STRICT_DATE.captures(raw)?;
    let part = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());

    let day = part(1)?;
    let month = part(2)?.checked_sub(1)?;
    let year = part(3)? as i32;
    let hour = part(4)?;
    let minute = part(5)?;

    if !(year > 1970 && month < 12 && (1..=31).contains(&day) && hour < 24 && minute < 60) {
        debug!(date = raw, "Strict date parts out of range");
        return None;
    }

    // Day offset from the first of the month, so overflowing days roll forward.
    let naive = NaiveDate::from_ymd_opt(year, month + 1, 1)?
        .checked_add_days(Days::new(u64::from(day - 1)))?
        .and_hms_opt(hour, minute, 0)?;
    Some(Utc.from_utc_datetime(&naive))
}

fn parse_fallback(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in FALLBACK_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    for format in FALLBACK_DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return date.and_hms_opt(0, 0, 0).map(|naive| Utc.from_utc_datetime(&naive));
        }
    }

    None
}
