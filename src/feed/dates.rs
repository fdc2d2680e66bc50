use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

/// Explicit formats tried after RFC 2822, in order. Covers the ISO-8601
/// variants, the space-separated form, and the date-only form observed
/// across real feeds. Entries with `%z`/`%Z` carry their own offset;
/// the rest are naive and get tagged UTC after parsing.
const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%SZ",
    "%Y-%m-%dT%H:%M:%S%.fZ",
    "%Y-%m-%d %H:%M:%S",
    "%d %b %Y %H:%M:%S",
];

const OFFSET_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%a, %d %b %Y %H:%M:%S %z",
];

const DATE_ONLY_FORMATS: &[&str] = &["%Y-%m-%d", "%d %b %Y"];

/// Parses a feed date string into a UTC timestamp.
///
/// Tries, in order:
/// 1. RFC 2822 (the de-facto RSS `pubDate` format), including named
///    timezones like `GMT` and `EST` via normalization to offsets.
/// 2. A fixed list of explicit patterns: ISO-8601 with `Z`, ISO-8601
///    with numeric offset, fractional seconds, `YYYY-MM-DD HH:MM:SS`,
///    and bare dates.
///
/// Returns `None` when nothing matches; never guesses and never panics.
/// Timestamps that carry no timezone information are assumed UTC — a
/// deliberate simplification, not a claim about the feed's local time.
pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    // RFC 2822 / RFC 822 first. chrono accepts "GMT"/"UT" but not other
    // named zones, so map the common US abbreviations onto offsets.
    if let Some(dt) = parse_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    for fmt in OFFSET_DATETIME_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(raw, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }

    for fmt in NAIVE_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    for fmt in DATE_ONLY_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(raw, fmt) {
            let naive = date.and_hms_opt(0, 0, 0)?;
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    None
}

fn parse_rfc2822(raw: &str) -> Option<DateTime<chrono::FixedOffset>> {
    let normalized = normalize_named_zone(raw);
    if let Ok(dt) = DateTime::parse_from_rfc2822(&normalized) {
        return Some(dt);
    }
    // Feeds routinely carry a weekday name that contradicts the date;
    // chrono rejects the contradiction, so drop the weekday and let the
    // date stand. The day-of-week is optional in RFC 2822 anyway.
    let (day, rest) = normalized.split_once(", ")?;
    if day.len() != 3 {
        return None;
    }
    DateTime::parse_from_rfc2822(rest).ok()
}

/// Rewrites a trailing named-timezone abbreviation into a numeric
/// offset so RFC 2822 parsing can accept it. Only the zones that
/// actually appear in feeds are mapped; anything else passes through
/// untouched and fails parsing naturally.
fn normalize_named_zone(raw: &str) -> String {
    const ZONES: &[(&str, &str)] = &[
        ("UTC", "+0000"),
        ("EST", "-0500"),
        ("EDT", "-0400"),
        ("CST", "-0600"),
        ("CDT", "-0500"),
        ("MST", "-0700"),
        ("MDT", "-0600"),
        ("PST", "-0800"),
        ("PDT", "-0700"),
    ];
    for (name, offset) in ZONES {
        if let Some(prefix) = raw.strip_suffix(name) {
            if prefix.ends_with(' ') {
                return format!("{}{}", prefix, offset);
            }
        }
    }
    raw.to_string()
}
