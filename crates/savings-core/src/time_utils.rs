use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Utc};

// ── Date parsing ──────────────────────────────────────────────────────────────

/// Date-only layouts accepted in CSV exports, tried in order.
const DATE_FMTS: &[&str] = &["%Y-%m-%d", "%d.%m.%Y", "%d/%m/%Y", "%Y/%m/%d"];

/// Date-time layouts whose date component is used.
const DATETIME_FMTS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%d.%m.%Y %H:%M:%S",
    "%d.%m.%Y %H:%M",
];

/// Parse a calendar date from a CSV cell.
///
/// Accepts ISO dates, the day-first layouts common in Polish spreadsheet
/// exports, naive date-times and RFC 3339 timestamps (converted to UTC before
/// taking the date). Returns `None` for empty or unrecognised input.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    for fmt in DATE_FMTS {
        if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
            return Some(date);
        }
    }
    for fmt in DATETIME_FMTS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.date());
        }
    }
    parse_timestamp(s).map(|dt| dt.date_naive())
}

/// Parse an RFC 3339 timestamp into UTC.
///
/// Handles the `Z` suffix and any fixed offset. Returns `None` for empty
/// strings or other formats.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if s.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

// ── Period keys ───────────────────────────────────────────────────────────────

/// Calendar quarter key, e.g. `"2025-Q1"`.
pub fn quarter_key(date: NaiveDate) -> String {
    format!("{}-Q{}", date.year(), date.month0() / 3 + 1)
}

/// ISO-8601 week key, e.g. `"2025-W03"`.
///
/// Uses the ISO week-numbering year, so 2024-12-30 belongs to `"2025-W01"`.
pub fn week_key(date: NaiveDate) -> String {
    let week = date.iso_week();
    format!("{}-W{:02}", week.year(), week.week())
}

/// Day key, e.g. `"2025-01-15"`.
pub fn day_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
