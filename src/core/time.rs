//! Shared timestamp/id helpers for sessions, audit lines and evidence paths.

use chrono::{DateTime, SecondsFormat, Utc};
use ulid::Ulid;

/// RFC 3339 / ISO 8601 UTC timestamp with second precision (e.g. `2026-10-16T09:14:03Z`).
pub fn iso8601(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn now_iso8601() -> String {
    iso8601(Utc::now())
}

/// Compact, path-safe stamp used for evidence directory names (e.g. `20261016T091403Z`).
pub fn path_stamp(ts: DateTime<Utc>) -> String {
    ts.format("%Y%m%dT%H%M%SZ").to_string()
}

pub fn new_session_id() -> String {
    Ulid::new().to_string()
}

fn parse_bound(raw: &str, end_of_day: bool) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    let date = chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()?;
    let dt = if end_of_day {
        date.and_hms_nano_opt(23, 59, 59, 999_999_999)
    } else {
        date.and_hms_opt(0, 0, 0)
    };
    dt.map(|dt| dt.and_utc())
}

/// Parse a lower report boundary: full RFC 3339 or a bare `YYYY-MM-DD` (midnight UTC).
pub fn parse_boundary(raw: &str) -> Option<DateTime<Utc>> {
    parse_bound(raw, false)
}

/// Parse an upper report boundary. A bare date covers the whole day.
pub fn parse_end_boundary(raw: &str) -> Option<DateTime<Utc>> {
    parse_bound(raw, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_iso8601_format() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        assert_eq!(iso8601(ts), "2026-03-04T05:06:07Z");
        assert_eq!(path_stamp(ts), "20260304T050607Z");
    }

    #[test]
    fn test_session_id_is_unique_ulid() {
        let a = new_session_id();
        let b = new_session_id();
        assert_ne!(a, b);
        assert!(Ulid::from_string(&a).is_ok());
    }

    #[test]
    fn test_parse_boundary_accepts_date_and_rfc3339() {
        let d = parse_boundary("2026-01-02").unwrap();
        assert_eq!(iso8601(d), "2026-01-02T00:00:00Z");
        let t = parse_boundary("2026-01-02T10:00:00+02:00").unwrap();
        assert_eq!(iso8601(t), "2026-01-02T08:00:00Z");
        assert!(parse_boundary("yesterday").is_none());
    }

    #[test]
    fn test_end_boundary_covers_the_whole_day() {
        let end = parse_end_boundary("2026-01-31").unwrap();
        let late = Utc.with_ymd_and_hms(2026, 1, 31, 23, 59, 59).unwrap();
        assert!(late <= end);
        assert!(Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap() > end);
        let exact = parse_end_boundary("2026-01-31T12:00:00Z").unwrap();
        assert_eq!(iso8601(exact), "2026-01-31T12:00:00Z");
    }
}
