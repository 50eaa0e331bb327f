//! Small helpers shared by the web layer.

use chrono::{DateTime, Utc};

/// IMF-fixdate as used by `Last-Modified` and `If-Modified-Since`.
pub fn format_http_date(value: DateTime<Utc>) -> String {
    value.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Parse an HTTP date. Unparseable values are ignored by callers, so this
/// returns `None` rather than an error.
pub fn parse_http_date(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(raw.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Quote a file name for a `Content-Disposition` header.
pub fn disposition_file_name(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_control() && *c != '"' && *c != '\\')
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_http_date_round_trip() {
        let when = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        let formatted = format_http_date(when);
        assert_eq!(formatted, "Sat, 09 Mar 2024 07:05:01 GMT");
        assert_eq!(parse_http_date(&formatted), Some(when));
    }

    #[test]
    fn test_parse_http_date_rejects_garbage() {
        assert_eq!(parse_http_date("yesterday"), None);
    }

    #[test]
    fn test_disposition_file_name() {
        assert_eq!(disposition_file_name("a\"b\\c.png"), "abc.png");
    }
}
