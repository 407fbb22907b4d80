//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Timestamp parsing for API query parameters."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use chrono::{DateTime, Utc};

/// Parse an RFC 3339 timestamp (a trailing `Z` is accepted) into UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|value| value.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_timestamp_accepts_zulu_and_offsets() {
        let zulu = parse_timestamp("2024-05-01T10:00:00Z").unwrap();
        let offset = parse_timestamp("2024-05-01T12:00:00+02:00").unwrap();
        assert_eq!(zulu, offset);
        assert!(parse_timestamp("yesterday").is_none());
    }
}
