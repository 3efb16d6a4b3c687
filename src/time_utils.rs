use chrono::{DateTime, Utc};

/// Retourne le timestamp courant en UTC
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Formate un timestamp ISO 8601
pub fn to_rfc3339(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

/// Parse un timestamp ISO 8601
pub fn from_rfc3339(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    s.parse::<DateTime<Utc>>()
}

/// Filesystem-safe timestamp for analysis filenames: `YYYY-MM-DDTHH-MM-SS-mmmZ`.
/// Colons are not legal on every filesystem, so the time separators are dashes.
pub fn file_stamp(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H-%M-%S-%3fZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let dt = now();
        let s = to_rfc3339(&dt);
        let parsed = from_rfc3339(&s).unwrap();
        assert_eq!(dt.timestamp(), parsed.timestamp());
    }

    #[test]
    fn test_file_stamp_shape() {
        let dt = from_rfc3339("2026-03-04T05:06:07.089Z").unwrap();
        assert_eq!(file_stamp(&dt), "2026-03-04T05-06-07-089Z");
        // No path-hostile characters
        assert!(!file_stamp(&now()).contains(':'));
    }
}
