//! Timestamps are stored as fixed-width RFC 3339 text so that lexical order
//! matches chronological order in indexes and cursor comparisons.

use chrono::{DateTime, SubsecRound, Utc};

use super::{DatabaseError, DatabaseResult};

const STORAGE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// Current time at the precision the store keeps.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

pub fn encode(value: &DateTime<Utc>) -> String {
    value.format(STORAGE_FORMAT).to_string()
}

pub fn decode(raw: &str) -> DatabaseResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|error| DatabaseError::Decode(format!("timestamp {raw:?}: {error}")))
}

pub fn decode_optional(raw: Option<String>) -> DatabaseResult<Option<DateTime<Utc>>> {
    raw.as_deref().map(decode).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn encoding_is_fixed_width_and_sortable() {
        let early = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let later = early + chrono::Duration::microseconds(1);

        let a = encode(&early);
        let b = encode(&later);
        assert_eq!(a.len(), b.len());
        assert!(a < b);
        assert_eq!(a, "2024-01-02T03:04:05.000000Z");
    }

    #[test]
    fn decode_accepts_encoded_values() {
        let value = now();
        assert_eq!(decode(&encode(&value)).unwrap(), value);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(decode("yesterday"), Err(DatabaseError::Decode(_))));
    }
}
