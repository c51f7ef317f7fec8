//! Column encoding helpers shared by the per-collection modules.

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::types::Type;
use uuid::Uuid;

/// Current time truncated to the precision kept in the database.
///
/// Timestamps are stored as fixed-width RFC 3339 text with microseconds, so
/// lexical order in SQL equals chronological order.
pub fn timestamp_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

pub(crate) fn encode_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn decode_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn decode_uuid(idx: usize, raw: &str) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn decode_enum<T>(idx: usize, raw: &str) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.parse::<T>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn encoded_timestamps_sort_chronologically() {
        let early = Utc.with_ymd_and_hms(2024, 1, 9, 23, 59, 59).unwrap();
        let late = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
        assert!(encode_ts(&early) < encode_ts(&late));
        assert_eq!(encode_ts(&early).len(), encode_ts(&late).len());
    }

    #[test]
    fn timestamp_survives_encoding() {
        let now = timestamp_now();
        assert_eq!(decode_ts(0, &encode_ts(&now)).unwrap(), now);
    }
}
