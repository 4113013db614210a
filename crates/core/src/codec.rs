//! Decoding of raw historian rows into `Record`s.
//!
//! The codec is pure: the reference clock is fixed when the codec is built,
//! so decoding the same row twice always gives the same answer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CodecError;
use crate::record::{MigrationKey, Quality, RawRow, Record, Value};

/// How far into the future a timestamp may lie before it is flagged.
pub const MAX_FUTURE_SKEW_MILLIS: i64 = 24 * 60 * 60 * 1000;

/// Non-fatal finding attached to a decoded record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecodeWarning {
    /// Timestamp lies before 1970 or more than 24 hours past the reference clock
    SuspiciousTimestamp {
        /// Key of the record
        key: MigrationKey,
        /// Which bound was crossed
        reason: String,
    },
}

/// A successfully decoded row.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    /// The canonical record
    pub record: Record,
    /// Warning raised while decoding, if any
    pub warning: Option<DecodeWarning>,
}

impl Decoded {
    /// Whether decoding flagged the timestamp.
    pub fn is_suspicious(&self) -> bool {
        matches!(self.warning, Some(DecodeWarning::SuspiciousTimestamp { .. }))
    }
}

/// Converts raw rows to records and back.
#[derive(Debug, Clone, Copy)]
pub struct RecordCodec {
    now_millis: i64,
}

impl RecordCodec {
    /// Codec whose future-timestamp check is relative to `now`.
    pub fn new(now: DateTime<Utc>) -> Self {
        RecordCodec {
            now_millis: now.timestamp_millis(),
        }
    }

    /// Codec referenced to the current wall clock.
    pub fn at_current_time() -> Self {
        Self::new(Utc::now())
    }

    /// Decode one raw row.
    pub fn decode(&self, row: &RawRow) -> Result<Decoded, CodecError> {
        let key = row.key();
        let malformed = |reason: String| CodecError::MalformedRecord { key, reason };

        if DateTime::<Utc>::from_timestamp_millis(row.t_stamp).is_none() {
            return Err(malformed(format!(
                "t_stamp {} is not a representable instant",
                row.t_stamp
            )));
        }

        let value = match row.populated_values() {
            0 => return Err(malformed("no value column populated".to_string())),
            1 => Self::single_value(row),
            n => {
                return Err(malformed(format!(
                    "{n} value columns populated, expected exactly one"
                )))
            }
        };

        if let Value::Date(millis) = value {
            if DateTime::<Utc>::from_timestamp_millis(millis).is_none() {
                return Err(malformed(format!(
                    "datevalue {millis} is not a representable instant"
                )));
            }
        }

        let quality = row
            .quality
            .map(Quality)
            .ok_or_else(|| malformed("dataintegrity is missing".to_string()))?;

        Ok(Decoded {
            record: Record::new(key, value, quality),
            warning: self.timestamp_warning(key),
        })
    }

    /// Encode a record back into the historian column layout.
    pub fn encode(record: &Record) -> RawRow {
        RawRow::from(record)
    }

    fn single_value(row: &RawRow) -> Value {
        if let Some(v) = row.int_value {
            Value::Integer(v)
        } else if let Some(v) = row.float_value {
            Value::Float(v)
        } else if let Some(v) = &row.string_value {
            Value::String(v.clone())
        } else {
            // populated_values() == 1 guarantees the date column is the one set
            Value::Date(row.date_value.unwrap_or_default())
        }
    }

    fn timestamp_warning(&self, key: MigrationKey) -> Option<DecodeWarning> {
        let ts = key.timestamp_millis;
        let reason = if ts < 0 {
            Some(format!("t_stamp {ts} predates 1970"))
        } else if ts > self.now_millis.saturating_add(MAX_FUTURE_SKEW_MILLIS) {
            Some(format!(
                "t_stamp {ts} is more than 24h ahead of reference clock {}",
                self.now_millis
            ))
        } else {
            None
        };
        reason.map(|reason| DecodeWarning::SuspiciousTimestamp { key, reason })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn codec() -> RecordCodec {
        RecordCodec::new(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap())
    }

    fn now_millis() -> i64 {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0)
            .unwrap()
            .timestamp_millis()
    }

    #[test]
    fn decodes_each_value_column() {
        let codec = codec();
        let ts = now_millis() - 1_000;

        let int = codec.decode(&RawRow::integer(1, ts, 42)).unwrap();
        assert_eq!(int.record.value, Value::Integer(42));
        assert!(int.warning.is_none());

        let float = codec.decode(&RawRow::float(1, ts, 1.5)).unwrap();
        assert_eq!(float.record.value, Value::Float(1.5));

        let string = codec
            .decode(&RawRow {
                tag_id: 1,
                t_stamp: ts,
                string_value: Some("RUN".into()),
                quality: Some(192),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(string.record.value, Value::String("RUN".into()));

        let date = codec
            .decode(&RawRow {
                tag_id: 1,
                t_stamp: ts,
                date_value: Some(ts - 5),
                quality: Some(192),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(date.record.value, Value::Date(ts - 5));
    }

    #[test]
    fn rejects_two_populated_columns() {
        let mut row = RawRow::integer(4, now_millis(), 1);
        row.float_value = Some(2.0);
        let err = codec().decode(&row).unwrap_err();
        assert_eq!(err.key(), MigrationKey::new(4, now_millis()));
        assert!(err.to_string().contains("2 value columns"));
    }

    #[test]
    fn rejects_no_populated_column() {
        let row = RawRow {
            tag_id: 1,
            t_stamp: now_millis(),
            quality: Some(192),
            ..Default::default()
        };
        assert!(codec().decode(&row).is_err());
    }

    #[test]
    fn rejects_missing_quality() {
        let mut row = RawRow::integer(1, now_millis(), 1);
        row.quality = None;
        assert!(codec().decode(&row).is_err());
    }

    #[test]
    fn flags_pre_epoch_timestamp_without_failing() {
        let decoded = codec().decode(&RawRow::integer(1, -10, 1)).unwrap();
        assert!(decoded.is_suspicious());
    }

    #[test]
    fn flags_far_future_timestamp_without_failing() {
        let ahead = now_millis() + MAX_FUTURE_SKEW_MILLIS + 1;
        assert!(codec().decode(&RawRow::integer(1, ahead, 1)).unwrap().is_suspicious());

        let within = now_millis() + MAX_FUTURE_SKEW_MILLIS;
        assert!(!codec().decode(&RawRow::integer(1, within, 1)).unwrap().is_suspicious());
    }

    #[test]
    fn rejects_unrepresentable_timestamp() {
        let row = RawRow::integer(1, i64::MAX, 1);
        assert!(codec().decode(&row).is_err());
    }

    #[test]
    fn preserves_degraded_quality() {
        let mut row = RawRow::integer(1, now_millis(), 1);
        row.quality = Some(24);
        let decoded = codec().decode(&row).unwrap();
        assert_eq!(decoded.record.quality, Quality(24));
        assert!(!decoded.record.quality.is_good());
    }

    #[test]
    fn encode_inverts_decode() {
        let row = RawRow::float(9, now_millis(), 3.25);
        let decoded = codec().decode(&row).unwrap();
        assert_eq!(RecordCodec::encode(&decoded.record), row);
    }
}
