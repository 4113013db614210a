//! Canonical migrated record and the raw historian row it is decoded from.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Composite migration key.
///
/// Ordering is by timestamp first, then tag identifier, which is the order
/// the historian tables are scanned in (`ORDER BY t_stamp, tagid`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MigrationKey {
    /// Milliseconds since the Unix epoch
    pub timestamp_millis: i64,
    /// Historian tag identifier
    pub tag_id: i64,
}

impl MigrationKey {
    /// Smallest representable key.
    pub const MIN: MigrationKey = MigrationKey {
        timestamp_millis: i64::MIN,
        tag_id: i64::MIN,
    };

    /// Largest representable key.
    pub const MAX: MigrationKey = MigrationKey {
        timestamp_millis: i64::MAX,
        tag_id: i64::MAX,
    };

    /// Create a key from a tag identifier and a timestamp.
    pub fn new(tag_id: i64, timestamp_millis: i64) -> Self {
        MigrationKey {
            timestamp_millis,
            tag_id,
        }
    }

    /// First key at the given timestamp, before every tag recorded at that instant.
    pub fn first_at(timestamp_millis: i64) -> Self {
        MigrationKey {
            timestamp_millis,
            tag_id: i64::MIN,
        }
    }

    /// The smallest key strictly greater than `self`.
    ///
    /// Saturates at `MigrationKey::MAX`.
    pub fn successor(&self) -> Self {
        if self.tag_id < i64::MAX {
            MigrationKey {
                timestamp_millis: self.timestamp_millis,
                tag_id: self.tag_id + 1,
            }
        } else if self.timestamp_millis < i64::MAX {
            MigrationKey::first_at(self.timestamp_millis + 1)
        } else {
            MigrationKey::MAX
        }
    }
}

impl fmt::Display for MigrationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tag {}@{}", self.tag_id, self.timestamp_millis)
    }
}

/// Integer quality code carried by every historian sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Quality(pub i32);

impl Quality {
    /// Canonical "good" quality code.
    pub const GOOD: Quality = Quality(192);

    /// Whether the sample carries the canonical good code.
    pub fn is_good(&self) -> bool {
        *self == Quality::GOOD
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Typed value of a sample. Exactly one historian value column maps to one variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// `intvalue`
    Integer(i64),
    /// `floatvalue`
    Float(f64),
    /// `stringvalue`
    String(String),
    /// `datevalue`, in milliseconds since the epoch
    Date(i64),
}

impl Value {
    /// Field-by-field equality used by validation.
    ///
    /// Floats compare by value, with NaN equal to NaN so that a migrated NaN
    /// reading is not reported as corruption.
    pub fn same_as(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Float(a), Value::Float(b)) => (a.is_nan() && b.is_nan()) || a == b,
            _ => self == other,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(v) => write!(f, "int:{v}"),
            Value::Float(v) => write!(f, "float:{v}"),
            Value::String(v) => write!(f, "string:{v:?}"),
            Value::Date(v) => write!(f, "date:{v}"),
        }
    }
}

/// One migrated data point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Unique key within the destination
    pub key: MigrationKey,
    /// Decoded value
    pub value: Value,
    /// Quality code, preserved verbatim
    pub quality: Quality,
}

impl Record {
    /// Create a record.
    pub fn new(key: MigrationKey, value: Value, quality: Quality) -> Self {
        Record {
            key,
            value,
            quality,
        }
    }

    /// Field-by-field comparison of value and quality.
    pub fn same_content(&self, other: &Record) -> bool {
        self.key == other.key && self.quality == other.quality && self.value.same_as(&other.value)
    }
}

/// Raw historian row as stored in the source table.
///
/// Value columns are nullable; the codec decides which one is meaningful.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawRow {
    /// `tagid`
    pub tag_id: i64,
    /// `t_stamp`
    pub t_stamp: i64,
    /// `intvalue`
    pub int_value: Option<i64>,
    /// `floatvalue`
    pub float_value: Option<f64>,
    /// `stringvalue`
    pub string_value: Option<String>,
    /// `datevalue`, milliseconds since the epoch
    pub date_value: Option<i64>,
    /// `dataintegrity`
    pub quality: Option<i32>,
}

impl RawRow {
    /// Key of this row. Always available, even for rows that fail to decode.
    pub fn key(&self) -> MigrationKey {
        MigrationKey::new(self.tag_id, self.t_stamp)
    }

    /// Row with a single integer value and good quality.
    pub fn integer(tag_id: i64, t_stamp: i64, value: i64) -> Self {
        RawRow {
            tag_id,
            t_stamp,
            int_value: Some(value),
            quality: Some(Quality::GOOD.0),
            ..Default::default()
        }
    }

    /// Row with a single float value and good quality.
    pub fn float(tag_id: i64, t_stamp: i64, value: f64) -> Self {
        RawRow {
            tag_id,
            t_stamp,
            float_value: Some(value),
            quality: Some(Quality::GOOD.0),
            ..Default::default()
        }
    }

    /// Number of populated value columns.
    pub fn populated_values(&self) -> usize {
        [
            self.int_value.is_some(),
            self.float_value.is_some(),
            self.string_value.is_some(),
            self.date_value.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count()
    }
}

impl From<&Record> for RawRow {
    fn from(record: &Record) -> Self {
        let mut row = RawRow {
            tag_id: record.key.tag_id,
            t_stamp: record.key.timestamp_millis,
            quality: Some(record.quality.0),
            ..Default::default()
        };
        match &record.value {
            Value::Integer(v) => row.int_value = Some(*v),
            Value::Float(v) => row.float_value = Some(*v),
            Value::String(v) => row.string_value = Some(v.clone()),
            Value::Date(v) => row.date_value = Some(*v),
        }
        row
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_order_by_timestamp_then_tag() {
        let early_high_tag = MigrationKey::new(99, 1_000);
        let late_low_tag = MigrationKey::new(1, 2_000);
        assert!(early_high_tag < late_low_tag);
        assert!(MigrationKey::new(1, 1_000) < MigrationKey::new(2, 1_000));
    }

    #[test]
    fn successor_is_strictly_greater() {
        let key = MigrationKey::new(5, 10);
        assert_eq!(key.successor(), MigrationKey::new(6, 10));
        let wrap = MigrationKey::new(i64::MAX, 10);
        assert_eq!(wrap.successor(), MigrationKey::first_at(11));
        assert!(wrap.successor() > wrap);
        assert_eq!(MigrationKey::MAX.successor(), MigrationKey::MAX);
    }

    #[test]
    fn first_at_precedes_every_tag() {
        assert!(MigrationKey::first_at(10) < MigrationKey::new(i64::MIN + 1, 10));
        assert!(MigrationKey::first_at(10) > MigrationKey::new(i64::MAX, 9));
    }

    #[test]
    fn nan_floats_compare_equal_for_validation() {
        assert!(Value::Float(f64::NAN).same_as(&Value::Float(f64::NAN)));
        assert!(!Value::Float(1.0).same_as(&Value::Float(1.5)));
        assert!(!Value::Integer(1).same_as(&Value::Float(1.0)));
    }

    #[test]
    fn record_to_raw_row_populates_one_column() {
        let record = Record::new(
            MigrationKey::new(1, 100),
            Value::String("OPEN".into()),
            Quality(0),
        );
        let row = RawRow::from(&record);
        assert_eq!(row.populated_values(), 1);
        assert_eq!(row.string_value.as_deref(), Some("OPEN"));
        assert_eq!(row.quality, Some(0));
        assert_eq!(row.key(), record.key);
    }
}
