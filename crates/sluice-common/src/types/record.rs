//! Record types flowing through the pipeline
//!
//! A source adapter produces `RawRecord`s, the mapper turns each into
//! zero or more `CanonicalRecord`s, and the uploader groups those into
//! `Batch`es for delivery.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::cursor::Cursor;

/// Untyped record as produced by a source adapter.
///
/// Field order is preserved from the source. Ephemeral: consumed by the
/// mapper immediately after production.
#[derive(Debug, Clone)]
pub struct RawRecord {
    /// 1-based position of this record within the run
    pub sequence: u64,
    /// Source position this record corresponds to, used for resumption
    pub cursor: Cursor,
    /// Ordered field name to value pairs
    pub fields: Vec<(String, Value)>,
}

impl RawRecord {
    /// Look up a field by name
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }

    /// Field value as a non-empty string, if present
    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.get(name) {
            Some(Value::String(s)) if !s.is_empty() => Some(s),
            _ => None,
        }
    }
}

/// Typed record ready for delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CanonicalRecord {
    Row(RowRecord),
    DataPoint(DataPoint),
}

impl CanonicalRecord {
    /// The non-empty identity every canonical record carries
    pub fn identity(&self) -> &str {
        match self {
            CanonicalRecord::Row(row) => &row.key,
            CanonicalRecord::DataPoint(point) => &point.external_id,
        }
    }
}

/// A keyed row destined for a raw table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowRecord {
    pub key: String,
    pub columns: serde_json::Map<String, Value>,
}

/// A time-stamped value destined for a time series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub external_id: String,
    pub timestamp_ms: i64,
    pub value: DataPointValue,
    /// Set when the external id has not been observed before in this run;
    /// the destination client creates the series before inserting
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub needs_creation: bool,
}

/// Numeric or string payload of a datapoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DataPointValue {
    Numeric(f64),
    Text(String),
}

/// Bounded, ordered group of canonical records: the unit of delivery
/// and retry.
///
/// Invariants: never empty, bounded by the job's batch size, and all
/// records target the same destination container.
#[derive(Debug, Clone)]
pub struct Batch {
    pub records: Vec<CanonicalRecord>,
    /// Source position of the last record in the batch; saved as the
    /// job's cursor once the batch is acknowledged
    pub cursor: Cursor,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
