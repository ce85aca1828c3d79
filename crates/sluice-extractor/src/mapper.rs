//! Record mapper
//!
//! Converts raw records into canonical destination records. No I/O
//! happens here: a missing or empty key is a mapping error carrying the
//! record's sequence number, so dropped data is always visible in the
//! run status, and unknown time series are only flagged for creation,
//! which the destination client performs.

use serde_json::Value;
use sluice_common::types::{CanonicalRecord, DataPoint, DataPointValue, RawRecord, RowRecord};
use sluice_common::{ExtractError, Result};
use std::collections::HashSet;

use crate::config::DestinationSpec;

/// Maps raw records for one job's destination
pub struct RecordMapper {
    destination: DestinationSpec,
    /// External ids already flagged for creation in this run
    seen_series: HashSet<String>,
}

impl RecordMapper {
    pub fn new(destination: DestinationSpec) -> Self {
        Self {
            destination,
            seen_series: HashSet::new(),
        }
    }

    /// Map one raw record into zero or more canonical records
    pub fn map(&mut self, raw: &RawRecord) -> Result<Vec<CanonicalRecord>> {
        match &self.destination {
            DestinationSpec::RawTable { key_column, .. } => {
                let key = identity_value(raw, key_column).ok_or_else(|| ExtractError::Mapping {
                    sequence: raw.sequence,
                    message: format!("missing or empty value in key column '{}'", key_column),
                })?;

                let columns = raw
                    .fields
                    .iter()
                    .map(|(name, value)| (name.clone(), value.clone()))
                    .collect();

                Ok(vec![CanonicalRecord::Row(RowRecord { key, columns })])
            },
            DestinationSpec::TimeSeries {
                external_id_prefix,
                id_field,
                timestamp_field,
                value_fields,
            } => {
                let id = identity_value(raw, id_field).ok_or_else(|| ExtractError::Mapping {
                    sequence: raw.sequence,
                    message: format!("missing or empty value in id field '{}'", id_field),
                })?;

                let timestamp_ms = timestamp_field
                    .as_deref()
                    .and_then(|field| raw.get(field))
                    .and_then(extract_timestamp_ms)
                    .unwrap_or_else(|| chrono::Utc::now().timestamp_millis());

                let mut records = Vec::new();
                for field in value_fields {
                    let Some(value) = raw.get(field).and_then(datapoint_value) else {
                        continue;
                    };

                    let external_id = format!("{}{}_{}", external_id_prefix, id, field);
                    let needs_creation = self.seen_series.insert(external_id.clone());

                    records.push(CanonicalRecord::DataPoint(DataPoint {
                        external_id,
                        timestamp_ms,
                        value,
                        needs_creation,
                    }));
                }

                Ok(records)
            },
        }
    }
}

/// Identity fields accept strings and numbers; anything else (or empty
/// text) means the record carries no usable identity.
fn identity_value(raw: &RawRecord, field: &str) -> Option<String> {
    match raw.get(field)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn datapoint_value(value: &Value) -> Option<DataPointValue> {
    match value {
        Value::Number(n) => n.as_f64().map(DataPointValue::Numeric),
        Value::String(s) if !s.is_empty() => Some(DataPointValue::Text(s.clone())),
        Value::Bool(b) => Some(DataPointValue::Numeric(if *b { 1.0 } else { 0.0 })),
        _ => None,
    }
}

/// Millisecond epoch from a JSON value: integer millis or RFC 3339 text
pub(crate) fn extract_timestamp_ms(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => chrono::DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.timestamp_millis()),
        _ => None,
    }
}
