//! Normalized measurement records.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use time::format_description::BorrowedFormatItem;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};
use tracing::debug;

/// ISO 8601 without an offset, as produced by clients that report naive
/// UTC timestamps.
const ISO_NAIVE: &[BorrowedFormatItem<'_>] = format_description!(
    version = 2,
    "[year]-[month]-[day]T[hour]:[minute]:[second][optional [.[subsecond]]]"
);

/// Space-separated variant used by weather station firmware.
const SPACE_NAIVE: &[BorrowedFormatItem<'_>] = format_description!(
    version = 2,
    "[year]-[month]-[day] [hour]:[minute]:[second][optional [.[subsecond]]]"
);

/// Errors produced while normalizing an inbound payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    /// The timestamp entry could not be interpreted as an instant.
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),
}

/// One normalized measurement: an instant plus a flat set of numeric
/// fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// When the sample was taken. Client-supplied when the payload carries
    /// a `timestamp` entry, otherwise the ingestion instant.
    pub timestamp: OffsetDateTime,
    /// Field name to value. The name set is open; clients may introduce
    /// new fields at any time.
    pub fields: BTreeMap<String, f64>,
}

impl Record {
    /// Normalize a raw JSON payload into a record.
    ///
    /// Nested objects are flattened one level, the `timestamp` entry (if
    /// any) is parsed, and the remaining entries are coerced to `f64`.
    /// Entries that are neither numbers nor numeric strings are dropped.
    pub fn from_payload(payload: Map<String, Value>) -> Result<Self, RecordError> {
        let mut flat = flatten(payload);

        let timestamp = match flat.remove("timestamp") {
            Some(value) => parse_timestamp(&value)?,
            None => OffsetDateTime::now_utc(),
        };

        let mut fields = BTreeMap::new();
        for (name, value) in flat {
            match coerce(&value) {
                Some(value) => {
                    fields.insert(name, value);
                }
                None => debug!("Dropping non-numeric field {name}: {value}"),
            }
        }

        Ok(Self { timestamp, fields })
    }
}

/// Lift the entries of every object-valued key to the top level, dropping
/// the wrapping key itself. One level only; deeper nesting is not walked.
///
/// When a lifted entry collides with another key, the value applied last
/// in map iteration order wins. Payloads should not rely on a particular
/// tie-break.
pub fn flatten(payload: Map<String, Value>) -> Map<String, Value> {
    let mut flat = Map::new();
    for (key, value) in payload {
        match value {
            Value::Object(nested) => {
                for (inner_key, inner_value) in nested {
                    flat.insert(inner_key, inner_value);
                }
            }
            other => {
                flat.insert(key, other);
            }
        }
    }
    flat
}

/// Interpret a timestamp entry: RFC 3339, naive ISO 8601 (assumed UTC),
/// the space-separated naive form, or Unix seconds.
fn parse_timestamp(value: &Value) -> Result<OffsetDateTime, RecordError> {
    match value {
        Value::String(text) => parse_timestamp_text(text)
            .ok_or_else(|| RecordError::InvalidTimestamp(text.clone())),
        Value::Number(number) => {
            if let Some(seconds) = number.as_i64() {
                OffsetDateTime::from_unix_timestamp(seconds)
                    .map_err(|_| RecordError::InvalidTimestamp(number.to_string()))
            } else if let Some(seconds) = number.as_f64() {
                OffsetDateTime::from_unix_timestamp_nanos((seconds * 1e9) as i128)
                    .map_err(|_| RecordError::InvalidTimestamp(number.to_string()))
            } else {
                Err(RecordError::InvalidTimestamp(number.to_string()))
            }
        }
        other => Err(RecordError::InvalidTimestamp(other.to_string())),
    }
}

fn parse_timestamp_text(text: &str) -> Option<OffsetDateTime> {
    if let Ok(timestamp) = OffsetDateTime::parse(text, &Rfc3339) {
        return Some(timestamp);
    }
    if let Ok(naive) = PrimitiveDateTime::parse(text, ISO_NAIVE) {
        return Some(naive.assume_utc());
    }
    if let Ok(naive) = PrimitiveDateTime::parse(text, SPACE_NAIVE) {
        return Some(naive.assume_utc());
    }
    None
}

/// Numbers pass through; numeric strings are parsed; everything else is
/// dropped by the caller.
fn coerce(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}
