//! Record and batch fixtures.

use crate::core::{Batch, Record};
use serde_json::json;

/// Builds a record from a JSON object literal.
///
/// # Panics
///
/// Panics if `value` is not a JSON object.
#[must_use]
pub fn record(value: serde_json::Value) -> Record {
    match value {
        serde_json::Value::Object(map) => map,
        other => panic!("fixture record must be a JSON object, got {other}"),
    }
}

/// Returns `count` records `{"id": 0}`, `{"id": 1}`, ...
#[must_use]
pub fn numbered_records(count: usize) -> Vec<Record> {
    numbered_batch(0, count)
}

/// Returns a batch of `len` records numbered from `start`.
#[must_use]
pub fn numbered_batch(start: usize, len: usize) -> Batch {
    (start..start + len).map(|id| record(json!({ "id": id }))).collect()
}
