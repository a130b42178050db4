//! # Inbound Message Shapes
//!
//! Message bodies are UTF-8 JSON in one of five shapes, tried in order:
//!
//! 1. `{ "snapshotToken" | "status": <end token> }`: snapshot complete,
//! 2. `{ "rows": [...] }`,
//! 3. `{ "data": [...] }`,
//! 4. a bare array of rows,
//! 5. a bare object, taken as a single row.
//!
//! Shape resolution happens once, in [`detect_shape`], and the rest of the
//! engine matches on the resulting [`InboundMessage`].

use serde_json::{Map, Value};

/// Where the rows of a data message were found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowSource {
    RowsField,
    DataField,
    BareArray,
    SingleObject,
}

/// A classified message body.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// The end-of-snapshot sentinel.
    SnapshotComplete,
    Rows { source: RowSource, rows: Vec<Value> },
    /// A JSON scalar: carries no rows.
    Ignored,
}

impl InboundMessage {
    pub fn row_count(&self) -> usize {
        match self {
            InboundMessage::Rows { rows, .. } => rows.len(),
            InboundMessage::SnapshotComplete | InboundMessage::Ignored => 0,
        }
    }
}

/// Parses `body` and classifies it.
pub fn parse_message(body: &str, end_token: &str) -> Result<InboundMessage, serde_json::Error> {
    let value: Value = serde_json::from_str(body)?;
    Ok(detect_shape(value, end_token))
}

/// Classifies an already-parsed body.
pub fn detect_shape(value: Value, end_token: &str) -> InboundMessage {
    classify(value, Some(end_token))
}

/// Classifies a body from a source without an end-of-snapshot token: the
/// completion check is skipped and every object is data.
pub fn detect_rows(value: Value) -> InboundMessage {
    classify(value, None)
}

fn classify(value: Value, end_token: Option<&str>) -> InboundMessage {
    match value {
        Value::Object(mut object) => {
            if end_token.is_some_and(|token| signals_completion(&object, token)) {
                return InboundMessage::SnapshotComplete;
            }
            if let Some(rows) = take_array(&mut object, "rows") {
                return InboundMessage::Rows {
                    source: RowSource::RowsField,
                    rows,
                };
            }
            if let Some(rows) = take_array(&mut object, "data") {
                return InboundMessage::Rows {
                    source: RowSource::DataField,
                    rows,
                };
            }
            InboundMessage::Rows {
                source: RowSource::SingleObject,
                rows: vec![Value::Object(object)],
            }
        }
        Value::Array(rows) => InboundMessage::Rows {
            source: RowSource::BareArray,
            rows,
        },
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => InboundMessage::Ignored,
    }
}

fn signals_completion(object: &Map<String, Value>, end_token: &str) -> bool {
    ["snapshotToken", "status"]
        .iter()
        .any(|field| matches!(object.get(*field), Some(Value::String(s)) if s == end_token))
}

fn take_array(object: &mut Map<String, Value>, field: &str) -> Option<Vec<Value>> {
    if !matches!(object.get(field), Some(Value::Array(_))) {
        return None;
    }
    match object.remove(field) {
        Some(Value::Array(rows)) => Some(rows),
        _ => None,
    }
}
