//! # Deduplication Buffer
//!
//! Collapses repeated snapshot rows sharing a key-column value. The latest row
//! for a key replaces the earlier one *in place*, so a grid bound to the
//! buffer's output never sees a row jump position. Rows without a key value
//! are appended unconditionally.

use std::collections::HashMap;

use serde_json::Value;

/// Keyed accumulator with stable insertion order.
#[derive(Debug, Default)]
pub struct DeduplicationBuffer {
    rows: Vec<Value>,
    /// Stringified key value -> slot in `rows`.
    slots: HashMap<String, usize>,
}

impl DeduplicationBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `row`, replacing the row previously stored under `key`.
    ///
    /// A `None` key always appends.
    pub fn upsert(&mut self, row: Value, key: Option<String>) {
        let Some(key) = key else {
            self.rows.push(row);
            return;
        };

        match self.slots.get(&key) {
            Some(&slot) => self.rows[slot] = row,
            None => {
                self.slots.insert(key, self.rows.len());
                self.rows.push(row);
            }
        }
    }

    /// Extracts the key of `row` from `key_column` (if configured) and upserts it.
    pub fn merge(&mut self, row: Value, key_column: Option<&str>) {
        let key = key_column.and_then(|column| key_of(&row, column));
        self.upsert(row, key);
    }

    /// Rows in first-seen order.
    pub fn materialize(&self) -> Vec<Value> {
        self.rows.clone()
    }

    /// Consumes the buffer, keeping at most `limit` rows in first-seen order.
    pub fn into_rows(self, limit: usize) -> Vec<Value> {
        let mut rows = self.rows;
        rows.truncate(limit);
        rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Stringified value of `column` in `row`, or `None` when absent or null.
///
/// Strings are used verbatim and other values use their JSON rendering, so
/// `7` and `"7"` share a key.
pub fn key_of(row: &Value, column: &str) -> Option<String> {
    match row.get(column)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn latest_value_keeps_original_slot() {
        let mut buffer = DeduplicationBuffer::new();
        buffer.merge(json!({"id": 1, "v": "a"}), Some("id"));
        buffer.merge(json!({"id": 2, "v": "b"}), Some("id"));
        buffer.merge(json!({"id": 1, "v": "c"}), Some("id"));

        assert_eq!(buffer.len(), 2);
        assert_eq!(
            buffer.materialize(),
            vec![json!({"id": 1, "v": "c"}), json!({"id": 2, "v": "b"})]
        );
    }

    #[test]
    fn without_key_column_nothing_collapses() {
        let mut buffer = DeduplicationBuffer::new();
        for _ in 0..4 {
            buffer.merge(json!({"id": 1}), None);
        }
        assert_eq!(buffer.len(), 4);
    }

    #[test]
    fn rows_missing_the_key_are_appended() {
        let mut buffer = DeduplicationBuffer::new();
        buffer.merge(json!({"id": null, "v": 1}), Some("id"));
        buffer.merge(json!({"v": 2}), Some("id"));
        buffer.merge(json!({"id": "x", "v": 3}), Some("id"));
        buffer.merge(json!({"id": "x", "v": 4}), Some("id"));

        let rows = buffer.materialize();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2], json!({"id": "x", "v": 4}));
    }

    #[test]
    fn into_rows_truncates_in_insertion_order() {
        let mut buffer = DeduplicationBuffer::new();
        for i in 0..5 {
            buffer.merge(json!({"n": i}), None);
        }
        assert_eq!(buffer.into_rows(2), vec![json!({"n": 0}), json!({"n": 1})]);
    }

    #[test]
    fn numeric_and_string_keys_stringify_the_same() {
        assert_eq!(key_of(&json!({"id": 7}), "id"), Some("7".to_string()));
        assert_eq!(key_of(&json!({"id": "7"}), "id"), Some("7".to_string()));
        assert_eq!(key_of(&json!({"other": 7}), "id"), None);
    }
}
