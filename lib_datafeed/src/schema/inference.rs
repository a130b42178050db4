use std::collections::btree_map::Entry;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use super::field_info::{FieldInfo, FieldMap, FieldType, TypeConfidence};

/// ISO-8601 date-time prefix: `YYYY-MM-DDTHH:MM:SS`.
static ISO_DATETIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}").expect("ISO date-time pattern is valid")
});

/// Exactly 13 digits: an epoch-millisecond timestamp rendered as text.
static EPOCH_MILLIS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{13}$").expect("epoch-millis pattern is valid"));

/// Infers a merged schema from `rows`.
pub fn infer_fields(rows: &[Value]) -> FieldMap {
    let mut fields = FieldMap::new();
    merge_fields(&mut fields, rows);
    fields
}

/// Extends an existing accumulator with `rows`.
///
/// Non-object rows carry no named fields and are skipped.
pub fn merge_fields(fields: &mut FieldMap, rows: &[Value]) {
    for row in rows {
        match row {
            Value::Object(object) => walk(fields, object, ""),
            other => tracing::debug!(kind = kind_of(other), "Skipping non-object row during inference"),
        }
    }
}

fn walk(fields: &mut FieldMap, object: &Map<String, Value>, prefix: &str) {
    for (name, value) in object {
        let path = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}.{name}")
        };
        observe(fields, name, path, value);
    }
}

fn observe(fields: &mut FieldMap, name: &str, path: String, value: &Value) {
    let info = match fields.entry(name.to_string()) {
        Entry::Vacant(slot) => {
            let mut info = FieldInfo {
                path,
                field_type: infer_type(value),
                nullable: value.is_null(),
                sample: value.clone(),
                children: None,
                type_confidence: if value.is_null() {
                    TypeConfidence::NullDefaulted
                } else {
                    TypeConfidence::Observed
                },
            };
            if let Value::Object(object) = value {
                let mut children = FieldMap::new();
                walk(&mut children, object, &info.path);
                info.children = Some(children);
            }
            slot.insert(info);
            return;
        }
        Entry::Occupied(slot) => slot.into_mut(),
    };

    // Existing path: nullability only widens, the type never changes.
    if value.is_null() {
        info.nullable = true;
    } else if infer_type(value) != info.field_type {
        if info.type_confidence != TypeConfidence::Conflicting {
            tracing::debug!(
                path = %info.path,
                kept = info.field_type.as_str(),
                seen = infer_type(value).as_str(),
                "Sticky type kept despite differing sample"
            );
        }
        info.type_confidence = TypeConfidence::Conflicting;
    }
    info.sample = value.clone();

    if let Value::Object(object) = value {
        let children = info.children.get_or_insert_with(FieldMap::new);
        walk(children, object, &info.path);
    }
}

/// Type tag of a single value.
///
/// Null maps to `string` on purpose; there is no null tag.
pub fn infer_type(value: &Value) -> FieldType {
    match value {
        Value::Null => FieldType::String,
        Value::Array(_) => FieldType::Array,
        Value::Bool(_) => FieldType::Boolean,
        Value::Number(_) => FieldType::Number,
        Value::Object(_) => FieldType::Object,
        Value::String(s) if is_date_string(s) => FieldType::Date,
        Value::String(_) => FieldType::String,
    }
}

/// Date heuristic for string samples.
pub fn is_date_string(s: &str) -> bool {
    ISO_DATETIME.is_match(s) || EPOCH_MILLIS.is_match(s)
}

/// Every node of the tree, depth-first, parents before their children.
pub fn flatten_fields(fields: &FieldMap) -> Vec<&FieldInfo> {
    let mut out = Vec::new();
    collect(fields, &mut out);
    out
}

fn collect<'a>(fields: &'a FieldMap, out: &mut Vec<&'a FieldInfo>) {
    for info in fields.values() {
        out.push(info);
        if let Some(children) = &info.children {
            collect(children, out);
        }
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
