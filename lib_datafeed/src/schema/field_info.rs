use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Field name -> node. Root maps are keyed by full path (which equals the
/// field name at the root); `children` maps are keyed by local name.
pub type FieldMap = BTreeMap<String, FieldInfo>;

/// Inferred type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Date,
    Object,
    Array,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Date => "date",
            FieldType::Object => "object",
            FieldType::Array => "array",
        }
    }
}

/// How much the sticky `field_type` of a path can be trusted.
///
/// Inference never changes a type once assigned; this records when that
/// policy may have produced the wrong answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TypeConfidence {
    /// Assigned from a non-null sample and no later sample disagreed.
    #[default]
    Observed,
    /// Assigned from a null sample (null defaults to `string`).
    NullDefaulted,
    /// A later non-null sample inferred a different type.
    Conflicting,
}

/// One node of the inferred schema tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldInfo {
    /// Dot-notation path from the root.
    pub path: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// True once any sample for this path was null or missing a value.
    pub nullable: bool,
    /// Last observed raw value.
    pub sample: Value,
    /// Present only for object-typed values.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children: Option<FieldMap>,
    pub type_confidence: TypeConfidence,
}

impl FieldInfo {
    /// Local (last) segment of the path.
    pub fn name(&self) -> &str {
        self.path.rsplit('.').next().unwrap_or(&self.path)
    }

    pub fn depth(&self) -> usize {
        self.path.matches('.').count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serializes_with_wire_names() {
        let info = FieldInfo {
            path: "order.price".to_string(),
            field_type: FieldType::Number,
            nullable: false,
            sample: json!(10.5),
            children: None,
            type_confidence: TypeConfidence::Observed,
        };
        let value = serde_json::to_value(&info).unwrap();
        assert_eq!(value["type"], "number");
        assert_eq!(value["typeConfidence"], "observed");
        assert!(value.get("children").is_none());
        assert_eq!(info.name(), "price");
        assert_eq!(info.depth(), 1);
    }
}
