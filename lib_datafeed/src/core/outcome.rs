use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Result of one snapshot acquisition attempt. Produced exactly once per
/// `fetch_snapshot` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ConnectionOutcome {
    pub fn success(rows: Vec<Value>) -> Self {
        Self {
            success: true,
            data: Some(rows),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }

    /// Rows delivered, empty on failure.
    pub fn rows(&self) -> &[Value] {
        self.data.as_deref().unwrap_or_default()
    }

    pub fn into_rows(self) -> Vec<Value> {
        self.data.unwrap_or_default()
    }
}
