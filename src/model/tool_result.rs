//! `ToolResult`: the outcome of one tool execution.

use serde::{Deserialize, Serialize};

/// Either plain text or a structured JSON payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolOutput {
    Text(String),
    Json(serde_json::Value),
}

impl ToolOutput {
    /// The stringified length used as "size" throughout budgeting.
    pub fn stringified_len(&self) -> usize {
        self.stringified().len()
    }

    pub fn stringified(&self) -> String {
        match self {
            ToolOutput::Text(s) => s.clone(),
            ToolOutput::Json(v) => serde_json::to_string(v).unwrap_or_default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub tool_name: String,
    pub output: ToolOutput,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stringified_len_measures_text_directly() {
        let out = ToolOutput::Text("hello".into());
        assert_eq!(out.stringified_len(), 5);
    }

    #[test]
    fn stringified_len_measures_json_as_compact_string() {
        let out = ToolOutput::Json(serde_json::json!({"a": 1}));
        assert_eq!(out.stringified(), "{\"a\":1}");
        assert_eq!(out.stringified_len(), 7);
    }
}
