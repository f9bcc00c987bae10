//! Structured tool results

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use vc_core::{CallRecord, CallState, ToolResult};

/// Result shape returned by every call tool
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<CallState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Full record snapshot (`get_status` only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call: Option<CallRecord>,
}

impl CallToolResult {
    pub fn ok(call_id: impl Into<String>) -> Self {
        Self {
            success: true,
            call_id: Some(call_id.into()),
            ..Default::default()
        }
    }

    pub fn failure(error: impl std::fmt::Display) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
            ..Default::default()
        }
    }

    pub fn with_call_id(mut self, call_id: impl Into<String>) -> Self {
        self.call_id = Some(call_id.into());
        self
    }

    pub fn with_status(mut self, status: CallState) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_transcript(mut self, transcript: impl Into<String>) -> Self {
        self.transcript = Some(transcript.into());
        self
    }

    pub fn with_call(mut self, record: CallRecord) -> Self {
        self.status = Some(record.state);
        self.call = Some(record);
        self
    }
}

impl From<CallToolResult> for ToolResult {
    fn from(result: CallToolResult) -> Self {
        let is_error = !result.success;
        ToolResult::json(&result, is_error)
    }
}

/// Required string argument, or the failure result to return
pub(crate) fn required_str<'a>(
    input: &'a JsonValue,
    key: &str,
) -> std::result::Result<&'a str, CallToolResult> {
    input[key]
        .as_str()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| CallToolResult::failure(format!("Missing '{}' parameter", key)))
}

/// Optional non-empty string argument
pub(crate) fn optional_str<'a>(input: &'a JsonValue, key: &str) -> Option<&'a str> {
    input[key].as_str().map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_shape() {
        let result = CallToolResult::ok("call-1").with_status(CallState::Listening);
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(
            value,
            json!({"success": true, "callId": "call-1", "status": "listening"})
        );
    }

    #[test]
    fn test_failure_is_tool_error() {
        let tool_result: ToolResult = CallToolResult::failure("Call not found: x").into();
        assert!(tool_result.is_error);
        let value: JsonValue = serde_json::from_str(&tool_result.output).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["error"], "Call not found: x");
    }

    #[test]
    fn test_required_str() {
        let input = json!({"callId": " c1 ", "blank": "  "});
        assert_eq!(required_str(&input, "callId").unwrap(), "c1");
        assert!(required_str(&input, "blank").is_err());
        assert!(required_str(&input, "missing").is_err());
        assert_eq!(optional_str(&input, "blank"), None);
    }
}
