//! Call status lookup

use async_trait::async_trait;
use serde_json::{Value, json};
use vc_core::{CallManager, Result, Tool, ToolResult};

use crate::result::{CallToolResult, required_str};

/// Reports the current record of a call, including ended calls still in the
/// store
pub struct GetStatusTool {
    calls: CallManager,
}

impl GetStatusTool {
    pub fn new(calls: CallManager) -> Self {
        Self { calls }
    }

    async fn run(&self, input: &Value) -> CallToolResult {
        let call_id = match required_str(input, "callId") {
            Ok(call_id) => call_id,
            Err(failure) => return failure,
        };

        match self.calls.lookup_call(call_id).await {
            Ok(Some(record)) => CallToolResult::ok(call_id).with_call(record),
            Ok(None) => CallToolResult::failure(format!("Call not found: {}", call_id))
                .with_call_id(call_id),
            Err(e) => CallToolResult::failure(e).with_call_id(call_id),
        }
    }
}

#[async_trait]
impl Tool for GetStatusTool {
    fn name(&self) -> &str {
        "get_status"
    }

    fn description(&self) -> &str {
        "Get the state and transcript of a call."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "callId": {
                    "type": "string",
                    "description": "Call identifier"
                }
            },
            "required": ["callId"]
        })
    }

    async fn execute(&self, input: Value) -> Result<ToolResult> {
        Ok(self.run(&input).await.into())
    }
}
