//! Hang up a call

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;
use vc_core::{CallManager, Result, Tool, ToolResult};

use crate::result::{CallToolResult, required_str};

pub struct EndCallTool {
    calls: CallManager,
}

impl EndCallTool {
    pub fn new(calls: CallManager) -> Self {
        Self { calls }
    }

    async fn run(&self, input: &Value) -> CallToolResult {
        let call_id = match required_str(input, "callId") {
            Ok(call_id) => call_id,
            Err(failure) => return failure,
        };

        debug!(call_id = %call_id, "end_call tool");
        if let Err(e) = self.calls.end_call(call_id).await {
            return CallToolResult::failure(e).with_call_id(call_id);
        }

        let result = CallToolResult::ok(call_id);
        match self.calls.lookup_call(call_id).await {
            Ok(Some(record)) => result.with_status(record.state),
            _ => result,
        }
    }
}

#[async_trait]
impl Tool for EndCallTool {
    fn name(&self) -> &str {
        "end_call"
    }

    fn description(&self) -> &str {
        "Hang up an active call."
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use vc_core::{CallState, InitiateOptions};

    #[tokio::test]
    async fn test_end_call_reports_final_state() {
        let (calls, provider) = testing::manager();
        let record = calls
            .initiate_call("+15551112222", InitiateOptions::default())
            .await
            .unwrap();
        let tool = EndCallTool::new(calls.clone());

        let result = tokio_test::assert_ok!(tool.execute(json!({"callId": record.call_id})).await);

        assert!(!result.is_error);
        let parsed: CallToolResult = serde_json::from_str(&result.output).unwrap();
        assert_eq!(parsed.status, Some(CallState::HangupBot));
        assert_eq!(provider.hangup_count(), 1);
        assert!(calls.get_call(&record.call_id).await.is_none());
    }

    #[tokio::test]
    async fn test_missing_call_id() {
        let (calls, _) = testing::manager();
        let tool = EndCallTool::new(calls);

        let result = tool.execute(json!({})).await.unwrap();
        assert!(result.is_error);
    }
}
