//! Speak and wait for the caller's reply

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;
use vc_core::{CallManager, Result, Tool, ToolResult};

use crate::result::{CallToolResult, required_str};

/// Upper bound accepted for `timeoutSecs`
const MAX_TIMEOUT_SECS: u64 = 600;

/// Continues a conversation: speaks a prompt, then returns the next final
/// transcript from the caller
pub struct ContinueCallTool {
    calls: CallManager,
}

impl ContinueCallTool {
    pub fn new(calls: CallManager) -> Self {
        Self { calls }
    }

    async fn run(&self, input: &Value) -> CallToolResult {
        let call_id = match required_str(input, "callId") {
            Ok(call_id) => call_id,
            Err(failure) => return failure,
        };
        let message = match required_str(input, "message") {
            Ok(message) => message,
            Err(failure) => return failure.with_call_id(call_id),
        };
        let timeout = input["timeoutSecs"]
            .as_u64()
            .filter(|secs| *secs > 0)
            .map(|secs| Duration::from_secs(secs.min(MAX_TIMEOUT_SECS)));

        debug!(call_id = %call_id, "continue_call tool");
        match self.calls.continue_call(call_id, message, timeout).await {
            Ok(transcript) => CallToolResult::ok(call_id).with_transcript(transcript),
            Err(e) => CallToolResult::failure(e).with_call_id(call_id),
        }
    }
}

#[async_trait]
impl Tool for ContinueCallTool {
    fn name(&self) -> &str {
        "continue_call"
    }

    fn description(&self) -> &str {
        "Say something on an active call and wait for the caller's spoken reply. \
         Returns the reply transcript."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "callId": {
                    "type": "string",
                    "description": "Call identifier returned by initiate_call"
                },
                "message": {
                    "type": "string",
                    "description": "What to say before listening"
                },
                "timeoutSecs": {
                    "type": "integer",
                    "description": "Seconds to wait for a reply"
                }
            },
            "required": ["callId", "message"]
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
    use vc_core::provider::ProviderCommand;
    use vc_core::{EventKind, InitiateOptions, NormalizedEvent};

    async fn answered_call(calls: &CallManager) -> String {
        let record = calls
            .initiate_call("+15551112222", InitiateOptions::default())
            .await
            .unwrap();
        calls
            .process_event(NormalizedEvent::new("", EventKind::Answered).with_provider_call_id("mock-call-1"))
            .await;
        record.call_id
    }

    #[tokio::test]
    async fn test_returns_caller_reply() {
        let (calls, provider) = testing::manager();
        let call_id = answered_call(&calls).await;
        let tool = ContinueCallTool::new(calls.clone());

        let task = {
            let call_id = call_id.clone();
            tokio::spawn(async move {
                tool.execute(json!({"callId": call_id, "message": "Anything else?", "timeoutSecs": 5}))
                    .await
            })
        };

        for _ in 0..100 {
            let listening = provider
                .commands()
                .iter()
                .any(|c| matches!(c, ProviderCommand::StartListening { .. }));
            if listening {
                break;
            }
            tokio::task::yield_now().await;
        }
        calls
            .process_event(
                NormalizedEvent::final_speech("", "no thanks").with_provider_call_id("mock-call-1"),
            )
            .await;

        let result = task.await.unwrap().unwrap();
        assert!(!result.is_error);
        let parsed: CallToolResult = serde_json::from_str(&result.output).unwrap();
        assert_eq!(parsed.call_id.as_deref(), Some(call_id.as_str()));
        assert_eq!(parsed.transcript.as_deref(), Some("no thanks"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_error_result() {
        let (calls, _) = testing::manager();
        let call_id = answered_call(&calls).await;
        let tool = ContinueCallTool::new(calls);

        let result = tool
            .execute(json!({"callId": call_id, "message": "Hello?", "timeoutSecs": 3}))
            .await
            .unwrap();

        assert!(result.is_error);
        let parsed: CallToolResult = serde_json::from_str(&result.output).unwrap();
        assert!(!parsed.success);
        assert!(parsed.error.is_some());
    }

    #[tokio::test]
    async fn test_unknown_call_and_missing_message() {
        let (calls, _) = testing::manager();
        let tool = ContinueCallTool::new(calls);

        let unknown = tool
            .execute(json!({"callId": "nope", "message": "Hi"}))
            .await
            .unwrap();
        assert!(unknown.is_error);

        let missing = tool.execute(json!({"callId": "nope"})).await.unwrap();
        let parsed: CallToolResult = serde_json::from_str(&missing.output).unwrap();
        assert!(parsed.error.unwrap().contains("message"));
    }
}
