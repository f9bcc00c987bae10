//! One-way speech on an active call

use async_trait::async_trait;
use serde_json::{Value, json};
use vc_core::{CallManager, Result, Tool, ToolResult};

use crate::result::{CallToolResult, required_str};

pub struct SpeakToUserTool {
    calls: CallManager,
}

impl SpeakToUserTool {
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

        match self.calls.speak(call_id, message).await {
            Ok(()) => CallToolResult::ok(call_id),
            Err(e) => CallToolResult::failure(e).with_call_id(call_id),
        }
    }
}

#[async_trait]
impl Tool for SpeakToUserTool {
    fn name(&self) -> &str {
        "speak_to_user"
    }

    fn description(&self) -> &str {
        "Say something on an active call without waiting for a reply."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "callId": {
                    "type": "string",
                    "description": "Call identifier"
                },
                "message": {
                    "type": "string",
                    "description": "What to say"
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
    use vc_core::{InitiateOptions, Speaker};

    #[tokio::test]
    async fn test_speaks_and_records_transcript() {
        let (calls, provider) = testing::manager();
        let record = calls
            .initiate_call("+15551112222", InitiateOptions::default())
            .await
            .unwrap();
        let tool = SpeakToUserTool::new(calls.clone());

        let result = tool
            .execute(json!({"callId": record.call_id, "message": "One moment"}))
            .await
            .unwrap();

        assert!(!result.is_error);
        assert!(provider.commands().contains(&ProviderCommand::PlayTts {
            provider_call_id: "mock-call-1".to_string(),
            text: "One moment".to_string(),
        }));
        let current = calls.get_call(&record.call_id).await.unwrap();
        assert_eq!(current.transcript[0].speaker, Speaker::Bot);
        assert_eq!(current.transcript[0].text, "One moment");
    }

    #[tokio::test]
    async fn test_unknown_call() {
        let (calls, provider) = testing::manager();
        let tool = SpeakToUserTool::new(calls);

        let result = tool
            .execute(json!({"callId": "missing", "message": "Hello"}))
            .await
            .unwrap();

        assert!(result.is_error);
        assert!(provider.commands().is_empty());
    }
}
