//! Place an outbound call

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;
use vc_core::{CallManager, CallMode, InitiateOptions, Result, Tool, ToolResult};

use crate::result::{CallToolResult, optional_str};

/// Starts a phone call to a user
pub struct InitiateCallTool {
    calls: CallManager,
    default_to: Option<String>,
}

impl InitiateCallTool {
    pub fn new(calls: CallManager) -> Self {
        Self {
            calls,
            default_to: None,
        }
    }

    /// Number dialed when the agent does not pass `to`
    pub fn with_default_to(mut self, to: Option<String>) -> Self {
        self.default_to = to;
        self
    }

    async fn run(&self, input: &Value) -> CallToolResult {
        let Some(to) = optional_str(input, "to").or(self.default_to.as_deref()) else {
            return CallToolResult::failure("Missing 'to' parameter and no default number configured");
        };
        let mode = match optional_str(input, "mode") {
            None => None,
            Some("notify") => Some(CallMode::Notify),
            Some("conversation") => Some(CallMode::Conversation),
            Some(other) => return CallToolResult::failure(format!("Unknown mode: {}", other)),
        };

        let options = InitiateOptions {
            message: optional_str(input, "message").map(str::to_string),
            mode,
            session_key: optional_str(input, "sessionKey").map(str::to_string),
        };

        debug!(to = %to, "initiate_call tool");
        match self.calls.initiate_call(to, options).await {
            Ok(record) => CallToolResult::ok(record.call_id).with_status(record.state),
            Err(e) => CallToolResult::failure(e),
        }
    }
}

#[async_trait]
impl Tool for InitiateCallTool {
    fn name(&self) -> &str {
        "initiate_call"
    }

    fn description(&self) -> &str {
        "Place a phone call to the user. In notify mode the message is spoken and the call ends; \
         in conversation mode the message opens a conversation continued with continue_call."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "to": {
                    "type": "string",
                    "description": "Phone number to call in E.164 format. Defaults to the configured number"
                },
                "message": {
                    "type": "string",
                    "description": "What to say when the call connects"
                },
                "mode": {
                    "type": "string",
                    "enum": ["notify", "conversation"],
                    "description": "notify: speak and hang up; conversation: keep the line open"
                },
                "sessionKey": {
                    "type": "string",
                    "description": "Agent session this call belongs to"
                }
            }
        })
    }

    async fn execute(&self, input: Value) -> Result<ToolResult> {
        Ok(self.run(&input).await.into())
    }
}
