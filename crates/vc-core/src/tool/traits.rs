//! The `Tool` seam between an agent and call control

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::Result;

/// Output handed back to the agent.
///
/// Call tools always answer with JSON; `is_error` tells the agent the call
/// operation did not succeed without failing the invocation itself.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub output: String,
    pub is_error: bool,
}

impl ToolResult {
    /// Serialize a structured result as the tool output
    pub fn json<T: Serialize>(value: &T, is_error: bool) -> Self {
        match serde_json::to_string(value) {
            Ok(output) => Self { output, is_error },
            Err(e) => Self::error(format!("Failed to serialize tool output: {}", e)),
        }
    }

    /// Plain-text failure
    pub fn error(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            is_error: true,
        }
    }
}

/// An operation the agent can invoke by name
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    /// Shown to the agent when it picks a tool
    fn description(&self) -> &str;

    /// JSON schema of the input object
    fn input_schema(&self) -> JsonValue;

    /// Run the tool. Call failures belong in the returned `ToolResult`;
    /// `Err` is reserved for failures of the tool machinery itself.
    async fn execute(&self, input: JsonValue) -> Result<ToolResult>;
}
