//! vc-core: Voice Call Gateway Core Library
//!
//! Provider-agnostic call events and records, the provider adapter contract,
//! the call manager state machine, call persistence, configuration, and the
//! tool system used to expose calls to an agent.

pub mod config;
pub mod error;
pub mod event;
pub mod manager;
pub mod provider;
pub mod record;
pub mod store;
pub mod tool;

pub use config::{InboundPolicy, ProviderKind, VoiceCallConfig};
pub use error::{Error, Result};
pub use event::{
    CallDirection, CallId, CallState, EndReason, EventKind, NormalizedEvent, ProviderCallId,
};
pub use manager::{
    AdmissionPolicy, CallManager, CallRegistry, EventOutcome, InitiateOptions, ManagerSettings,
};
pub use provider::{
    MockProvider, ProviderAdapter, SpeechOutput, WebhookParseResult, WebhookRequest,
};
pub use record::{CallMode, CallRecord, Speaker, TranscriptEntry};
pub use store::{CallStore, MemoryCallStore, SqliteCallStore};
pub use tool::{Tool, ToolDefinition, ToolManager, ToolResult};
