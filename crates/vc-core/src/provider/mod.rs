//! Telephony provider adapter interface
//!
//! Each vendor implements [`ProviderAdapter`]; the call manager never sees
//! vendor wire formats. Adapters own webhook signature verification and fail
//! closed: an unverifiable request yields zero events and a non-2xx status.

mod mock;

pub use mock::{MockProvider, ProviderCommand};

use std::collections::HashMap;

use async_trait::async_trait;

use crate::Result;
use crate::event::{CallId, EndReason, NormalizedEvent, ProviderCallId};

/// Request to place an outbound call
#[derive(Debug, Clone, Default)]
pub struct InitiateCallRequest {
    pub call_id: CallId,
    pub from: String,
    pub to: String,
    pub webhook_url: String,
    /// Echoed back by the provider on every webhook for this call
    pub client_state: HashMap<String, String>,
    /// Message the provider should speak without a media stream (notify mode)
    pub inline_message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitiateStatus {
    Initiated,
    Queued,
}

#[derive(Debug, Clone)]
pub struct InitiateCallResult {
    pub provider_call_id: ProviderCallId,
    pub status: InitiateStatus,
}

#[derive(Debug, Clone)]
pub struct HangupRequest {
    pub call_id: CallId,
    pub provider_call_id: ProviderCallId,
    pub reason: EndReason,
}

#[derive(Debug, Clone)]
pub struct PlayTtsRequest {
    pub call_id: CallId,
    pub provider_call_id: ProviderCallId,
    pub text: String,
    pub voice: Option<String>,
    pub locale: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ListenRequest {
    pub call_id: CallId,
    pub provider_call_id: ProviderCallId,
    pub language: Option<String>,
}

/// Raw inbound webhook as received by the HTTP layer
#[derive(Debug, Clone, Default)]
pub struct WebhookRequest {
    pub method: String,
    /// Full public URL the provider posted to, including the query string
    pub url: String,
    /// Header names are lower-cased
    pub headers: HashMap<String, String>,
    pub query: HashMap<String, String>,
    pub body: String,
}

impl WebhookRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }
}

/// Normalized result of parsing one webhook
#[derive(Debug, Clone)]
pub struct WebhookParseResult {
    pub events: Vec<NormalizedEvent>,
    pub response_body: Option<String>,
    pub response_headers: HashMap<String, String>,
    pub status_code: u16,
}

impl WebhookParseResult {
    pub fn ok(events: Vec<NormalizedEvent>) -> Self {
        Self {
            events,
            response_body: None,
            response_headers: HashMap::new(),
            status_code: 200,
        }
    }

    /// Fail-closed response carrying no events
    pub fn rejected(status_code: u16, reason: impl Into<String>) -> Self {
        Self {
            events: Vec::new(),
            response_body: Some(reason.into()),
            response_headers: HashMap::new(),
            status_code,
        }
    }

    pub fn with_body(mut self, content_type: &str, body: impl Into<String>) -> Self {
        self.response_headers
            .insert("content-type".to_string(), content_type.to_string());
        self.response_body = Some(body.into());
        self
    }
}

/// Contract every telephony vendor satisfies
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Short provider name stored on call records
    fn name(&self) -> &str;

    /// Verify and translate a webhook into normalized events
    fn parse_webhook(&self, request: &WebhookRequest) -> WebhookParseResult;

    async fn initiate_call(&self, request: InitiateCallRequest) -> Result<InitiateCallResult>;

    async fn hangup_call(&self, request: HangupRequest) -> Result<()>;

    async fn play_tts(&self, request: PlayTtsRequest) -> Result<()>;

    async fn start_listening(&self, request: ListenRequest) -> Result<()>;

    async fn stop_listening(&self, request: ListenRequest) -> Result<()>;

    /// Speak a prompt, then open recognition for the reply.
    ///
    /// Adapters whose listen instruction replaces speech still in flight
    /// override this to send both as one instruction.
    async fn prompt_and_listen(&self, prompt: PlayTtsRequest, listen: ListenRequest) -> Result<()> {
        self.play_tts(prompt).await?;
        self.start_listening(listen).await
    }

    /// Whether the adapter speaks the inbound greeting itself as part of
    /// picking up the call
    fn greets_inbound(&self) -> bool {
        false
    }

    /// Whether the provider delivers user speech via a media stream
    fn uses_media_stream(&self) -> bool {
        false
    }

    /// Response sent when the admission policy refuses an inbound call
    fn rejection_response(&self) -> Option<WebhookParseResult> {
        None
    }
}

/// Speech playback over a live media stream
///
/// Implemented by the media bridge; adapters use it to route TTS through the
/// stream instead of vendor call-control verbs.
#[async_trait]
pub trait SpeechOutput: Send + Sync {
    /// Speak `text` on the stream attached to `provider_call_id`.
    ///
    /// Returns `Ok(false)` when no stream is attached to that call.
    async fn speak(&self, provider_call_id: &str, text: &str) -> Result<bool>;

    /// Whether a live stream is attached to `provider_call_id`
    fn has_stream(&self, provider_call_id: &str) -> bool;
}
