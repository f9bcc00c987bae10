//! Provider-agnostic call events
//!
//! Provider adapters translate vendor webhooks into [`NormalizedEvent`]s; the
//! call manager only ever sees this shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Locally generated call identifier
pub type CallId = String;

/// Vendor-assigned call identifier
pub type ProviderCallId = String;

/// Direction of a call relative to this gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallDirection {
    Inbound,
    Outbound,
}

/// Call lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallState {
    Initiated,
    Ringing,
    Answered,
    Active,
    Speaking,
    Listening,
    Completed,
    HangupUser,
    HangupBot,
    Timeout,
    Error,
    Failed,
    NoAnswer,
    Busy,
    Voicemail,
}

impl CallState {
    /// Terminal states retire the call from the active registry
    pub fn is_terminal(self) -> bool {
        !matches!(
            self,
            Self::Initiated
                | Self::Ringing
                | Self::Answered
                | Self::Active
                | Self::Speaking
                | Self::Listening
        )
    }

    /// Conversation states may alternate freely
    pub fn is_conversational(self) -> bool {
        matches!(self, Self::Speaking | Self::Listening)
    }

    /// Position in the forward-only lifecycle, `None` for terminal states
    pub(crate) fn rank(self) -> Option<u8> {
        match self {
            Self::Initiated => Some(0),
            Self::Ringing => Some(1),
            Self::Answered => Some(2),
            Self::Active => Some(3),
            Self::Speaking | Self::Listening => Some(4),
            _ => None,
        }
    }
}

impl std::fmt::Display for CallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Initiated => "initiated",
            Self::Ringing => "ringing",
            Self::Answered => "answered",
            Self::Active => "active",
            Self::Speaking => "speaking",
            Self::Listening => "listening",
            Self::Completed => "completed",
            Self::HangupUser => "hangup-user",
            Self::HangupBot => "hangup-bot",
            Self::Timeout => "timeout",
            Self::Error => "error",
            Self::Failed => "failed",
            Self::NoAnswer => "no-answer",
            Self::Busy => "busy",
            Self::Voicemail => "voicemail",
        };
        f.write_str(s)
    }
}

/// Why a call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EndReason {
    Completed,
    HangupUser,
    HangupBot,
    Timeout,
    Error,
    Failed,
    NoAnswer,
    Busy,
    Voicemail,
}

impl From<EndReason> for CallState {
    fn from(reason: EndReason) -> Self {
        match reason {
            EndReason::Completed => Self::Completed,
            EndReason::HangupUser => Self::HangupUser,
            EndReason::HangupBot => Self::HangupBot,
            EndReason::Timeout => Self::Timeout,
            EndReason::Error => Self::Error,
            EndReason::Failed => Self::Failed,
            EndReason::NoAnswer => Self::NoAnswer,
            EndReason::Busy => Self::Busy,
            EndReason::Voicemail => Self::Voicemail,
        }
    }
}

impl std::fmt::Display for EndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        CallState::from(*self).fmt(f)
    }
}

/// Event payload, keyed by `type` on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventKind {
    #[serde(rename = "call.initiated")]
    Initiated,
    #[serde(rename = "call.ringing")]
    Ringing,
    #[serde(rename = "call.answered")]
    Answered,
    #[serde(rename = "call.active")]
    Active,
    #[serde(rename = "call.speaking")]
    Speaking { text: String },
    #[serde(rename = "call.speech")]
    Speech {
        transcript: String,
        #[serde(rename = "isFinal")]
        is_final: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        confidence: Option<f32>,
    },
    #[serde(rename = "call.silence")]
    Silence {
        #[serde(rename = "durationMs")]
        duration_ms: u64,
    },
    #[serde(rename = "call.dtmf")]
    Dtmf { digits: String },
    #[serde(rename = "call.ended")]
    Ended { reason: EndReason },
    #[serde(rename = "call.error")]
    Error { error: String, retryable: bool },
}

impl EventKind {
    /// Wire name of the event type
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Initiated => "call.initiated",
            Self::Ringing => "call.ringing",
            Self::Answered => "call.answered",
            Self::Active => "call.active",
            Self::Speaking { .. } => "call.speaking",
            Self::Speech { .. } => "call.speech",
            Self::Silence { .. } => "call.silence",
            Self::Dtmf { .. } => "call.dtmf",
            Self::Ended { .. } => "call.ended",
            Self::Error { .. } => "call.error",
        }
    }
}

/// A provider-agnostic telephony occurrence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedEvent {
    /// Globally unique event identity, used for deduplication
    pub id: String,
    pub call_id: CallId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_call_id: Option<ProviderCallId>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<CallDirection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl NormalizedEvent {
    /// Create an event with a fresh id and the current timestamp
    pub fn new(call_id: impl Into<CallId>, kind: EventKind) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            call_id: call_id.into(),
            provider_call_id: None,
            timestamp: Utc::now(),
            direction: None,
            from: None,
            to: None,
            kind,
        }
    }

    /// Set an explicit event id
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Attach the vendor call id
    pub fn with_provider_call_id(mut self, provider_call_id: impl Into<ProviderCallId>) -> Self {
        self.provider_call_id = Some(provider_call_id.into());
        self
    }

    /// Mark the event as the first sighting of an inbound call
    pub fn inbound(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.direction = Some(CallDirection::Inbound);
        self.from = Some(from.into());
        self.to = Some(to.into());
        self
    }

    /// Final user speech
    pub fn final_speech(call_id: impl Into<CallId>, transcript: impl Into<String>) -> Self {
        Self::new(
            call_id,
            EventKind::Speech {
                transcript: transcript.into(),
                is_final: true,
                confidence: None,
            },
        )
    }

    /// Call ended
    pub fn ended(call_id: impl Into<CallId>, reason: EndReason) -> Self {
        Self::new(call_id, EventKind::Ended { reason })
    }
}
