//! Call record types

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::event::{CallDirection, CallId, CallState, EndReason, ProviderCallId};

/// Metadata key for a message spoken once when the call connects
pub const META_INITIAL_MESSAGE: &str = "initialMessage";
/// Metadata key for the outbound call mode
pub const META_MODE: &str = "mode";

/// Who said a transcript line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Bot,
    User,
}

/// One line of the call transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptEntry {
    pub timestamp: DateTime<Utc>,
    pub speaker: Speaker,
    pub text: String,
    pub is_final: bool,
}

/// Outbound call behaviour
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallMode {
    /// Deliver a message, then hang up
    Notify,
    /// Keep the call open for a back-and-forth conversation
    #[default]
    Conversation,
}

/// Durable projection of a call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRecord {
    pub call_id: CallId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_call_id: Option<ProviderCallId>,
    pub provider: String,
    pub direction: CallDirection,
    pub state: CallState,
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_key: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answered_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_reason: Option<EndReason>,
    #[serde(default)]
    pub transcript: Vec<TranscriptEntry>,
    #[serde(default)]
    pub processed_event_ids: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, JsonValue>,
}

impl CallRecord {
    /// Create a record for an outbound call we are about to place
    pub fn outbound(
        provider: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        Self::new(provider, CallDirection::Outbound, CallState::Initiated, from, to)
    }

    /// Create a record for an admitted inbound call
    pub fn inbound(
        provider: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        Self::new(provider, CallDirection::Inbound, CallState::Ringing, from, to)
    }

    fn new(
        provider: impl Into<String>,
        direction: CallDirection,
        state: CallState,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        Self {
            call_id: uuid::Uuid::new_v4().to_string(),
            provider_call_id: None,
            provider: provider.into(),
            direction,
            state,
            from: from.into(),
            to: to.into(),
            session_key: None,
            started_at: Utc::now(),
            answered_at: None,
            ended_at: None,
            end_reason: None,
            transcript: Vec::new(),
            processed_event_ids: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Apply a non-terminal state change, honouring the forward-only order.
    ///
    /// Returns `false` when the transition was ignored.
    pub fn transition(&mut self, next: CallState) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        if next == self.state {
            return true;
        }
        if next.is_terminal() || (self.state.is_conversational() && next.is_conversational()) {
            self.state = next;
            return true;
        }
        match (self.state.rank(), next.rank()) {
            (Some(current), Some(target)) if target > current => {
                self.state = next;
                true
            }
            _ => false,
        }
    }

    /// Move to the answered state, stamping `answered_at` the first time only.
    ///
    /// Returns `true` only for the first answer.
    pub fn mark_answered(&mut self, at: DateTime<Utc>) -> bool {
        if !self.transition(CallState::Answered) || self.answered_at.is_some() {
            return false;
        }
        self.answered_at = Some(at);
        true
    }

    /// Move to a terminal state; `ended_at` and `end_reason` are written once
    pub fn finish(&mut self, reason: EndReason, at: DateTime<Utc>) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.state = reason.into();
        self.ended_at = Some(at);
        self.end_reason = Some(reason);
        true
    }

    pub fn add_transcript(&mut self, speaker: Speaker, text: impl Into<String>) {
        self.transcript.push(TranscriptEntry {
            timestamp: Utc::now(),
            speaker,
            text: text.into(),
            is_final: true,
        });
    }

    pub fn has_processed(&self, event_id: &str) -> bool {
        self.processed_event_ids.iter().any(|id| id == event_id)
    }

    /// Message queued to be spoken once the media path is up
    pub fn initial_message(&self) -> Option<&str> {
        self.metadata
            .get(META_INITIAL_MESSAGE)
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
    }

    pub fn mode(&self) -> CallMode {
        self.metadata
            .get(META_MODE)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbound_starts_initiated() {
        let record = CallRecord::outbound("mock", "+15550000000", "+15551111111");
        assert_eq!(record.state, CallState::Initiated);
        assert_eq!(record.direction, CallDirection::Outbound);
        assert!(!record.call_id.is_empty());
    }

    #[test]
    fn test_transitions_never_go_backwards() {
        let mut record = CallRecord::inbound("mock", "+1", "+2");
        assert!(record.mark_answered(Utc::now()));
        assert!(!record.transition(CallState::Ringing));
        assert_eq!(record.state, CallState::Answered);

        assert!(record.transition(CallState::Speaking));
        assert!(record.transition(CallState::Listening));
        assert!(record.transition(CallState::Speaking));
        assert!(!record.transition(CallState::Active));
    }

    #[test]
    fn test_answered_at_set_once() {
        let mut record = CallRecord::outbound("mock", "+1", "+2");
        let first = Utc::now();
        record.mark_answered(first);
        record.mark_answered(first + chrono::Duration::seconds(5));
        assert_eq!(record.answered_at, Some(first));
    }

    #[test]
    fn test_terminal_is_absorbing() {
        let mut record = CallRecord::outbound("mock", "+1", "+2");
        let at = Utc::now();
        assert!(record.finish(EndReason::Busy, at));
        assert!(!record.finish(EndReason::Completed, Utc::now()));
        assert!(!record.transition(CallState::Answered));

        assert_eq!(record.state, CallState::Busy);
        assert_eq!(record.end_reason, Some(EndReason::Busy));
        assert_eq!(record.ended_at, Some(at));
    }

    #[test]
    fn test_mode_defaults_to_conversation() {
        let mut record = CallRecord::outbound("mock", "+1", "+2");
        assert_eq!(record.mode(), CallMode::Conversation);

        record
            .metadata
            .insert(META_MODE.to_string(), serde_json::json!("notify"));
        assert_eq!(record.mode(), CallMode::Notify);
    }
}
