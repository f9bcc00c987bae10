//! Twilio webhook normalization
//!
//! Twilio posts form-encoded parameters for status callbacks, the answer
//! URL and `<Gather>` results. Event ids are derived from the request's
//! `I-Twilio-Idempotency-Token`, which Twilio reuses when it retries a
//! delivery, so retries dedupe downstream while separate requests never do.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use vc_core::event::{CallDirection, EndReason, EventKind, NormalizedEvent};

/// Query parameter carrying our call id on outbound webhooks
pub const CALL_ID_PARAM: &str = "callId";

/// Query parameter telling which Twilio hook a request came from
pub const FLOW_PARAM: &str = "flow";

/// Header Twilio sets once per webhook request and repeats on retries
pub const IDEMPOTENCY_HEADER: &str = "i-twilio-idempotency-token";

/// Which Twilio hook delivered the webhook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookFlow {
    /// TwiML fetch when the call connects (also inbound voice URL)
    Answer,
    /// `StatusCallback` notification
    Status,
    /// `<Gather>` action with a speech result
    Gather,
}

impl WebhookFlow {
    pub fn from_query(query: &HashMap<String, String>) -> Self {
        match query.get(FLOW_PARAM).map(String::as_str) {
            Some("status") => Self::Status,
            Some("gather") => Self::Gather,
            _ => Self::Answer,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Answer => "answer",
            Self::Status => "status",
            Self::Gather => "gather",
        }
    }
}

/// Decoded form body, in wire order
pub fn parse_form(body: &str) -> Vec<(String, String)> {
    url::form_urlencoded::parse(body.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

/// Webhook parameters with convenient lookups
pub struct TwilioParams {
    pairs: Vec<(String, String)>,
}

impl TwilioParams {
    pub fn new(pairs: Vec<(String, String)>) -> Self {
        Self { pairs }
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .filter(|v| !v.is_empty())
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.get("Timestamp")
            .and_then(|t| DateTime::parse_from_rfc2822(t).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(Utc::now)
    }

    /// Stable digest of the parameter set
    fn fingerprint(&self, flow: WebhookFlow) -> String {
        let mut sorted: Vec<&(String, String)> = self.pairs.iter().collect();
        sorted.sort();

        let mut hasher = Sha256::new();
        hasher.update(flow.as_str().as_bytes());
        for (key, value) in sorted {
            hasher.update(key.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
            hasher.update(b"&");
        }
        hex::encode(&hasher.finalize()[..16])
    }
}

fn token_digest(flow: WebhookFlow, token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(flow.as_str().as_bytes());
    hasher.update(b":");
    hasher.update(token.as_bytes());
    hex::encode(&hasher.finalize()[..16])
}

/// Map a Twilio `CallStatus` onto an event kind
pub fn status_event(status: &str) -> Option<EventKind> {
    let kind = match status {
        "queued" | "initiated" => EventKind::Initiated,
        "ringing" => EventKind::Ringing,
        "in-progress" => EventKind::Answered,
        "completed" => EventKind::Ended {
            reason: EndReason::Completed,
        },
        "busy" => EventKind::Ended {
            reason: EndReason::Busy,
        },
        "no-answer" => EventKind::Ended {
            reason: EndReason::NoAnswer,
        },
        "failed" => EventKind::Ended {
            reason: EndReason::Failed,
        },
        "canceled" => EventKind::Ended {
            reason: EndReason::HangupBot,
        },
        _ => return None,
    };
    Some(kind)
}

/// Translate one verified webhook into normalized events
///
/// Without an idempotency token, lifecycle events fall back to a digest of
/// the parameters (a call reports each status once) and caller input gets a
/// fresh id.
pub fn normalize(
    params: &TwilioParams,
    query: &HashMap<String, String>,
    flow: WebhookFlow,
    idempotency_token: Option<&str>,
) -> Vec<NormalizedEvent> {
    let Some(call_sid) = params.get("CallSid") else {
        return Vec::new();
    };
    let call_id = query.get(CALL_ID_PARAM).cloned().unwrap_or_default();
    let request_key = idempotency_token
        .filter(|token| !token.is_empty())
        .map(|token| token_digest(flow, token));
    let timestamp = params.timestamp();
    let inbound = call_id.is_empty() && params.get("Direction") == Some("inbound");

    let make = |tag: &str, kind: EventKind| {
        let key = match (&request_key, tag) {
            (Some(key), _) => Some(key.clone()),
            (None, "status") => Some(params.fingerprint(flow)),
            (None, _) => None,
        };
        let mut event =
            NormalizedEvent::new(call_id.clone(), kind).with_provider_call_id(call_sid);
        if let Some(key) = key {
            event = event.with_id(format!("twilio-{}-{}", key, tag));
        }
        event.timestamp = timestamp;
        if inbound {
            event = event.inbound(
                params.get("From").unwrap_or_default(),
                params.get("To").unwrap_or_default(),
            );
        } else {
            event.direction = Some(CallDirection::Outbound);
        }
        event
    };

    let speech = params.get("SpeechResult");
    let digits = params.get("Digits");
    let mut events = Vec::new();

    if let Some(status) = params.get("CallStatus") {
        // a gather result arrives mid-call and carries no lifecycle change
        let mid_call = status == "in-progress" && (speech.is_some() || digits.is_some());
        if !mid_call {
            if let Some(kind) = status_event(status) {
                events.push(make("status", kind));
            }
        }
    }

    if let Some(transcript) = speech {
        let confidence = params.get("Confidence").and_then(|c| c.parse::<f32>().ok());
        events.push(make(
            "speech",
            EventKind::Speech {
                transcript: transcript.to_string(),
                is_final: true,
                confidence,
            },
        ));
    }

    if let Some(digits) = digits {
        events.push(make(
            "dtmf",
            EventKind::Dtmf {
                digits: digits.to_string(),
            },
        ));
    }

    events
}
