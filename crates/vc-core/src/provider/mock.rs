//! In-process provider used for development and tests

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{
    HangupRequest, InitiateCallRequest, InitiateCallResult, InitiateStatus, ListenRequest,
    PlayTtsRequest, ProviderAdapter, WebhookParseResult, WebhookRequest,
};
use crate::event::{EndReason, NormalizedEvent};
use crate::{Error, Result};

/// Command issued to the mock provider
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderCommand {
    Initiate { call_id: String, to: String },
    Hangup { provider_call_id: String, reason: EndReason },
    PlayTts { provider_call_id: String, text: String },
    StartListening { provider_call_id: String },
    StopListening { provider_call_id: String },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MockWebhookBody {
    Batch { events: Vec<NormalizedEvent> },
    Single(NormalizedEvent),
}

/// Provider that records commands instead of calling a vendor
#[derive(Default)]
pub struct MockProvider {
    commands: Mutex<Vec<ProviderCommand>>,
    fail_hangup: Mutex<Option<bool>>,
    fail_initiate: Mutex<Option<bool>>,
    inline_greeting: AtomicBool,
    counter: Mutex<u64>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every command issued so far, in order
    pub fn commands(&self) -> Vec<ProviderCommand> {
        self.commands.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn hangup_count(&self) -> usize {
        self.commands()
            .iter()
            .filter(|c| matches!(c, ProviderCommand::Hangup { .. }))
            .count()
    }

    /// Make subsequent hangups fail with the given retryability
    pub fn fail_hangups(&self, retryable: bool) {
        if let Ok(mut fail) = self.fail_hangup.lock() {
            *fail = Some(retryable);
        }
    }

    /// Make subsequent initiate calls fail with the given retryability
    pub fn fail_initiates(&self, retryable: bool) {
        if let Ok(mut fail) = self.fail_initiate.lock() {
            *fail = Some(retryable);
        }
    }

    /// Act like an adapter that speaks the inbound greeting at pickup
    pub fn greet_inbound_inline(&self, enabled: bool) {
        self.inline_greeting.store(enabled, Ordering::SeqCst);
    }

    fn record(&self, command: ProviderCommand) {
        debug!("mock provider: {:?}", command);
        if let Ok(mut commands) = self.commands.lock() {
            commands.push(command);
        }
    }

    fn configured_failure(flag: &Mutex<Option<bool>>, what: &str) -> Result<()> {
        match flag.lock().ok().and_then(|f| *f) {
            Some(retryable) => Err(Error::Provider {
                message: format!("mock {} failure", what),
                retryable,
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ProviderAdapter for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn parse_webhook(&self, request: &WebhookRequest) -> WebhookParseResult {
        match serde_json::from_str::<MockWebhookBody>(&request.body) {
            Ok(MockWebhookBody::Batch { events }) => WebhookParseResult::ok(events),
            Ok(MockWebhookBody::Single(event)) => WebhookParseResult::ok(vec![event]),
            Err(e) => WebhookParseResult::rejected(400, format!("invalid mock payload: {}", e)),
        }
    }

    async fn initiate_call(&self, request: InitiateCallRequest) -> Result<InitiateCallResult> {
        Self::configured_failure(&self.fail_initiate, "initiate")?;
        self.record(ProviderCommand::Initiate {
            call_id: request.call_id.clone(),
            to: request.to.clone(),
        });
        let n = {
            let mut counter = self
                .counter
                .lock()
                .map_err(|_| Error::Other("mock counter poisoned".to_string()))?;
            *counter += 1;
            *counter
        };
        Ok(InitiateCallResult {
            provider_call_id: format!("mock-call-{}", n),
            status: InitiateStatus::Queued,
        })
    }

    async fn hangup_call(&self, request: HangupRequest) -> Result<()> {
        self.record(ProviderCommand::Hangup {
            provider_call_id: request.provider_call_id,
            reason: request.reason,
        });
        Self::configured_failure(&self.fail_hangup, "hangup")
    }

    async fn play_tts(&self, request: PlayTtsRequest) -> Result<()> {
        self.record(ProviderCommand::PlayTts {
            provider_call_id: request.provider_call_id,
            text: request.text,
        });
        Ok(())
    }

    async fn start_listening(&self, request: ListenRequest) -> Result<()> {
        self.record(ProviderCommand::StartListening {
            provider_call_id: request.provider_call_id,
        });
        Ok(())
    }

    async fn stop_listening(&self, request: ListenRequest) -> Result<()> {
        self.record(ProviderCommand::StopListening {
            provider_call_id: request.provider_call_id,
        });
        Ok(())
    }

    fn greets_inbound(&self) -> bool {
        self.inline_greeting.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;

    #[test]
    fn test_parse_batch_and_single() {
        let provider = MockProvider::new();
        let event = NormalizedEvent::new("call-1", EventKind::Answered);

        let single = WebhookRequest {
            body: serde_json::to_string(&event).unwrap(),
            ..Default::default()
        };
        assert_eq!(provider.parse_webhook(&single).events, vec![event.clone()]);

        let batch = WebhookRequest {
            body: serde_json::json!({ "events": [event.clone(), event.clone()] }).to_string(),
            ..Default::default()
        };
        assert_eq!(provider.parse_webhook(&batch).events.len(), 2);
    }

    #[test]
    fn test_malformed_body_fails_closed() {
        let provider = MockProvider::new();
        let result = provider.parse_webhook(&WebhookRequest {
            body: "not json".to_string(),
            ..Default::default()
        });
        assert!(result.events.is_empty());
        assert_eq!(result.status_code, 400);
    }

    #[tokio::test]
    async fn test_records_commands() {
        let provider = MockProvider::new();
        let result = provider
            .initiate_call(InitiateCallRequest {
                call_id: "c1".to_string(),
                to: "+15551234567".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(result.provider_call_id, "mock-call-1");

        provider.fail_hangups(false);
        let err = provider
            .hangup_call(HangupRequest {
                call_id: "c1".to_string(),
                provider_call_id: result.provider_call_id,
                reason: EndReason::HangupBot,
            })
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
        assert_eq!(provider.hangup_count(), 1);
    }
}
