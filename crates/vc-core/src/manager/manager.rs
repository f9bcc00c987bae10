//! Call manager: applies normalized events to call records

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, error, info, warn};

use crate::config::VoiceCallConfig;
use crate::event::{CallDirection, CallId, CallState, EndReason, EventKind, NormalizedEvent};
use crate::manager::policy::AdmissionPolicy;
use crate::manager::registry::CallRegistry;
use crate::provider::{
    HangupRequest, InitiateCallRequest, ListenRequest, PlayTtsRequest, ProviderAdapter,
};
use crate::record::{CallMode, CallRecord, META_INITIAL_MESSAGE, META_MODE, Speaker};
use crate::store::CallStore;
use crate::{Error, Result};

/// Tunables for a [`CallManager`]
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub from_number: String,
    pub webhook_url: String,
    pub max_duration: Duration,
    pub transcript_timeout: Duration,
    pub max_concurrent_calls: usize,
    pub admission: AdmissionPolicy,
    pub default_mode: CallMode,
    pub notify_hangup_delay: Duration,
    pub inbound_greeting: Option<String>,
}

impl ManagerSettings {
    pub fn from_config(config: &VoiceCallConfig) -> Self {
        Self {
            from_number: config.from_number.clone(),
            webhook_url: config.webhook_url(),
            max_duration: Duration::from_secs(config.max_duration_secs),
            transcript_timeout: Duration::from_secs(config.transcript_timeout_secs),
            max_concurrent_calls: config.max_concurrent_calls,
            admission: AdmissionPolicy::from_config(&config.inbound),
            default_mode: config.outbound.default_mode,
            notify_hangup_delay: Duration::from_secs(config.outbound.notify_hangup_delay_secs),
            inbound_greeting: config.inbound.greeting.clone(),
        }
    }
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self::from_config(&VoiceCallConfig::default())
    }
}

/// Options for an outbound call
#[derive(Debug, Clone, Default)]
pub struct InitiateOptions {
    /// Spoken once the call connects
    pub message: Option<String>,
    pub mode: Option<CallMode>,
    /// Correlates the call with an agent session
    pub session_key: Option<String>,
}

/// What `process_event` did with an event
#[derive(Debug, Clone, PartialEq)]
pub enum EventOutcome {
    /// Applied; carries the record snapshot after the event
    Applied(CallRecord),
    /// Event id already applied
    Duplicate,
    /// Inbound call refused by the admission policy
    Rejected,
    /// Event for a call that already reached a terminal state
    CallEnded,
    /// Event for a call this manager never knew
    UnknownCall,
}

impl EventOutcome {
    pub fn record(&self) -> Option<&CallRecord> {
        match self {
            Self::Applied(record) => Some(record),
            _ => None,
        }
    }
}

/// Follow-up work decided while applying an event under the registry lock
#[derive(Default)]
struct Effects {
    start_timer: bool,
    speak_initial: bool,
}

struct Inner {
    settings: ManagerSettings,
    registry: Mutex<CallRegistry>,
    provider: Arc<dyn ProviderAdapter>,
    store: Arc<dyn CallStore>,
}

/// Owns the call lifecycle.
///
/// All mutation goes through one registry lock, so events are applied one at
/// a time and each call has a single writer. Only provider I/O happens
/// outside the lock.
#[derive(Clone)]
pub struct CallManager {
    inner: Arc<Inner>,
}

impl CallManager {
    pub fn new(
        settings: ManagerSettings,
        registry: CallRegistry,
        provider: Arc<dyn ProviderAdapter>,
        store: Arc<dyn CallStore>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                settings,
                registry: Mutex::new(registry),
                provider,
                store,
            }),
        }
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.inner.settings
    }

    pub fn provider(&self) -> &Arc<dyn ProviderAdapter> {
        &self.inner.provider
    }

    /// Apply one normalized event.
    ///
    /// Idempotent on `event.id`. Unknown non-inbound calls are never
    /// fabricated; events for ended calls are no-ops.
    pub async fn process_event(&self, mut event: NormalizedEvent) -> EventOutcome {
        let mut registry = self.inner.registry.lock().await;

        if registry.has_seen(&event.id) {
            debug!(event_id = %event.id, "Duplicate event ignored");
            return EventOutcome::Duplicate;
        }

        let call_id = match registry.resolve(&event.call_id, event.provider_call_id.as_deref()) {
            Some(call_id) => call_id,
            None if registry.is_retired(&event.call_id, event.provider_call_id.as_deref()) => {
                debug!(
                    event_id = %event.id,
                    event_type = event.kind.type_name(),
                    "Event for ended call ignored"
                );
                return EventOutcome::CallEnded;
            }
            None => match self.admit_inbound(&mut registry, &event) {
                Some(Ok(call_id)) => call_id,
                Some(Err(())) => {
                    registry.mark_seen(&event.id);
                    return EventOutcome::Rejected;
                }
                None => {
                    debug!(
                        call_id = %event.call_id,
                        event_type = event.kind.type_name(),
                        "Event for unknown call dropped"
                    );
                    return EventOutcome::UnknownCall;
                }
            },
        };
        event.call_id = call_id.clone();
        registry.mark_seen(&event.id);

        let mut newly_indexed = None;
        let Some(record) = registry.get_mut(&call_id) else {
            return EventOutcome::UnknownCall;
        };
        if record.has_processed(&event.id) {
            return EventOutcome::Duplicate;
        }
        if record.provider_call_id.is_none() {
            if let Some(provider_call_id) = &event.provider_call_id {
                record.provider_call_id = Some(provider_call_id.clone());
                newly_indexed = Some(provider_call_id.clone());
            }
        }
        record.processed_event_ids.push(event.id.clone());

        let effects = self.apply(record, &event);
        let snapshot = record.clone();

        if let Some(provider_call_id) = newly_indexed {
            registry.index_provider_call(&provider_call_id, &call_id);
        }

        match &event.kind {
            EventKind::Speech {
                transcript,
                is_final: true,
                ..
            } => {
                registry.resolve_waiter(&call_id, transcript);
            }
            EventKind::Ended { .. } | EventKind::Error { retryable: false, .. } => {
                registry.retire(&call_id);
            }
            _ => {}
        }

        if effects.start_timer && !snapshot.is_terminal() && !registry.has_timer(&call_id) {
            self.start_max_duration_timer(&mut registry, &call_id, self.inner.settings.max_duration);
        }
        if effects.speak_initial {
            if let Some(provider_call_id) = snapshot.provider_call_id.clone() {
                let manager = self.clone();
                tokio::spawn(async move {
                    if let Err(e) = manager.speak_initial_message(&provider_call_id).await {
                        warn!("Failed to speak initial message: {}", e);
                    }
                });
            }
        }

        self.persist(&snapshot).await;
        EventOutcome::Applied(snapshot)
    }

    /// Run the admission policy for a first-seen inbound event.
    ///
    /// `None` when the event is not an inbound first sighting at all.
    fn admit_inbound(
        &self,
        registry: &mut CallRegistry,
        event: &NormalizedEvent,
    ) -> Option<std::result::Result<CallId, ()>> {
        if event.direction != Some(CallDirection::Inbound) {
            return None;
        }
        let provider_call_id = event.provider_call_id.as_ref()?;
        let from = event.from.clone().unwrap_or_default();

        if !self.inner.settings.admission.admits(&from) {
            warn!(
                from = %from,
                policy = ?self.inner.settings.admission.mode(),
                "Inbound call rejected by admission policy"
            );
            return Some(Err(()));
        }

        let mut record = CallRecord::inbound(
            self.inner.provider.name(),
            from,
            event.to.clone().unwrap_or_default(),
        );
        record.provider_call_id = Some(provider_call_id.clone());
        if let Some(greeting) = &self.inner.settings.inbound_greeting {
            if self.inner.provider.greets_inbound() {
                record.add_transcript(Speaker::Bot, greeting.clone());
            } else {
                record.metadata.insert(
                    META_INITIAL_MESSAGE.to_string(),
                    serde_json::Value::String(greeting.clone()),
                );
            }
        }
        let call_id = record.call_id.clone();
        info!(
            call_id = %call_id,
            provider_call_id = %provider_call_id,
            from = %record.from,
            "Inbound call admitted"
        );
        registry.insert(record);
        Some(Ok(call_id))
    }

    /// State transition for one event
    fn apply(&self, record: &mut CallRecord, event: &NormalizedEvent) -> Effects {
        let mut effects = Effects::default();
        match &event.kind {
            EventKind::Initiated => {
                record.transition(CallState::Initiated);
            }
            EventKind::Ringing => {
                record.transition(CallState::Ringing);
            }
            EventKind::Answered => {
                if record.mark_answered(event.timestamp) {
                    info!(call_id = %record.call_id, "Call answered");
                    effects.start_timer = true;
                    effects.speak_initial = !self.inner.provider.uses_media_stream()
                        && record.initial_message().is_some();
                }
            }
            EventKind::Active => {
                record.transition(CallState::Active);
            }
            EventKind::Speaking { .. } => {
                record.transition(CallState::Speaking);
            }
            EventKind::Speech {
                transcript,
                is_final,
                ..
            } => {
                if *is_final {
                    record.add_transcript(Speaker::User, transcript.clone());
                    record.transition(CallState::Listening);
                }
            }
            EventKind::Silence { duration_ms } => {
                debug!(call_id = %record.call_id, duration_ms, "Silence detected");
            }
            EventKind::Dtmf { digits } => {
                debug!(call_id = %record.call_id, digits = %digits, "DTMF received");
            }
            EventKind::Ended { reason } => {
                if record.finish(*reason, event.timestamp) {
                    info!(call_id = %record.call_id, reason = %reason, "Call ended");
                }
            }
            EventKind::Error { error, retryable } => {
                if *retryable {
                    warn!(call_id = %record.call_id, error = %error, "Transient provider error");
                } else {
                    error!(call_id = %record.call_id, error = %error, "Call failed");
                    record.finish(EndReason::Error, event.timestamp);
                }
            }
        }
        effects
    }

    fn start_max_duration_timer(&self, registry: &mut CallRegistry, call_id: &str, after: Duration) {
        let manager = self.clone();
        let id = call_id.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            manager.on_max_duration(&id).await;
        });
        registry.set_timer(call_id, handle.abort_handle());
        debug!(call_id = %call_id, secs = after.as_secs(), "Max duration timer started");
    }

    async fn on_max_duration(&self, call_id: &str) {
        {
            let mut registry = self.inner.registry.lock().await;
            if registry.take_timer(call_id).is_none() || registry.get(call_id).is_none() {
                return;
            }
        }
        warn!(call_id = %call_id, "Max call duration reached, hanging up");
        if let Err(e) = self.hangup(call_id, EndReason::Timeout).await {
            error!(call_id = %call_id, "Timeout hangup failed: {}", e);
        }
    }

    /// Hang up through the provider; finalize locally only when that succeeds
    async fn hangup(&self, call_id: &str, reason: EndReason) -> Result<()> {
        let provider_call_id = {
            let registry = self.inner.registry.lock().await;
            let record = registry
                .get(call_id)
                .ok_or_else(|| Error::CallNotFound(call_id.to_string()))?;
            record.provider_call_id.clone()
        };

        let Some(provider_call_id) = provider_call_id else {
            // never reached the provider, nothing to hang up
            self.finish_locally(call_id, reason).await;
            return Ok(());
        };

        self.inner
            .provider
            .hangup_call(HangupRequest {
                call_id: call_id.to_string(),
                provider_call_id,
                reason,
            })
            .await?;

        self.finish_locally(call_id, reason).await;
        Ok(())
    }

    async fn finish_locally(&self, call_id: &str, reason: EndReason) {
        let mut registry = self.inner.registry.lock().await;
        let Some(record) = registry.get_mut(call_id) else {
            return;
        };
        record.finish(reason, Utc::now());
        let snapshot = record.clone();
        registry.retire(call_id);
        info!(call_id = %call_id, reason = %reason, "Call finished");
        self.persist(&snapshot).await;
    }

    async fn persist(&self, record: &CallRecord) {
        if let Err(e) = self.inner.store.persist(record).await {
            error!(call_id = %record.call_id, "Failed to persist call record: {}", e);
        }
    }

    /// Place an outbound call
    pub async fn initiate_call(&self, to: &str, options: InitiateOptions) -> Result<CallRecord> {
        let settings = &self.inner.settings;
        let mode = options.mode.unwrap_or(settings.default_mode);
        let inline_message = match (mode, &options.message) {
            (CallMode::Notify, Some(message)) if !self.inner.provider.uses_media_stream() => {
                Some(message.clone())
            }
            _ => None,
        };

        let mut record = CallRecord::outbound(self.inner.provider.name(), &settings.from_number, to);
        record.session_key = options.session_key.clone();
        record.metadata.insert(META_MODE.to_string(), serde_json::to_value(mode)?);
        if let (Some(message), None) = (&options.message, &inline_message) {
            record.metadata.insert(
                META_INITIAL_MESSAGE.to_string(),
                serde_json::Value::String(message.clone()),
            );
        }
        let call_id = record.call_id.clone();

        {
            let mut registry = self.inner.registry.lock().await;
            if registry.len() >= settings.max_concurrent_calls {
                return Err(Error::ConcurrencyLimit(settings.max_concurrent_calls));
            }
            registry.insert(record.clone());
            self.persist(&record).await;
        }
        info!(call_id = %call_id, to = %to, mode = ?mode, "Initiating outbound call");

        let request = InitiateCallRequest {
            call_id: call_id.clone(),
            from: settings.from_number.clone(),
            to: to.to_string(),
            webhook_url: settings.webhook_url.clone(),
            client_state: HashMap::from([("callId".to_string(), call_id.clone())]),
            inline_message,
        };

        match self.inner.provider.initiate_call(request).await {
            Ok(result) => {
                let mut registry = self.inner.registry.lock().await;
                let Some(record) = registry.get_mut(&call_id) else {
                    return Err(Error::CallEnded(call_id));
                };
                if record.provider_call_id.is_none() {
                    record.provider_call_id = Some(result.provider_call_id.clone());
                }
                let snapshot = record.clone();
                registry.index_provider_call(&result.provider_call_id, &call_id);
                self.persist(&snapshot).await;
                Ok(snapshot)
            }
            Err(e) => {
                error!(call_id = %call_id, "Failed to initiate call: {}", e);
                self.finish_locally(&call_id, EndReason::Failed).await;
                Err(e)
            }
        }
    }

    /// Speak text to the caller
    pub async fn speak(&self, call_id: &str, text: &str) -> Result<()> {
        let request = self.begin_bot_turn(call_id, text).await?;
        self.inner.provider.play_tts(request).await
    }

    /// Record a bot utterance and build the provider request that voices it
    async fn begin_bot_turn(&self, call_id: &str, text: &str) -> Result<PlayTtsRequest> {
        let mut registry = self.inner.registry.lock().await;
        let record = registry
            .get_mut(call_id)
            .ok_or_else(|| Error::CallNotFound(call_id.to_string()))?;
        let provider_call_id = record
            .provider_call_id
            .clone()
            .ok_or_else(|| Error::CallNotConnected(call_id.to_string()))?;
        record.transition(CallState::Speaking);
        record.add_transcript(Speaker::Bot, text);
        let snapshot = record.clone();
        self.persist(&snapshot).await;

        Ok(PlayTtsRequest {
            call_id: call_id.to_string(),
            provider_call_id,
            text: text.to_string(),
            voice: None,
            locale: None,
        })
    }

    /// Register interest in the next final transcript of a call.
    ///
    /// At most one waiter may be pending per call.
    pub async fn wait_for_transcript(
        &self,
        call_id: &str,
    ) -> Result<oneshot::Receiver<Result<String>>> {
        let mut registry = self.inner.registry.lock().await;
        if registry.get(call_id).is_none() {
            return Err(Error::CallNotFound(call_id.to_string()));
        }
        registry.register_waiter(call_id)
    }

    /// Abandon a pending transcript waiter
    pub async fn cancel_transcript_wait(&self, call_id: &str) {
        self.inner.registry.lock().await.remove_waiter(call_id);
    }

    /// Speak a prompt and wait for the caller's reply
    pub async fn continue_call(
        &self,
        call_id: &str,
        prompt: &str,
        timeout: Option<Duration>,
    ) -> Result<String> {
        let waiter = self.wait_for_transcript(call_id).await?;

        let request = match self.begin_bot_turn(call_id, prompt).await {
            Ok(request) => request,
            Err(e) => {
                self.cancel_transcript_wait(call_id).await;
                return Err(e);
            }
        };
        let listen = ListenRequest {
            call_id: call_id.to_string(),
            provider_call_id: request.provider_call_id.clone(),
            language: None,
        };
        if let Err(e) = self
            .inner
            .provider
            .prompt_and_listen(request, listen.clone())
            .await
        {
            self.cancel_transcript_wait(call_id).await;
            return Err(e);
        }

        let timeout = timeout.unwrap_or(self.inner.settings.transcript_timeout);
        let outcome = tokio::time::timeout(timeout, waiter).await;

        if let Err(e) = self.inner.provider.stop_listening(listen).await {
            debug!(call_id = %call_id, "stop_listening failed: {}", e);
        }

        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::CallEnded(call_id.to_string())),
            Err(_) => {
                self.cancel_transcript_wait(call_id).await;
                Err(Error::TranscriptTimeout(call_id.to_string()))
            }
        }
    }

    /// Hang up a call from our side
    pub async fn end_call(&self, call_id: &str) -> Result<()> {
        self.hangup(call_id, EndReason::HangupBot).await
    }

    /// Speak the stored initial message once the media path is up.
    ///
    /// In notify mode the call is hung up after the configured delay.
    pub async fn speak_initial_message(&self, provider_call_id: &str) -> Result<()> {
        let (call_id, message, mode, direction) = {
            let mut registry = self.inner.registry.lock().await;
            let call_id = registry
                .resolve("", Some(provider_call_id))
                .ok_or_else(|| Error::CallNotFound(provider_call_id.to_string()))?;
            let Some(record) = registry.get_mut(&call_id) else {
                return Err(Error::CallNotFound(call_id));
            };
            let Some(message) = record.initial_message().map(str::to_string) else {
                return Ok(());
            };
            record.metadata.remove(META_INITIAL_MESSAGE);
            let mode = record.mode();
            let direction = record.direction;
            let snapshot = record.clone();
            self.persist(&snapshot).await;
            (call_id, message, mode, direction)
        };

        self.speak(&call_id, &message).await?;

        if mode == CallMode::Notify && direction == CallDirection::Outbound {
            let manager = self.clone();
            let delay = self.inner.settings.notify_hangup_delay;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Err(e) = manager.end_call(&call_id).await {
                    debug!(call_id = %call_id, "Notify hangup skipped: {}", e);
                }
            });
        }
        Ok(())
    }

    pub async fn get_call(&self, call_id: &str) -> Option<CallRecord> {
        self.inner.registry.lock().await.get(call_id).cloned()
    }

    pub async fn get_call_by_provider_call_id(&self, provider_call_id: &str) -> Option<CallRecord> {
        let registry = self.inner.registry.lock().await;
        let call_id = registry.resolve("", Some(provider_call_id))?;
        registry.get(&call_id).cloned()
    }

    /// Current call, falling back to the durable snapshot for ended calls
    pub async fn lookup_call(&self, call_id: &str) -> Result<Option<CallRecord>> {
        if let Some(record) = self.get_call(call_id).await {
            return Ok(Some(record));
        }
        self.inner.store.load(call_id).await
    }

    pub async fn active_calls(&self) -> Vec<CallRecord> {
        self.inner.registry.lock().await.calls().cloned().collect()
    }

    /// Re-register non-terminal calls persisted by a previous process.
    ///
    /// Every restored call gets a max-duration timer, counted from the answer
    /// time or, for calls never answered, from the start. Unanswered calls
    /// already older than the max duration are finalized as timed out
    /// instead of restored.
    pub async fn restore(&self) -> Result<usize> {
        let records = self.inner.store.list().await?;
        let max_duration = self.inner.settings.max_duration;
        let mut registry = self.inner.registry.lock().await;
        let mut restored = 0;

        for mut record in records.into_iter().filter(|r| !r.is_terminal()) {
            let call_id = record.call_id.clone();
            let since = record.answered_at.unwrap_or(record.started_at);
            let elapsed = (Utc::now() - since).to_std().unwrap_or_default();

            if record.answered_at.is_none() && elapsed >= max_duration {
                warn!(
                    call_id = %call_id,
                    state = ?record.state,
                    "Stale unanswered call dropped on restore"
                );
                record.finish(EndReason::Timeout, Utc::now());
                self.persist(&record).await;
                continue;
            }

            for event_id in &record.processed_event_ids {
                registry.mark_seen(event_id);
            }
            registry.insert(record);
            self.start_max_duration_timer(
                &mut registry,
                &call_id,
                max_duration.saturating_sub(elapsed),
            );
            restored += 1;
        }

        if restored > 0 {
            info!("Restored {} active calls from store", restored);
        }
        Ok(restored)
    }

    /// Drop all in-memory state (timers are cancelled, waiters rejected)
    pub async fn drain(&self) -> Vec<CallRecord> {
        self.inner.registry.lock().await.drain()
    }
}
