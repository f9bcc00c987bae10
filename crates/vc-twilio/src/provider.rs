//! Twilio implementation of the provider adapter

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use tracing::{debug, warn};
use vc_core::VoiceCallConfig;
use vc_core::event::{CallDirection, EventKind, NormalizedEvent};
use vc_core::provider::{
    HangupRequest, InitiateCallRequest, InitiateCallResult, InitiateStatus, ListenRequest,
    PlayTtsRequest, ProviderAdapter, SpeechOutput, WebhookParseResult, WebhookRequest,
};

use crate::client::{CallInstructions, TwilioClient};
use crate::error::{Result, TwilioError};
use crate::signature::verify_signature;
use crate::twiml;
use crate::webhook::{
    self, CALL_ID_PARAM, FLOW_PARAM, IDEMPOTENCY_HEADER, TwilioParams, WebhookFlow,
};

/// Settings for [`TwilioProvider`]
#[derive(Debug, Clone, Default)]
pub struct TwilioProviderConfig {
    pub account_sid: String,
    pub auth_token: String,
    /// Accept unsigned webhooks (local development only)
    pub skip_signature_verification: bool,
    /// Public webhook URL used for answer, status and gather callbacks
    pub webhook_url: String,
    /// Media stream websocket URL; `None` runs calls on TwiML verbs only
    pub stream_url: Option<String>,
    /// `<Say>` voice for the TwiML fallback
    pub say_voice: Option<String>,
    /// Spoken when an admitted inbound call is picked up without a stream
    pub inbound_greeting: Option<String>,
    /// REST API root; `None` uses `https://api.twilio.com`
    pub api_base_url: Option<String>,
}

impl TwilioProviderConfig {
    pub fn from_config(config: &VoiceCallConfig) -> Result<Self> {
        let account_sid = config
            .twilio
            .account_sid
            .clone()
            .ok_or(TwilioError::CredentialsNotSet)?;
        let auth_token = config
            .twilio
            .auth_token
            .clone()
            .ok_or(TwilioError::CredentialsNotSet)?;

        Ok(Self {
            account_sid,
            auth_token,
            skip_signature_verification: config.twilio.skip_signature_verification,
            webhook_url: config.webhook_url(),
            stream_url: config.streaming.enabled.then(|| config.stream_url()),
            say_voice: None,
            inbound_greeting: config.inbound.greeting.clone(),
            api_base_url: None,
        })
    }
}

/// Twilio Programmable Voice adapter
pub struct TwilioProvider {
    client: TwilioClient,
    config: TwilioProviderConfig,
    speech_output: OnceLock<Arc<dyn SpeechOutput>>,
}

impl TwilioProvider {
    pub fn new(config: TwilioProviderConfig) -> Result<Self> {
        if config.account_sid.is_empty() || config.auth_token.is_empty() {
            return Err(TwilioError::CredentialsNotSet);
        }
        if config.webhook_url.is_empty() {
            return Err(TwilioError::Config(
                "a public webhook URL is required for Twilio callbacks".to_string(),
            ));
        }
        if config.skip_signature_verification {
            warn!("Twilio webhook signature verification is disabled");
        }
        let mut client = TwilioClient::new(&config.account_sid, &config.auth_token);
        if let Some(base_url) = &config.api_base_url {
            client = client.with_base_url(base_url.trim_end_matches('/'));
        }
        Ok(Self {
            client,
            config,
            speech_output: OnceLock::new(),
        })
    }

    /// Route speech through live media streams when one is attached.
    ///
    /// Only the first call has an effect.
    pub fn set_speech_output(&self, output: Arc<dyn SpeechOutput>) {
        if self.speech_output.set(output).is_err() {
            debug!("Speech output already attached");
        }
    }

    fn streaming_for(&self, provider_call_id: &str) -> Option<&Arc<dyn SpeechOutput>> {
        self.speech_output
            .get()
            .filter(|output| output.has_stream(provider_call_id))
    }

    fn callback_url(&self, call_id: &str, flow: WebhookFlow) -> String {
        let separator = if self.config.webhook_url.contains('?') {
            '&'
        } else {
            '?'
        };
        let query: String = url::form_urlencoded::Serializer::new(String::new())
            .append_pair(CALL_ID_PARAM, call_id)
            .append_pair(FLOW_PARAM, flow.as_str())
            .finish();
        format!("{}{}{}", self.config.webhook_url, separator, query)
    }

    fn verify(&self, request: &WebhookRequest, params: &TwilioParams) -> Result<()> {
        if self.config.skip_signature_verification {
            return Ok(());
        }
        let signature = request
            .header("x-twilio-signature")
            .ok_or(TwilioError::MissingSignature)?;
        if verify_signature(
            &self.config.auth_token,
            &request.url,
            params.pairs(),
            signature,
        ) {
            Ok(())
        } else {
            Err(TwilioError::SignatureVerificationFailed)
        }
    }

    /// Whether the answer webhook picks up an inbound call on TwiML verbs
    fn picks_up_inbound(&self, flow: WebhookFlow, events: &[NormalizedEvent]) -> bool {
        flow == WebhookFlow::Answer
            && self.config.stream_url.is_none()
            && events
                .iter()
                .any(|e| e.direction == Some(CallDirection::Inbound))
    }

    /// TwiML returned to Twilio for a verified webhook
    fn answer_twiml(
        &self,
        flow: WebhookFlow,
        params: &TwilioParams,
        call_id: &str,
        inbound_pickup: bool,
    ) -> String {
        match flow {
            WebhookFlow::Status => twiml::empty(),
            WebhookFlow::Gather => twiml::keep_alive(),
            WebhookFlow::Answer => match (&self.config.stream_url, &self.config.inbound_greeting) {
                (Some(stream_url), _) => {
                    let call_sid = params.get("CallSid").unwrap_or_default();
                    let mut parameters = vec![("callSid", call_sid)];
                    if !call_id.is_empty() {
                        parameters.push(("callId", call_id));
                    }
                    twiml::connect_stream(stream_url, &parameters)
                }
                (None, Some(greeting)) if inbound_pickup => {
                    twiml::say(greeting, self.config.say_voice.as_deref(), None)
                }
                (None, _) => twiml::keep_alive(),
            },
        }
    }
}

#[async_trait]
impl ProviderAdapter for TwilioProvider {
    fn name(&self) -> &str {
        "twilio"
    }

    fn parse_webhook(&self, request: &WebhookRequest) -> WebhookParseResult {
        let params = TwilioParams::new(webhook::parse_form(&request.body));
        if let Err(e) = self.verify(request, &params) {
            warn!(url = %request.url, "Twilio webhook rejected: {}", e);
            return WebhookParseResult::rejected(401, e.to_string());
        }
        if params.get("CallSid").is_none() {
            let e = TwilioError::InvalidPayload("missing CallSid".to_string());
            warn!("Twilio webhook rejected: {}", e);
            return WebhookParseResult::rejected(400, e.to_string());
        }

        let flow = WebhookFlow::from_query(&request.query);
        let call_id = request
            .query
            .get(CALL_ID_PARAM)
            .map(String::as_str)
            .unwrap_or_default();
        let mut events = webhook::normalize(
            &params,
            &request.query,
            flow,
            request.header(IDEMPOTENCY_HEADER),
        );

        // Returning verbs other than <Connect> answers the call right away
        let inbound_pickup = self.picks_up_inbound(flow, &events);
        if inbound_pickup && !events.iter().any(|e| e.kind == EventKind::Answered) {
            if let Some(first) = events.first() {
                let mut answered = first.clone();
                answered.id = format!("{}-pickup", first.id);
                answered.kind = EventKind::Answered;
                events.push(answered);
            }
        }
        debug!(
            flow = flow.as_str(),
            count = events.len(),
            "Parsed Twilio webhook"
        );

        let body = self.answer_twiml(flow, &params, call_id, inbound_pickup);
        WebhookParseResult::ok(events).with_body(twiml::CONTENT_TYPE, body)
    }

    async fn initiate_call(&self, request: InitiateCallRequest) -> vc_core::Result<InitiateCallResult> {
        let status_callback = self.callback_url(&request.call_id, WebhookFlow::Status);
        let answer_url = self.callback_url(&request.call_id, WebhookFlow::Answer);
        let inline = request
            .inline_message
            .as_deref()
            .map(|message| twiml::say_and_hangup(message, self.config.say_voice.as_deref()));

        let instructions = match &inline {
            Some(document) => CallInstructions::Twiml(document),
            None => CallInstructions::Url(&answer_url),
        };

        let call = self
            .client
            .create_call(&request.from, &request.to, instructions, &status_callback)
            .await?;

        let status = match call.status.as_deref() {
            Some("queued") => InitiateStatus::Queued,
            _ => InitiateStatus::Initiated,
        };
        Ok(InitiateCallResult {
            provider_call_id: call.sid,
            status,
        })
    }

    async fn hangup_call(&self, request: HangupRequest) -> vc_core::Result<()> {
        debug!(
            call_id = %request.call_id,
            reason = %request.reason,
            "Requesting Twilio hangup"
        );
        self.client.complete_call(&request.provider_call_id).await?;
        Ok(())
    }

    async fn play_tts(&self, request: PlayTtsRequest) -> vc_core::Result<()> {
        if let Some(output) = self.streaming_for(&request.provider_call_id) {
            if output.speak(&request.provider_call_id, &request.text).await? {
                return Ok(());
            }
        }

        let voice = request.voice.as_deref().or(self.config.say_voice.as_deref());
        let document = twiml::say(&request.text, voice, request.locale.as_deref());
        self.client
            .update_call_twiml(&request.provider_call_id, &document)
            .await?;
        Ok(())
    }

    async fn start_listening(&self, request: ListenRequest) -> vc_core::Result<()> {
        if self.streaming_for(&request.provider_call_id).is_some() {
            // recognition runs continuously on the stream
            return Ok(());
        }
        let action = self.callback_url(&request.call_id, WebhookFlow::Gather);
        let document = twiml::gather_speech(&action, request.language.as_deref(), None, None);
        self.client
            .update_call_twiml(&request.provider_call_id, &document)
            .await?;
        Ok(())
    }

    async fn prompt_and_listen(
        &self,
        prompt: PlayTtsRequest,
        listen: ListenRequest,
    ) -> vc_core::Result<()> {
        if self.streaming_for(&prompt.provider_call_id).is_some() {
            self.play_tts(prompt).await?;
            return self.start_listening(listen).await;
        }

        // a call update replaces the running TwiML, so the prompt rides
        // inside the <Gather> rather than in a separate <Say> update
        let action = self.callback_url(&listen.call_id, WebhookFlow::Gather);
        let voice = prompt.voice.as_deref().or(self.config.say_voice.as_deref());
        let language = listen.language.as_deref().or(prompt.locale.as_deref());
        let document = twiml::gather_speech(&action, language, Some(&prompt.text), voice);
        self.client
            .update_call_twiml(&listen.provider_call_id, &document)
            .await?;
        Ok(())
    }

    fn greets_inbound(&self) -> bool {
        self.config.stream_url.is_none() && self.config.inbound_greeting.is_some()
    }

    async fn stop_listening(&self, request: ListenRequest) -> vc_core::Result<()> {
        // a <Gather> ends by itself once it posts its result
        debug!(call_id = %request.call_id, "Stop listening");
        Ok(())
    }

    fn uses_media_stream(&self) -> bool {
        self.config.stream_url.is_some()
    }

    fn rejection_response(&self) -> Option<WebhookParseResult> {
        Some(WebhookParseResult::ok(Vec::new()).with_body(twiml::CONTENT_TYPE, twiml::reject()))
    }
}
