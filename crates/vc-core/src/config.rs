//! Configuration management
//!
//! Settings are resolved in this order:
//! 1. Environment variables
//! 2. `voice-call.toml` in the working directory
//! 3. Default values
//!
//! `${VAR_NAME}` inside the config file is replaced with the environment value.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::record::CallMode;
use crate::{Error, Result};

/// Default config file name
pub const CONFIG_FILE: &str = "voice-call.toml";

/// Which telephony provider backs the gateway
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// In-process provider for development and tests
    #[default]
    Mock,
    Twilio,
}

/// Inbound admission mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InboundPolicy {
    #[default]
    Disabled,
    Open,
    Allowlist,
    Pairing,
}

impl std::str::FromStr for InboundPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "disabled" => Ok(Self::Disabled),
            "open" => Ok(Self::Open),
            "allowlist" => Ok(Self::Allowlist),
            "pairing" => Ok(Self::Pairing),
            other => Err(Error::Config(format!("Unknown inbound policy: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InboundConfig {
    pub policy: InboundPolicy,
    /// Numbers allowed to call in under `allowlist`/`pairing`
    pub allow_from: Vec<String>,
    /// Shortest digit run that may satisfy an allowlist match
    pub min_match_digits: usize,
    /// Spoken to admitted inbound callers once media is connected
    pub greeting: Option<String>,
}

impl Default for InboundConfig {
    fn default() -> Self {
        Self {
            policy: InboundPolicy::Disabled,
            allow_from: Vec::new(),
            min_match_digits: 7,
            greeting: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboundConfig {
    pub default_mode: CallMode,
    /// Seconds to wait after a notify message before hanging up
    pub notify_hangup_delay_secs: u64,
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            default_mode: CallMode::Conversation,
            notify_hangup_delay_secs: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServeConfig {
    pub bind: String,
    pub port: u16,
    pub webhook_path: String,
    pub stream_path: String,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 3334,
            webhook_path: "/voice/webhook".to_string(),
            stream_path: "/voice/stream".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path to the SQLite database holding call snapshots
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: "data/voice-calls.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TwilioConfig {
    pub account_sid: Option<String>,
    pub auth_token: Option<String>,
    /// Accept unsigned webhooks (local development only)
    pub skip_signature_verification: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    pub enabled: bool,
    pub openai_api_key: Option<String>,
    pub stt_model: String,
    pub silence_duration_ms: u32,
    pub vad_threshold: f32,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            openai_api_key: None,
            stt_model: "gpt-4o-transcribe".to_string(),
            silence_duration_ms: 800,
            vad_threshold: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsSettings {
    pub model: String,
    pub voice: String,
    pub instructions: Option<String>,
}

impl Default for TtsSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini-tts".to_string(),
            voice: "coral".to_string(),
            instructions: None,
        }
    }
}

/// Main configuration for the voice call gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceCallConfig {
    pub provider: ProviderKind,
    /// Caller id used for outbound calls
    pub from_number: String,
    /// Default outbound target when a tool call omits one
    pub to_number: Option<String>,
    pub inbound: InboundConfig,
    pub outbound: OutboundConfig,
    pub max_duration_secs: u64,
    pub transcript_timeout_secs: u64,
    pub max_concurrent_calls: usize,
    pub serve: ServeConfig,
    /// Externally reachable base URL for webhooks and media streams
    pub public_url: Option<String>,
    pub store: StoreConfig,
    pub twilio: TwilioConfig,
    pub streaming: StreamingConfig,
    pub tts: TtsSettings,
}

impl Default for VoiceCallConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Mock,
            from_number: String::new(),
            to_number: None,
            inbound: InboundConfig::default(),
            outbound: OutboundConfig::default(),
            max_duration_secs: 300,
            transcript_timeout_secs: 180,
            max_concurrent_calls: 1,
            serve: ServeConfig::default(),
            public_url: None,
            store: StoreConfig::default(),
            twilio: TwilioConfig::default(),
            streaming: StreamingConfig::default(),
            tts: TtsSettings::default(),
        }
    }
}

impl VoiceCallConfig {
    /// Load from `voice-call.toml` if present, then apply environment overrides
    pub fn load() -> Result<Self> {
        if Path::new(CONFIG_FILE).exists() {
            return Self::from_toml_file(CONFIG_FILE);
        }
        let mut config = Self::default();
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from a TOML file, expanding `${VAR}` references first
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;
        let mut config = Self::from_toml_str(&content)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse TOML text (environment references are expanded)
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        toml::from_str(&expanded).map_err(|e| Error::Config(format!("Failed to parse TOML: {}", e)))
    }

    /// Environment variables win over file values
    pub fn apply_env_overrides(&mut self) {
        if let Some(provider) = env_var("VOICE_CALL_PROVIDER") {
            match provider.to_lowercase().as_str() {
                "twilio" => self.provider = ProviderKind::Twilio,
                "mock" => self.provider = ProviderKind::Mock,
                other => tracing::warn!("Ignoring unknown VOICE_CALL_PROVIDER: {}", other),
            }
        }
        if let Some(from) = env_var("VOICE_CALL_FROM_NUMBER") {
            self.from_number = from;
        }
        if let Some(to) = env_var("VOICE_CALL_TO_NUMBER") {
            self.to_number = Some(to);
        }
        if let Some(policy) = env_var("VOICE_CALL_INBOUND_POLICY") {
            match policy.parse() {
                Ok(policy) => self.inbound.policy = policy,
                Err(e) => tracing::warn!("{}", e),
            }
        }
        if let Some(allow) = env_var("VOICE_CALL_ALLOW_FROM") {
            self.inbound.allow_from = allow
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(secs) = env_var("VOICE_CALL_MAX_DURATION_SECS").and_then(|v| v.parse().ok()) {
            self.max_duration_secs = secs;
        }
        if let Some(url) = env_var("VOICE_CALL_PUBLIC_URL") {
            self.public_url = Some(url);
        }
        if let Some(port) = env_var("VOICE_CALL_PORT").and_then(|v| v.parse().ok()) {
            self.serve.port = port;
        }
        if let Some(path) = env_var("VOICE_CALL_STORE_PATH") {
            self.store.path = path;
        }
        if let Some(sid) = env_var("TWILIO_ACCOUNT_SID") {
            self.twilio.account_sid = Some(sid);
        }
        if let Some(token) = env_var("TWILIO_AUTH_TOKEN") {
            self.twilio.auth_token = Some(token);
        }
        if let Some(key) = env_var("OPENAI_API_KEY") {
            self.streaming.openai_api_key = Some(key);
        }
    }

    /// Check that the selected provider can actually be used
    pub fn validate(&self) -> Result<()> {
        if self.from_number.trim().is_empty() {
            return Err(Error::Config("from_number is required".to_string()));
        }
        if self.provider == ProviderKind::Twilio {
            if self.twilio.account_sid.as_deref().unwrap_or_default().is_empty() {
                return Err(Error::Config("twilio.account_sid is required".to_string()));
            }
            if self.twilio.auth_token.as_deref().unwrap_or_default().is_empty() {
                return Err(Error::Config("twilio.auth_token is required".to_string()));
            }
        }
        if self.streaming.enabled
            && self
                .streaming
                .openai_api_key
                .as_deref()
                .unwrap_or_default()
                .is_empty()
        {
            return Err(Error::Config(
                "streaming.openai_api_key is required when streaming is enabled".to_string(),
            ));
        }
        if self.max_concurrent_calls == 0 {
            return Err(Error::Config("max_concurrent_calls must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Public URL of the webhook endpoint
    pub fn webhook_url(&self) -> String {
        let base = self
            .public_url
            .clone()
            .unwrap_or_else(|| format!("http://localhost:{}", self.serve.port));
        format!("{}{}", base.trim_end_matches('/'), self.serve.webhook_path)
    }

    /// Public websocket URL of the media stream endpoint
    pub fn stream_url(&self) -> String {
        let base = self
            .public_url
            .clone()
            .unwrap_or_else(|| format!("http://localhost:{}", self.serve.port));
        let base = base.trim_end_matches('/');
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            base.to_string()
        };
        format!("{}{}", ws_base, self.serve.stream_path)
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Replace `${VAR}` with the environment value, or nothing when unset
fn expand_env_vars(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            if let Ok(env_value) = std::env::var(&var_name) {
                result.push_str(&env_value);
            }
        } else {
            result.push(c);
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = VoiceCallConfig::default();
        assert_eq!(config.provider, ProviderKind::Mock);
        assert_eq!(config.inbound.policy, InboundPolicy::Disabled);
        assert_eq!(config.max_duration_secs, 300);
        assert_eq!(config.serve.webhook_path, "/voice/webhook");
    }

    #[test]
    fn test_parse_toml() {
        let config = VoiceCallConfig::from_toml_str(
            r#"
            provider = "twilio"
            from_number = "+15550000000"
            max_duration_secs = 60

            [inbound]
            policy = "allowlist"
            allow_from = ["5551234567"]

            [outbound]
            default_mode = "notify"
            "#,
        )
        .unwrap();

        assert_eq!(config.provider, ProviderKind::Twilio);
        assert_eq!(config.inbound.policy, InboundPolicy::Allowlist);
        assert_eq!(config.inbound.allow_from, vec!["5551234567"]);
        assert_eq!(config.inbound.min_match_digits, 7);
        assert_eq!(config.outbound.default_mode, CallMode::Notify);
        assert_eq!(config.max_duration_secs, 60);
    }

    #[test]
    fn test_expand_env_vars() {
        // SAFETY: test-local variable name
        unsafe { std::env::set_var("VC_TEST_EXPAND_SID", "AC42") };
        let expanded = expand_env_vars("sid = \"${VC_TEST_EXPAND_SID}\" x=\"${VC_TEST_UNSET_VAR}\"");
        assert_eq!(expanded, "sid = \"AC42\" x=\"\"");
    }

    #[test]
    fn test_validate_requires_twilio_credentials() {
        let config = VoiceCallConfig {
            provider: ProviderKind::Twilio,
            from_number: "+15550000000".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = VoiceCallConfig {
            twilio: TwilioConfig {
                account_sid: Some("AC1".to_string()),
                auth_token: Some("secret".to_string()),
                skip_signature_verification: false,
            },
            ..config
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_stream_url_uses_websocket_scheme() {
        let config = VoiceCallConfig {
            public_url: Some("https://example.ngrok.app/".to_string()),
            ..Default::default()
        };
        assert_eq!(config.webhook_url(), "https://example.ngrok.app/voice/webhook");
        assert_eq!(config.stream_url(), "wss://example.ngrok.app/voice/stream");
    }
}
