//! Text-to-speech for telephony
//!
//! Synthesis requests raw 24 kHz PCM from OpenAI and converts it to the
//! 8 kHz μ-law a media stream expects.

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info};

use crate::audio;
use crate::error::{MediaError, Result};

/// Text to telephony audio
#[async_trait]
pub trait TelephonyTts: Send + Sync {
    /// Synthesize `text` as 8 kHz μ-law bytes
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;
}

/// TTS configuration
#[derive(Debug, Clone)]
pub struct TtsConfig {
    pub api_key: String,
    pub model: String,
    pub voice: String,
    /// Style instructions (supported by `gpt-4o-mini-tts`)
    pub instructions: Option<String>,
    pub base_url: String,
}

impl TtsConfig {
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: "gpt-4o-mini-tts".to_string(),
            voice: "coral".to_string(),
            instructions: None,
            base_url: "https://api.openai.com/v1".to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = voice.into();
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn request_body(&self, text: &str) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "input": text,
            "voice": self.voice,
            "response_format": "pcm",
        });
        if let Some(instructions) = &self.instructions {
            body["instructions"] = serde_json::json!(instructions);
        }
        body
    }
}

/// OpenAI speech client
#[derive(Debug)]
pub struct OpenAiTts {
    client: Client,
    config: TtsConfig,
}

impl OpenAiTts {
    pub fn new(config: TtsConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(MediaError::ConfigError("OpenAI API key is required for TTS".to_string()));
        }
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .map_err(|e| MediaError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    /// Raw 24 kHz PCM16 little-endian speech
    pub async fn synthesize_pcm(&self, text: &str) -> Result<Vec<u8>> {
        let url = format!("{}/audio/speech", self.config.base_url);

        info!("Synthesizing speech: {} chars", text.len());
        debug!("Model: {}, Voice: {}", self.config.model, self.config.voice);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&self.config.request_body(text))
            .send()
            .await
            .map_err(|e| MediaError::ConnectionFailed(format!("TTS request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(MediaError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| MediaError::SynthesisFailed(format!("Failed to read audio data: {}", e)))?;

        debug!("Synthesis complete: {} bytes", audio.len());
        Ok(audio.to_vec())
    }
}

#[async_trait]
impl TelephonyTts for OpenAiTts {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let pcm = self.synthesize_pcm(text).await?;
        audio::pcm24k_to_mulaw(&pcm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openai_defaults() {
        let config = TtsConfig::openai("test-key");
        assert_eq!(config.model, "gpt-4o-mini-tts");
        assert_eq!(config.voice, "coral");
        assert_eq!(config.base_url, "https://api.openai.com/v1");
    }

    #[test]
    fn test_request_body_asks_for_pcm() {
        let body = TtsConfig::openai("k")
            .with_voice("nova")
            .with_instructions("Speak calmly")
            .request_body("Hello");

        assert_eq!(body["response_format"], "pcm");
        assert_eq!(body["voice"], "nova");
        assert_eq!(body["input"], "Hello");
        assert_eq!(body["instructions"], "Speak calmly");
    }

    #[test]
    fn test_instructions_omitted_by_default() {
        let body = TtsConfig::openai("k").request_body("Hello");
        assert!(body.get("instructions").is_none());
    }

    #[test]
    fn test_missing_key_rejected() {
        let err = tokio_test::assert_err!(OpenAiTts::new(TtsConfig::openai("")));
        assert!(matches!(err, MediaError::ConfigError(_)));
    }
}
