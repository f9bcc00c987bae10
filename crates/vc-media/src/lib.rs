//! vc-media: Media stream bridge for the voice call gateway
//!
//! This crate connects a provider's bidirectional audio stream to speech
//! recognition and text-to-speech.
//!
//! ## Features
//!
//! - **Wire codec**: Twilio media-stream JSON messages
//! - **Audio**: G.711 μ-law encoding/decoding and resampling to 8 kHz
//! - **Speech recognition**: OpenAI realtime transcription over WebSocket
//! - **Text-to-speech**: OpenAI TTS converted to telephony audio
//! - **Bridge**: per-stream playback queue with barge-in
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use vc_media::{MediaStreamBridge, OpenAiRealtimeStt, OpenAiTts, SttConfig, TtsConfig};
//!
//! let tts = Arc::new(OpenAiTts::new(TtsConfig::openai("sk-...").with_voice("coral"))?);
//! let stt = Arc::new(OpenAiRealtimeStt::new(SttConfig::openai("sk-...")));
//! let (bridge, mut events) = MediaStreamBridge::new(tts, Some(stt));
//! ```

pub mod audio;
pub mod bridge;
pub mod error;
pub mod stream;
pub mod stt;
pub mod tts;

pub use bridge::{BridgeEvent, MediaStreamBridge, StreamSender};
pub use error::{MediaError, Result};
pub use stream::{OutboundMessage, StartMetadata, StreamMessage};
pub use stt::{OpenAiRealtimeStt, RealtimeStt, SttConfig, SttEvent, SttSession};
pub use tts::{OpenAiTts, TelephonyTts, TtsConfig};
