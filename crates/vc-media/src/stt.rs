//! Streaming speech recognition
//!
//! A [`RealtimeStt`] provider creates one [`SttSession`] per media stream.
//! Sessions accept μ-law audio as it arrives and deliver recognition results
//! as [`SttEvent`]s on a channel handed out once by `subscribe()`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{MediaError, Result};

/// Recognition output for one session
#[derive(Debug, Clone, PartialEq)]
pub enum SttEvent {
    /// Running transcript of the current utterance
    Partial(String),
    /// Completed utterance
    Final(String),
    /// Voice activity detected; used for barge-in
    SpeechStarted,
}

/// One recognition session bound to a media stream
#[async_trait]
pub trait SttSession: Send + Sync {
    /// Connect to the recognition service
    async fn connect(&self) -> Result<()>;

    /// Queue μ-law audio; dropped silently when the session is closed
    fn send_audio(&self, mulaw: &[u8]);

    /// Take the event receiver. Returns `None` after the first call.
    fn subscribe(&self) -> Option<mpsc::UnboundedReceiver<SttEvent>>;

    fn is_connected(&self) -> bool;

    /// Close the session; safe to call more than once
    fn close(&self);
}

/// Factory for recognition sessions
pub trait RealtimeStt: Send + Sync {
    fn create_session(&self) -> Arc<dyn SttSession>;
}

/// Realtime transcription configuration
#[derive(Debug, Clone)]
pub struct SttConfig {
    pub api_key: String,
    pub model: String,
    pub silence_duration_ms: u32,
    pub vad_threshold: f32,
    pub url: String,
}

impl SttConfig {
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: "gpt-4o-transcribe".to_string(),
            silence_duration_ms: 800,
            vad_threshold: 0.5,
            url: "wss://api.openai.com/v1/realtime?intent=transcription".to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_silence_duration_ms(mut self, ms: u32) -> Self {
        self.silence_duration_ms = ms;
        self
    }

    pub fn with_vad_threshold(mut self, threshold: f32) -> Self {
        self.vad_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    fn session_update(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "transcription_session.update",
            "session": {
                "input_audio_format": "g711_ulaw",
                "input_audio_transcription": { "model": self.model },
                "turn_detection": {
                    "type": "server_vad",
                    "threshold": self.vad_threshold,
                    "prefix_padding_ms": 300,
                    "silence_duration_ms": self.silence_duration_ms,
                },
            },
        })
    }
}

/// OpenAI realtime transcription
pub struct OpenAiRealtimeStt {
    config: SttConfig,
}

impl OpenAiRealtimeStt {
    pub fn new(config: SttConfig) -> Self {
        Self { config }
    }
}

impl RealtimeStt for OpenAiRealtimeStt {
    fn create_session(&self) -> Arc<dyn SttSession> {
        Arc::new(OpenAiSttSession::new(self.config.clone()))
    }
}

const MAX_CONNECT_ATTEMPTS: u32 = 5;
const INITIAL_BACKOFF: Duration = Duration::from_millis(500);

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct SessionShared {
    config: SttConfig,
    events: mpsc::UnboundedSender<SttEvent>,
    connected: AtomicBool,
    cancel: CancellationToken,
}

/// Session over the OpenAI realtime WebSocket.
///
/// Reconnects with exponential backoff when the socket drops; audio sent
/// while reconnecting is buffered in the channel.
pub struct OpenAiSttSession {
    shared: Arc<SessionShared>,
    audio_tx: mpsc::UnboundedSender<Vec<u8>>,
    audio_rx: Mutex<Option<mpsc::UnboundedReceiver<Vec<u8>>>>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<SttEvent>>>,
}

impl OpenAiSttSession {
    pub fn new(config: SttConfig) -> Self {
        let (audio_tx, audio_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(SessionShared {
                config,
                events: events_tx,
                connected: AtomicBool::new(false),
                cancel: CancellationToken::new(),
            }),
            audio_tx,
            audio_rx: Mutex::new(Some(audio_rx)),
            events_rx: Mutex::new(Some(events_rx)),
        }
    }
}

#[async_trait]
impl SttSession for OpenAiSttSession {
    async fn connect(&self) -> Result<()> {
        let Some(audio_rx) = self
            .audio_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return Ok(());
        };

        let socket = connect_with_retry(&self.shared).await?;
        self.shared.connected.store(true, Ordering::SeqCst);
        info!("Realtime transcription session connected");

        tokio::spawn(run_session(self.shared.clone(), socket, audio_rx));
        Ok(())
    }

    fn send_audio(&self, mulaw: &[u8]) {
        let _ = self.audio_tx.send(mulaw.to_vec());
    }

    fn subscribe(&self) -> Option<mpsc::UnboundedReceiver<SttEvent>> {
        self.events_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.shared.cancel.cancel();
        self.shared.connected.store(false, Ordering::SeqCst);
    }
}

async fn open_socket(config: &SttConfig) -> Result<Socket> {
    let mut request = config.url.as_str().into_client_request()?;
    let auth = HeaderValue::from_str(&format!("Bearer {}", config.api_key))
        .map_err(|e| MediaError::ConfigError(format!("Invalid API key header: {}", e)))?;
    request.headers_mut().insert("Authorization", auth);
    request
        .headers_mut()
        .insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

    let (mut socket, _) = connect_async(request).await?;
    let update = config.session_update().to_string();
    socket.send(WsMessage::Text(update.into())).await?;
    Ok(socket)
}

async fn connect_with_retry(shared: &SessionShared) -> Result<Socket> {
    let mut delay = INITIAL_BACKOFF;
    let mut last_error = None;

    for attempt in 1..=MAX_CONNECT_ATTEMPTS {
        if shared.cancel.is_cancelled() {
            break;
        }
        match open_socket(&shared.config).await {
            Ok(socket) => return Ok(socket),
            Err(e) => {
                warn!(
                    "Transcription connect attempt {}/{} failed: {}",
                    attempt, MAX_CONNECT_ATTEMPTS, e
                );
                last_error = Some(e);
            }
        }
        if attempt < MAX_CONNECT_ATTEMPTS {
            tokio::select! {
                _ = shared.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
            delay *= 2;
        }
    }

    Err(last_error.unwrap_or_else(|| {
        MediaError::ConnectionFailed("transcription session closed".to_string())
    }))
}

enum PumpExit {
    Closed,
    Disconnected,
}

async fn run_session(
    shared: Arc<SessionShared>,
    mut socket: Socket,
    mut audio_rx: mpsc::UnboundedReceiver<Vec<u8>>,
) {
    loop {
        match pump(&shared, &mut socket, &mut audio_rx).await {
            PumpExit::Closed => {
                let _ = socket.close(None).await;
                break;
            }
            PumpExit::Disconnected => {
                shared.connected.store(false, Ordering::SeqCst);
                warn!("Transcription socket dropped, reconnecting");
                match connect_with_retry(&shared).await {
                    Ok(fresh) => {
                        socket = fresh;
                        shared.connected.store(true, Ordering::SeqCst);
                        info!("Transcription session reconnected");
                    }
                    Err(e) => {
                        error!("Giving up on transcription session: {}", e);
                        break;
                    }
                }
            }
        }
    }
    shared.connected.store(false, Ordering::SeqCst);
}

async fn pump(
    shared: &SessionShared,
    socket: &mut Socket,
    audio_rx: &mut mpsc::UnboundedReceiver<Vec<u8>>,
) -> PumpExit {
    let mut partial = String::new();
    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => return PumpExit::Closed,
            audio = audio_rx.recv() => {
                let Some(audio) = audio else {
                    return PumpExit::Closed;
                };
                let append = serde_json::json!({
                    "type": "input_audio_buffer.append",
                    "audio": BASE64.encode(&audio),
                });
                if let Err(e) = socket.send(WsMessage::Text(append.to_string().into())).await {
                    debug!("Audio send failed: {}", e);
                    return PumpExit::Disconnected;
                }
            }
            message = socket.next() => match message {
                Some(Ok(WsMessage::Text(text))) => {
                    if let Some(event) = parse_server_event(&text, &mut partial) {
                        if shared.events.send(event).is_err() {
                            return PumpExit::Closed;
                        }
                    }
                }
                Some(Ok(WsMessage::Ping(data))) => {
                    let _ = socket.send(WsMessage::Pong(data)).await;
                }
                Some(Ok(WsMessage::Close(_))) | None => return PumpExit::Disconnected,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("Transcription socket error: {}", e);
                    return PumpExit::Disconnected;
                }
            },
        }
    }
}

#[derive(Deserialize)]
struct ServerEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    delta: Option<String>,
    #[serde(default)]
    transcript: Option<String>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

/// Map a realtime server event to an [`SttEvent`].
///
/// Deltas accumulate into `partial` until the utterance completes.
fn parse_server_event(text: &str, partial: &mut String) -> Option<SttEvent> {
    let event: ServerEvent = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(e) => {
            debug!("Unparseable transcription event: {}", e);
            return None;
        }
    };

    match event.kind.as_str() {
        "conversation.item.input_audio_transcription.delta" => {
            partial.push_str(event.delta.as_deref().unwrap_or_default());
            Some(SttEvent::Partial(partial.clone()))
        }
        "conversation.item.input_audio_transcription.completed" => {
            partial.clear();
            let transcript = event.transcript.unwrap_or_default().trim().to_string();
            (!transcript.is_empty()).then_some(SttEvent::Final(transcript))
        }
        "input_audio_buffer.speech_started" => Some(SttEvent::SpeechStarted),
        "error" => {
            warn!("Transcription service error: {:?}", event.error);
            None
        }
        other => {
            debug!("Ignoring transcription event: {}", other);
            None
        }
    }
}
