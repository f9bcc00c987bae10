//! Media stream websocket endpoint
//!
//! Each provider connection carries one call's audio. Inbound JSON frames are
//! decoded and handed to the bridge; outbound frames from the bridge are
//! written by a dedicated task.

use std::ops::ControlFlow;
use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use vc_core::{CallManager, EventKind, NormalizedEvent};
use vc_media::{MediaStreamBridge, OutboundMessage, StreamMessage, StreamSender};

use crate::error::GatewayError;
use crate::server::AppState;

/// Handle the websocket upgrade for a media stream
pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let Some(bridge) = state.bridge.clone() else {
        return GatewayError::StreamingDisabled.into_response();
    };
    ws.on_upgrade(move |socket| handle_socket(socket, bridge, state.manager))
}

async fn handle_socket(socket: WebSocket, bridge: Arc<MediaStreamBridge>, manager: CallManager) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<OutboundMessage>();

    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let text = match message.to_json() {
                Ok(text) => text,
                Err(e) => {
                    warn!("Failed to encode stream message: {}", e);
                    continue;
                }
            };
            if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                break;
            }
        }
        debug!("Stream writer ended");
    });

    let mut connection = StreamConnection::new(bridge, manager, tx);
    while let Some(frame) = ws_rx.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => {
                if connection.handle_text(text.as_str()).await.is_break() {
                    break;
                }
            }
            Ok(WsMessage::Close(_)) => break,
            Err(e) => {
                warn!("Media stream socket error: {}", e);
                break;
            }
            _ => {}
        }
    }

    connection.close();
    writer.abort();
}

/// State of one media stream connection
pub struct StreamConnection {
    bridge: Arc<MediaStreamBridge>,
    manager: CallManager,
    sender: StreamSender,
    stream_sid: Option<String>,
    call_sid: Option<String>,
}

impl StreamConnection {
    pub fn new(bridge: Arc<MediaStreamBridge>, manager: CallManager, sender: StreamSender) -> Self {
        Self {
            bridge,
            manager,
            sender,
            stream_sid: None,
            call_sid: None,
        }
    }

    /// Apply one text frame; `Break` closes the connection
    pub async fn handle_text(&mut self, text: &str) -> ControlFlow<()> {
        let message = match StreamMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                debug!("Ignoring stream frame: {}", e);
                return ControlFlow::Continue(());
            }
        };

        match message {
            StreamMessage::Connected { protocol, .. } => {
                debug!(protocol = ?protocol, "Media stream connected");
            }
            StreamMessage::Start { stream_sid, start } => {
                if self.manager.get_call_by_provider_call_id(&start.call_sid).await.is_none() {
                    warn!(
                        stream_sid = %stream_sid,
                        call_sid = %start.call_sid,
                        "Refusing media stream for unknown call"
                    );
                    return ControlFlow::Break(());
                }
                self.bridge.on_start(&stream_sid, &start.call_sid, self.sender.clone());
                self.stream_sid = Some(stream_sid);
                self.call_sid = Some(start.call_sid);
            }
            StreamMessage::Media { stream_sid, media } => {
                if !self.owns(&stream_sid) {
                    return ControlFlow::Continue(());
                }
                match media.decode() {
                    Ok(audio) => self.bridge.on_media(&stream_sid, &audio),
                    Err(e) => debug!(stream_sid = %stream_sid, "Bad media payload: {}", e),
                }
            }
            StreamMessage::Mark { stream_sid, mark } => {
                self.bridge.on_mark(&stream_sid, &mark.name);
            }
            StreamMessage::Stop { stream_sid, .. } => {
                info!(stream_sid = %stream_sid, "Media stream stop received");
                self.close();
                return ControlFlow::Break(());
            }
            StreamMessage::Dtmf { stream_sid, dtmf } => {
                if !self.owns(&stream_sid) {
                    return ControlFlow::Continue(());
                }
                if let Some(call_sid) = &self.call_sid {
                    let event = NormalizedEvent::new("", EventKind::Dtmf { digits: dtmf.digit })
                        .with_provider_call_id(call_sid);
                    self.manager.process_event(event).await;
                }
            }
        }
        ControlFlow::Continue(())
    }

    fn owns(&self, stream_sid: &str) -> bool {
        self.stream_sid.as_deref() == Some(stream_sid)
    }

    /// Tear down the bridge session, if one was started
    pub fn close(&mut self) {
        if let Some(stream_sid) = self.stream_sid.take() {
            self.bridge.on_stop(&stream_sid);
        }
    }
}
