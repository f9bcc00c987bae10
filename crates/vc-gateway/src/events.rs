//! Bridge event pump
//!
//! Turns media-stream notifications into call manager input: a connected
//! stream answers the call and triggers the initial message, final
//! transcripts become `call.speech` events.

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use vc_core::{CallManager, EventKind, NormalizedEvent};
use vc_media::BridgeEvent;

/// Forward bridge events to the manager until the bridge is dropped
pub async fn run(manager: CallManager, mut events: mpsc::UnboundedReceiver<BridgeEvent>) {
    while let Some(event) = events.recv().await {
        handle(&manager, event).await;
    }
    debug!("Bridge event pump stopped");
}

pub async fn handle(manager: &CallManager, event: BridgeEvent) {
    match event {
        BridgeEvent::Connected {
            stream_sid,
            call_sid,
        } => {
            let answered = NormalizedEvent::new("", EventKind::Answered)
                .with_id(format!("stream-answered:{}", stream_sid))
                .with_provider_call_id(&call_sid);
            manager.process_event(answered).await;

            // playback awaits completion, keep the pump moving
            let manager = manager.clone();
            tokio::spawn(async move {
                if let Err(e) = manager.speak_initial_message(&call_sid).await {
                    warn!(call_sid = %call_sid, "Initial message failed: {}", e);
                }
            });
        }
        BridgeEvent::Final { call_sid, text } => {
            info!(call_sid = %call_sid, "Caller said: {}", text);
            let event = NormalizedEvent::final_speech("", text).with_provider_call_id(call_sid);
            manager.process_event(event).await;
        }
        BridgeEvent::Partial { call_sid, text } => {
            debug!(call_sid = %call_sid, "Partial transcript: {}", text);
        }
        BridgeEvent::SpeechStarted { call_sid } => {
            debug!(call_sid = %call_sid, "Caller started speaking");
        }
        BridgeEvent::Disconnected {
            stream_sid,
            call_sid,
        } => {
            info!(stream_sid = %stream_sid, call_sid = %call_sid, "Media stream disconnected");
        }
    }
}
