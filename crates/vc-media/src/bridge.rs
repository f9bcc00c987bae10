//! Media stream bridge
//!
//! One session per provider media stream, keyed by stream sid. Inbound audio
//! goes to the stream's recognition session; outbound speech goes through a
//! single ordered playback queue per stream.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vc_core::SpeechOutput;

use crate::audio::{self, FRAME_DURATION};
use crate::error::{MediaError, Result};
use crate::stream::OutboundMessage;
use crate::stt::{RealtimeStt, SttEvent, SttSession};
use crate::tts::TelephonyTts;

/// Writer half of a media stream connection
pub type StreamSender = mpsc::UnboundedSender<OutboundMessage>;

/// Notification from the bridge to the rest of the gateway
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEvent {
    /// Stream is up and can play audio (recognition may still be connecting)
    Connected { stream_sid: String, call_sid: String },
    Partial { call_sid: String, text: String },
    Final { call_sid: String, text: String },
    SpeechStarted { call_sid: String },
    Disconnected { stream_sid: String, call_sid: String },
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct PlaybackEntry {
    text: String,
    cancel: CancellationToken,
    done: oneshot::Sender<Result<()>>,
}

#[derive(Default)]
struct PlaybackQueue {
    pending: VecDeque<PlaybackEntry>,
    /// Token of the entry being played
    current: Option<CancellationToken>,
    /// A drain loop is running
    playing: bool,
    closed: bool,
}

struct StreamSession {
    stream_sid: String,
    call_sid: String,
    sender: StreamSender,
    stt: Option<Arc<dyn SttSession>>,
    queue: Mutex<PlaybackQueue>,
    cancel: CancellationToken,
    marks: AtomicU64,
}

impl StreamSession {
    fn has_playback(&self) -> bool {
        let queue = lock(&self.queue);
        queue.current.is_some() || !queue.pending.is_empty()
    }

    /// Drop queued entries and cancel the one in flight.
    ///
    /// Every affected caller resolves with `Ok`.
    fn clear_playback(&self, send_clear: bool) {
        let (dropped, current) = {
            let mut queue = lock(&self.queue);
            (queue.pending.drain(..).collect::<Vec<_>>(), queue.current.clone())
        };
        let dropped_count = dropped.len();
        for entry in dropped {
            entry.cancel.cancel();
            let _ = entry.done.send(Ok(()));
        }
        if let Some(token) = current {
            token.cancel();
        }
        if send_clear {
            let _ = self.sender.send(OutboundMessage::clear(&self.stream_sid));
        }
        debug!(
            stream_sid = %self.stream_sid,
            dropped = dropped_count,
            "Playback cleared"
        );
    }

    fn next_mark(&self) -> String {
        format!("tts-{}", self.marks.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

/// Bridges provider media streams to speech recognition and synthesis
pub struct MediaStreamBridge {
    tts: Arc<dyn TelephonyTts>,
    stt: Option<Arc<dyn RealtimeStt>>,
    sessions: Mutex<HashMap<String, Arc<StreamSession>>>,
    by_call: Mutex<HashMap<String, String>>,
    events: mpsc::UnboundedSender<BridgeEvent>,
}

impl MediaStreamBridge {
    /// Create a bridge and the receiver for its events.
    ///
    /// Without an STT provider the bridge can still play audio.
    pub fn new(
        tts: Arc<dyn TelephonyTts>,
        stt: Option<Arc<dyn RealtimeStt>>,
    ) -> (Self, mpsc::UnboundedReceiver<BridgeEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let bridge = Self {
            tts,
            stt,
            sessions: Mutex::new(HashMap::new()),
            by_call: Mutex::new(HashMap::new()),
            events,
        };
        (bridge, rx)
    }

    fn emit(&self, event: BridgeEvent) {
        if self.events.send(event).is_err() {
            debug!("Bridge event receiver dropped");
        }
    }

    fn session(&self, stream_sid: &str) -> Option<Arc<StreamSession>> {
        lock(&self.sessions).get(stream_sid).cloned()
    }

    pub fn has_stream(&self, stream_sid: &str) -> bool {
        lock(&self.sessions).contains_key(stream_sid)
    }

    pub fn stream_for_call(&self, call_sid: &str) -> Option<String> {
        lock(&self.by_call).get(call_sid).cloned()
    }

    pub fn active_streams(&self) -> usize {
        lock(&self.sessions).len()
    }

    pub fn is_playing(&self, stream_sid: &str) -> bool {
        self.session(stream_sid).is_some_and(|s| s.has_playback())
    }

    /// Register a started stream.
    ///
    /// `Connected` is emitted before recognition starts connecting, so
    /// playback works even if recognition never comes up.
    pub fn on_start(&self, stream_sid: &str, call_sid: &str, sender: StreamSender) {
        if let Some(previous) = self.session(stream_sid) {
            warn!(stream_sid = %stream_sid, "Duplicate stream start, replacing session");
            self.teardown(&previous);
        }

        let stt_session = self.stt.as_ref().map(|stt| stt.create_session());
        let session = Arc::new(StreamSession {
            stream_sid: stream_sid.to_string(),
            call_sid: call_sid.to_string(),
            sender,
            stt: stt_session.clone(),
            queue: Mutex::new(PlaybackQueue::default()),
            cancel: CancellationToken::new(),
            marks: AtomicU64::new(0),
        });

        lock(&self.sessions).insert(stream_sid.to_string(), session.clone());
        lock(&self.by_call).insert(call_sid.to_string(), stream_sid.to_string());
        info!(stream_sid = %stream_sid, call_sid = %call_sid, "Media stream started");

        self.emit(BridgeEvent::Connected {
            stream_sid: stream_sid.to_string(),
            call_sid: call_sid.to_string(),
        });

        let Some(stt_session) = stt_session else {
            return;
        };
        if let Some(rx) = stt_session.subscribe() {
            tokio::spawn(forward_stt_events(session.clone(), rx, self.events.clone()));
        }
        let cancel = session.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                result = stt_session.connect() => {
                    if let Err(e) = result {
                        warn!("Speech recognition unavailable, playback continues: {}", e);
                    }
                }
            }
        });
    }

    /// Forward inbound audio to recognition, verbatim and in arrival order
    pub fn on_media(&self, stream_sid: &str, mulaw: &[u8]) {
        if let Some(stt) = self.session(stream_sid).and_then(|s| s.stt.clone()) {
            stt.send_audio(mulaw);
        }
    }

    pub fn on_mark(&self, stream_sid: &str, name: &str) {
        debug!(stream_sid = %stream_sid, mark = %name, "Playback mark reached");
    }

    /// Tear down a stopped stream and everything attached to it
    pub fn on_stop(&self, stream_sid: &str) {
        let Some(session) = lock(&self.sessions).remove(stream_sid) else {
            return;
        };
        self.teardown(&session);
        info!(stream_sid = %stream_sid, call_sid = %session.call_sid, "Media stream stopped");
    }

    fn teardown(&self, session: &StreamSession) {
        lock(&session.queue).closed = true;
        session.clear_playback(false);
        session.cancel.cancel();
        if let Some(stt) = &session.stt {
            stt.close();
        }

        lock(&self.sessions).remove(&session.stream_sid);
        {
            let mut by_call = lock(&self.by_call);
            if by_call.get(&session.call_sid) == Some(&session.stream_sid) {
                by_call.remove(&session.call_sid);
            }
        }

        self.emit(BridgeEvent::Disconnected {
            stream_sid: session.stream_sid.clone(),
            call_sid: session.call_sid.clone(),
        });
    }

    /// Enqueue speech and return a receiver that settles when it has played,
    /// was cleared, or failed.
    pub fn enqueue_tts(&self, stream_sid: &str, text: &str) -> Result<oneshot::Receiver<Result<()>>> {
        let session = self
            .session(stream_sid)
            .ok_or_else(|| MediaError::StreamNotFound(stream_sid.to_string()))?;

        let (done, rx) = oneshot::channel();
        let start_drain = {
            let mut queue = lock(&session.queue);
            if queue.closed {
                return Err(MediaError::StreamNotFound(stream_sid.to_string()));
            }
            queue.pending.push_back(PlaybackEntry {
                text: text.to_string(),
                cancel: session.cancel.child_token(),
                done,
            });
            !std::mem::replace(&mut queue.playing, true)
        };

        if start_drain {
            tokio::spawn(drain_queue(session, self.tts.clone()));
        }
        Ok(rx)
    }

    /// Speak on a stream, waiting until playback finishes or is cleared
    pub async fn queue_tts(&self, stream_sid: &str, text: &str) -> Result<()> {
        let rx = self.enqueue_tts(stream_sid, text)?;
        rx.await.unwrap_or(Ok(()))
    }

    /// Barge-in: drop pending speech, cancel the current one, flush the provider buffer
    pub fn clear_tts_queue(&self, stream_sid: &str) {
        if let Some(session) = self.session(stream_sid) {
            session.clear_playback(true);
        }
    }

    /// Tear down every stream
    pub fn shutdown(&self) {
        let sessions: Vec<Arc<StreamSession>> = lock(&self.sessions).values().cloned().collect();
        for session in sessions {
            self.teardown(&session);
        }
    }
}

#[async_trait]
impl SpeechOutput for MediaStreamBridge {
    async fn speak(&self, provider_call_id: &str, text: &str) -> vc_core::Result<bool> {
        let Some(stream_sid) = self.stream_for_call(provider_call_id) else {
            return Ok(false);
        };
        self.queue_tts(&stream_sid, text).await?;
        Ok(true)
    }

    fn has_stream(&self, provider_call_id: &str) -> bool {
        self.stream_for_call(provider_call_id).is_some()
    }
}

/// Play queued entries one at a time until the queue is empty
async fn drain_queue(session: Arc<StreamSession>, tts: Arc<dyn TelephonyTts>) {
    loop {
        let entry = {
            let mut queue = lock(&session.queue);
            match queue.pending.pop_front() {
                Some(entry) => {
                    queue.current = Some(entry.cancel.clone());
                    entry
                }
                None => {
                    queue.current = None;
                    queue.playing = false;
                    break;
                }
            }
        };

        let result = play(&session, tts.as_ref(), &entry.text, &entry.cancel).await;
        lock(&session.queue).current = None;
        if let Err(e) = &result {
            warn!(stream_sid = %session.stream_sid, "Playback failed: {}", e);
        }
        let _ = entry.done.send(result);
    }
}

async fn play(
    session: &StreamSession,
    tts: &dyn TelephonyTts,
    text: &str,
    cancel: &CancellationToken,
) -> Result<()> {
    if cancel.is_cancelled() {
        return Ok(());
    }

    let mulaw = tokio::select! {
        _ = cancel.cancelled() => return Ok(()),
        audio = tts.synthesize(text) => audio?,
    };

    for frame in audio::frames(&mulaw) {
        if cancel.is_cancelled() {
            return Ok(());
        }
        if session
            .sender
            .send(OutboundMessage::media(&session.stream_sid, frame))
            .is_err()
        {
            return Err(MediaError::StreamNotFound(session.stream_sid.clone()));
        }
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = tokio::time::sleep(FRAME_DURATION) => {}
        }
    }

    let _ = session
        .sender
        .send(OutboundMessage::mark(&session.stream_sid, session.next_mark()));
    Ok(())
}

async fn forward_stt_events(
    session: Arc<StreamSession>,
    mut rx: mpsc::UnboundedReceiver<SttEvent>,
    events: mpsc::UnboundedSender<BridgeEvent>,
) {
    loop {
        let event = tokio::select! {
            _ = session.cancel.cancelled() => break,
            event = rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let call_sid = session.call_sid.clone();
        let out = match event {
            SttEvent::Partial(text) => BridgeEvent::Partial { call_sid, text },
            SttEvent::Final(text) => {
                info!(call_sid = %call_sid, "Caller said: {}", text);
                BridgeEvent::Final { call_sid, text }
            }
            SttEvent::SpeechStarted => {
                if session.has_playback() {
                    debug!(call_sid = %call_sid, "Barge-in, clearing playback");
                    session.clear_playback(true);
                }
                BridgeEvent::SpeechStarted { call_sid }
            }
        };
        if events.send(out).is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    /// Synthesizes a fixed number of silent frames and records each request
    struct FakeTts {
        frames: usize,
        requests: Mutex<Vec<String>>,
    }

    impl FakeTts {
        fn new(frames: usize) -> Arc<Self> {
            Arc::new(Self {
                frames,
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<String> {
            lock(&self.requests).clone()
        }
    }

    #[async_trait]
    impl TelephonyTts for FakeTts {
        async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
            lock(&self.requests).push(text.to_string());
            Ok(vec![0xFF; audio::FRAME_BYTES * self.frames])
        }
    }

    /// Recognition session whose connect never completes
    struct StalledStt {
        audio: Mutex<Vec<Vec<u8>>>,
        events_tx: mpsc::UnboundedSender<SttEvent>,
        events_rx: Mutex<Option<mpsc::UnboundedReceiver<SttEvent>>>,
        closed: AtomicBool,
    }

    #[async_trait]
    impl SttSession for StalledStt {
        async fn connect(&self) -> Result<()> {
            std::future::pending::<()>().await;
            Ok(())
        }

        fn send_audio(&self, mulaw: &[u8]) {
            lock(&self.audio).push(mulaw.to_vec());
        }

        fn subscribe(&self) -> Option<mpsc::UnboundedReceiver<SttEvent>> {
            lock(&self.events_rx).take()
        }

        fn is_connected(&self) -> bool {
            false
        }

        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    struct StalledSttProvider {
        session: Arc<StalledStt>,
    }

    impl StalledSttProvider {
        fn new() -> Arc<Self> {
            let (events_tx, events_rx) = mpsc::unbounded_channel();
            Arc::new(Self {
                session: Arc::new(StalledStt {
                    audio: Mutex::new(Vec::new()),
                    events_tx,
                    events_rx: Mutex::new(Some(events_rx)),
                    closed: AtomicBool::new(false),
                }),
            })
        }
    }

    impl RealtimeStt for StalledSttProvider {
        fn create_session(&self) -> Arc<dyn SttSession> {
            self.session.clone()
        }
    }

    fn started_bridge(
        tts: Arc<FakeTts>,
        stt: Option<Arc<dyn RealtimeStt>>,
    ) -> (
        MediaStreamBridge,
        mpsc::UnboundedReceiver<BridgeEvent>,
        mpsc::UnboundedReceiver<OutboundMessage>,
    ) {
        let (bridge, events) = MediaStreamBridge::new(tts, stt);
        let (sender, outbound) = mpsc::unbounded_channel();
        bridge.on_start("MZ1", "CA1", sender);
        (bridge, events, outbound)
    }

    fn drain_outbound(rx: &mut mpsc::UnboundedReceiver<OutboundMessage>) -> Vec<OutboundMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = rx.try_recv() {
            messages.push(message);
        }
        messages
    }

    #[tokio::test]
    async fn test_connected_before_recognition_connects() {
        let stt = StalledSttProvider::new();
        let (bridge, mut events, _outbound) =
            started_bridge(FakeTts::new(1), Some(stt.clone() as Arc<dyn RealtimeStt>));

        assert_eq!(
            events.recv().await,
            Some(BridgeEvent::Connected {
                stream_sid: "MZ1".to_string(),
                call_sid: "CA1".to_string(),
            })
        );
        assert_eq!(bridge.stream_for_call("CA1").as_deref(), Some("MZ1"));

        // playback works although recognition never connected
        bridge.queue_tts("MZ1", "hello").await.unwrap();
    }

    #[tokio::test]
    async fn test_media_forwarded_in_order() {
        let stt = StalledSttProvider::new();
        let (bridge, _events, _outbound) =
            started_bridge(FakeTts::new(1), Some(stt.clone() as Arc<dyn RealtimeStt>));

        bridge.on_media("MZ1", &[1, 2]);
        bridge.on_media("MZ1", &[3]);
        bridge.on_media("unknown", &[9]);

        assert_eq!(*lock(&stt.session.audio), vec![vec![1, 2], vec![3]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_playback_is_sequential() {
        let tts = FakeTts::new(3);
        let (bridge, _events, mut outbound) = started_bridge(tts.clone(), None);

        let first = bridge.enqueue_tts("MZ1", "one").unwrap();
        let second = bridge.enqueue_tts("MZ1", "two").unwrap();
        assert!(first.await.unwrap().is_ok());
        assert!(second.await.unwrap().is_ok());

        assert_eq!(tts.requests(), vec!["one", "two"]);
        let kinds: Vec<&str> = drain_outbound(&mut outbound)
            .iter()
            .map(|m| match m {
                OutboundMessage::Media { .. } => "media",
                OutboundMessage::Mark { .. } => "mark",
                OutboundMessage::Clear { .. } => "clear",
            })
            .collect();
        assert_eq!(
            kinds,
            vec!["media", "media", "media", "mark", "media", "media", "media", "mark"]
        );
        assert!(!bridge.is_playing("MZ1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_barge_in_resolves_current_and_skips_pending() {
        let tts = FakeTts::new(50);
        let (bridge, _events, mut outbound) = started_bridge(tts.clone(), None);

        let a = bridge.enqueue_tts("MZ1", "A").unwrap();
        let b = bridge.enqueue_tts("MZ1", "B").unwrap();
        let c = bridge.enqueue_tts("MZ1", "C").unwrap();

        // A is playing once its first frame goes out
        assert!(matches!(
            outbound.recv().await,
            Some(OutboundMessage::Media { .. })
        ));
        bridge.clear_tts_queue("MZ1");

        assert!(a.await.unwrap().is_ok());
        assert!(b.await.unwrap().is_ok());
        assert!(c.await.unwrap().is_ok());
        assert_eq!(tts.requests(), vec!["A"]);

        let rest = drain_outbound(&mut outbound);
        assert!(rest.contains(&OutboundMessage::clear("MZ1")));
        assert!(!rest.iter().any(|m| matches!(m, OutboundMessage::Mark { .. })));
        assert!(!bridge.is_playing("MZ1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_speech_started_triggers_barge_in() {
        let stt = StalledSttProvider::new();
        let tts = FakeTts::new(50);
        let (bridge, mut events, mut outbound) =
            started_bridge(tts, Some(stt.clone() as Arc<dyn RealtimeStt>));
        assert!(matches!(events.recv().await, Some(BridgeEvent::Connected { .. })));

        let playing = bridge.enqueue_tts("MZ1", "long answer").unwrap();
        assert!(matches!(
            outbound.recv().await,
            Some(OutboundMessage::Media { .. })
        ));

        stt.session.events_tx.send(SttEvent::SpeechStarted).unwrap();
        stt.session
            .events_tx
            .send(SttEvent::Final("stop".to_string()))
            .unwrap();

        assert_eq!(
            events.recv().await,
            Some(BridgeEvent::SpeechStarted {
                call_sid: "CA1".to_string()
            })
        );
        assert_eq!(
            events.recv().await,
            Some(BridgeEvent::Final {
                call_sid: "CA1".to_string(),
                text: "stop".to_string(),
            })
        );
        assert!(playing.await.unwrap().is_ok());
        assert!(drain_outbound(&mut outbound).contains(&OutboundMessage::clear("MZ1")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_tears_everything_down() {
        let stt = StalledSttProvider::new();
        let (bridge, mut events, _outbound) =
            started_bridge(FakeTts::new(50), Some(stt.clone() as Arc<dyn RealtimeStt>));
        assert!(matches!(events.recv().await, Some(BridgeEvent::Connected { .. })));

        let current = bridge.enqueue_tts("MZ1", "first").unwrap();
        let pending = bridge.enqueue_tts("MZ1", "second").unwrap();
        bridge.on_stop("MZ1");

        assert!(pending.await.unwrap().is_ok());
        assert!(current.await.unwrap().is_ok());
        assert!(stt.session.closed.load(Ordering::SeqCst));
        assert!(!bridge.has_stream("MZ1"));
        assert!(bridge.stream_for_call("CA1").is_none());
        assert_eq!(
            events.recv().await,
            Some(BridgeEvent::Disconnected {
                stream_sid: "MZ1".to_string(),
                call_sid: "CA1".to_string(),
            })
        );
        assert!(matches!(
            bridge.enqueue_tts("MZ1", "late"),
            Err(MediaError::StreamNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_speak_without_stream() {
        let (bridge, _events) = MediaStreamBridge::new(FakeTts::new(1), None);
        assert!(!bridge.speak("CA-none", "hello").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_speak_routes_by_call_sid() {
        let tts = FakeTts::new(1);
        let (bridge, _events, mut outbound) = started_bridge(tts.clone(), None);

        assert!(bridge.speak("CA1", "Your package arrived").await.unwrap());
        assert_eq!(tts.requests(), vec!["Your package arrived"]);
        assert!(matches!(
            outbound.recv().await,
            Some(OutboundMessage::Media { .. })
        ));
    }
}
