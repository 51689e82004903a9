//! Session coordinator: wires transport, audio, and the message log.
//!
//! Pure routing, no independent state beyond the reply gate:
//!
//! ```text
//! typed text ──┐
//!              ├─▸ message log + TransportChannel.send(Text)
//! utterances ──┘
//!
//! TransportChannel ──Text──▸ message log (peer)
//!                  ──Binary──▸ PlaybackPipeline
//!
//! mic button ──▸ CapturePipeline (push-to-talk)
//!           └──▸ SpeechRecognizer + UtteranceSegmenter (speech)
//! ```
//!
//! The reply gate is held from the moment a turn goes out until the peer's
//! text reply arrives (or the connection drops), and while held it makes
//! starting capture a logged no-op — the microphone must not pick up the
//! system's own reply.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::audio::capture::{CapturePipeline, MicSource};
use crate::audio::playback::PlaybackPipeline;
use crate::config::ChatConfig;
use crate::error::{ChatError, Result};
use crate::log::{MessageLog, Speaker};
use crate::segment::UtteranceSegmenter;
use crate::transport::{ChannelEvent, Frame, TransportChannel};

// ── Reply gate ─────────────────────────────────────────────────────

/// Held between sending a turn and receiving the peer's text reply.
#[derive(Clone, Default)]
pub struct ReplyGate(Arc<AtomicBool>);

impl ReplyGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hold(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn release(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_waiting(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ── Speech input seam ──────────────────────────────────────────────

/// One recognition result: the cumulative transcript of the utterance so
/// far, and whether the engine considers the utterance finished.
#[derive(Debug, Clone)]
pub struct TranscriptEvent {
    pub transcript: String,
    pub is_final: bool,
}

/// External speech-recognition engine. None may be available — speech
/// input then reports `Unsupported` and the rest of the session is
/// unaffected.
pub trait SpeechRecognizer: Send + Sync {
    /// Begin recognition; transcript events arrive on the returned channel
    /// until `stop` is called or the engine ends the stream.
    fn start(&self) -> Result<mpsc::Receiver<TranscriptEvent>>;
    fn stop(&self);
}

// ── Coordinator ────────────────────────────────────────────────────

/// How microphone input enters the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    /// Raw audio chunks stream to the peer while the mic button is held.
    PushToTalk,
    /// A recognition engine transcribes locally; complete utterances are
    /// sent as text.
    Speech,
}

struct SpeechSession {
    forward: JoinHandle<()>,
}

pub struct SessionCoordinator {
    channel: TransportChannel,
    capture: CapturePipeline,
    playback: Option<PlaybackPipeline>,
    recognizer: Option<Arc<dyn SpeechRecognizer>>,
    log: Arc<dyn MessageLog>,
    reply_gate: ReplyGate,
    mode: InputMode,
    silence_timeout: Duration,
    utterance_tx: mpsc::Sender<String>,
    utterance_rx: Mutex<Option<mpsc::Receiver<String>>>,
    speech: Mutex<Option<SpeechSession>>,
}

impl SessionCoordinator {
    pub fn new(
        channel: TransportChannel,
        mic: Arc<dyn MicSource>,
        playback: Option<PlaybackPipeline>,
        recognizer: Option<Arc<dyn SpeechRecognizer>>,
        log: Arc<dyn MessageLog>,
        mode: InputMode,
        config: &ChatConfig,
    ) -> Self {
        let reply_gate = ReplyGate::new();
        let capture = CapturePipeline::new(
            mic,
            channel.clone(),
            reply_gate.clone(),
            config.sample_rate,
            config.chunk_interval(),
        );
        let (utterance_tx, utterance_rx) = mpsc::channel(16);
        Self {
            channel,
            capture,
            playback,
            recognizer,
            log,
            reply_gate,
            mode,
            silence_timeout: config.silence_timeout(),
            utterance_tx,
            utterance_rx: Mutex::new(Some(utterance_rx)),
            speech: Mutex::new(None),
        }
    }

    /// Drive the session: route transport events and flushed utterances
    /// until the channel's event stream ends. Call once.
    pub async fn run(&self) {
        let mut events = self.channel.subscribe();
        let Some(mut utterances) = self.utterance_rx.lock().take() else {
            tracing::error!("session loop started twice; ignoring");
            return;
        };

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(ChannelEvent::Text(text)) => {
                        self.reply_gate.release();
                        self.log.render(Speaker::Peer, &text);
                    }
                    Ok(ChannelEvent::Binary(bytes)) => match &self.playback {
                        Some(playback) => {
                            if let Err(e) = playback.play(bytes) {
                                tracing::warn!(error = %e, "dropping undecodable audio frame");
                            }
                        }
                        None => {
                            tracing::debug!("audio playback unavailable; dropping audio frame");
                        }
                    },
                    Ok(ChannelEvent::Connected) => {
                        tracing::info!("session transport connected");
                    }
                    Ok(ChannelEvent::Disconnected) => {
                        // A reply lost to the disconnect must not wedge the mic
                        self.reply_gate.release();
                        tracing::info!("session transport disconnected");
                    }
                    Ok(ChannelEvent::SendFailed(frame)) => {
                        tracing::warn!(
                            kind = frame.kind(),
                            bytes = frame.len(),
                            "message could not be delivered"
                        );
                        self.reply_gate.release();
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "session fell behind the event stream");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                utterance = utterances.recv() => match utterance {
                    Some(text) => self.send_text(&text),
                    None => break,
                },
            }
        }
        tracing::debug!("session loop ended");
    }

    /// Send a typed (or recognized) message: render it locally, hold the
    /// reply gate, hand the frame to the transport. Empty input is ignored.
    pub fn send_text(&self, text: &str) {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return;
        }
        self.log.render(Speaker::User, trimmed);
        self.reply_gate.hold();
        self.channel.send(Frame::Text(trimmed.to_string()));
    }

    /// Mic button pressed. Returns `Ok(false)` when capture was declined
    /// because a reply is still in progress.
    pub async fn mic_pressed(&self) -> Result<bool> {
        match self.mode {
            InputMode::PushToTalk => self.capture.start().await,
            InputMode::Speech => self.start_speech(),
        }
    }

    /// Mic button released.
    pub fn mic_released(&self) {
        match self.mode {
            InputMode::PushToTalk => self.capture.stop(),
            InputMode::Speech => self.stop_speech(),
        }
    }

    /// Tear down audio input and close the transport for good.
    pub fn shutdown(&self) {
        self.capture.stop();
        self.stop_speech();
        if let Some(playback) = &self.playback {
            playback.stop();
        }
        self.channel.close();
    }

    pub fn reply_gate(&self) -> &ReplyGate {
        &self.reply_gate
    }

    // ── Speech input ──────────────────────────────────────────────

    fn start_speech(&self) -> Result<bool> {
        if self.reply_gate.is_waiting() {
            tracing::info!("ignoring speech start: a reply is still in progress");
            return Ok(false);
        }
        let Some(recognizer) = self.recognizer.clone() else {
            return Err(ChatError::unsupported(
                "no speech recognition engine is available",
            ));
        };
        self.stop_speech();

        let mut transcripts = recognizer.start()?;
        let segmenter = UtteranceSegmenter::spawn(self.silence_timeout, self.utterance_tx.clone());
        let forward = tokio::spawn(async move {
            while let Some(event) = transcripts.recv().await {
                segmenter.update(event.transcript).await;
                if event.is_final {
                    segmenter.finalize().await;
                }
            }
            // Engine ended the stream: discard any partial utterance
            segmenter.stop().await;
        });

        *self.speech.lock() = Some(SpeechSession { forward });
        tracing::info!("speech recognition started");
        Ok(true)
    }

    fn stop_speech(&self) {
        if let Some(session) = self.speech.lock().take() {
            if let Some(recognizer) = &self.recognizer {
                recognizer.stop();
            }
            // Aborting the forward task drops the segmenter handle, which
            // discards a partial utterance rather than flushing it.
            session.forward.abort();
            tracing::debug!("speech recognition stopped");
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportConfig;
    use async_trait::async_trait;
    use crate::audio::capture::MicStream;
    use futures_util::{SinkExt, StreamExt};
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    struct RecordingLog(Mutex<Vec<(Speaker, String)>>);

    impl RecordingLog {
        fn new() -> Arc<Self> {
            Arc::new(Self(Mutex::new(Vec::new())))
        }

        fn lines(&self) -> Vec<(Speaker, String)> {
            self.0.lock().clone()
        }
    }

    impl MessageLog for RecordingLog {
        fn render(&self, speaker: Speaker, text: &str) {
            self.0.lock().push((speaker, text.to_string()));
        }
    }

    /// Mic source that never produces anything; session tests only route.
    struct SilentMic;

    #[async_trait]
    impl MicSource for SilentMic {
        async fn open(&self, _: u32, _: Duration) -> Result<MicStream> {
            let (_tx, rx) = mpsc::channel(1);
            Ok(MicStream::new(rx, || {}))
        }
    }

    /// Recognizer that replays a script of transcript events.
    struct ScriptedRecognizer(Mutex<Option<Vec<TranscriptEvent>>>);

    impl SpeechRecognizer for ScriptedRecognizer {
        fn start(&self) -> Result<mpsc::Receiver<TranscriptEvent>> {
            let events = self
                .0
                .lock()
                .take()
                .ok_or_else(|| ChatError::unsupported("script exhausted"))?;
            let (tx, rx) = mpsc::channel(16);
            tokio::spawn(async move {
                for event in events {
                    if tx.send(event).await.is_err() {
                        return;
                    }
                }
                // Sender drops here; the stream ends like an engine stop
            });
            Ok(rx)
        }

        fn stop(&self) {}
    }

    /// Loopback peer: echoes text with a fixed reply, mirrors binary.
    async fn peer_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(async move {
                    let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                        return;
                    };
                    while let Some(Ok(msg)) = ws.next().await {
                        match msg {
                            WsMessage::Text(text) => {
                                let reply = format!("reply to {}", text.as_str());
                                let _ = ws.send(WsMessage::Text(reply.into())).await;
                            }
                            WsMessage::Binary(bytes) => {
                                let _ = ws.send(WsMessage::Binary(bytes)).await;
                            }
                            WsMessage::Close(_) => break,
                            _ => {}
                        }
                    }
                });
            }
        });
        format!("ws://{addr}")
    }

    fn session_config(endpoint: String) -> ChatConfig {
        ChatConfig {
            endpoint,
            reconnect_delay_ms: 50,
            send_retry_delay_ms: 50,
            silence_timeout_ms: 1_000,
            ..Default::default()
        }
    }

    fn coordinator(
        config: &ChatConfig,
        recognizer: Option<Arc<dyn SpeechRecognizer>>,
        mode: InputMode,
    ) -> (Arc<SessionCoordinator>, Arc<RecordingLog>) {
        let channel = TransportChannel::new(TransportConfig::from(config));
        let log = RecordingLog::new();
        let coordinator = Arc::new(SessionCoordinator::new(
            channel,
            Arc::new(SilentMic),
            None,
            recognizer,
            log.clone(),
            mode,
            config,
        ));
        (coordinator, log)
    }

    async fn wait_for<F: Fn() -> bool>(what: &str, check: F) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
    }

    #[tokio::test]
    async fn text_round_trip_renders_both_speakers_and_releases_gate() {
        let url = peer_server().await;
        let config = session_config(url);
        let (coordinator, log) = coordinator(&config, None, InputMode::PushToTalk);

        coordinator.channel.connect();
        let runner = Arc::clone(&coordinator);
        tokio::spawn(async move { runner.run().await });
        wait_for("transport open", || coordinator.channel.is_open()).await;

        coordinator.send_text("hello peer");
        assert!(coordinator.reply_gate().is_waiting());

        wait_for("peer reply", || log.lines().len() >= 2).await;
        assert_eq!(
            log.lines(),
            vec![
                (Speaker::User, "hello peer".to_string()),
                (Speaker::Peer, "reply to hello peer".to_string()),
            ]
        );
        assert!(!coordinator.reply_gate().is_waiting());
        coordinator.shutdown();
    }

    #[tokio::test]
    async fn empty_input_is_ignored() {
        let url = peer_server().await;
        let config = session_config(url);
        let (coordinator, log) = coordinator(&config, None, InputMode::PushToTalk);

        coordinator.send_text("   ");
        coordinator.send_text("");
        assert!(log.lines().is_empty());
        assert!(!coordinator.reply_gate().is_waiting());
        coordinator.shutdown();
    }

    #[tokio::test]
    async fn speech_mode_without_engine_is_unsupported() {
        let url = peer_server().await;
        let config = session_config(url);
        let (coordinator, _) = coordinator(&config, None, InputMode::Speech);

        let err = coordinator.mic_pressed().await.unwrap_err();
        assert!(matches!(err, ChatError::Unsupported { .. }));
        coordinator.shutdown();
    }

    #[tokio::test]
    async fn recognized_utterance_follows_the_outbound_text_path() {
        let url = peer_server().await;
        let config = session_config(url);
        let recognizer = Arc::new(ScriptedRecognizer(Mutex::new(Some(vec![
            TranscriptEvent {
                transcript: "turn on".to_string(),
                is_final: false,
            },
            TranscriptEvent {
                transcript: "turn on the lights".to_string(),
                is_final: true,
            },
        ]))));
        let (coordinator, log) = coordinator(&config, Some(recognizer), InputMode::Speech);

        coordinator.channel.connect();
        let runner = Arc::clone(&coordinator);
        tokio::spawn(async move { runner.run().await });
        wait_for("transport open", || coordinator.channel.is_open()).await;

        assert!(coordinator.mic_pressed().await.unwrap());

        wait_for("utterance round trip", || log.lines().len() >= 2).await;
        assert_eq!(
            log.lines()[0],
            (Speaker::User, "turn on the lights".to_string())
        );
        assert_eq!(
            log.lines()[1],
            (Speaker::Peer, "reply to turn on the lights".to_string())
        );
        coordinator.mic_released();
        coordinator.shutdown();
    }

    #[tokio::test]
    async fn speech_start_declined_while_reply_pending() {
        let url = peer_server().await;
        let config = session_config(url);
        let recognizer = Arc::new(ScriptedRecognizer(Mutex::new(Some(vec![]))));
        let (coordinator, _) = coordinator(&config, Some(recognizer), InputMode::Speech);

        coordinator.reply_gate().hold();
        assert!(!coordinator.mic_pressed().await.unwrap());

        coordinator.reply_gate().release();
        assert!(coordinator.mic_pressed().await.unwrap());
        coordinator.mic_released();
        coordinator.shutdown();
    }

    #[tokio::test]
    async fn reply_gate_toggles() {
        let gate = ReplyGate::new();
        assert!(!gate.is_waiting());
        gate.hold();
        assert!(gate.is_waiting());
        gate.release();
        assert!(!gate.is_waiting());
        // Idempotent in both directions
        gate.release();
        assert!(!gate.is_waiting());
    }
}
