//! Microphone capture pipeline.
//!
//! Acquires the default input device, slices the live signal into fixed
//! ~100ms chunks of PCM16LE mono, and forwards each chunk to the transport
//! while it is open. Live audio is best-effort by contract: a chunk
//! produced while the channel is closed (or while the consumer lags) is
//! dropped, never buffered — a stale chunk is worse than a missing one.
//!
//! The device seam is the [`MicSource`] trait so the forwarding and
//! lifecycle rules can be exercised without hardware.

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{ChatError, Result};
use crate::session::ReplyGate;
use crate::transport::{Frame, TransportChannel};

/// Chunks in flight between the capture thread and the forward task.
/// Small on purpose: backlog means stale audio.
const CHUNK_QUEUE: usize = 32;

// ── Device seam ────────────────────────────────────────────────────

/// Releases the acquired hardware exactly once, on explicit stop or drop.
pub struct ReleaseGuard(Option<Box<dyn FnOnce() + Send>>);

impl ReleaseGuard {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self(Some(Box::new(release)))
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        if let Some(release) = self.0.take() {
            release();
        }
    }
}

/// An open microphone stream: encoded chunks plus the hardware release.
pub struct MicStream {
    chunks: mpsc::Receiver<Vec<u8>>,
    release: ReleaseGuard,
}

impl MicStream {
    pub fn new(chunks: mpsc::Receiver<Vec<u8>>, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            chunks,
            release: ReleaseGuard::new(release),
        }
    }
}

/// A source of microphone audio. `open` is the permission-prompt /
/// device-acquisition boundary; denial is terminal for that call only.
#[async_trait]
pub trait MicSource: Send + Sync {
    async fn open(&self, sample_rate: u32, chunk_interval: Duration) -> Result<MicStream>;
}

// ── Capture pipeline ───────────────────────────────────────────────

struct CaptureSession {
    forward: JoinHandle<()>,
    _release: ReleaseGuard,
}

/// Owns the microphone between `start` and `stop` and forwards its chunks
/// to the transport.
pub struct CapturePipeline {
    source: Arc<dyn MicSource>,
    channel: TransportChannel,
    reply_gate: ReplyGate,
    sample_rate: u32,
    chunk_interval: Duration,
    session: Mutex<Option<CaptureSession>>,
}

impl CapturePipeline {
    pub fn new(
        source: Arc<dyn MicSource>,
        channel: TransportChannel,
        reply_gate: ReplyGate,
        sample_rate: u32,
        chunk_interval: Duration,
    ) -> Self {
        Self {
            source,
            channel,
            reply_gate,
            sample_rate,
            chunk_interval,
            session: Mutex::new(None),
        }
    }

    /// Begin capturing. Returns `Ok(false)` without touching the hardware
    /// while a peer reply is still in progress — talking over the system's
    /// own reply is guarded against, not an error. Any previous session is
    /// torn down first; the microphone is singly owned.
    pub async fn start(&self) -> Result<bool> {
        if self.reply_gate.is_waiting() {
            tracing::info!("ignoring capture start: a reply is still in progress");
            return Ok(false);
        }
        self.stop();

        let stream = self
            .source
            .open(self.sample_rate, self.chunk_interval)
            .await?;
        let MicStream {
            mut chunks,
            release,
        } = stream;

        let channel = self.channel.clone();
        let forward = tokio::spawn(async move {
            let mut dropped: u64 = 0;
            while let Some(chunk) = chunks.recv().await {
                if chunk.is_empty() {
                    continue;
                }
                if channel.try_send(Frame::Binary(chunk)).is_err() {
                    dropped += 1;
                    tracing::debug!(dropped, "transport closed; dropping live audio chunk");
                }
            }
            if dropped > 0 {
                tracing::debug!(dropped, "capture ended with dropped chunks");
            }
        });

        *self.session.lock() = Some(CaptureSession {
            forward,
            _release: release,
        });
        tracing::info!(
            sample_rate = self.sample_rate,
            chunk_ms = self.chunk_interval.as_millis() as u64,
            "capture started"
        );
        Ok(true)
    }

    /// End capturing. Safe from any state, any number of times; acquired
    /// hardware is released exactly once.
    pub fn stop(&self) {
        if let Some(session) = self.session.lock().take() {
            session.forward.abort();
            tracing::debug!("capture stopped");
            // Dropping the session fires its release guard
        }
    }

    pub fn is_active(&self) -> bool {
        self.session.lock().is_some()
    }
}

// ── cpal-backed source ─────────────────────────────────────────────

/// Production microphone source: default cpal input device, mono f32
/// callback re-chunked into PCM16LE slices on a dedicated thread (cpal
/// streams are not `Send`).
pub struct CpalMicSource;

#[async_trait]
impl MicSource for CpalMicSource {
    async fn open(&self, sample_rate: u32, chunk_interval: Duration) -> Result<MicStream> {
        let (chunk_tx, chunk_rx) = mpsc::channel::<Vec<u8>>(CHUNK_QUEUE);
        let (ready_tx, ready_rx) = oneshot::channel::<Result<()>>();
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();

        std::thread::Builder::new()
            .name("voxchat-capture".into())
            .spawn(move || capture_thread(sample_rate, chunk_interval, chunk_tx, ready_tx, stop_rx))
            .map_err(|e| ChatError::permission_denied(format!("cannot spawn capture thread: {e}")))?;

        ready_rx
            .await
            .map_err(|_| ChatError::permission_denied("capture thread died during setup"))??;

        Ok(MicStream::new(chunk_rx, move || {
            let _ = stop_tx.send(());
        }))
    }
}

fn capture_thread(
    sample_rate: u32,
    chunk_interval: Duration,
    chunk_tx: mpsc::Sender<Vec<u8>>,
    ready_tx: oneshot::Sender<Result<()>>,
    stop_rx: std::sync::mpsc::Receiver<()>,
) {
    let host = cpal::default_host();
    let Some(device) = host.default_input_device() else {
        let _ = ready_tx.send(Err(ChatError::permission_denied(
            "no input device available",
        )));
        return;
    };

    let stream_config = cpal::StreamConfig {
        channels: 1,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };
    let chunk_bytes = (sample_rate as u64 * chunk_interval.as_millis() as u64 / 1000) as usize * 2;
    let mut pcm: Vec<u8> = Vec::with_capacity(chunk_bytes);

    let stream = match device.build_input_stream(
        &stream_config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            for &sample in data {
                let value = (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16;
                pcm.extend_from_slice(&value.to_le_bytes());
                if pcm.len() >= chunk_bytes {
                    // Never block the realtime callback; a full queue means
                    // the consumer lags and the slice is best dropped.
                    let _ = chunk_tx.try_send(std::mem::take(&mut pcm));
                }
            }
        },
        |err| tracing::warn!(error = %err, "input stream error"),
        None,
    ) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready_tx.send(Err(ChatError::permission_denied(format!(
                "cannot open input stream: {e}"
            ))));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(ChatError::permission_denied(format!(
            "cannot start input stream: {e}"
        ))));
        return;
    }

    tracing::info!(sample_rate, "microphone acquired");
    let _ = ready_tx.send(Ok(()));

    // Park until the release guard fires (or is dropped), then let the
    // stream drop and free the hardware.
    let _ = stop_rx.recv();
    drop(stream);
    tracing::debug!("microphone released");
}

// ── Tests ──────────────────────────────────────────────────────────
