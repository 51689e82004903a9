//! Reply audio playback pipeline.
//!
//! Every inbound binary frame is one self-contained audio unit. Each is
//! decoded independently; a decode failure drops that frame and nothing
//! else. Playback is fire-and-forget with a single slot: starting a newly
//! decoded unit silences whatever was audible first, so two sources are
//! never heard at once — later audio preempts earlier audio rather than
//! overlapping it.
//!
//! The output device lives on a dedicated thread (cpal streams are not
//! `Send`); the pipeline handle is cheap to clone and pass around.

use parking_lot::Mutex;
use rodio::{Decoder, OutputStream, Sink};
use std::io::Cursor;

use crate::error::{ChatError, Result};

// ── Playback slot ──────────────────────────────────────────────────

/// A sound that can be started and silenced. The seam between the slot
/// discipline and the actual output device.
pub trait AudioHandle: Send {
    fn start(&self);
    fn stop(&self);
}

impl AudioHandle for Sink {
    fn start(&self) {
        self.play();
    }

    fn stop(&self) {
        Sink::stop(self);
    }
}

/// Holds at most one active sound. Installing a successor stops the
/// current occupant *before* the successor starts.
pub struct PlaybackSlot<T: AudioHandle> {
    active: Mutex<Option<T>>,
}

impl<T: AudioHandle> PlaybackSlot<T> {
    pub fn new() -> Self {
        Self {
            active: Mutex::new(None),
        }
    }

    /// Silence the occupant, then install and start the successor.
    pub fn install(&self, next: T) {
        let mut active = self.active.lock();
        if let Some(previous) = active.take() {
            previous.stop();
        }
        next.start();
        *active = Some(next);
    }

    /// Silence and evict the occupant, if any. Idempotent.
    pub fn clear(&self) {
        if let Some(previous) = self.active.lock().take() {
            previous.stop();
        }
    }

    pub fn is_occupied(&self) -> bool {
        self.active.lock().is_some()
    }
}

impl<T: AudioHandle> Default for PlaybackSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

// ── Decoding ───────────────────────────────────────────────────────

type FrameSource = Decoder<Cursor<Vec<u8>>>;

/// Decode one binary frame into a playable source. Frames must decode
/// independently; a malformed or partial frame is not recoverable.
fn decode_frame(bytes: Vec<u8>) -> Result<FrameSource> {
    Decoder::new(Cursor::new(bytes)).map_err(|e| ChatError::decode(e.to_string()))
}

// ── Playback pipeline ──────────────────────────────────────────────

enum PlaybackCmd {
    Play(FrameSource),
    StopAll,
}

/// Handle to the playback thread.
#[derive(Clone)]
pub struct PlaybackPipeline {
    cmd_tx: std::sync::mpsc::Sender<PlaybackCmd>,
}

impl PlaybackPipeline {
    /// Open the default output device. A machine without one reports
    /// `Unsupported` — playback is then disabled, nothing else is affected.
    pub fn new() -> Result<Self> {
        let (cmd_tx, cmd_rx) = std::sync::mpsc::channel();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();

        std::thread::Builder::new()
            .name("voxchat-playback".into())
            .spawn(move || output_thread(cmd_rx, ready_tx))
            .map_err(|e| ChatError::unsupported(format!("cannot spawn playback thread: {e}")))?;

        ready_rx
            .recv()
            .map_err(|_| ChatError::unsupported("playback thread died during setup"))??;

        Ok(Self { cmd_tx })
    }

    /// Decode one frame and play it, preempting the current sound. Decode
    /// failure drops the frame; the session continues.
    pub fn play(&self, bytes: Vec<u8>) -> Result<()> {
        let source = decode_frame(bytes)?;
        self.cmd_tx
            .send(PlaybackCmd::Play(source))
            .map_err(|_| ChatError::unsupported("playback thread is gone"))?;
        Ok(())
    }

    /// Silence the active sound, if any.
    pub fn stop(&self) {
        let _ = self.cmd_tx.send(PlaybackCmd::StopAll);
    }
}

fn output_thread(
    cmd_rx: std::sync::mpsc::Receiver<PlaybackCmd>,
    ready_tx: std::sync::mpsc::Sender<Result<()>>,
) {
    let (stream, handle) = match OutputStream::try_default() {
        Ok(pair) => pair,
        Err(e) => {
            let _ = ready_tx.send(Err(ChatError::unsupported(format!(
                "no audio output device: {e}"
            ))));
            return;
        }
    };
    tracing::info!("audio output ready");
    let _ = ready_tx.send(Ok(()));

    let slot: PlaybackSlot<Sink> = PlaybackSlot::new();
    while let Ok(cmd) = cmd_rx.recv() {
        match cmd {
            PlaybackCmd::Play(source) => {
                let sink = match Sink::try_new(&handle) {
                    Ok(sink) => sink,
                    Err(e) => {
                        tracing::warn!(error = %e, "cannot open playback sink; dropping frame");
                        continue;
                    }
                };
                // Queue the sound paused; install() silences the previous
                // occupant before starting this one.
                sink.pause();
                sink.append(source);
                slot.install(sink);
            }
            PlaybackCmd::StopAll => slot.clear(),
        }
    }

    slot.clear();
    drop(stream);
    tracing::debug!("audio output closed");
}

// ── Tests ──────────────────────────────────────────────────────────
