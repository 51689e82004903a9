//! Utterance segmentation for speech input.
//!
//! Recognition engines emit a rolling transcript while the user speaks; the
//! segmenter decides when the spoken turn is *done*. Each transcript update
//! re-arms a silence deadline; when the deadline passes with accumulated
//! text, that text is flushed as one complete utterance and the accumulator
//! resets.
//!
//! ```text
//! Idle ──update──▸ Listening ──(silence deadline)──▸ flush ──▸ Idle
//!                     │  ▲
//!                     └──┘ update re-arms the deadline
//! ```
//!
//! The state machine runs as one owned task with a single deadline — no
//! scattered timer side effects — so tests can drive it under paused time.
//! Stopping mid-utterance discards the accumulator without flushing; only
//! the silence deadline or an explicit final-result boundary flushes.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Far-future fallback used while no deadline is armed. `select!` needs a
/// sleep future even for a disabled branch.
const IDLE_PARK: Duration = Duration::from_secs(86_400);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Listening,
}

#[derive(Debug)]
enum Command {
    /// Cumulative transcript of the utterance so far (replaces, not appends).
    Update(String),
    /// Explicit final-result boundary: flush immediately.
    Finalize,
    /// End recognition; discard any partial utterance.
    Stop,
}

/// Handle to a running segmenter task. Completed utterances arrive on the
/// channel given to [`UtteranceSegmenter::spawn`].
pub struct UtteranceSegmenter {
    cmd_tx: mpsc::Sender<Command>,
    task: JoinHandle<()>,
}

impl UtteranceSegmenter {
    /// Spawn the segmenter. `silence_timeout` is the quiet period after the
    /// last recognized speech that completes an utterance; flushed
    /// utterances are delivered on `utterance_tx`.
    pub fn spawn(silence_timeout: Duration, utterance_tx: mpsc::Sender<String>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let task = tokio::spawn(run(cmd_rx, silence_timeout, utterance_tx));
        Self { cmd_tx, task }
    }

    /// Feed the latest cumulative transcript. Re-arms the silence deadline.
    pub async fn update(&self, transcript: impl Into<String>) {
        let _ = self.cmd_tx.send(Command::Update(transcript.into())).await;
    }

    /// Signal an explicit end-of-utterance from the recognizer: flush now
    /// rather than waiting out the silence window.
    pub async fn finalize(&self) {
        let _ = self.cmd_tx.send(Command::Finalize).await;
    }

    /// Stop recognition. A partial utterance still inside the silence
    /// window is discarded, not flushed.
    pub async fn stop(self) {
        let _ = self.cmd_tx.send(Command::Stop).await;
        let _ = self.task.await;
    }
}

async fn run(
    mut cmd_rx: mpsc::Receiver<Command>,
    silence_timeout: Duration,
    utterance_tx: mpsc::Sender<String>,
) {
    let mut phase = Phase::Idle;
    let mut transcript = String::new();
    let mut deadline: Option<Instant> = None;

    loop {
        let park_until = deadline.unwrap_or_else(|| Instant::now() + IDLE_PARK);
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(Command::Update(text)) => {
                    transcript = text;
                    deadline = Some(Instant::now() + silence_timeout);
                    if phase == Phase::Idle && !transcript.is_empty() {
                        phase = Phase::Listening;
                        tracing::debug!("utterance started");
                    }
                }
                Some(Command::Finalize) => {
                    deadline = None;
                    if !transcript.is_empty() {
                        flush(&mut transcript, &utterance_tx).await;
                    }
                    phase = Phase::Idle;
                }
                Some(Command::Stop) | None => {
                    if !transcript.is_empty() {
                        tracing::debug!(
                            chars = transcript.len(),
                            "recognition stopped mid-utterance; discarding partial"
                        );
                    }
                    return;
                }
            },
            _ = tokio::time::sleep_until(park_until), if deadline.is_some() => {
                deadline = None;
                if !transcript.is_empty() {
                    flush(&mut transcript, &utterance_tx).await;
                }
                phase = Phase::Idle;
            }
        }
    }
}

async fn flush(transcript: &mut String, utterance_tx: &mpsc::Sender<String>) {
    let utterance = std::mem::take(transcript);
    tracing::debug!(chars = utterance.len(), "utterance complete");
    let _ = utterance_tx.send(utterance).await;
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_millis(1_000);

    fn spawn_segmenter() -> (UtteranceSegmenter, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(8);
        (UtteranceSegmenter::spawn(TIMEOUT, tx), rx)
    }

    #[tokio::test(start_paused = true)]
    async fn silence_flushes_latest_transcript_exactly_once() {
        let (segmenter, mut utterances) = spawn_segmenter();

        segmenter.update("hello").await;
        tokio::time::sleep(Duration::from_millis(400)).await;
        segmenter.update("hello there").await;
        tokio::time::sleep(TIMEOUT + Duration::from_millis(100)).await;

        assert_eq!(utterances.recv().await.as_deref(), Some("hello there"));
        // Accumulator is empty afterward: more silence produces nothing
        tokio::time::sleep(TIMEOUT * 3).await;
        assert!(utterances.try_recv().is_err());
        segmenter.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn update_re_arms_the_deadline() {
        let (segmenter, mut utterances) = spawn_segmenter();

        segmenter.update("one").await;
        tokio::time::sleep(Duration::from_millis(700)).await;
        segmenter.update("one two").await;
        // 700ms after the second update: original deadline has passed,
        // re-armed deadline has not
        tokio::time::sleep(Duration::from_millis(700)).await;
        assert!(utterances.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(utterances.recv().await.as_deref(), Some("one two"));
        segmenter.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn empty_transcript_never_flushes() {
        let (segmenter, mut utterances) = spawn_segmenter();

        segmenter.update("").await;
        tokio::time::sleep(TIMEOUT * 2).await;
        assert!(utterances.try_recv().is_err());
        segmenter.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_discards_partial_utterance() {
        let (segmenter, mut utterances) = spawn_segmenter();

        segmenter.update("never sent").await;
        segmenter.stop().await;

        tokio::time::sleep(TIMEOUT * 2).await;
        assert!(utterances.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn finalize_flushes_without_waiting() {
        let (segmenter, mut utterances) = spawn_segmenter();

        segmenter.update("done speaking").await;
        segmenter.finalize().await;

        // Well inside the silence window
        let flushed = tokio::time::timeout(Duration::from_millis(50), utterances.recv())
            .await
            .expect("finalize did not flush promptly");
        assert_eq!(flushed.as_deref(), Some("done speaking"));
        segmenter.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn consecutive_utterances_flush_independently() {
        let (segmenter, mut utterances) = spawn_segmenter();

        segmenter.update("first turn").await;
        tokio::time::sleep(TIMEOUT + Duration::from_millis(50)).await;
        assert_eq!(utterances.recv().await.as_deref(), Some("first turn"));

        segmenter.update("second turn").await;
        tokio::time::sleep(TIMEOUT + Duration::from_millis(50)).await;
        assert_eq!(utterances.recv().await.as_deref(), Some("second turn"));
        segmenter.stop().await;
    }
}
