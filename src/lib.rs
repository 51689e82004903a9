//! voxchat — real-time voice chat client.
//!
//! Multiplexes four streams over one persistent WebSocket: outbound typed
//! text, outbound captured speech audio, inbound synthesized text replies,
//! and inbound synthesized speech audio. Built to survive the realities of
//! a live link — connection loss, partial audio frames, overlapping
//! playback requests.
//!
//! ## Design
//! - Owned connection with explicit state transitions and fixed-interval
//!   infinite reconnect ([`transport`])
//! - Send with exactly one bounded retry; pending frames flush in order on
//!   reconnect, never twice
//! - Typed broadcast event stream so the session router and a test harness
//!   subscribe independently
//! - Best-effort live capture: ~100ms PCM16LE chunks, dropped (not
//!   buffered) while the link is down ([`audio::capture`])
//! - Single playback slot: later reply audio preempts earlier, two sources
//!   are never audible at once ([`audio::playback`])
//! - Silence-debounce utterance segmentation as an explicit state machine
//!   with one owned deadline ([`segment`])
//! - No error terminates the client; failures are contained locally and
//!   surfaced as events or notices ([`error`])

pub mod audio;
pub mod config;
pub mod error;
pub mod log;
pub mod segment;
pub mod session;
pub mod transport;

pub use audio::{CapturePipeline, CpalMicSource, MicSource, PlaybackPipeline};
pub use config::ChatConfig;
pub use error::ChatError;
pub use log::{MessageLog, Speaker, StdoutLog};
pub use segment::UtteranceSegmenter;
pub use session::{InputMode, ReplyGate, SessionCoordinator, SpeechRecognizer, TranscriptEvent};
pub use transport::{ChannelEvent, ConnectionState, Frame, TransportChannel, TransportConfig};
