//! Audio pipelines: microphone capture and reply playback.
//!
//! Both sides of the audio path own a singly-held exclusive resource — the
//! microphone for capture, the output device for playback — and both keep
//! the non-`Send` cpal stream on a dedicated thread, talking to the async
//! session through channels.

pub mod capture;
pub mod playback;

pub use capture::{CapturePipeline, CpalMicSource, MicSource, MicStream};
pub use playback::PlaybackPipeline;
