//! Error types for voxchat.
//!
//! Transport failures never surface here — they are recoverable by design
//! and travel as [`ChannelEvent`](crate::transport::ChannelEvent) signals.
//! This taxonomy covers the boundaries where a caller holds a `Result`:
//! device acquisition, media decode, configuration, and feature support.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChatError {
    /// Opening the connection failed. Recoverable — the channel schedules
    /// its own reconnect; this variant only appears in logs and events.
    #[error("connection failed: {message}")]
    Connection { message: String },

    /// A frame could not be delivered after the single bounded retry.
    #[error("send failed after retry: {message}")]
    Send { message: String },

    /// Microphone access was refused or no input device exists.
    /// Terminal for the requesting call only; never retried automatically.
    #[error("microphone unavailable: {message}")]
    PermissionDenied { message: String },

    /// An inbound audio frame could not be decoded. The frame is dropped
    /// and the session continues.
    #[error("audio decode failed: {message}")]
    Decode { message: String },

    /// A required capability is missing (no speech recognizer wired, no
    /// audio output device). Fatal to that feature, nothing else.
    #[error("unsupported capability: {message}")]
    Unsupported { message: String },

    #[error("configuration error: {message}")]
    Config { message: String },
}

impl ChatError {
    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::PermissionDenied {
            message: message.into(),
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
