//! Streaming transport: one persistent WebSocket, two frame kinds.
//!
//! The wire protocol is deliberately envelope-free. Text frames carry UTF-8
//! chat content (user- or peer-authored); Binary frames carry one
//! self-contained encoded audio unit. Frame boundaries are the transport's
//! own — no length prefixes, no JSON wrapping, no correlation ids. Replies
//! pair with requests by temporal proximity only.
//!
//! ## Design
//! - The connection is an owned object inside [`TransportChannel`] with
//!   explicit state transitions — never a free-floating handle reassigned
//!   across callbacks.
//! - Subscribers observe a typed event stream ([`ChannelEvent`]) through a
//!   broadcast channel, so the session router and a test harness can listen
//!   independently.
//! - Failure to open and failure to send are both recoverable locally;
//!   neither is ever fatal to the process.

pub mod channel;

pub use channel::{TransportChannel, TransportConfig};

// ── Frames ─────────────────────────────────────────────────────────

/// One unit of transport traffic. The tag is derived from the payload type
/// and is never ambiguous: strings travel as Text, audio bytes as Binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 chat content.
    Text(String),
    /// One self-contained encoded audio unit.
    Binary(Vec<u8>),
}

impl Frame {
    /// Short tag for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Binary(_) => "binary",
        }
    }

    /// Payload size in bytes.
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ── Connection state ───────────────────────────────────────────────

/// State of the owned connection inside the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket; a reconnect may be scheduled.
    Disconnected,
    /// Opening handshake in flight.
    Connecting,
    /// Ready to transmit.
    Open,
    /// Graceful shutdown requested; no reconnect will follow.
    Closing,
}

// ── Events ─────────────────────────────────────────────────────────

/// Typed event stream published by the channel. Every received frame is
/// classified by payload kind and delivered as exactly one event — a text
/// payload never reaches the binary arm and vice versa.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// The connection opened (initial or after a reconnect).
    Connected,
    /// The connection closed; a reconnect is already scheduled unless the
    /// channel was shut down deliberately.
    Disconnected,
    /// A peer text frame.
    Text(String),
    /// A peer audio frame.
    Binary(Vec<u8>),
    /// A frame could not be delivered after the single bounded retry.
    SendFailed(Frame),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_tag_follows_payload() {
        assert_eq!(Frame::Text("hi".into()).kind(), "text");
        assert_eq!(Frame::Binary(vec![0u8; 4]).kind(), "binary");
    }

    #[test]
    fn frame_len_and_empty() {
        assert_eq!(Frame::Text(String::new()).len(), 0);
        assert!(Frame::Text(String::new()).is_empty());
        assert_eq!(Frame::Binary(vec![1, 2, 3]).len(), 3);
        assert!(!Frame::Binary(vec![1, 2, 3]).is_empty());
    }
}
