//! Client configuration.
//!
//! Every timing knob the session uses lives here with the defaults the
//! protocol was tuned for. A config file is optional — a missing file or a
//! partial one falls back to defaults field by field.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::ChatError;

/// Configuration for a chat session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// WebSocket endpoint of the chat peer.
    pub endpoint: String,

    /// Delay before the single reconnect attempt scheduled after a close.
    /// Fixed interval — the cycle repeats indefinitely, it does not grow.
    pub reconnect_delay_ms: u64,

    /// Delay before the one retry of a send issued while disconnected.
    pub send_retry_delay_ms: u64,

    /// Silence window after the last recognized speech before an utterance
    /// is considered complete and flushed.
    pub silence_timeout_ms: u64,

    /// Duration of one captured microphone chunk.
    pub chunk_interval_ms: u64,

    /// Capture sample rate in Hz (mono PCM16LE on the wire).
    pub sample_rate: u32,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://127.0.0.1:8000/ws".to_string(),
            reconnect_delay_ms: 2_000,
            send_retry_delay_ms: 1_000,
            silence_timeout_ms: 1_000,
            chunk_interval_ms: 100,
            sample_rate: 16_000,
        }
    }
}

impl ChatConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ChatError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ChatError::Config {
            message: format!("cannot read {}: {e}", path.display()),
        })?;
        let config: Self = toml::from_str(&raw).map_err(|e| ChatError::Config {
            message: format!("cannot parse {}: {e}", path.display()),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would wedge a timer loop or the capture thread.
    pub fn validate(&self) -> Result<(), ChatError> {
        if self.endpoint.is_empty() {
            return Err(ChatError::config("endpoint must not be empty"));
        }
        if self.chunk_interval_ms == 0 {
            return Err(ChatError::config("chunk_interval_ms must be > 0"));
        }
        if self.silence_timeout_ms == 0 {
            return Err(ChatError::config("silence_timeout_ms must be > 0"));
        }
        if self.sample_rate == 0 {
            return Err(ChatError::config("sample_rate must be > 0"));
        }
        Ok(())
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn send_retry_delay(&self) -> Duration {
        Duration::from_millis(self.send_retry_delay_ms)
    }

    pub fn silence_timeout(&self) -> Duration {
        Duration::from_millis(self.silence_timeout_ms)
    }

    pub fn chunk_interval(&self) -> Duration {
        Duration::from_millis(self.chunk_interval_ms)
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_protocol_constants() {
        let config = ChatConfig::default();
        assert_eq!(config.reconnect_delay_ms, 2_000);
        assert_eq!(config.send_retry_delay_ms, 1_000);
        assert_eq!(config.silence_timeout_ms, 1_000);
        assert_eq!(config.chunk_interval_ms, 100);
        assert_eq!(config.sample_rate, 16_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_file_takes_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "endpoint = \"ws://example.test/ws\"").unwrap();
        writeln!(file, "reconnect_delay_ms = 500").unwrap();

        let config = ChatConfig::load(file.path()).unwrap();
        assert_eq!(config.endpoint, "ws://example.test/ws");
        assert_eq!(config.reconnect_delay_ms, 500);
        // Unspecified keys keep defaults
        assert_eq!(config.silence_timeout_ms, 1_000);
        assert_eq!(config.chunk_interval_ms, 100);
    }

    #[test]
    fn missing_file_is_config_error() {
        let err = ChatConfig::load(Path::new("/nonexistent/voxchat.toml")).unwrap_err();
        assert!(matches!(err, ChatError::Config { .. }));
    }

    #[test]
    fn zero_intervals_rejected() {
        let config = ChatConfig {
            chunk_interval_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ChatConfig {
            silence_timeout_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn round_trips_through_toml() {
        let config = ChatConfig::default();
        let raw = toml::to_string(&config).unwrap();
        let parsed: ChatConfig = toml::from_str(&raw).unwrap();
        assert_eq!(parsed.endpoint, config.endpoint);
        assert_eq!(parsed.sample_rate, config.sample_rate);
    }
}
