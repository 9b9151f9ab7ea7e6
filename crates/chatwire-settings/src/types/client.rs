//! Client connection and reconnection settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Endpoint and connection behaviour.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    /// Base endpoint; the client appends `/ws/<clientId>` when needed.
    pub endpoint: String,
    /// Connect as soon as the session controller is created.
    pub auto_connect: bool,
    /// Capacity of the per-connection outbound frame queue.
    pub outbound_buffer: usize,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            endpoint: "ws://localhost:8000".to_string(),
            auto_connect: false,
            outbound_buffer: 256,
        }
    }
}

/// Reconnection policy (linear backoff, bounded attempts).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconnectSettings {
    /// Attempts before giving up.
    pub max_attempts: u32,
    /// Delay unit in milliseconds; attempt `k` waits `k * baseDelayMs`.
    pub base_delay_ms: u64,
}

impl ReconnectSettings {
    /// The base delay as a [`Duration`].
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 1000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_delay_duration() {
        let settings = ReconnectSettings {
            max_attempts: 3,
            base_delay_ms: 250,
        };
        assert_eq!(settings.base_delay(), Duration::from_millis(250));
    }

    #[test]
    fn partial_client_settings() {
        let settings: ClientSettings =
            serde_json::from_str(r#"{"autoConnect": true}"#).unwrap();
        assert!(settings.auto_connect);
        assert_eq!(settings.endpoint, "ws://localhost:8000");
        assert_eq!(settings.outbound_buffer, 256);
    }
}
