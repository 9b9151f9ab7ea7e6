//! Settings types.
//!
//! All structs use `#[serde(rename_all = "camelCase", default)]` so a
//! partial settings file only needs the keys it overrides.

mod client;

pub use client::{ClientSettings, ReconnectSettings};

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object (`~/.chatwire/settings.json`).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatwireSettings {
    /// Endpoint and connection behaviour.
    pub client: ClientSettings,
    /// Reconnection policy.
    pub reconnect: ReconnectSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl ChatwireSettings {
    /// Reject values no client can run with.
    pub fn validate(&self) -> Result<()> {
        if self.client.endpoint.trim().is_empty() {
            return Err(SettingsError::InvalidValue("client.endpoint is empty".into()));
        }
        if self.reconnect.base_delay_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "reconnect.baseDelayMs must be greater than zero".into(),
            ));
        }
        if self.client.outbound_buffer == 0 {
            return Err(SettingsError::InvalidValue(
                "client.outboundBuffer must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            json: false,
        }
    }
}
