//! # chatwire-settings
//!
//! Layered configuration for the chatwire client.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`ChatwireSettings::default()`]
//! 2. **User file**: `~/.chatwire/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `CHATWIRE_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

use std::sync::OnceLock;

static SETTINGS: OnceLock<ChatwireSettings> = OnceLock::new();

/// Get the global settings instance.
///
/// Loaded lazily on first call; falls back to compiled defaults if the
/// settings file cannot be read or parsed.
pub fn get_settings() -> &'static ChatwireSettings {
    SETTINGS.get_or_init(|| load_settings().unwrap_or_default())
}

/// Initialize the global settings with a specific value.
///
/// Returns the settings back if the global was already initialized.
#[allow(clippy::result_large_err)]
pub fn init_settings(settings: ChatwireSettings) -> std::result::Result<(), ChatwireSettings> {
    SETTINGS.set(settings)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
