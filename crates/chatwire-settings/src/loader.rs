//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`ChatwireSettings::default()`]
//! 2. If `~/.chatwire/settings.json` exists, deep-merge user values over defaults
//! 3. Apply environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::ChatwireSettings;

/// Base endpoint override.
pub const ENV_ENDPOINT: &str = "CHATWIRE_ENDPOINT";
/// Auto-connect override.
pub const ENV_AUTO_CONNECT: &str = "CHATWIRE_AUTO_CONNECT";
/// Maximum reconnect attempts override.
pub const ENV_MAX_ATTEMPTS: &str = "CHATWIRE_RECONNECT_MAX_ATTEMPTS";
/// Reconnect base delay override.
pub const ENV_BASE_DELAY_MS: &str = "CHATWIRE_RECONNECT_BASE_DELAY_MS";
/// Log level override.
pub const ENV_LOG_LEVEL: &str = "CHATWIRE_LOG_LEVEL";

/// Resolve the path to the settings file (`~/.chatwire/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".chatwire").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<ChatwireSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<ChatwireSettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings, |name| std::env::var(name).ok());
    settings.validate()?;
    Ok(settings)
}

fn load_file_layer(path: &Path) -> Result<ChatwireSettings> {
    let defaults = serde_json::to_value(ChatwireSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment overrides read through `lookup`.
///
/// Invalid values are ignored with a warning and the file/default value
/// stays in effect.
pub fn apply_env_overrides<F>(settings: &mut ChatwireSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let read = |name: &str| lookup(name).filter(|v| !v.is_empty());

    if let Some(v) = read(ENV_ENDPOINT) {
        settings.client.endpoint = v;
    }
    if let Some(v) = read(ENV_AUTO_CONNECT) {
        match parse_bool(&v) {
            Some(b) => settings.client.auto_connect = b,
            None => warn_invalid(ENV_AUTO_CONNECT, &v),
        }
    }
    if let Some(v) = read(ENV_MAX_ATTEMPTS) {
        match parse_u32_range(&v, 0, 100) {
            Some(n) => settings.reconnect.max_attempts = n,
            None => warn_invalid(ENV_MAX_ATTEMPTS, &v),
        }
    }
    if let Some(v) = read(ENV_BASE_DELAY_MS) {
        match parse_u64_range(&v, 1, 600_000) {
            Some(n) => settings.reconnect.base_delay_ms = n,
            None => warn_invalid(ENV_BASE_DELAY_MS, &v),
        }
    }
    if let Some(v) = read(ENV_LOG_LEVEL) {
        settings.logging.level = v;
    }
}

fn warn_invalid(key: &str, value: &str) {
    tracing::warn!(key, value, "invalid env var, ignoring");
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u32` within a range.
pub fn parse_u32_range(val: &str, min: u32, max: u32) -> Option<u32> {
    let n: u32 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
