//! Structured logging setup.
//!
//! Every crate logs through `tracing` with structured fields
//! (`client_id`, `generation`, `attempt`, `delay_ms`). The host binary calls
//! [`init_subscriber`] once at startup; tests use [`capture_logs`] to assert
//! on emitted events without touching the global subscriber.

pub mod test_utils;

pub use test_utils::{CapturedEvent, CapturedLogs, capture_logs};

/// Default filter when neither `RUST_LOG` nor settings provide one.
pub const DEFAULT_LOG_LEVEL: &str = "warn";

/// Initialize the global tracing subscriber with stderr output.
///
/// `RUST_LOG` takes precedence over `level`. Call once at application
/// startup; subsequent calls are no-ops.
pub fn init_subscriber(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact();

    // try_init fails if a global subscriber is already set
    let _ = subscriber.try_init();
}

/// Initialize the global subscriber with JSON lines on stderr.
///
/// Intended for hosts that ship logs to a collector.
pub fn init_json_subscriber(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .json()
        .try_init();
}
