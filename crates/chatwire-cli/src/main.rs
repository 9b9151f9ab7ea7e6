//! # chatwire
//!
//! Interactive terminal client. Prints inbound messages, sends each stdin
//! line as a `text` message, and disconnects on EOF or Ctrl-C.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chatwire_client::{
    SessionConfig, SessionController, SessionSnapshot, SupervisorState, WsConnector,
};
use chatwire_core::{ClientId, Message};
use chatwire_settings::ChatwireSettings;
use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

/// Chat over a reconnecting WebSocket session.
#[derive(Parser, Debug)]
#[command(name = "chatwire", about = "Reconnecting WebSocket chat client")]
struct Cli {
    /// Settings file (defaults to `~/.chatwire/settings.json`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect and chat interactively.
    Connect(ConnectArgs),
    /// Print a freshly generated client ID.
    ClientId,
    /// Print the effective settings as JSON.
    Settings,
}

#[derive(Args, Debug, Default)]
struct ConnectArgs {
    /// Base endpoint, e.g. `ws://localhost:8000`.
    #[arg(long)]
    endpoint: Option<String>,

    /// Reconnect attempts before giving up.
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Reconnect delay unit in milliseconds.
    #[arg(long)]
    base_delay_ms: Option<u64>,

    /// Print inbound messages as raw JSON lines.
    #[arg(long, default_value_t = false)]
    json: bool,
}

impl ConnectArgs {
    /// Layer command-line overrides on top of loaded settings.
    fn apply(&self, settings: &mut ChatwireSettings) {
        if let Some(endpoint) = &self.endpoint {
            settings.client.endpoint.clone_from(endpoint);
        }
        if let Some(n) = self.max_attempts {
            settings.reconnect.max_attempts = n;
        }
        if let Some(ms) = self.base_delay_ms {
            settings.reconnect.base_delay_ms = ms;
        }
    }
}

fn load_settings(path: Option<&PathBuf>) -> Result<ChatwireSettings> {
    let path = path.cloned().unwrap_or_else(chatwire_settings::settings_path);
    chatwire_settings::load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))
}

fn init_logging(settings: &ChatwireSettings) {
    if settings.logging.json {
        chatwire_core::logging::init_json_subscriber(&settings.logging.level);
    } else {
        chatwire_core::logging::init_subscriber(&settings.logging.level);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::ClientId => {
            println!("{}", ClientId::generate());
            Ok(())
        }
        Command::Settings => {
            let settings = load_settings(cli.settings.as_ref())?;
            println!("{}", serde_json::to_string_pretty(&settings)?);
            Ok(())
        }
        Command::Connect(args) => {
            let mut settings = load_settings(cli.settings.as_ref())?;
            args.apply(&mut settings);
            settings.validate().context("Invalid command-line override")?;
            if chatwire_settings::init_settings(settings).is_err() {
                bail!("Settings were already initialized");
            }
            let settings = chatwire_settings::get_settings();
            init_logging(settings);
            run_session(settings, args.json).await
        }
    }
}

fn print_message(message: &Message, json: bool) {
    if json {
        match serde_json::to_string(message) {
            Ok(line) => println!("{line}"),
            Err(e) => debug!(error = %e, "cannot re-encode message"),
        }
        return;
    }
    let body = message
        .body()
        .or(message.status.as_deref())
        .unwrap_or_default();
    match &message.agent {
        Some(agent) => println!("[{}:{agent}] {body}", message.kind),
        None => println!("[{}] {body}", message.kind),
    }
}

fn describe_retry(snapshot: &SessionSnapshot) -> Option<String> {
    snapshot.pending_retry.map(|delay: Duration| {
        format!(
            "reconnecting in {:.1}s (attempt {})",
            delay.as_secs_f64(),
            snapshot.reconnect_attempts
        )
    })
}

async fn run_session(settings: &ChatwireSettings, json: bool) -> Result<()> {
    let controller = SessionController::new(SessionConfig::from(settings), Arc::new(WsConnector));
    info!(client_id = %controller.client_id(), "starting session");

    let _ = controller.on_open(|| eprintln!("* connected"));
    let _ = controller.on_message(move |message| print_message(message, json));
    let _ = controller.on_error(|err| eprintln!("* error: {err}"));
    let _ = controller.on_close(|info| match info.code {
        Some(code) => eprintln!("* closed (code {code})"),
        None => eprintln!("* closed"),
    });

    // No-op if auto-connect already started; surfaces its construction error otherwise.
    controller.connect().context("Failed to start connection")?;

    let mut state = controller.subscribe_state();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    let outcome = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                debug!("interrupted");
                break Ok(());
            }
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break Ok(());
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if let Err(e) = controller.send(&Message::text(line).stamped()) {
                    eprintln!("* not sent: {e}");
                }
            }
            changed = state.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let snapshot = state.borrow_and_update().clone();
                if snapshot.retry_state == SupervisorState::Exhausted {
                    break Err(snapshot.last_error.unwrap_or_default());
                }
                if let Some(note) = describe_retry(&snapshot) {
                    eprintln!("* {note}");
                }
            }
        }
    };

    controller.disconnect();
    if let Err(reason) = outcome {
        bail!("Session ended: {reason}");
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
