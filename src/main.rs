//! # wyoming-snd-external
//!
//! Wyoming sound service that plays audio by piping raw PCM into an external
//! program (`aplay`, `paplay`, `sox`, ...).
//!
//! ## Startup:
//! 1. Load `.env`, command-line flags and configuration layers
//! 2. Set up logging to stderr (stdout may carry the protocol)
//! 3. Validate the configuration and build the sink launcher
//! 4. Serve clients until the transport closes or SIGINT/SIGTERM arrives
//!
//! ## Key Rust Concepts Used:
//! - **async/await**: every connection and sink write runs on the tokio runtime
//! - **Arc**: the session factory and sink launcher are shared by all connection tasks
//! - **watch channel**: one shutdown flag observed by the listener and every session
//! - **Result<T, E>**: startup errors bubble up through `?` and end the process

mod audio; // PCM formats and chunk conversion
mod config; // Layered configuration and CLI flags
mod error; // Session error taxonomy
mod playback; // Sink program launching and supervision
mod protocol; // Wyoming framing and events
mod server; // Listeners and session factory
mod session; // Per-connection event handling
mod state; // Shared configuration and counters

use anyhow::Result; // Startup errors with context
use clap::Parser; // Brings `CliArgs::parse` into scope
use crate::config::{AppConfig, CliArgs}; // Our layered configuration
use crate::playback::sink::{CommandLauncher, SinkLauncher}; // Real sink processes
use crate::server::{ServerUri, SessionFactory}; // Listener and per-connection sessions
use crate::state::ServerState; // Shared config and counters
use std::sync::Arc; // Shared ownership across connection tasks
use tokio::sync::watch; // Shutdown broadcast
use tracing::{debug, info, warn}; // Structured logging
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter}; // Logging setup

/// The application entry point.
///
/// ## What this function does:
/// 1. **Loads configuration** from `.env`, the config file, `APP_` variables and flags
/// 2. **Sets up logging** on stderr
/// 3. **Validates** the sink program, sink format and listen URI
/// 4. **Serves clients** until the transport closes or a signal arrives
/// 5. **Logs final counters** on the way out
///
/// ## Error Handling:
/// Anything that fails before serving starts (bad config, unparsable program,
/// bind failure) is returned and ends the process with a non-zero status.
/// Errors inside a session never reach here.
#[tokio::main]
async fn main() -> Result<()> {
    // Load .env into the environment; a missing file is fine
    dotenv::dotenv().ok();

    // Flags first, since they can name the config file
    let args = CliArgs::parse();
    let config = AppConfig::load(&args)?;
    // Logging comes before validation so its errors are readable
    init_tracing(config.logging.debug);

    // Refuse to start with a missing program or format
    config.validate()?;
    let uri: ServerUri = config.server.uri.parse()?;
    let argv = config.sink_command()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        uri = %uri,
        format = %config.target_format(),
        "Starting wyoming-snd-external"
    );

    // Nothing is spawned yet; each session launches its own sink on first audio
    let launcher = CommandLauncher::new(argv)?;
    debug!(program = ?launcher.argv(), "Sink program");
    let launcher: Arc<dyn SinkLauncher> = Arc::new(launcher);
    let state = ServerState::new(config);
    let factory = Arc::new(SessionFactory::new(state.clone(), launcher));

    // SIGINT/SIGTERM flip this to true
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    spawn_signal_handler(shutdown_tx);

    info!("Ready");
    // Returns after shutdown, once every session has terminated its sink
    server::run(&uri, factory, shutdown_rx).await?;

    info!(metrics = %serde_json::to_string(&state.snapshot())?, "Server stopped");
    Ok(())
}

/// Logs go to stderr. `RUST_LOG` overrides the level chosen by `--debug`.
fn init_tracing(debug: bool) {
    let default_filter = if debug {
        "info,wyoming_snd_external=debug"
    } else {
        "info"
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Flip the shutdown flag on the first SIGINT/SIGTERM.
fn spawn_signal_handler(shutdown: watch::Sender<bool>) {
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Shutting down");
        // Err only means every receiver is already gone
        let _ = shutdown.send(true);
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM"),
                _ = sigint.recv() => info!("Received SIGINT"),
            }
        }
        (Err(err), _) | (_, Err(err)) => {
            warn!(error = %err, "Failed to install signal handlers, falling back to Ctrl-C");
            wait_for_ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    wait_for_ctrl_c().await;
}

async fn wait_for_ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl-C"),
        Err(err) => {
            warn!(error = %err, "Cannot listen for Ctrl-C");
            // Never resolve, so the server keeps running
            std::future::pending::<()>().await;
        }
    }
}
