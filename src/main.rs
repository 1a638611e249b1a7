//! hookbroker
//!
//! Runs the broker with the built-in policy, audit and stats hooks until
//! SIGINT or SIGTERM.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client connection                ┌──────────────────────────────────────────────┐
//!     ─────────────────────────────────┼─▶ net::Listener ──▶ broker::session          │
//!                                      │                          │                    │
//!                                      │                          ▼                    │
//!                                      │                   broker::Broker ◀──route──┐  │
//!                                      │                          │                 │  │
//!                                      │                          ▼                 │  │
//!                                      │                 hooks::HookRegistry        │  │
//!                                      │            policy │ audit │ stats ─────────┘  │
//!                                      │                                               │
//!                                      │  config ── lifecycle::Orchestrator ── signals │
//!                                      └──────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

use hookbroker::config::{load_config, BrokerConfig};
use hookbroker::observability::{logging, metrics};
use hookbroker::Orchestrator;

#[derive(Parser)]
#[command(name = "hookbroker", version, about = "Publish/subscribe broker with a hook pipeline")]
struct Cli {
    /// Path to a TOML configuration file. Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => match load_config(path) {
            Ok(config) => config,
            Err(e) => {
                logging::init_logging(&BrokerConfig::default().observability);
                tracing::error!(path = %path.display(), error = %e, "Failed to load configuration");
                return ExitCode::FAILURE;
            }
        },
        None => BrokerConfig::default(),
    };

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "hookbroker starting");
    tracing::info!(
        listeners = config.listeners.len(),
        policy = ?config.hooks.policy,
        audit = config.hooks.audit.enabled,
        grace_period_secs = ?config.shutdown.grace_period_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let orchestrator = match Orchestrator::from_config(config) {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            tracing::error!(error = %e, "Failed to build broker");
            return ExitCode::FAILURE;
        }
    };

    match orchestrator.run_until_signal().await {
        Ok(signal) => {
            tracing::info!(signal = %signal, "hookbroker stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "hookbroker failed");
            ExitCode::FAILURE
        }
    }
}
