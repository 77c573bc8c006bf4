//! # Tickhook — deferred webhook scheduler
//!
//! Usage:
//!   tickhook serve                 # Start the HTTP API (default port 8080)
//!   tickhook serve --port 9090     # Custom port
//!   tickhook sweep                 # Run one minute invocation locally and exit
//!   tickhook init-config           # Write ~/.tickhook/config.toml with defaults

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tickhook_core::TickhookConfig;
use tickhook_gateway::AppState;
use tickhook_scheduler::InvocationOutcome;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "tickhook",
    version,
    about = "Deferred webhook scheduler with bounded minute-driven sweeps"
)]
struct Cli {
    /// Config file (default: $TICKHOOK_CONFIG or ~/.tickhook/config.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP API
    Serve {
        /// Listen port (overrides gateway.port)
        #[arg(short, long)]
        port: Option<u16>,

        /// Listen address (overrides gateway.host)
        #[arg(long)]
        host: Option<String>,
    },
    /// Run a single minute invocation against the configured store
    Sweep,
    /// Write a config file with the default settings
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn init_logging(verbose: bool, json: bool) {
    let filter = if verbose {
        "tickhook=debug,tickhook_scheduler=debug,tickhook_gateway=debug,tower_http=debug"
    } else {
        "tickhook=info,tickhook_scheduler=info,tickhook_gateway=info,tower_http=info"
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(env_filter).init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }
}

fn config_path(cli: &Cli) -> Option<PathBuf> {
    cli.config
        .as_deref()
        .map(|p| PathBuf::from(shellexpand::tilde(p).to_string()))
}

fn load_config(cli: &Cli) -> Result<TickhookConfig> {
    let config = match config_path(cli) {
        Some(path) => TickhookConfig::load_from(&path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => TickhookConfig::load()?,
    };
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json_logs);

    match &cli.command {
        Command::Serve { port, host } => {
            let mut config = load_config(&cli)?;
            if let Some(port) = port {
                config.gateway.port = *port;
            }
            if let Some(host) = host {
                config.gateway.host = host.clone();
            }
            tracing::info!(
                "Tickhook v{} (store={:?}, budget={}s, cadence={}s)",
                env!("CARGO_PKG_VERSION"),
                config.store.backend,
                config.driver.budget_secs,
                config.driver.cadence_secs
            );
            tickhook_gateway::start(&config).await
        }
        Command::Sweep => {
            let config = load_config(&cli)?;
            let state = AppState::from_config(&config)?;
            let report = match state.driver.run().await {
                InvocationOutcome::NothingToDo { reason } => serde_json::json!({
                    "outcome": "nothing_to_do",
                    "message": reason,
                }),
                InvocationOutcome::Accepted { cycles, totals } => serde_json::json!({
                    "outcome": "accepted",
                    "cycles": cycles,
                    "dispatched": totals.due,
                    "rescheduledAfterFailure": totals.rescheduled_after_failure,
                    "rescheduledAfterSuccess": totals.rescheduled_after_success,
                    "deleted": totals.deleted,
                    "storeErrors": totals.store_errors,
                }),
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::InitConfig { force } => {
            let path = config_path(&cli).unwrap_or_else(TickhookConfig::default_path);
            if path.exists() && !force {
                anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
            }
            TickhookConfig::default().save_to(&path)?;
            println!("Wrote default config to {}", path.display());
            Ok(())
        }
    }
}
