//! keylease - inspect, recover and run commands under distributed lease locks

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::error;

mod commands;
mod config;
mod startup;

use config::{AppConfig, Overrides};

#[derive(Debug, Parser)]
#[command(name = "keylease", version, about)]
struct Cli {
    /// Configuration file (defaults to conf/keylease.yml when present)
    #[arg(short = 'c', long = "config", env = "KEYLEASE_CONFIG")]
    config: Option<PathBuf>,

    /// Redis URL, overriding the configured host/port/db
    #[arg(long = "redis-url", env = "KEYLEASE_REDIS_URL")]
    redis_url: Option<String>,

    /// Lease TTL in milliseconds
    #[arg(long = "ttl-ms")]
    ttl_ms: Option<u64>,

    /// Log level or RUST_LOG-style directives
    #[arg(long = "log-level", env = "KEYLEASE_LOG_LEVEL")]
    log_level: Option<String>,

    /// Directory for a daily rolling log file
    #[arg(long = "log-dir")]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the lock's health as JSON
    Health {
        #[arg(long)]
        key: String,
        /// Owner token to check ownership against
        #[arg(long)]
        token: Option<String>,
    },
    /// Delete the lock regardless of its owner
    ForceUnlock {
        #[arg(long)]
        key: String,
    },
    /// Remove the lock only if it is held by the given token
    Cleanup {
        #[arg(long)]
        key: String,
        #[arg(long)]
        token: String,
    },
    /// Run a command while holding the lock
    Run {
        #[arg(long)]
        key: String,
        /// How long to wait for the lock before giving up
        #[arg(long = "wait-ms", default_value_t = 0)]
        wait_ms: u64,
        /// Owner token; a random one is generated when omitted
        #[arg(long)]
        token: Option<String>,
        #[arg(trailing_var_arg = true, required = true, num_args = 1..)]
        command: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let overrides = Overrides {
        redis_url: cli.redis_url.clone(),
        ttl_ms: cli.ttl_ms,
        log_level: cli.log_level.clone(),
        log_dir: cli.log_dir.clone(),
    };
    let app = AppConfig::load(cli.config.as_deref(), &overrides)?;

    let _logging_guard = startup::logging::init_logging(&app.logging)?;
    keylease_core::metrics::init_metrics();

    let store = commands::connect(&app).await?;

    let result = match cli.command {
        Command::Health { key, token } => commands::health(store, &app, key, token).await,
        Command::ForceUnlock { key } => commands::force_unlock(store, &app, key).await,
        Command::Cleanup { key, token } => commands::cleanup(store, &app, key, token).await,
        Command::Run {
            key,
            wait_ms,
            token,
            command,
        } => commands::run(store, &app, key, token, wait_ms, command).await,
    };

    match result {
        Ok(code) => Ok(code),
        Err(e) => {
            error!(error = %format!("{:#}", e), "Command failed");
            Ok(ExitCode::FAILURE)
        }
    }
}
