//! Tollgate CLI
//!
//! Take, hold and release distributed locks from the shell.

mod commands;
mod config;
mod factory;

use clap::{Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::TollgateConfig;

/// Tollgate CLI: run commands under a distributed lock.
#[derive(Parser, Debug)]
#[command(name = "tollgate", version, about)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(
        long,
        env = "TOLLGATE_CONFIG",
        default_value = "tollgate.toml",
        global = true
    )]
    config: String,

    /// Output format.
    #[arg(long, default_value = "text", global = true)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a command while holding a lock, releasing it when the command exits.
    Run(commands::run::RunArgs),
    /// Take a manually released lock and print its token.
    Acquire(commands::acquire::AcquireArgs),
    /// Release a lock taken with `acquire`.
    Release(commands::release::ReleaseArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = TollgateConfig::load(&cli.config)?;

    match &cli.command {
        Command::Run(_) if !config.store.is_shared() => {
            warn!(
                backend = %config.store.backend,
                "store is local to this process; the lock does not exclude other processes"
            );
        }
        Command::Run(_) => {}
        Command::Acquire(_) => config.store.require_shared("acquire")?,
        Command::Release(_) => config.store.require_shared("release")?,
    }

    let registry = factory::create_registry(&config.store).await?;
    let coordinator = registry.coordinator(&config.store.backend)?;

    match cli.command {
        Command::Run(args) => {
            commands::run::run(&coordinator, &config.lock, &args, &cli.format).await
        }
        Command::Acquire(args) => {
            commands::acquire::run(&coordinator, &config.lock, &args, &cli.format).await
        }
        Command::Release(args) => {
            commands::release::run(&coordinator, &config.lock, &args, &cli.format).await
        }
    }
}
