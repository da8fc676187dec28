//! Eternal Daemon - keeps the memory store consolidated in the background

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use eternal_memory::EternalMemory;
use eternal_memory::config::Config;
use eternal_memory::error::{EternalError, Result};
use eternal_memory::llm::RemoteLlm;
use eternal_memory::vault::MarkdownVault;

/// Eternal - long-lived memory for AI agents
#[derive(Parser)]
#[command(name = "eternal")]
#[command(about = "Long-lived memory daemon for AI agents")]
#[command(version)]
pub struct Cli {
    /// Path to config file
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the scheduler until interrupted (default command)
    #[command(name = "serve")]
    Serve,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    init_logging();

    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve) => serve(cli.config).await,
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,eternal_memory=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn serve(config_path: Option<PathBuf>) -> Result<()> {
    tracing::info!("Starting Eternal daemon");

    let config = Config::load(config_path.as_deref())?;
    tracing::debug!("Config loaded: {:?}", config);

    let llm = Arc::new(RemoteLlm::new(&config.llm)?);
    let vault = Arc::new(MarkdownVault::new(config.vault_path()));
    tracing::info!("Markdown vault at: {}", vault.root().display());

    let memory = EternalMemory::open(config, llm, vault).await?;
    memory.start_scheduler().await;

    shutdown_signal().await?;

    memory.shutdown().await?;
    tracing::info!("Eternal daemon stopped");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() -> Result<()> {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .map_err(|e| EternalError::General(format!("Failed to install Ctrl+C handler: {e}")))
    };

    #[cfg(unix)]
    let terminate = async {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).map_err(
                |e| EternalError::General(format!("Failed to install SIGTERM handler: {e}")),
            )?;
        sigterm.recv().await;
        Ok::<(), EternalError>(())
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Result<()>>();

    tokio::select! {
        result = ctrl_c => {
            result?;
            tracing::info!("Received Ctrl+C, flushing buffer before exit");
        },
        result = terminate => {
            result?;
            tracing::info!("Received SIGTERM, flushing buffer before exit");
        },
    }
    Ok(())
}
