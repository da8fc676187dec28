use std::path::PathBuf;

use clap::{Parser, Subcommand};
use eternal_cli::commands::{BufferCommand, JobsCommand, MemoryCommand, StatsCommand};
use eternal_cli::error::CliResult;
use eternal_cli::output::OutputFormat;
use eternal_memory::config::Config;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "eternal-cli")]
#[command(about = "Eternal CLI - Management tool for the Eternal memory store")]
#[command(version)]
pub struct Cli {
    #[clap(long, short, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[clap(long, short = 'd', global = true, help = "Path to data directory")]
    pub data_dir: Option<PathBuf>,

    #[clap(long, short = 'c', global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    #[clap(about = "Memory commands")]
    Memory(MemoryCommand),

    #[clap(about = "Conversation buffer commands")]
    Buffer(BufferCommand),

    #[clap(about = "Scheduled job commands")]
    Jobs(JobsCommand),

    #[clap(about = "Show storage statistics")]
    Stats(StatsCommand),
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> CliResult<()> {
    let cli = Cli::parse();
    init_logging();

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Table
    };

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(data_dir) = cli.data_dir {
        config.storage.data_dir = data_dir;
    }

    match &cli.command {
        Command::Memory(cmd) => cmd.execute(&config, format).await,
        Command::Buffer(cmd) => cmd.execute(&config, format).await,
        Command::Jobs(cmd) => cmd.execute(&config, format).await,
        Command::Stats(cmd) => cmd.execute(&config, format).await,
    }
}

/// Logs go to stderr at `warn` unless `RUST_LOG` says otherwise
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
