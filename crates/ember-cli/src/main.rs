use std::path::PathBuf;

use clap::{Parser, Subcommand};
use ember::config::Config;
use ember::storage::SqliteStore;
use ember_cli::commands::{CoreCommand, MemoryCommand, QueryCommand, StatsCommand};
use ember_cli::error::CliResult;
use ember_cli::output::OutputFormat;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ember-cli")]
#[command(about = "Ember CLI - Management tool for the ember memory store")]
#[command(version)]
pub struct Cli {
    #[clap(long, short, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[clap(long, short = 'd', global = true, help = "Path to the SQLite database")]
    pub database: Option<PathBuf>,

    #[clap(long, short = 'c', global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    #[clap(about = "Memory inspection commands")]
    Memory(MemoryCommand),

    #[clap(about = "Core memory commands")]
    Core(CoreCommand),

    #[clap(about = "Run a retrieval query against the store")]
    Query(QueryCommand),

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
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Table
    };

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(path) = &cli.database {
        config.storage.database_path = path.clone();
    }

    let store = SqliteStore::open(&config.storage).await?;

    let outcome = match &cli.command {
        Command::Memory(cmd) => cmd.execute(&store, format).await,
        Command::Core(cmd) => cmd.execute(&store, format).await,
        Command::Query(cmd) => cmd.execute(&store, &config, format).await,
        Command::Stats(cmd) => cmd.execute(&store, format).await,
    };

    store.close().await;
    outcome
}
