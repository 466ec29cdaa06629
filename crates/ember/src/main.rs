//! Ember daemon - runs extraction watchers against the memory store

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use ember::MemoryEngine;
use ember::config::Config;
use ember::error::Result;
use ember::memory::SessionId;

/// Ember - long-term conversational memory for LLM agents
#[derive(Parser)]
#[command(name = "ember")]
#[command(about = "Extracts, scores and retrieves conversational memories")]
#[command(version)]
pub struct Cli {
    /// Path to config file
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Watch sessions and extract memories as their turns overflow
    Watch {
        /// Session ids to watch
        #[arg(long = "session", short = 's', required = true)]
        sessions: Vec<String>,
    },

    /// Run a single extraction cycle for a session
    Extract {
        #[arg(long, short = 's')]
        session: String,

        /// Extract turns beyond the context window even below the trigger
        #[arg(long)]
        force: bool,
    },
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
    let config = Config::load(cli.config.as_deref())?;
    tracing::debug!("Config loaded: {:?}", config);

    let engine = MemoryEngine::open(config).await?;

    let outcome = match cli.command {
        Command::Watch { sessions } => watch(&engine, &sessions).await,
        Command::Extract { session, force } => {
            let session = SessionId::try_from(session)?;
            let outcome = engine.run_extraction(&session, force).await?;
            tracing::info!(?outcome, "Extraction cycle finished");
            Ok(())
        }
    };

    engine.shutdown().await;
    outcome
}

fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,ember=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn watch(engine: &MemoryEngine, sessions: &[String]) -> Result<()> {
    for raw in sessions {
        let session = SessionId::try_from(raw.as_str())?;
        engine.start_watcher(&session).await?;
    }
    tracing::info!(sessions = sessions.len(), "Watching; press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Ctrl-C received, stopping watchers");
    Ok(())
}
