use anyhow::Result;
use clap::{Parser, Subcommand};
use relay_core::transport::MockTransport;
use relay_service::{load_config, open_relay, reindex_stores, spawn_cleanup_loop};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Privxx ciphertext relay", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the relay until Ctrl-C
    Run {
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// Rebuild both indexes from their logs and exit
    Reindex {
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Run { config, data_dir } => run_command(config, data_dir).await,
        Commands::Reindex { config, data_dir } => reindex_command(config, data_dir),
    }
}

async fn run_command(config_path: Option<PathBuf>, data_dir: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path.as_deref(), data_dir)?;
    // The concrete mixnet client is wired in by the deployment; the mock
    // keeps the process runnable on its own.
    let transport = Arc::new(MockTransport::new(config.max_envelope_bytes));
    let relay = open_relay(&config, transport)?;
    relay.start()?;

    let (cleanup_task, cleanup) =
        spawn_cleanup_loop(relay.sessions().clone(), config.cleanup_interval());

    info!("relay started");
    signal::ctrl_c().await?;
    info!("relay stopping");

    cleanup.shutdown();
    if let Err(err) = cleanup_task.await {
        warn!(error = %err, "cleanup loop did not exit cleanly");
    }
    relay.stop()?;
    Ok(())
}

fn reindex_command(config_path: Option<PathBuf>, data_dir: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path.as_deref(), data_dir)?;
    let transport = Arc::new(MockTransport::new(config.max_envelope_bytes));
    let summary = reindex_stores(&config, transport)?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
