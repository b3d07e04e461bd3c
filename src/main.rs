//! WorkVault Server Binary
//!
//! Main entry point for the WorkVault TCP server

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use workvault::{Result, ServerConfig, VaultServer};

#[derive(Parser, Debug)]
#[command(name = "workvault", version, about = "WorkVault record server")]
struct Cli {
    /// TCP port to listen on
    #[arg(short, long, default_value_t = 8080)]
    port: u16,

    /// Number of worker threads
    #[arg(short, long, default_value_t = 4)]
    workers: usize,

    /// Journal file used to persist records across restarts
    #[arg(short, long)]
    journal: Option<PathBuf>,
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = ServerConfig {
        port: cli.port,
        workers: cli.workers,
        journal_path: cli.journal,
        ..ServerConfig::default()
    };

    let server = Arc::new(VaultServer::new(config)?);

    // Setup graceful shutdown on SIGINT (Ctrl+C)
    let server_clone = Arc::clone(&server);
    tokio::spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }

        info!("Received Ctrl+C, initiating graceful shutdown...");
        if let Err(e) = server_clone.shutdown() {
            error!("Failed to initiate shutdown: {}", e);
        }
    });

    server.run().await
}
