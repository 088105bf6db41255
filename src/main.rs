use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use broadcast_server::{
    client::{self, TungsteniteConnection},
    config::{ServerConfig, DEFAULT_CONNECT_ADDR},
    server::Server,
};

#[derive(Debug, Parser)]
#[command(
    name = "broadcast-server",
    about = "Relay every message from one WebSocket client to all the others"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the broadcast server
    Start {
        /// Listen address (default :8080, or BROADCAST_ADDR)
        #[arg(long)]
        addr: Option<String>,
    },
    /// Connect to a running server and chat from stdin
    Connect {
        /// Server address
        #[arg(long, default_value = DEFAULT_CONNECT_ADDR)]
        addr: String,
    },
}

#[tokio::main]
async fn main() {
    // Load .env file if present (before any env var reads)
    if let Err(e) = dotenvy::dotenv() {
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "broadcast_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Command::Start { addr } => start(addr).await,
        Command::Connect { addr } => connect(&addr).await,
    };

    if let Err(e) = result {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

async fn start(addr: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = ServerConfig::from_env();
    if let Some(addr) = addr {
        config.addr = addr;
    }

    tracing::info!("Starting broadcast server on {}", config.addr);
    let server = Arc::new(Server::new(config));
    let listener = server.bind().await?;

    tokio::spawn({
        let server = server.clone();
        async move {
            shutdown_signal().await;
            server.stop();
        }
    });

    server.serve(listener).await?;
    Ok(())
}

async fn connect(addr: &str) -> Result<(), Box<dyn std::error::Error>> {
    let connection = TungsteniteConnection::connect(addr).await?;
    client::run_interactive(connection).await?;
    Ok(())
}

/// Resolves on SIGINT, or SIGTERM on unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received interrupt signal"),
        _ = terminate => tracing::info!("Received terminate signal"),
    }
}
