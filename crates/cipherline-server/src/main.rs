//! Cipherline relay server binary.
//!
//! # Usage
//!
//! ```bash
//! # Development: key.pem and sessions.db in the working directory
//! cipherline-server
//!
//! # Explicit paths and origins
//! cipherline-server --bind 0.0.0.0:8080 --key /etc/cipherline/key.pem \
//!     --database-url /var/lib/cipherline/sessions.db \
//!     --allowed-origin https://chat.example.com
//! ```

use std::time::Duration;

use cipherline_core::SqliteStore;
use cipherline_crypto::ServerIdentity;
use cipherline_server::{Server, ServerConfig};
use clap::Parser;
use tokio::sync::watch;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Grace period for in-flight work during shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Cipherline secure chat relay
#[derive(Parser, Debug)]
#[command(name = "cipherline-server")]
#[command(about = "Encrypted chat relay with per-session key agreement")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:8080")]
    bind: String,

    /// Path to the server RSA private key (PEM)
    #[arg(short, long, default_value = "key.pem")]
    key: String,

    /// Session database location (path or `:memory:`)
    #[arg(long, env = "DATABASE_URL", default_value = "sessions.db")]
    database_url: String,

    /// Origin allowed by the key-exchange CORS policy (repeatable)
    #[arg(long = "allowed-origin")]
    allowed_origins: Vec<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("cipherline server starting");

    let identity = match ServerIdentity::from_pem_file(&args.key) {
        Ok(identity) => identity,
        Err(e) => {
            tracing::error!(path = %args.key, error = %e, "failed to load server key");
            std::process::exit(1);
        }
    };

    let store = match SqliteStore::open(&args.database_url) {
        Ok(store) => store,
        Err(e) => {
            tracing::error!(database_url = %args.database_url, error = %e, "failed to open session store");
            std::process::exit(1);
        }
    };

    let mut config = ServerConfig { bind: args.bind, ..Default::default() };
    if !args.allowed_origins.is_empty() {
        config.allowed_origins = args.allowed_origins;
    }

    let server = match Server::bind(config, identity, store).await {
        Ok(server) => server,
        Err(e) => {
            tracing::error!(error = %e, "failed to bind");
            std::process::exit(1);
        }
    };

    tracing::info!(addr = %server.local_addr()?, "listening");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server_task = tokio::spawn(server.run(shutdown_rx));

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    let _ = shutdown_tx.send(true);

    match tokio::time::timeout(SHUTDOWN_GRACE, server_task).await {
        Ok(Ok(Ok(()))) => {
            tracing::info!("server stopped gracefully");
            Ok(())
        }
        Ok(Ok(Err(e))) => {
            tracing::error!(error = %e, "server failed during shutdown");
            std::process::exit(1);
        }
        Ok(Err(e)) => {
            tracing::error!(error = %e, "server task panicked");
            std::process::exit(1);
        }
        Err(_) => {
            tracing::error!("graceful shutdown timed out, forcing exit");
            std::process::exit(1);
        }
    }
}
