//! Cipherline relay server.
//!
//! Wires the core handshake and session logic to the network:
//!
//! ```text
//! cipherline-server
//!   ├─ http        (POST /key-exchange, GET /ws upgrade, CORS)
//!   ├─ hub         (single-consumer router, per-target sealing)
//!   ├─ connection  (read/write pumps per WebSocket)
//!   └─ Server      (accept loop + graceful shutdown)
//! ```
//!
//! The hub is the only place that mutates membership; connections and the
//! HTTP layer talk to it through channels, and everything observes one
//! root shutdown signal.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod connection;
mod error;
mod http;
mod hub;

use std::net::SocketAddr;
use std::sync::Arc;

use cipherline_core::SessionStore;
use cipherline_crypto::ServerIdentity;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub use error::ServerError;
pub use hub::HubHandle;

use self::http::AppState;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind, e.g. `0.0.0.0:8080`.
    pub bind: String,
    /// Origins allowed by the key-exchange CORS policy.
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            allowed_origins: vec![
                "http://localhost:3001".to_string(),
                "http://localhost:3002".to_string(),
                "http://localhost:3003".to_string(),
                "http://localhost:9000".to_string(),
            ],
        }
    }
}

/// A bound relay server, ready to run.
pub struct Server<S: SessionStore> {
    listener: TcpListener,
    identity: Arc<ServerIdentity>,
    store: S,
    allowed_origins: Arc<Vec<String>>,
}

impl<S: SessionStore> Server<S> {
    /// Bind the listener.
    ///
    /// # Errors
    ///
    /// - [`ServerError::Bind`] if the address cannot be bound. Fatal to the
    ///   process.
    pub async fn bind(
        config: ServerConfig,
        identity: ServerIdentity,
        store: S,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(&config.bind).await.map_err(ServerError::Bind)?;

        Ok(Self {
            listener,
            identity: Arc::new(identity),
            store,
            allowed_origins: Arc::new(config.allowed_origins),
        })
    }

    /// The locally bound address (useful with port 0).
    ///
    /// # Errors
    ///
    /// - [`ServerError::Io`] if the socket has no local address.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the shutdown signal fires.
    ///
    /// Spawns the hub and one task per accepted socket. Returns once the
    /// accept loop has stopped and the hub has drained.
    ///
    /// # Errors
    ///
    /// Currently infallible after bind; the `Result` reserves room for
    /// fatal runtime conditions.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), ServerError> {
        let hub = hub::spawn_hub(self.store.clone(), shutdown.clone());
        let state = AppState {
            identity: self.identity,
            store: self.store,
            hub,
            allowed_origins: self.allowed_origins,
        };

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("server shutting down");
                    break;
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            debug!(%peer, "connection accepted");
                            tokio::spawn(http::handle_socket(
                                stream,
                                state.clone(),
                                shutdown.clone(),
                            ));
                        }
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                        }
                    }
                }
            }
        }

        Ok(())
    }
}
