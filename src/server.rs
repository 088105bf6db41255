//! Front door: accepts WebSocket connections and serves the reporting routes.

use axum::{routing::get, Router};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::api;
use crate::config::ServerConfig;
use crate::registry::Registry;
use crate::state::AppState;
use crate::ws;

/// Errors that abort the server
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),

    #[error("server task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub struct Server {
    config: ServerConfig,
    state: Arc<AppState>,
}

impl Server {
    /// Create a server with its own empty registry
    pub fn new(config: ServerConfig) -> Self {
        Self::with_registry(config, Arc::new(Registry::new()))
    }

    /// Create a server around an existing registry
    pub fn with_registry(config: ServerConfig, registry: Arc<Registry>) -> Self {
        let state = Arc::new(AppState::new(registry, config.queue_capacity));
        Self { config, state }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.state.registry
    }

    /// Build the router with all routes
    pub fn router(&self) -> Router {
        Router::new()
            .route("/ws", get(ws::ws_handler))
            .route("/health", get(api::health))
            .route("/stats", get(api::stats))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Bind the listening socket
    pub async fn bind(&self) -> Result<TcpListener, ServerError> {
        let addr = self.config.listen_addr();
        TcpListener::bind(addr.as_str())
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })
    }

    /// Serve until [`Server::stop`] is called, then close the listener and
    /// give connected clients up to the grace period to close.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        match listener.local_addr() {
            Ok(addr) => tracing::info!("Listening on http://{}", addr),
            Err(_) => tracing::info!("Listening on {}", self.config.addr),
        }

        let shutdown = self.state.shutdown.clone();
        let app = self.router();
        let mut server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
        });

        tokio::select! {
            result = &mut server => {
                // Exited without a stop request
                result??;
                return Ok(());
            }
            _ = self.state.shutdown.cancelled() => {}
        }

        let grace = self.config.shutdown_grace;
        tracing::info!(
            "Shutting down, waiting up to {:?} for {} clients",
            grace,
            self.state.registry.count().await
        );

        self.state.agents.close();
        let drain = async {
            let served = server.await;
            self.state.agents.wait().await;
            served
        };

        match tokio::time::timeout(grace, drain).await {
            Ok(served) => served??,
            Err(_) => tracing::warn!(
                "Shutdown grace period elapsed with {} clients still connected",
                self.state.registry.count().await
            ),
        }

        tracing::info!("Server stopped");
        Ok(())
    }

    /// Bind and serve
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Request shutdown. Calling it more than once is harmless.
    pub fn stop(&self) {
        if !self.state.shutdown.is_cancelled() {
            tracing::info!("Stop requested");
        }
        self.state.shutdown.cancel();
    }

    pub fn is_stopping(&self) -> bool {
        self.state.is_shutting_down()
    }

    /// Connection agents that have not finished closing yet
    pub fn active_agents(&self) -> usize {
        self.state.agents.len()
    }
}
