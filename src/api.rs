//! HTTP reporting endpoints.

use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::state::AppState;

/// Response structure for GET /stats
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    /// Currently connected clients
    pub clients: usize,
    /// Messages dropped because a recipient's queue was full
    pub dropped_messages: u64,
    pub started_at: String,
    pub uptime_secs: u64,
}

/// GET /health
///
/// Plain-text connected client count.
pub async fn health(State(state): State<Arc<AppState>>) -> String {
    format!("Clients connected: {}", state.registry.count().await)
}

/// GET /stats
pub async fn stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    Json(StatsResponse {
        clients: state.registry.count().await,
        dropped_messages: state.registry.dropped_total(),
        started_at: state.started_at.to_rfc3339(),
        uptime_secs: state.uptime_secs(),
    })
}
