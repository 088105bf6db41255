pub mod socket;

use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use crate::agent::ConnectionAgent;
use crate::state::AppState;

pub use socket::WsConnection;

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => {
            tracing::warn!("Failed to upgrade connection: {}", rejection);
            return rejection.into_response();
        }
    };

    if state.is_shutting_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, "Server is shutting down").into_response();
    }

    ws.on_failed_upgrade(|e| tracing::warn!("WebSocket upgrade failed: {}", e))
        .on_upgrade(move |socket| handle_socket(socket, state))
}

/// Run one connection agent until the connection ends
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let agent = ConnectionAgent::new(
        WsConnection::new(socket),
        state.registry.clone(),
        state.queue_capacity,
    )
    .with_shutdown(state.shutdown.child_token());

    tracing::info!("WebSocket connected: {}", agent.id());
    let exit = state.agents.track_future(agent.run()).await;
    tracing::debug!("Connection task for {} finished", exit.id);
}
