//! HTTP routes: the websocket stream plus a small connection-control API.

use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    routing::{any, get, post},
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use fleetpulse_common::ConnectionState;

use crate::{app::AppState, websocket::ws_handler};

/// Connection state as reported by `/api/connection`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub reconnect_attempts: u32,
}

impl ConnectionStatus {
    fn of(state: &AppState) -> Self {
        Self {
            state: state.hub.connection_state(),
            reconnect_attempts: state.hub.reconnect_attempts(),
        }
    }
}

/// Creates the application router.
pub fn router(app_state: AppState) -> Router {
    Router::new()
        .nest("/api", api_routes())
        .route("/ws", any(ws_handler))
        .with_state(app_state)
        .fallback(|req: Request<Body>| async move {
            warn!(method = %req.method(), uri = %req.uri(), "Unhandled request");
            StatusCode::NOT_FOUND
        })
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/connection", get(get_connection))
        .route("/connect", post(handle_connect))
        .route("/disconnect", post(handle_disconnect))
}

async fn get_connection(State(state): State<AppState>) -> Json<ConnectionStatus> {
    Json(ConnectionStatus::of(&state))
}

/// The banner's retry action. A no-op while connected or connecting.
async fn handle_connect(State(state): State<AppState>) -> Json<ConnectionStatus> {
    info!("Connect requested via API");
    state.hub.connect();
    Json(ConnectionStatus::of(&state))
}

async fn handle_disconnect(State(state): State<AppState>) -> Json<ConnectionStatus> {
    info!("Disconnect requested via API");
    state.hub.disconnect();
    Json(ConnectionStatus::of(&state))
}
