//! HTTP surface: the WebSocket upgrade, the two chat routes other services
//! call, and health/stats/info.

use axum::{
    extract::{Path, State, WebSocketUpgrade},
    http::{HeaderMap, Method, StatusCode},
    response::IntoResponse,
    routing::{delete, get},
    Json, Router,
};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::ServerError;
use crate::handler;
use crate::protocol::ChatMessage;
use crate::state::RelayState;

/// Header naming the user on whose behalf an HTTP request is made.
pub const ACTOR_HEADER: &str = "x-user-id";

pub fn router(state: RelayState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::DELETE])
        .allow_headers(Any);

    Router::new()
        .route("/ws", get(ws_handler))
        .route("/chat/:my_id/:target_id", get(history_handler))
        .route("/chat/:id", delete(delete_handler))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .route("/info", get(info_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ── Route Handlers ────────────────────────────────────────────────────────────

/// WebSocket upgrade handler for client connections.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<RelayState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handler::handle_websocket(socket, state))
}

/// The acting user from the `x-user-id` header.
fn actor(headers: &HeaderMap) -> Result<&str, ServerError> {
    headers
        .get(ACTOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(ServerError::MissingActor)
}

/// Decrypted conversation between two users, oldest first. Only `my_id`
/// may read it.
async fn history_handler(
    State(state): State<RelayState>,
    Path((my_id, target_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<Vec<ChatMessage>>, ServerError> {
    if actor(&headers)? != my_id {
        return Err(ServerError::Forbidden(
            "Only a participant may read this conversation".to_string(),
        ));
    }

    let messages = state.relay.history(&my_id, &target_id).await?;
    Ok(Json(messages))
}

/// Hard-delete a message outside a socket session. Connected parties are
/// notified exactly as for a socket delete.
async fn delete_handler(
    State(state): State<RelayState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, ServerError> {
    state.relay.delete_out_of_band(actor(&headers)?, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Health check endpoint.
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "haven-relay",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Statistics endpoint.
async fn stats_handler(State(state): State<RelayState>) -> Result<impl IntoResponse, ServerError> {
    let stored = state.relay.message_count().await?;
    Ok(Json(json!({
        "connections": state.connection_count(),
        "online_users": state.online_count(),
        "stored_messages": stored,
        "uptime_secs": state.uptime_secs(),
    })))
}

/// Server info endpoint, also usable for client-side latency checks.
async fn info_handler(State(state): State<RelayState>) -> impl IntoResponse {
    Json(json!({
        "service": "haven-relay",
        "version": env!("CARGO_PKG_VERSION"),
        "region": state.config.region,
        "location": state.config.location,
        "delete_policy": format!("{:?}", state.config.delete_policy),
        "online_users": state.online_count(),
        "timestamp": chrono::Utc::now().timestamp_millis(),
    }))
}
