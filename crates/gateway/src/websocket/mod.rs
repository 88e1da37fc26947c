//! Realtime endpoints
//!
//! Upgrades are not behind the REST auth middleware: browsers cannot set
//! headers on a websocket handshake, so the session accepts a `token` query
//! parameter, a bearer header or an `authenticate` first frame.

pub mod session;

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State, WebSocketUpgrade},
    http::HeaderMap,
    response::Response,
    routing::get,
    Router,
};
use serde::Deserialize;
use tracing::debug;
use utoipa::IntoParams;

use crate::middleware::header_token;
use crate::registry::ChatScope;
use crate::state::GatewayState;

pub use session::{run_session, SessionError, SessionMachine, SessionState};

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct ConnectQuery {
    /// Access token, for clients that cannot send an `Authorization` header
    pub token: Option<String>,
}

/// Create all WebSocket routes
pub fn create_websocket_routes() -> Router<Arc<GatewayState>> {
    Router::new()
        .route("/ws", get(global_websocket_handler))
        .route("/chats/:chat_id/ws", get(chat_websocket_handler))
}

/// Connection receiving events for every chat the user is in
pub async fn global_websocket_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<ConnectQuery>,
    headers: HeaderMap,
    State(state): State<Arc<GatewayState>>,
) -> Response {
    upgrade(ws, state, ChatScope::Global, query.token.or_else(|| header_token(&headers)))
}

/// Connection scoped to a single chat
pub async fn chat_websocket_handler(
    ws: WebSocketUpgrade,
    Path(chat_id): Path<String>,
    Query(query): Query<ConnectQuery>,
    headers: HeaderMap,
    State(state): State<Arc<GatewayState>>,
) -> Response {
    upgrade(
        ws,
        state,
        ChatScope::Chat(chat_id),
        query.token.or_else(|| header_token(&headers)),
    )
}

fn upgrade(
    ws: WebSocketUpgrade,
    state: Arc<GatewayState>,
    scope: ChatScope,
    token: Option<String>,
) -> Response {
    debug!(?scope, has_token = token.is_some(), "websocket upgrade");
    // Oversized frames are answered with an error event; only the transport
    // limit far above that drops the connection.
    let limit = state.realtime.max_frame_bytes.saturating_mul(4);
    ws.max_message_size(limit)
        .max_frame_size(limit)
        .on_upgrade(move |socket| run_session(socket, state, scope, token))
}
