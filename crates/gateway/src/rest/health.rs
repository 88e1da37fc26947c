use std::sync::Arc;

use axum::{extract::State, Json};
use chrono::Utc;
use serde::Serialize;
use utoipa::ToSchema;

use crate::state::GatewayState;

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    /// Open realtime connections on this node
    pub connections: usize,
}

#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service health status", body = HealthResponse)
    )
)]
pub async fn health_check(State(state): State<Arc<GatewayState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: Utc::now().to_rfc3339(),
        connections: state.registry.connection_count(),
    })
}
