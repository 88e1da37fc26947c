//! Participant REST endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json, Router,
};
use courier_database::ChatParticipant;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use utoipa::{IntoParams, ToSchema};

use crate::error::{ErrorResponse, GatewayError, GatewayResult};
use crate::middleware::AuthenticatedUser;
use crate::state::GatewayState;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantResponse {
    pub user_id: String,
    pub is_admin: bool,
    pub joined_at: String,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AddParticipantRequest {
    pub user_id: String,
}

#[derive(Debug, Default, Deserialize, IntoParams, ToSchema)]
pub struct ListParticipantsQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RemoveParticipantResponse {
    /// Participant promoted to admin because the last admin left
    pub promoted: Option<String>,
    /// The group has no participants left
    pub chat_closed: bool,
}

impl From<ChatParticipant> for ParticipantResponse {
    fn from(participant: ChatParticipant) -> Self {
        Self {
            user_id: participant.user_id,
            is_admin: participant.is_admin,
            joined_at: participant.joined_at.to_rfc3339(),
        }
    }
}

/// Create participant routes
pub fn create_participant_routes() -> Router<Arc<GatewayState>> {
    Router::new()
        .route(
            "/chats/:chat_id/participants",
            axum::routing::get(list_participants).post(add_participant),
        )
        .route(
            "/chats/:chat_id/participants/:user_id",
            axum::routing::delete(remove_participant),
        )
}

#[utoipa::path(
    get,
    path = "/api/chats/{chat_id}/participants",
    tag = "Participants",
    params(
        ("chat_id" = String, Path, description = "Chat ID"),
        ListParticipantsQuery
    ),
    responses(
        (status = 200, description = "Participants of the chat", body = Vec<ParticipantResponse>),
        (status = 403, description = "Not a participant", body = ErrorResponse),
        (status = 404, description = "Chat not found", body = ErrorResponse)
    )
)]
pub async fn list_participants(
    Path(chat_id): Path<String>,
    Query(params): Query<ListParticipantsQuery>,
    State(state): State<Arc<GatewayState>>,
    Extension(user): Extension<AuthenticatedUser>,
) -> GatewayResult<Json<Vec<ParticipantResponse>>> {
    let participants = state
        .chat_service
        .list_participants(&chat_id, user.id(), params.limit, params.offset)
        .await?;

    Ok(Json(participants.into_iter().map(ParticipantResponse::from).collect()))
}

#[utoipa::path(
    post,
    path = "/api/chats/{chat_id}/participants",
    tag = "Participants",
    params(
        ("chat_id" = String, Path, description = "Chat ID")
    ),
    request_body = AddParticipantRequest,
    responses(
        (status = 201, description = "Participant added", body = ParticipantResponse),
        (status = 400, description = "Direct chats have fixed membership", body = ErrorResponse),
        (status = 403, description = "Not a participant", body = ErrorResponse),
        (status = 409, description = "Already a participant", body = ErrorResponse)
    )
)]
pub async fn add_participant(
    Path(chat_id): Path<String>,
    State(state): State<Arc<GatewayState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(payload): Json<AddParticipantRequest>,
) -> GatewayResult<(StatusCode, Json<ParticipantResponse>)> {
    let user_id = payload.user_id.trim();
    if user_id.is_empty() {
        return Err(GatewayError::InvalidRequest("userId must not be empty".to_string()));
    }

    let participant = state
        .chat_service
        .add_participant(&chat_id, user_id, user.id())
        .await?;

    info!(%chat_id, user_id, added_by = user.id(), "participant added");
    Ok((StatusCode::CREATED, Json(participant.into())))
}

#[utoipa::path(
    delete,
    path = "/api/chats/{chat_id}/participants/{user_id}",
    tag = "Participants",
    params(
        ("chat_id" = String, Path, description = "Chat ID"),
        ("user_id" = String, Path, description = "Participant to remove, or the caller to leave")
    ),
    responses(
        (status = 200, description = "Participant removed", body = RemoveParticipantResponse),
        (status = 403, description = "Not allowed to remove this participant", body = ErrorResponse),
        (status = 404, description = "Chat or participant not found", body = ErrorResponse)
    )
)]
pub async fn remove_participant(
    Path((chat_id, user_id)): Path<(String, String)>,
    State(state): State<Arc<GatewayState>>,
    Extension(user): Extension<AuthenticatedUser>,
) -> GatewayResult<Json<RemoveParticipantResponse>> {
    let removal = state
        .chat_service
        .remove_participant(&chat_id, &user_id, user.id())
        .await?;

    info!(%chat_id, %user_id, removed_by = user.id(), "participant removed");
    Ok(Json(RemoveParticipantResponse {
        promoted: removal.promoted,
        chat_closed: removal.chat_closed,
    }))
}
