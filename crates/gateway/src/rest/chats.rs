//! Chat REST endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json, Router,
};
use courier_chats::CreateChat;
use courier_database::{Chat, ChatKind};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use utoipa::{IntoParams, ToSchema};

use crate::error::{ErrorResponse, GatewayError, GatewayResult};
use crate::middleware::AuthenticatedUser;
use crate::state::GatewayState;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub id: String,
    /// `direct` or `group`
    pub kind: String,
    pub name: Option<String>,
    pub created_by: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateChatRequest {
    /// `direct` or `group`
    pub kind: String,
    pub name: Option<String>,
    /// Everyone to add besides the caller
    #[serde(default)]
    pub participant_ids: Vec<String>,
}

#[derive(Debug, Default, Deserialize, IntoParams, ToSchema)]
pub struct ListChatsQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl From<Chat> for ChatResponse {
    fn from(chat: Chat) -> Self {
        Self {
            id: chat.id,
            kind: chat.kind.to_string(),
            name: chat.name,
            created_by: chat.created_by,
            created_at: chat.created_at.to_rfc3339(),
            updated_at: chat.updated_at.to_rfc3339(),
        }
    }
}

/// Create chat routes
pub fn create_chat_routes() -> Router<Arc<GatewayState>> {
    Router::new()
        .route("/chats", axum::routing::get(list_chats).post(create_chat))
        .route("/chats/:chat_id", axum::routing::get(get_chat).delete(hide_chat))
}

#[utoipa::path(
    get,
    path = "/api/chats",
    tag = "Chats",
    params(ListChatsQuery),
    responses(
        (status = 200, description = "Chats the caller participates in", body = Vec<ChatResponse>),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
        (status = 503, description = "Store temporarily unavailable", body = ErrorResponse)
    )
)]
pub async fn list_chats(
    Query(params): Query<ListChatsQuery>,
    State(state): State<Arc<GatewayState>>,
    Extension(user): Extension<AuthenticatedUser>,
) -> GatewayResult<Json<Vec<ChatResponse>>> {
    let chats = state
        .chat_service
        .list_chats(user.id(), params.limit, params.offset)
        .await?;

    Ok(Json(chats.into_iter().map(ChatResponse::from).collect()))
}

#[utoipa::path(
    post,
    path = "/api/chats",
    tag = "Chats",
    request_body = CreateChatRequest,
    responses(
        (status = 201, description = "Chat created", body = ChatResponse),
        (status = 200, description = "Direct chat already existed", body = ChatResponse),
        (status = 400, description = "Invalid request", body = ErrorResponse),
        (status = 401, description = "Unauthorized", body = ErrorResponse)
    )
)]
pub async fn create_chat(
    State(state): State<Arc<GatewayState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(payload): Json<CreateChatRequest>,
) -> GatewayResult<impl IntoResponse> {
    let kind = ChatKind::try_from(payload.kind.as_str()).map_err(GatewayError::InvalidRequest)?;

    let created = state
        .chat_service
        .create_chat(CreateChat {
            kind,
            name: payload.name,
            created_by: user.id().to_string(),
            participant_ids: payload.participant_ids,
        })
        .await?;

    let status = if created.created {
        info!(chat_id = %created.chat.id, user_id = user.id(), %kind, "chat created");
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(ChatResponse::from(created.chat))))
}

#[utoipa::path(
    get,
    path = "/api/chats/{chat_id}",
    tag = "Chats",
    params(
        ("chat_id" = String, Path, description = "Chat ID")
    ),
    responses(
        (status = 200, description = "Chat details", body = ChatResponse),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
        (status = 403, description = "Not a participant", body = ErrorResponse),
        (status = 404, description = "Chat not found", body = ErrorResponse)
    )
)]
pub async fn get_chat(
    Path(chat_id): Path<String>,
    State(state): State<Arc<GatewayState>>,
    Extension(user): Extension<AuthenticatedUser>,
) -> GatewayResult<Json<ChatResponse>> {
    let chat = state.chat_service.get_chat(&chat_id, user.id()).await?;
    Ok(Json(ChatResponse::from(chat)))
}

#[utoipa::path(
    delete,
    path = "/api/chats/{chat_id}",
    tag = "Chats",
    params(
        ("chat_id" = String, Path, description = "Chat ID")
    ),
    responses(
        (status = 204, description = "Chat hidden for the caller"),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
        (status = 403, description = "Not a participant", body = ErrorResponse),
        (status = 404, description = "Chat not found", body = ErrorResponse)
    )
)]
pub async fn hide_chat(
    Path(chat_id): Path<String>,
    State(state): State<Arc<GatewayState>>,
    Extension(user): Extension<AuthenticatedUser>,
) -> GatewayResult<StatusCode> {
    state.chat_service.hide_chat(&chat_id, user.id()).await?;
    Ok(StatusCode::NO_CONTENT)
}
