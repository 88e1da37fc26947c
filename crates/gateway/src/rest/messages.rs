//! Message history endpoint. Sending and mutating messages happens over
//! the realtime connection.

use axum::{
    extract::{Path, Query, State},
    Extension, Json, Router,
};
use courier_chats::{MessagePage, MessageView, PageRequest};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::{IntoParams, ToSchema};

use crate::error::{ErrorResponse, GatewayResult};
use crate::middleware::AuthenticatedUser;
use crate::state::GatewayState;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MessageResponse {
    pub id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub content: Option<String>,
    pub media_ref: Option<String>,
    pub reply_to: Option<String>,
    pub sent_at: String,
    pub unsent: bool,
    pub deleted_for_all: bool,
    pub is_edited: bool,
    pub edited_at: Option<String>,
    pub is_read: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MessagePageResponse {
    /// Newest first
    pub messages: Vec<MessageResponse>,
    /// Pass as `before` to fetch older messages; absent on the last page
    pub next_cursor: Option<String>,
}

#[derive(Debug, Default, Deserialize, IntoParams, ToSchema)]
pub struct ListMessagesQuery {
    pub limit: Option<u32>,
    /// Cursor from a previous page
    pub before: Option<String>,
}

impl From<MessageView> for MessageResponse {
    fn from(message: MessageView) -> Self {
        Self {
            id: message.id,
            chat_id: message.chat_id,
            sender_id: message.sender_id,
            content: message.content,
            media_ref: message.media_ref,
            reply_to: message.reply_to,
            sent_at: message.sent_at.to_rfc3339(),
            unsent: message.unsent,
            deleted_for_all: message.deleted_for_all,
            is_edited: message.is_edited,
            edited_at: message.edited_at.map(|at| at.to_rfc3339()),
            is_read: message.is_read,
        }
    }
}

impl From<MessagePage> for MessagePageResponse {
    fn from(page: MessagePage) -> Self {
        Self {
            messages: page.messages.into_iter().map(MessageResponse::from).collect(),
            next_cursor: page.next_cursor,
        }
    }
}

/// Create message routes
pub fn create_message_routes() -> Router<Arc<GatewayState>> {
    Router::new().route("/chats/:chat_id/messages", axum::routing::get(list_messages))
}

#[utoipa::path(
    get,
    path = "/api/chats/{chat_id}/messages",
    tag = "Messages",
    params(
        ("chat_id" = String, Path, description = "Chat ID"),
        ListMessagesQuery
    ),
    responses(
        (status = 200, description = "One page of history as the caller sees it", body = MessagePageResponse),
        (status = 400, description = "Malformed cursor", body = ErrorResponse),
        (status = 403, description = "Not a participant", body = ErrorResponse),
        (status = 404, description = "Chat not found", body = ErrorResponse)
    )
)]
pub async fn list_messages(
    Path(chat_id): Path<String>,
    Query(params): Query<ListMessagesQuery>,
    State(state): State<Arc<GatewayState>>,
    Extension(user): Extension<AuthenticatedUser>,
) -> GatewayResult<Json<MessagePageResponse>> {
    let page = state
        .pipeline
        .list_messages(
            &chat_id,
            user.id(),
            PageRequest {
                limit: params.limit,
                before: params.before,
            },
        )
        .await?;

    Ok(Json(page.into()))
}
