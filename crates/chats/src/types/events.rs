//! Events pushed from the server to connected clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::views::MessageView;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteScope {
    ForSelf,
    ForAll,
}

/// Every frame the server writes to a socket.
///
/// Serialized as `{"type": "<snake_case>", ...camelCase fields}`. Use
/// [`ServerEvent::to_frame`] so a fan-out serializes exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    MessageCreated {
        message: MessageView,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        temp_id: Option<String>,
    },
    MessageEdited {
        chat_id: String,
        message_id: String,
        content: String,
        edited_at: DateTime<Utc>,
    },
    MessageUnsent {
        chat_id: String,
        message_id: String,
    },
    MessageDeleted {
        chat_id: String,
        message_id: String,
        scope: DeleteScope,
    },
    ReadReceipt {
        chat_id: String,
        message_id: String,
        user_id: String,
        read_at: DateTime<Utc>,
    },
    Typing {
        chat_id: String,
        user_id: String,
        expires_in_ms: u64,
    },
    ConnectionAck {
        registration_id: String,
        user_id: String,
    },
    Pong,
    Error {
        code: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        temp_id: Option<String>,
    },
}

impl ServerEvent {
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            ServerEvent::MessageCreated { .. } => "message_created",
            ServerEvent::MessageEdited { .. } => "message_edited",
            ServerEvent::MessageUnsent { .. } => "message_unsent",
            ServerEvent::MessageDeleted { .. } => "message_deleted",
            ServerEvent::ReadReceipt { .. } => "read_receipt",
            ServerEvent::Typing { .. } => "typing",
            ServerEvent::ConnectionAck { .. } => "connection_ack",
            ServerEvent::Pong => "pong",
            ServerEvent::Error { .. } => "error",
        }
    }

    pub fn chat_id(&self) -> Option<&str> {
        match self {
            ServerEvent::MessageCreated { message, .. } => Some(&message.chat_id),
            ServerEvent::MessageEdited { chat_id, .. }
            | ServerEvent::MessageUnsent { chat_id, .. }
            | ServerEvent::MessageDeleted { chat_id, .. }
            | ServerEvent::ReadReceipt { chat_id, .. }
            | ServerEvent::Typing { chat_id, .. } => Some(chat_id),
            ServerEvent::ConnectionAck { .. } | ServerEvent::Pong | ServerEvent::Error { .. } => {
                None
            }
        }
    }
}
