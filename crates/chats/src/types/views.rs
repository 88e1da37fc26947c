//! Client-facing shapes of stored records.

use chrono::{DateTime, Utc};
use courier_database::{Chat, ChatKind, ChatParticipant, Message};
use serde::{Deserialize, Serialize};

/// A message as clients see it. Tombstones never carry content or media.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: String,
    pub chat_id: String,
    pub sender_id: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub media_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reply_to: Option<String>,
    pub sent_at: DateTime<Utc>,
    pub unsent: bool,
    pub deleted_for_all: bool,
    pub is_edited: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub edited_at: Option<DateTime<Utc>>,
    pub is_read: bool,
}

impl From<Message> for MessageView {
    fn from(message: Message) -> Self {
        let message = message.redacted();
        Self {
            id: message.id,
            chat_id: message.chat_id,
            sender_id: message.sender_id,
            content: message.content,
            media_ref: message.media_ref,
            reply_to: message.reply_to,
            sent_at: message.sent_at,
            unsent: message.unsent,
            deleted_for_all: message.deleted_for_all,
            is_edited: message.is_edited,
            edited_at: message.edited_at,
            is_read: message.is_read,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatView {
    pub id: String,
    pub kind: ChatKind,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub name: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Chat> for ChatView {
    fn from(chat: Chat) -> Self {
        Self {
            id: chat.id,
            kind: chat.kind,
            name: chat.name,
            created_by: chat.created_by,
            created_at: chat.created_at,
            updated_at: chat.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantView {
    pub user_id: String,
    pub is_admin: bool,
    pub joined_at: DateTime<Utc>,
}

impl From<ChatParticipant> for ParticipantView {
    fn from(participant: ChatParticipant) -> Self {
        Self {
            user_id: participant.user_id,
            is_admin: participant.is_admin,
            joined_at: participant.joined_at,
        }
    }
}

/// One page of history, newest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePage {
    pub messages: Vec<MessageView>,
    /// Pass back as `before` to continue; absent on the last page.
    pub next_cursor: Option<String>,
}
