use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::timestamp;

/// A persisted chat message.
///
/// Rows are never removed: unsend and delete-for-all clear `content` and
/// `media_ref` but keep the row so history ordering stays stable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub content: Option<String>,
    pub media_ref: Option<String>,
    pub reply_to: Option<String>,
    pub sent_at: DateTime<Utc>,
    pub unsent: bool,
    pub unsent_at: Option<DateTime<Utc>>,
    pub deleted_for_all: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub is_edited: bool,
    pub edited_at: Option<DateTime<Utc>>,
    /// Some participant other than the sender has a read receipt.
    pub is_read: bool,
    pub version: i64,
}

impl Message {
    pub fn is_tombstoned(&self) -> bool {
        self.unsent || self.deleted_for_all
    }

    /// Drop content and media from tombstoned messages.
    pub fn redacted(mut self) -> Self {
        if self.is_tombstoned() {
            self.content = None;
            self.media_ref = None;
        }
        self
    }

    pub fn cursor(&self) -> MessageCursor {
        MessageCursor {
            sent_at: self.sent_at,
            id: self.id.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub chat_id: String,
    pub sender_id: String,
    pub content: Option<String>,
    pub media_ref: Option<String>,
    pub reply_to: Option<String>,
}

/// Position in a chat's history, ordered by `(sent_at, id)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageCursor {
    pub sent_at: DateTime<Utc>,
    pub id: String,
}

impl MessageCursor {
    /// Opaque token handed to clients.
    pub fn encode(&self) -> String {
        URL_SAFE_NO_PAD.encode(format!("{}|{}", timestamp::encode(&self.sent_at), self.id))
    }

    pub fn decode(token: &str) -> Option<Self> {
        let bytes = URL_SAFE_NO_PAD.decode(token.trim()).ok()?;
        let raw = String::from_utf8(bytes).ok()?;
        let (sent_at, id) = raw.split_once('|')?;
        if id.is_empty() {
            return None;
        }
        Some(Self {
            sent_at: timestamp::decode(sent_at).ok()?,
            id: id.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Message {
        Message {
            id: "m1".to_string(),
            chat_id: "c1".to_string(),
            sender_id: "alice".to_string(),
            content: Some("hello".to_string()),
            media_ref: Some("media://1".to_string()),
            reply_to: None,
            sent_at: timestamp::now(),
            unsent: false,
            unsent_at: None,
            deleted_for_all: false,
            deleted_at: None,
            is_edited: false,
            edited_at: None,
            is_read: false,
            version: 0,
        }
    }

    #[test]
    fn test_live_message_keeps_content() {
        let message = sample().redacted();
        assert_eq!(message.content.as_deref(), Some("hello"));
        assert_eq!(message.media_ref.as_deref(), Some("media://1"));
    }

    #[test]
    fn test_tombstones_are_redacted() {
        let mut unsent = sample();
        unsent.unsent = true;
        let unsent = unsent.redacted();
        assert!(unsent.content.is_none());
        assert!(unsent.media_ref.is_none());

        let mut deleted = sample();
        deleted.deleted_for_all = true;
        assert!(deleted.redacted().content.is_none());
    }

    #[test]
    fn test_cursor_token_is_reversible() {
        let cursor = sample().cursor();
        let token = cursor.encode();
        assert!(!token.contains('|'));
        assert_eq!(MessageCursor::decode(&token), Some(cursor));
    }

    #[test]
    fn test_malformed_cursor_is_rejected() {
        assert!(MessageCursor::decode("not base64 !!").is_none());
        assert!(MessageCursor::decode(&URL_SAFE_NO_PAD.encode("no-separator")).is_none());
        assert!(MessageCursor::decode(&URL_SAFE_NO_PAD.encode("2024-01-01T00:00:00.000000Z|")).is_none());
    }
}
