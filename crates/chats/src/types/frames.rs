//! Frames clients send over the realtime connection.

use serde::{Deserialize, Serialize};

use super::events::DeleteScope;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientFrame {
    Authenticate {
        token: String,
    },
    SendMessage {
        chat_id: String,
        temp_id: Option<String>,
        content: Option<String>,
        media_ref: Option<String>,
        reply_to: Option<String>,
    },
    UnsendMessage {
        chat_id: String,
        message_id: String,
    },
    DeleteMessage {
        chat_id: String,
        message_id: String,
        scope: DeleteScope,
    },
    EditMessage {
        chat_id: String,
        message_id: String,
        content: String,
    },
    MarkRead {
        chat_id: String,
        message_id: String,
    },
    Typing {
        chat_id: String,
    },
    Ping,
}

impl ClientFrame {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ClientFrame::Authenticate { .. } => "authenticate",
            ClientFrame::SendMessage { .. } => "send_message",
            ClientFrame::UnsendMessage { .. } => "unsend_message",
            ClientFrame::DeleteMessage { .. } => "delete_message",
            ClientFrame::EditMessage { .. } => "edit_message",
            ClientFrame::MarkRead { .. } => "mark_read",
            ClientFrame::Typing { .. } => "typing",
            ClientFrame::Ping => "ping",
        }
    }

    pub fn chat_id(&self) -> Option<&str> {
        match self {
            ClientFrame::SendMessage { chat_id, .. }
            | ClientFrame::UnsendMessage { chat_id, .. }
            | ClientFrame::DeleteMessage { chat_id, .. }
            | ClientFrame::EditMessage { chat_id, .. }
            | ClientFrame::MarkRead { chat_id, .. }
            | ClientFrame::Typing { chat_id } => Some(chat_id),
            ClientFrame::Authenticate { .. } | ClientFrame::Ping => None,
        }
    }

    /// Correlation id echoed back on failures.
    pub fn temp_id(&self) -> Option<&str> {
        match self {
            ClientFrame::SendMessage { temp_id, .. } => temp_id.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_send_message_with_optional_fields() {
        let frame =
            ClientFrame::parse(r#"{"type":"send_message","chatId":"c1","tempId":"temp-1","content":"hi"}"#)
                .unwrap();

        assert_eq!(
            frame,
            ClientFrame::SendMessage {
                chat_id: "c1".into(),
                temp_id: Some("temp-1".into()),
                content: Some("hi".into()),
                media_ref: None,
                reply_to: None,
            }
        );
        assert_eq!(frame.temp_id(), Some("temp-1"));
        assert_eq!(frame.name(), "send_message");
    }

    #[test]
    fn test_parse_delete_scope() {
        let frame = ClientFrame::parse(
            r#"{"type":"delete_message","chatId":"c1","messageId":"m1","scope":"for_self"}"#,
        )
        .unwrap();
        assert!(matches!(
            frame,
            ClientFrame::DeleteMessage { scope: DeleteScope::ForSelf, .. }
        ));
    }

    #[test]
    fn test_rejects_unknown_and_malformed_frames() {
        assert!(ClientFrame::parse(r#"{"type":"launch_rockets"}"#).is_err());
        assert!(ClientFrame::parse(r#"{"type":"mark_read","chatId":"c1"}"#).is_err());
        assert!(ClientFrame::parse("not json").is_err());
        assert_eq!(ClientFrame::parse(r#"{"type":"ping"}"#).unwrap(), ClientFrame::Ping);
    }
}
