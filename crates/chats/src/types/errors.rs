//! Error types for the chat system.

use courier_database::DatabaseError;
use thiserror::Error;

/// Result type alias for chat operations
pub type ChatResult<T> = Result<T, ChatError>;

/// Coarse failure categories used for logging, retries and transport mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Authorization,
    NotFound,
    Policy,
    TransientStore,
    Internal,
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Message needs content or media")]
    EmptyMessage,

    #[error("Reply target {id} is not available in this chat")]
    InvalidReplyTarget { id: String },

    #[error("User {user_id} is already a participant")]
    AlreadyParticipant { user_id: String },

    #[error("Not a participant of chat {chat_id}")]
    NotParticipant { chat_id: String },

    #[error("Forbidden: {reason}")]
    Forbidden { reason: String },

    #[error("Chat not found: {id}")]
    ChatNotFound { id: String },

    #[error("Message not found: {id}")]
    MessageNotFound { id: String },

    #[error("Participant not found: {user_id}")]
    ParticipantNotFound { user_id: String },

    #[error("Messages can only be unsent within {window_seconds} seconds")]
    UnsendWindowExpired { window_seconds: u64 },

    #[error("Message {id} was unsent or deleted")]
    MessageTombstoned { id: String },

    /// Raised before anything is written, so repeating the request is safe.
    #[error("Operation timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    #[error("Store error: {0}")]
    Store(#[from] DatabaseError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ChatError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into() }
    }

    pub fn invalid_reply_target(id: impl Into<String>) -> Self {
        Self::InvalidReplyTarget { id: id.into() }
    }

    pub fn already_participant(user_id: impl Into<String>) -> Self {
        Self::AlreadyParticipant { user_id: user_id.into() }
    }

    pub fn not_participant(chat_id: impl Into<String>) -> Self {
        Self::NotParticipant { chat_id: chat_id.into() }
    }

    pub fn forbidden(reason: impl Into<String>) -> Self {
        Self::Forbidden { reason: reason.into() }
    }

    pub fn chat_not_found(id: impl Into<String>) -> Self {
        Self::ChatNotFound { id: id.into() }
    }

    pub fn message_not_found(id: impl Into<String>) -> Self {
        Self::MessageNotFound { id: id.into() }
    }

    pub fn participant_not_found(user_id: impl Into<String>) -> Self {
        Self::ParticipantNotFound { user_id: user_id.into() }
    }

    pub fn tombstoned(id: impl Into<String>) -> Self {
        Self::MessageTombstoned { id: id.into() }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ChatError::Validation { .. }
            | ChatError::EmptyMessage
            | ChatError::InvalidReplyTarget { .. }
            | ChatError::AlreadyParticipant { .. } => ErrorKind::Validation,
            ChatError::NotParticipant { .. } | ChatError::Forbidden { .. } => {
                ErrorKind::Authorization
            }
            ChatError::ChatNotFound { .. }
            | ChatError::MessageNotFound { .. }
            | ChatError::ParticipantNotFound { .. } => ErrorKind::NotFound,
            ChatError::UnsendWindowExpired { .. } | ChatError::MessageTombstoned { .. } => {
                ErrorKind::Policy
            }
            ChatError::Timeout { .. } => ErrorKind::TransientStore,
            ChatError::Store(error) if error.is_transient() => ErrorKind::TransientStore,
            ChatError::Store(_) | ChatError::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Stable machine-readable code sent to clients.
    pub fn code(&self) -> &'static str {
        match self {
            ChatError::Validation { .. } => "validation",
            ChatError::EmptyMessage => "empty_message",
            ChatError::InvalidReplyTarget { .. } => "invalid_reply_target",
            ChatError::AlreadyParticipant { .. } => "already_participant",
            ChatError::NotParticipant { .. } => "not_participant",
            ChatError::Forbidden { .. } => "forbidden",
            ChatError::ChatNotFound { .. }
            | ChatError::MessageNotFound { .. }
            | ChatError::ParticipantNotFound { .. } => "not_found",
            ChatError::UnsendWindowExpired { .. } => "unsend_window_expired",
            ChatError::MessageTombstoned { .. } => "message_tombstoned",
            ChatError::Timeout { .. } => "timeout",
            ChatError::Store(_) if self.kind() == ErrorKind::TransientStore => "unavailable",
            ChatError::Store(_) | ChatError::Internal { .. } => "internal",
        }
    }

    /// Message safe to show a client; storage details stay in the logs.
    pub fn public_message(&self) -> String {
        match self.kind() {
            ErrorKind::TransientStore => "Service temporarily unavailable, please retry".to_string(),
            ErrorKind::Internal => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::TransientStore)
    }
}
