use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatParticipant {
    pub chat_id: String,
    pub user_id: String,
    pub is_admin: bool,
    pub joined_at: DateTime<Utc>,
}

/// What happened to the chat when a participant row was deleted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParticipantRemoval {
    /// Participant promoted because the last admin left.
    pub promoted: Option<String>,
    /// The chat has no participants left and was soft-deleted.
    pub chat_closed: bool,
}
