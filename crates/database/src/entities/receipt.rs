use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReadReceipt {
    pub message_id: String,
    pub user_id: String,
    pub read_at: DateTime<Utc>,
}
