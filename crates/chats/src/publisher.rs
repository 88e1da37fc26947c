//! Outbound seam between chat logic and whatever delivers events.

use crate::types::ServerEvent;

/// Membership updates the delivery layer needs to keep routing accurate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipChange {
    Joined { chat_id: String, user_id: String },
    Left { chat_id: String, user_id: String },
    Closed { chat_id: String },
}

/// Fans events out to every live connection of a chat's participants.
///
/// Calls must not block on slow receivers; implementations deal with
/// backpressure themselves.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, chat_id: &str, event: &ServerEvent);

    /// Same as [`publish`](Self::publish) but skips every connection of `excluded_user`.
    fn publish_except(&self, chat_id: &str, event: &ServerEvent, excluded_user: &str);

    fn membership_changed(&self, change: MembershipChange);
}
