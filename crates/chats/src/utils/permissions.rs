//! Permission checking utilities.

use courier_database::{Chat, ChatParticipant, Message};

use crate::types::ChatError;

/// Permission checking utilities
pub struct PermissionChecker;

impl PermissionChecker {
    /// Only the original sender may unsend or edit a message
    pub fn is_sender(message: &Message, user_id: &str) -> Result<(), ChatError> {
        if message.sender_id != user_id {
            return Err(ChatError::forbidden("Only the sender can change this message"));
        }
        Ok(())
    }

    /// Delete-for-all is open to the sender and to group admins
    pub fn can_delete_for_all(message: &Message, requester: &ChatParticipant) -> Result<(), ChatError> {
        if message.sender_id == requester.user_id || requester.is_admin {
            return Ok(());
        }
        Err(ChatError::forbidden("Only the sender or an admin can delete for everyone"))
    }

    /// Any participant may add members to a group; direct chats are closed
    pub fn can_add_participant(chat: &Chat) -> Result<(), ChatError> {
        if !chat.is_group() {
            return Err(ChatError::validation("Direct chats have a fixed set of participants"));
        }
        Ok(())
    }

    /// Check if `requester` may remove `target_user_id` from the chat
    pub fn can_remove_participant(
        chat: &Chat,
        requester: &ChatParticipant,
        target_user_id: &str,
    ) -> Result<(), ChatError> {
        if !chat.is_group() {
            return Err(ChatError::validation("Direct chats have a fixed set of participants"));
        }

        // Leaving is always allowed
        if requester.user_id == target_user_id {
            return Ok(());
        }

        if target_user_id == chat.created_by {
            return Err(ChatError::forbidden("The chat creator can only leave on their own"));
        }

        if !requester.is_admin {
            return Err(ChatError::forbidden("Only admins can remove other participants"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_database::{timestamp, ChatKind};

    fn chat(kind: ChatKind) -> Chat {
        let now = timestamp::now();
        Chat {
            id: "c1".into(),
            kind,
            name: None,
            created_by: "alice".into(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    fn member(user_id: &str, is_admin: bool) -> ChatParticipant {
        ChatParticipant {
            chat_id: "c1".into(),
            user_id: user_id.into(),
            is_admin,
            joined_at: timestamp::now(),
        }
    }

    fn message(sender: &str) -> Message {
        Message {
            id: "m1".into(),
            chat_id: "c1".into(),
            sender_id: sender.into(),
            content: Some("hi".into()),
            media_ref: None,
            reply_to: None,
            sent_at: timestamp::now(),
            unsent: false,
            unsent_at: None,
            deleted_for_all: false,
            deleted_at: None,
            is_edited: false,
            edited_at: None,
            is_read: false,
            version: 1,
        }
    }

    #[test]
    fn test_sender_checks() {
        assert!(PermissionChecker::is_sender(&message("alice"), "alice").is_ok());
        assert!(matches!(
            PermissionChecker::is_sender(&message("alice"), "bob"),
            Err(ChatError::Forbidden { .. })
        ));
    }

    #[test]
    fn test_delete_for_all() {
        let msg = message("bob");
        assert!(PermissionChecker::can_delete_for_all(&msg, &member("bob", false)).is_ok());
        assert!(PermissionChecker::can_delete_for_all(&msg, &member("alice", true)).is_ok());
        assert!(PermissionChecker::can_delete_for_all(&msg, &member("carol", false)).is_err());
    }

    #[test]
    fn test_remove_rules() {
        let group = chat(ChatKind::Group);

        assert!(PermissionChecker::can_remove_participant(&group, &member("bob", false), "bob").is_ok());
        assert!(PermissionChecker::can_remove_participant(&group, &member("bob", false), "carol").is_err());
        assert!(PermissionChecker::can_remove_participant(&group, &member("bob", true), "carol").is_ok());
        assert!(PermissionChecker::can_remove_participant(&group, &member("bob", true), "alice").is_err());
        assert!(PermissionChecker::can_remove_participant(&group, &member("alice", true), "alice").is_ok());

        let direct = chat(ChatKind::Direct);
        assert!(PermissionChecker::can_remove_participant(&direct, &member("alice", true), "alice").is_err());
        assert!(PermissionChecker::can_add_participant(&direct).is_err());
        assert!(PermissionChecker::can_add_participant(&group).is_ok());
    }
}
