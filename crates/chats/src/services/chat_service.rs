//! Chat and participant management.

use std::sync::Arc;

use courier_database::{
    Chat, ChatKind, ChatParticipant, ChatRepository, DatabaseError, NewChat, ParticipantRemoval,
    ParticipantRepository,
};
use sqlx::SqlitePool;
use tracing::info;

use crate::publisher::{EventPublisher, MembershipChange};
use crate::types::{ChatError, ChatResult};
use crate::utils::PermissionChecker;

pub const DEFAULT_LIST_LIMIT: i64 = 50;
pub const MAX_LIST_LIMIT: i64 = 200;

#[derive(Debug, Clone)]
pub struct CreateChat {
    pub kind: ChatKind,
    pub name: Option<String>,
    pub created_by: String,
    pub participant_ids: Vec<String>,
}

/// Result of [`ChatService::create_chat`]; direct chats are found, not duplicated.
#[derive(Debug, Clone)]
pub struct CreatedChat {
    pub chat: Chat,
    pub created: bool,
}

pub struct ChatService {
    chats: ChatRepository,
    participants: ParticipantRepository,
    publisher: Arc<dyn EventPublisher>,
}

impl ChatService {
    pub fn new(pool: SqlitePool, publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            chats: ChatRepository::new(pool.clone()),
            participants: ParticipantRepository::new(pool),
            publisher,
        }
    }

    pub async fn create_chat(&self, request: CreateChat) -> ChatResult<CreatedChat> {
        let new_chat = NewChat {
            kind: request.kind,
            name: request.name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()),
            created_by: request.created_by,
            participant_ids: request.participant_ids,
        };
        new_chat.validate().map_err(ChatError::validation)?;

        let (chat, created) = self.chats.create(&new_chat).await?;

        if created {
            let members = self.participants.user_ids(&chat.id).await?;
            for user_id in members {
                self.publisher.membership_changed(MembershipChange::Joined {
                    chat_id: chat.id.clone(),
                    user_id,
                });
            }
            info!(chat_id = %chat.id, kind = %chat.kind, "chat created");
        }

        Ok(CreatedChat { chat, created })
    }

    pub async fn list_chats(&self, user_id: &str, limit: Option<i64>, offset: Option<i64>) -> ChatResult<Vec<Chat>> {
        let (limit, offset) = page_bounds(limit, offset);
        Ok(self.chats.list_for_user(user_id, limit, offset).await?)
    }

    pub async fn get_chat(&self, chat_id: &str, user_id: &str) -> ChatResult<Chat> {
        let chat = self.active_chat(chat_id).await?;
        self.membership(chat_id, user_id).await?;
        Ok(chat)
    }

    /// Remove a chat from the caller's list; a new message brings it back.
    pub async fn hide_chat(&self, chat_id: &str, user_id: &str) -> ChatResult<()> {
        self.active_chat(chat_id).await?;
        self.membership(chat_id, user_id).await?;
        self.chats.hide_for_user(chat_id, user_id).await?;
        Ok(())
    }

    pub async fn list_participants(
        &self,
        chat_id: &str,
        user_id: &str,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> ChatResult<Vec<ChatParticipant>> {
        self.active_chat(chat_id).await?;
        self.membership(chat_id, user_id).await?;
        let (limit, offset) = page_bounds(limit, offset);
        Ok(self.participants.list(chat_id, limit, offset).await?)
    }

    pub async fn add_participant(
        &self,
        chat_id: &str,
        user_id: &str,
        added_by: &str,
    ) -> ChatResult<ChatParticipant> {
        let chat = self.active_chat(chat_id).await?;
        self.membership(chat_id, added_by).await?;
        PermissionChecker::can_add_participant(&chat)?;

        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(ChatError::validation("User id is required"));
        }

        let participant = match self.participants.add(chat_id, user_id, false).await {
            Ok(participant) => participant,
            Err(DatabaseError::Duplicate(_)) => return Err(ChatError::already_participant(user_id)),
            Err(error) => return Err(error.into()),
        };

        self.publisher.membership_changed(MembershipChange::Joined {
            chat_id: chat_id.to_string(),
            user_id: user_id.to_string(),
        });
        info!(chat_id, user_id, added_by, "participant added");

        Ok(participant)
    }

    pub async fn remove_participant(
        &self,
        chat_id: &str,
        user_id: &str,
        removed_by: &str,
    ) -> ChatResult<ParticipantRemoval> {
        let chat = self.active_chat(chat_id).await?;
        let requester = self.membership(chat_id, removed_by).await?;
        PermissionChecker::can_remove_participant(&chat, &requester, user_id)?;

        let removal = self
            .participants
            .remove(chat_id, user_id)
            .await?
            .ok_or_else(|| ChatError::participant_not_found(user_id))?;

        self.publisher.membership_changed(MembershipChange::Left {
            chat_id: chat_id.to_string(),
            user_id: user_id.to_string(),
        });
        if removal.chat_closed {
            self.publisher.membership_changed(MembershipChange::Closed {
                chat_id: chat_id.to_string(),
            });
        }
        info!(chat_id, user_id, removed_by, "participant removed");

        Ok(removal)
    }

    async fn active_chat(&self, chat_id: &str) -> ChatResult<Chat> {
        match self.chats.find_by_id(chat_id).await? {
            Some(chat) if !chat.is_deleted() => Ok(chat),
            _ => Err(ChatError::chat_not_found(chat_id)),
        }
    }

    async fn membership(&self, chat_id: &str, user_id: &str) -> ChatResult<ChatParticipant> {
        self.participants
            .find(chat_id, user_id)
            .await?
            .ok_or_else(|| ChatError::not_participant(chat_id))
    }
}

fn page_bounds(limit: Option<i64>, offset: Option<i64>) -> (i64, i64) {
    (
        limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT),
        offset.unwrap_or(0).max(0),
    )
}
