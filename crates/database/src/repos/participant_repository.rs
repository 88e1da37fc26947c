//! Repository for chat participants.

use crate::entities::{ChatParticipant, ParticipantRemoval};
use crate::types::{timestamp, DatabaseError, DatabaseResult};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use tracing::info;

#[derive(Clone)]
pub struct ParticipantRepository {
    pool: SqlitePool,
}

fn map_participant(row: &SqliteRow) -> DatabaseResult<ChatParticipant> {
    let joined_at: String = row.try_get("joined_at")?;
    Ok(ChatParticipant {
        chat_id: row.try_get("chat_id")?,
        user_id: row.try_get("user_id")?,
        is_admin: row.try_get("is_admin")?,
        joined_at: timestamp::decode(&joined_at)?,
    })
}

impl ParticipantRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn find(&self, chat_id: &str, user_id: &str) -> DatabaseResult<Option<ChatParticipant>> {
        let row = sqlx::query(
            "SELECT chat_id, user_id, is_admin, joined_at
             FROM chat_participants WHERE chat_id = ? AND user_id = ?",
        )
        .bind(chat_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(map_participant).transpose()
    }

    pub async fn is_participant(&self, chat_id: &str, user_id: &str) -> DatabaseResult<bool> {
        let found: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM chat_participants WHERE chat_id = ? AND user_id = ?",
        )
        .bind(chat_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(found.is_some())
    }

    pub async fn list(&self, chat_id: &str, limit: i64, offset: i64) -> DatabaseResult<Vec<ChatParticipant>> {
        let rows = sqlx::query(
            "SELECT chat_id, user_id, is_admin, joined_at
             FROM chat_participants WHERE chat_id = ?
             ORDER BY joined_at ASC, user_id ASC
             LIMIT ? OFFSET ?",
        )
        .bind(chat_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(map_participant).collect()
    }

    pub async fn user_ids(&self, chat_id: &str) -> DatabaseResult<Vec<String>> {
        let ids = sqlx::query_scalar("SELECT user_id FROM chat_participants WHERE chat_id = ?")
            .bind(chat_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }

    /// Chats of a user that are not soft-deleted.
    pub async fn chat_ids_for_user(&self, user_id: &str) -> DatabaseResult<Vec<String>> {
        let ids = sqlx::query_scalar(
            "SELECT p.chat_id FROM chat_participants p
             JOIN chats c ON c.id = p.chat_id
             WHERE p.user_id = ? AND c.deleted_at IS NULL",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    pub async fn add(&self, chat_id: &str, user_id: &str, is_admin: bool) -> DatabaseResult<ChatParticipant> {
        let joined_at = timestamp::now();

        let result = sqlx::query(
            "INSERT INTO chat_participants (chat_id, user_id, is_admin, joined_at) VALUES (?, ?, ?, ?)",
        )
        .bind(chat_id)
        .bind(user_id)
        .bind(is_admin)
        .bind(timestamp::encode(&joined_at))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {}
            Err(error) if DatabaseError::is_unique_violation(&error) => {
                return Err(DatabaseError::Duplicate(format!(
                    "participant {user_id} in chat {chat_id}"
                )));
            }
            Err(error) => return Err(error.into()),
        }

        info!(chat_id, user_id, is_admin, "added chat participant");

        Ok(ChatParticipant {
            chat_id: chat_id.to_string(),
            user_id: user_id.to_string(),
            is_admin,
            joined_at,
        })
    }

    /// Delete a participant. Returns `None` when the user was not in the chat.
    ///
    /// When the last admin leaves, the earliest-joined remaining participant is
    /// promoted; when nobody is left the chat is soft-deleted.
    pub async fn remove(&self, chat_id: &str, user_id: &str) -> DatabaseResult<Option<ParticipantRemoval>> {
        let mut tx = self.pool.begin().await?;

        let was_admin: Option<bool> = sqlx::query_scalar(
            "DELETE FROM chat_participants WHERE chat_id = ? AND user_id = ? RETURNING is_admin",
        )
        .bind(chat_id)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(was_admin) = was_admin else {
            tx.rollback().await?;
            return Ok(None);
        };

        let mut outcome = ParticipantRemoval::default();

        let remaining: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM chat_participants WHERE chat_id = ?")
                .bind(chat_id)
                .fetch_one(&mut *tx)
                .await?;

        if remaining == 0 {
            let now = timestamp::encode(&timestamp::now());
            sqlx::query("UPDATE chats SET deleted_at = ?, updated_at = ? WHERE id = ?")
                .bind(&now)
                .bind(&now)
                .bind(chat_id)
                .execute(&mut *tx)
                .await?;
            outcome.chat_closed = true;
        } else if was_admin {
            let admins: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM chat_participants WHERE chat_id = ? AND is_admin = 1",
            )
            .bind(chat_id)
            .fetch_one(&mut *tx)
            .await?;

            if admins == 0 {
                outcome.promoted = sqlx::query_scalar(
                    "UPDATE chat_participants SET is_admin = 1
                     WHERE chat_id = ?1 AND user_id = (
                         SELECT user_id FROM chat_participants WHERE chat_id = ?1
                         ORDER BY joined_at ASC, user_id ASC LIMIT 1
                     )
                     RETURNING user_id",
                )
                .bind(chat_id)
                .fetch_optional(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;

        info!(
            chat_id,
            user_id,
            promoted = ?outcome.promoted,
            chat_closed = outcome.chat_closed,
            "removed chat participant"
        );

        Ok(Some(outcome))
    }
}
