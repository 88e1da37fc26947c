//! Repository for messages and per-user message visibility.

use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use tracing::{debug, info};

use crate::entities::{Message, MessageCursor, NewMessage};
use crate::types::{timestamp, DatabaseResult};

const MESSAGE_SELECT: &str = "SELECT m.id, m.chat_id, m.sender_id, m.content, m.media_ref, m.reply_to,
        m.sent_at, m.unsent, m.unsent_at, m.deleted_for_all, m.deleted_at,
        m.is_edited, m.edited_at, m.version,
        EXISTS (
            SELECT 1 FROM read_receipts r WHERE r.message_id = m.id AND r.user_id <> m.sender_id
        ) AS is_read
    FROM messages m";

#[derive(Clone)]
pub struct MessageRepository {
    pool: SqlitePool,
}

fn map_message(row: &SqliteRow) -> DatabaseResult<Message> {
    let sent_at: String = row.try_get("sent_at")?;
    Ok(Message {
        id: row.try_get("id")?,
        chat_id: row.try_get("chat_id")?,
        sender_id: row.try_get("sender_id")?,
        content: row.try_get("content")?,
        media_ref: row.try_get("media_ref")?,
        reply_to: row.try_get("reply_to")?,
        sent_at: timestamp::decode(&sent_at)?,
        unsent: row.try_get("unsent")?,
        unsent_at: timestamp::decode_optional(row.try_get("unsent_at")?)?,
        deleted_for_all: row.try_get("deleted_for_all")?,
        deleted_at: timestamp::decode_optional(row.try_get("deleted_at")?)?,
        is_edited: row.try_get("is_edited")?,
        edited_at: timestamp::decode_optional(row.try_get("edited_at")?)?,
        is_read: row.try_get("is_read")?,
        version: row.try_get("version")?,
    })
}

impl MessageRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Persist a message, bump the chat's activity time and un-hide the chat
    /// for anyone who had hidden it.
    pub async fn insert(&self, new_message: &NewMessage) -> DatabaseResult<Message> {
        let id = cuid2::cuid();
        let sent_at = timestamp::now();
        let sent_at_text = timestamp::encode(&sent_at);

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO messages (id, chat_id, sender_id, content, media_ref, reply_to, sent_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&new_message.chat_id)
        .bind(&new_message.sender_id)
        .bind(&new_message.content)
        .bind(&new_message.media_ref)
        .bind(&new_message.reply_to)
        .bind(&sent_at_text)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE chats SET updated_at = ? WHERE id = ?")
            .bind(&sent_at_text)
            .bind(&new_message.chat_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM hidden_chats WHERE chat_id = ?")
            .bind(&new_message.chat_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        info!(
            message_id = %id,
            chat_id = %new_message.chat_id,
            sender_id = %new_message.sender_id,
            "created new message"
        );

        Ok(Message {
            id,
            chat_id: new_message.chat_id.clone(),
            sender_id: new_message.sender_id.clone(),
            content: new_message.content.clone(),
            media_ref: new_message.media_ref.clone(),
            reply_to: new_message.reply_to.clone(),
            sent_at,
            unsent: false,
            unsent_at: None,
            deleted_for_all: false,
            deleted_at: None,
            is_edited: false,
            edited_at: None,
            is_read: false,
            version: 0,
        })
    }

    pub async fn find_by_id(&self, message_id: &str) -> DatabaseResult<Option<Message>> {
        let row = sqlx::query(&format!("{MESSAGE_SELECT} WHERE m.id = ?"))
            .bind(message_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(map_message).transpose()
    }

    /// Replace the content unless the message has been tombstoned.
    ///
    /// Returns `false` when the row was unsent or deleted first; tombstones
    /// always win over edits.
    pub async fn update_content_if_live(
        &self,
        message_id: &str,
        content: &str,
        edited_at: &DateTime<Utc>,
    ) -> DatabaseResult<bool> {
        let result = sqlx::query(
            "UPDATE messages
             SET content = ?, is_edited = 1, edited_at = ?, version = version + 1
             WHERE id = ? AND unsent = 0 AND deleted_for_all = 0",
        )
        .bind(content)
        .bind(timestamp::encode(edited_at))
        .bind(message_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Tombstone a message as unsent. Returns `false` if it already was a tombstone.
    pub async fn mark_unsent(&self, message_id: &str, at: &DateTime<Utc>) -> DatabaseResult<bool> {
        let result = sqlx::query(
            "UPDATE messages
             SET content = NULL, media_ref = NULL, unsent = 1, unsent_at = ?, version = version + 1
             WHERE id = ? AND unsent = 0 AND deleted_for_all = 0",
        )
        .bind(timestamp::encode(at))
        .bind(message_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Tombstone a message for everyone. Returns `false` if it already was.
    pub async fn mark_deleted_for_all(&self, message_id: &str, at: &DateTime<Utc>) -> DatabaseResult<bool> {
        let result = sqlx::query(
            "UPDATE messages
             SET content = NULL, media_ref = NULL, deleted_for_all = 1, deleted_at = ?, version = version + 1
             WHERE id = ? AND deleted_for_all = 0",
        )
        .bind(timestamp::encode(at))
        .bind(message_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Hide a message from one user's history. Idempotent.
    pub async fn hide_for_user(&self, message_id: &str, user_id: &str) -> DatabaseResult<bool> {
        let result = sqlx::query(
            "INSERT INTO message_hidden (message_id, user_id, hidden_at) VALUES (?, ?, ?)
             ON CONFLICT (message_id, user_id) DO NOTHING",
        )
        .bind(message_id)
        .bind(user_id)
        .bind(timestamp::encode(&timestamp::now()))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn is_hidden_for(&self, message_id: &str, user_id: &str) -> DatabaseResult<bool> {
        let found: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM message_hidden WHERE message_id = ? AND user_id = ?",
        )
        .bind(message_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(found.is_some())
    }

    /// One page of a chat's history as seen by `viewer_id`, newest first.
    ///
    /// Messages the viewer hid are skipped and tombstones come back redacted.
    /// `before` is exclusive, so paging stays stable while new messages arrive.
    pub async fn page(
        &self,
        chat_id: &str,
        viewer_id: &str,
        limit: i64,
        before: Option<&MessageCursor>,
    ) -> DatabaseResult<Vec<Message>> {
        let visible = "m.chat_id = ?
               AND NOT EXISTS (
                   SELECT 1 FROM message_hidden h WHERE h.message_id = m.id AND h.user_id = ?
               )";
        let order = "ORDER BY m.sent_at DESC, m.id DESC LIMIT ?";

        let rows = match before {
            Some(cursor) => {
                let sent_at = timestamp::encode(&cursor.sent_at);
                sqlx::query(&format!(
                    "{MESSAGE_SELECT} WHERE {visible}
                       AND (m.sent_at < ? OR (m.sent_at = ? AND m.id < ?))
                     {order}"
                ))
                .bind(chat_id)
                .bind(viewer_id)
                .bind(&sent_at)
                .bind(&sent_at)
                .bind(&cursor.id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!("{MESSAGE_SELECT} WHERE {visible} {order}"))
                    .bind(chat_id)
                    .bind(viewer_id)
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        debug!(chat_id, viewer_id, rows = rows.len(), "fetched message page");

        rows.iter()
            .map(|row| map_message(row).map(Message::redacted))
            .collect()
    }
}
