//! Repository for read receipts.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::entities::ReadReceipt;
use crate::types::{timestamp, DatabaseResult};

#[derive(Clone)]
pub struct ReceiptRepository {
    pool: SqlitePool,
}

impl ReceiptRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Record a receipt unless one already exists. Returns whether a row was written.
    pub async fn insert_if_absent(
        &self,
        message_id: &str,
        user_id: &str,
        read_at: &DateTime<Utc>,
    ) -> DatabaseResult<bool> {
        let result = sqlx::query(
            "INSERT INTO read_receipts (message_id, user_id, read_at) VALUES (?, ?, ?)
             ON CONFLICT (message_id, user_id) DO NOTHING",
        )
        .bind(message_id)
        .bind(user_id)
        .bind(timestamp::encode(read_at))
        .execute(&self.pool)
        .await?;

        let created = result.rows_affected() == 1;
        debug!(message_id, user_id, created, "recorded read receipt");
        Ok(created)
    }

    pub async fn list_for_message(&self, message_id: &str) -> DatabaseResult<Vec<ReadReceipt>> {
        let rows = sqlx::query(
            "SELECT message_id, user_id, read_at FROM read_receipts
             WHERE message_id = ? ORDER BY read_at ASC, user_id ASC",
        )
        .bind(message_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> DatabaseResult<ReadReceipt> {
                let read_at: String = row.try_get("read_at")?;
                Ok(ReadReceipt {
                    message_id: row.try_get("message_id")?,
                    user_id: row.try_get("user_id")?,
                    read_at: timestamp::decode(&read_at)?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{ChatKind, NewChat, NewMessage};
    use crate::repos::{ChatRepository, MessageRepository};
    use crate::test_support::create_test_database;

    #[tokio::test]
    async fn test_receipts_are_unique_per_user_and_mark_messages_read() {
        let (pool, _dir) = create_test_database().await;
        let (chat, _) = ChatRepository::new(pool.clone())
            .create(&NewChat {
                kind: ChatKind::Direct,
                name: None,
                created_by: "alice".to_string(),
                participant_ids: vec!["bob".to_string()],
            })
            .await
            .unwrap();
        let messages = MessageRepository::new(pool.clone());
        let message = messages
            .insert(&NewMessage {
                chat_id: chat.id.clone(),
                sender_id: "alice".to_string(),
                content: Some("hi".to_string()),
                media_ref: None,
                reply_to: None,
            })
            .await
            .unwrap();
        let repo = ReceiptRepository::new(pool.clone());
        let now = timestamp::now();

        // The sender's own receipt does not make the message read.
        assert!(repo.insert_if_absent(&message.id, "alice", &now).await.unwrap());
        assert!(!messages.find_by_id(&message.id).await.unwrap().unwrap().is_read);

        assert!(repo.insert_if_absent(&message.id, "bob", &now).await.unwrap());
        assert!(!repo.insert_if_absent(&message.id, "bob", &now).await.unwrap());

        assert!(messages.find_by_id(&message.id).await.unwrap().unwrap().is_read);
        assert_eq!(repo.list_for_message(&message.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_receipt_requires_existing_message() {
        let (pool, _dir) = create_test_database().await;
        let repo = ReceiptRepository::new(pool);

        assert!(repo
            .insert_if_absent("missing", "bob", &timestamp::now())
            .await
            .is_err());
    }
}
