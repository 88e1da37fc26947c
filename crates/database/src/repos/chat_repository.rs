//! Repository for chat rows, their initial participants and per-user hides.

use crate::entities::{Chat, ChatKind, NewChat};
use crate::types::{timestamp, DatabaseError, DatabaseResult};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use tracing::info;

const CHAT_COLUMNS: &str = "c.id, c.kind, c.name, c.created_by, c.created_at, c.updated_at, c.deleted_at";

#[derive(Clone)]
pub struct ChatRepository {
    pool: SqlitePool,
}

pub(crate) fn map_chat(row: &SqliteRow) -> DatabaseResult<Chat> {
    let kind: String = row.try_get("kind")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(Chat {
        id: row.try_get("id")?,
        kind: ChatKind::try_from(kind.as_str()).map_err(DatabaseError::Decode)?,
        name: row.try_get("name")?,
        created_by: row.try_get("created_by")?,
        created_at: timestamp::decode(&created_at)?,
        updated_at: timestamp::decode(&updated_at)?,
        deleted_at: timestamp::decode_optional(row.try_get("deleted_at")?)?,
    })
}

impl ChatRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a chat and its participants in one transaction.
    ///
    /// Direct chats are unique per pair of users: when one already exists it
    /// is returned with `false` instead of creating a second one.
    pub async fn create(&self, new_chat: &NewChat) -> DatabaseResult<(Chat, bool)> {
        let direct_key = new_chat.direct_key();
        if let Some(key) = &direct_key {
            if let Some(existing) = self.find_by_direct_key(key).await? {
                return Ok((existing, false));
            }
        }

        let id = cuid2::cuid();
        let now = timestamp::now();
        let now_text = timestamp::encode(&now);
        let name = new_chat.name.as_deref().map(str::trim).map(str::to_string);

        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO chats (id, kind, name, created_by, direct_key, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(new_chat.kind.as_str())
        .bind(&name)
        .bind(&new_chat.created_by)
        .bind(&direct_key)
        .bind(&now_text)
        .bind(&now_text)
        .execute(&mut *tx)
        .await;

        if let Err(error) = inserted {
            if DatabaseError::is_unique_violation(&error) {
                tx.rollback().await?;
                // Lost a race with the other party creating the same direct chat.
                if let Some(key) = &direct_key {
                    if let Some(existing) = self.find_by_direct_key(key).await? {
                        return Ok((existing, false));
                    }
                }
                return Err(DatabaseError::Duplicate(format!("chat {id}")));
            }
            return Err(error.into());
        }

        let creator_is_admin = matches!(new_chat.kind, ChatKind::Group);
        sqlx::query(
            "INSERT INTO chat_participants (chat_id, user_id, is_admin, joined_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&new_chat.created_by)
        .bind(creator_is_admin)
        .bind(&now_text)
        .execute(&mut *tx)
        .await?;

        let others = new_chat.other_participants();
        for user_id in &others {
            sqlx::query(
                "INSERT INTO chat_participants (chat_id, user_id, is_admin, joined_at) VALUES (?, ?, 0, ?)",
            )
            .bind(&id)
            .bind(user_id)
            .bind(&now_text)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        info!(
            chat_id = %id,
            kind = %new_chat.kind,
            created_by = %new_chat.created_by,
            participants = others.len() + 1,
            "created new chat"
        );

        Ok((
            Chat {
                id,
                kind: new_chat.kind,
                name,
                created_by: new_chat.created_by.clone(),
                created_at: now,
                updated_at: now,
                deleted_at: None,
            },
            true,
        ))
    }

    pub async fn find_by_id(&self, chat_id: &str) -> DatabaseResult<Option<Chat>> {
        let row = sqlx::query(&format!("SELECT {CHAT_COLUMNS} FROM chats c WHERE c.id = ?"))
            .bind(chat_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(map_chat).transpose()
    }

    pub async fn find_by_direct_key(&self, key: &str) -> DatabaseResult<Option<Chat>> {
        let row = sqlx::query(&format!(
            "SELECT {CHAT_COLUMNS} FROM chats c WHERE c.direct_key = ?"
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(map_chat).transpose()
    }

    /// Active chats the user participates in and has not hidden, most recent first.
    pub async fn list_for_user(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> DatabaseResult<Vec<Chat>> {
        let rows = sqlx::query(&format!(
            "SELECT {CHAT_COLUMNS}
             FROM chats c
             JOIN chat_participants p ON p.chat_id = c.id AND p.user_id = ?
             WHERE c.deleted_at IS NULL
               AND NOT EXISTS (
                   SELECT 1 FROM hidden_chats h WHERE h.chat_id = c.id AND h.user_id = ?
               )
             ORDER BY c.updated_at DESC, c.id DESC
             LIMIT ? OFFSET ?"
        ))
        .bind(user_id)
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(map_chat).collect()
    }

    /// Hide a chat from one user's list until the next message arrives.
    pub async fn hide_for_user(&self, chat_id: &str, user_id: &str) -> DatabaseResult<()> {
        sqlx::query(
            "INSERT INTO hidden_chats (chat_id, user_id, hidden_at) VALUES (?, ?, ?)
             ON CONFLICT (chat_id, user_id) DO UPDATE SET hidden_at = excluded.hidden_at",
        )
        .bind(chat_id)
        .bind(user_id)
        .bind(timestamp::encode(&timestamp::now()))
        .execute(&self.pool)
        .await?;

        info!(chat_id, user_id, "hid chat for user");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::create_test_database;

    fn direct(creator: &str, other: &str) -> NewChat {
        NewChat {
            kind: ChatKind::Direct,
            name: None,
            created_by: creator.to_string(),
            participant_ids: vec![other.to_string()],
        }
    }

    fn group(creator: &str, name: &str, others: &[&str]) -> NewChat {
        NewChat {
            kind: ChatKind::Group,
            name: Some(name.to_string()),
            created_by: creator.to_string(),
            participant_ids: others.iter().map(|o| o.to_string()).collect(),
        }
    }

    async fn admin_flag(pool: &SqlitePool, chat_id: &str, user_id: &str) -> bool {
        sqlx::query_scalar(
            "SELECT is_admin FROM chat_participants WHERE chat_id = ? AND user_id = ?",
        )
        .bind(chat_id)
        .bind(user_id)
        .fetch_one(pool)
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_group_creator_becomes_admin() {
        let (pool, _dir) = create_test_database().await;
        let repo = ChatRepository::new(pool.clone());

        let (chat, created) = repo.create(&group("alice", " team ", &["bob"])).await.unwrap();

        assert!(created);
        assert_eq!(chat.name.as_deref(), Some("team"));
        assert!(admin_flag(&pool, &chat.id, "alice").await);
        assert!(!admin_flag(&pool, &chat.id, "bob").await);
    }

    #[tokio::test]
    async fn test_direct_chat_is_unique_per_pair() {
        let (pool, _dir) = create_test_database().await;
        let repo = ChatRepository::new(pool);

        let (first, created) = repo.create(&direct("alice", "bob")).await.unwrap();
        let (second, created_again) = repo.create(&direct("bob", "alice")).await.unwrap();

        assert!(created);
        assert!(!created_again);
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_list_for_user_skips_hidden_chats() {
        let (pool, _dir) = create_test_database().await;
        let repo = ChatRepository::new(pool);

        let (visible, _) = repo.create(&group("alice", "visible", &["bob"])).await.unwrap();
        let (hidden, _) = repo.create(&group("alice", "hidden", &["bob"])).await.unwrap();
        repo.hide_for_user(&hidden.id, "alice").await.unwrap();

        let alice: Vec<String> = repo
            .list_for_user("alice", 50, 0)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(alice, vec![visible.id.clone()]);

        let bob = repo.list_for_user("bob", 50, 0).await.unwrap();
        assert_eq!(bob.len(), 2);

        let carol = repo.list_for_user("carol", 50, 0).await.unwrap();
        assert!(carol.is_empty());
    }

    #[tokio::test]
    async fn test_find_by_id_returns_none_for_unknown_chat() {
        let (pool, _dir) = create_test_database().await;
        let repo = ChatRepository::new(pool);

        assert!(repo.find_by_id("missing").await.unwrap().is_none());
    }
}
