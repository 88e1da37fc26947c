//! Courier message store
//!
//! Durable chats, participants, messages, read receipts and per-user
//! visibility state on SQLite, plus pool setup and embedded migrations.

use courier_config::DatabaseConfig;
use sqlx::SqlitePool;

pub mod connection;
pub mod entities;
pub mod migrations;
pub mod repos;
pub mod types;

pub use connection::{prepare_database, DatabaseConnection};
pub use migrations::run_migrations;

pub use repos::{ChatRepository, MessageRepository, ParticipantRepository, ReceiptRepository};

pub use entities::{
    chat::{direct_key, Chat, ChatKind, NewChat},
    message::{Message, MessageCursor, NewMessage},
    participant::{ChatParticipant, ParticipantRemoval},
    receipt::ReadReceipt,
};

pub use types::{errors::DatabaseError, timestamp, DatabaseResult};

/// Open the pool and apply migrations.
pub async fn initialize_database(config: &DatabaseConfig) -> DatabaseResult<SqlitePool> {
    let pool = prepare_database(config)
        .await
        .map_err(|e| DatabaseError::ConnectionError(format!("{e:#}")))?;

    run_migrations(&pool)
        .await
        .map_err(|e| DatabaseError::MigrationError(format!("{e:#}")))?;

    Ok(pool)
}


#[cfg(test)]
mod tests {
    use super::test_support::create_test_database;

    #[tokio::test]
    async fn test_foreign_keys_enabled() {
        let (pool, _temp_dir) = create_test_database().await;

        let result: (bool,) = sqlx::query_as("PRAGMA foreign_keys")
            .fetch_one(&pool)
            .await
            .unwrap();

        assert!(result.0);
    }

    #[tokio::test]
    async fn test_participant_rows_require_existing_chat() {
        let (pool, _temp_dir) = create_test_database().await;

        let result = sqlx::query(
            "INSERT INTO chat_participants (chat_id, user_id, is_admin, joined_at) VALUES ('missing', 'alice', 0, '2024-01-01T00:00:00.000000Z')",
        )
        .execute(&pool)
        .await;

        assert!(result.is_err());
    }
}
