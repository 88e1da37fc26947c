//! Database connection management

use anyhow::{Context, Result};
use courier_config::DatabaseConfig;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tokio::fs;
use tracing::info;

const BUSY_TIMEOUT: Duration = Duration::from_millis(5_000);

/// Prepare and establish a database connection pool.
///
/// Pragmas are part of the connect options so every pooled connection gets
/// foreign keys, WAL and the busy timeout, not only the first one.
pub async fn prepare_database(config: &DatabaseConfig) -> Result<SqlitePool> {
    ensure_sqlite_path(&config.url).await?;

    let options = SqliteConnectOptions::from_str(&config.url)
        .with_context(|| format!("invalid database url {}", config.url))?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT);

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections.max(1))
        .connect_with(options)
        .await
        .with_context(|| format!("failed to connect to database {}", config.url))?;

    info!(url = %config.url, "database connection established");
    Ok(pool)
}

/// Ensure the directory of a file-backed SQLite database exists
async fn ensure_sqlite_path(url: &str) -> Result<()> {
    let Some(sqlite_path) = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
    else {
        return Ok(());
    };

    let sqlite_path = sqlite_path.split('?').next().unwrap_or_default();
    if sqlite_path.is_empty() || sqlite_path.contains(":memory:") {
        return Ok(());
    }

    let path = Path::new(sqlite_path);
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await.with_context(|| {
                format!("failed to create sqlite directory {}", parent.display())
            })?;
        }
    }

    Ok(())
}

/// Database connection wrapper for easier management
#[derive(Clone)]
pub struct DatabaseConnection {
    pub pool: SqlitePool,
}

impl DatabaseConnection {
    pub async fn from_config(config: &DatabaseConfig) -> Result<Self> {
        let pool = prepare_database(config).await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(self) {
        self.pool.close().await;
    }

    /// Round-trip a trivial query, used by the health endpoint.
    pub async fn test_connection(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("failed to test database connection")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_database_connection_creation() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested/dir/test.db");
        let config = DatabaseConfig {
            url: format!("sqlite://{}", db_path.display()),
            max_connections: 2,
        };

        let conn = DatabaseConnection::from_config(&config).await.unwrap();
        conn.test_connection().await.unwrap();
        assert!(db_path.exists());
    }

    #[tokio::test]
    async fn test_in_memory_database() {
        let config = DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
        };

        let conn = DatabaseConnection::from_config(&config).await.unwrap();
        conn.test_connection().await.unwrap();
    }

    #[tokio::test]
    async fn test_every_connection_enforces_foreign_keys() {
        let temp_dir = TempDir::new().unwrap();
        let config = DatabaseConfig {
            url: format!("sqlite://{}", temp_dir.path().join("fk.db").display()),
            max_connections: 3,
        };
        let pool = prepare_database(&config).await.unwrap();

        let mut held = Vec::new();
        for _ in 0..3 {
            let mut conn = pool.acquire().await.unwrap();
            let enabled: i64 = sqlx::query_scalar("PRAGMA foreign_keys")
                .fetch_one(&mut *conn)
                .await
                .unwrap();
            assert_eq!(enabled, 1);
            held.push(conn);
        }
    }
}
