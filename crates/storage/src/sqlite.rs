//! SQLite conversation store.
//!
//! One database file with two tables:
//! - `conversations` — one row per session, with title and activity times
//! - `messages` — append-only message log per conversation
//!
//! Storage and sending are decoupled: the store keeps the full history,
//! the agent only sends its windowed slice upstream.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crabwire_core::error::StorageError;
use crabwire_core::message::{Message, Role};
use crabwire_core::store::{ConversationStore, ConversationSummary};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

/// A durable conversation store backed by a single SQLite file.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the store at `path`. Parent directories are
    /// created automatically.
    pub async fn new(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                StorageError::Database(format!("Failed to create database directory: {e}"))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .pragma("foreign_keys", "ON");

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Database(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("Conversation store initialized at {}", path.display());
        Ok(store)
    }

    /// An in-process ephemeral store, for tests.
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StorageError::Database(format!("Invalid SQLite URL: {e}")))?
            .pragma("foreign_keys", "ON");

        // A second pool connection would see its own empty database, so
        // the ephemeral store is capped at one.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Database(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                id             TEXT PRIMARY KEY,
                channel        TEXT NOT NULL DEFAULT 'web',
                sender_id      TEXT NOT NULL DEFAULT '',
                title          TEXT NOT NULL DEFAULT '',
                created_at     TEXT NOT NULL,
                last_active_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Database(format!("conversations table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id TEXT NOT NULL,
                role            TEXT NOT NULL CHECK(role IN ('system', 'user', 'assistant', 'tool')),
                content         TEXT NOT NULL,
                created_at      TEXT NOT NULL,
                FOREIGN KEY (conversation_id) REFERENCES conversations(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Database(format!("messages table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_conversation
             ON messages(conversation_id, created_at)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Database(format!("messages index: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_conversations_last_active
             ON conversations(last_active_at DESC)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Database(format!("conversations index: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> Result<Message, StorageError> {
        let id: i64 = row
            .try_get("id")
            .map_err(|e| StorageError::Database(format!("id column: {e}")))?;
        let role_str: String = row
            .try_get("role")
            .map_err(|e| StorageError::Database(format!("role column: {e}")))?;
        let content: String = row
            .try_get("content")
            .map_err(|e| StorageError::Database(format!("content column: {e}")))?;
        let created_at_str: String = row
            .try_get("created_at")
            .map_err(|e| StorageError::Database(format!("created_at column: {e}")))?;

        let role = role_str.parse::<Role>().map_err(StorageError::Database)?;
        let timestamp = DateTime::parse_from_rfc3339(&created_at_str)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());

        Ok(Message {
            id: id.to_string(),
            role,
            content,
            tool_calls: Vec::new(),
            tool_call_id: None,
            timestamp,
        })
    }

    fn row_to_summary(row: &sqlx::sqlite::SqliteRow) -> Result<ConversationSummary, StorageError> {
        let id: String = row
            .try_get("id")
            .map_err(|e| StorageError::Database(format!("id column: {e}")))?;
        let channel: String = row
            .try_get("channel")
            .map_err(|e| StorageError::Database(format!("channel column: {e}")))?;
        let sender_id: String = row
            .try_get("sender_id")
            .map_err(|e| StorageError::Database(format!("sender_id column: {e}")))?;
        let title: String = row
            .try_get("title")
            .map_err(|e| StorageError::Database(format!("title column: {e}")))?;
        let created_at_str: String = row
            .try_get("created_at")
            .map_err(|e| StorageError::Database(format!("created_at column: {e}")))?;
        let last_active_str: String = row
            .try_get("last_active_at")
            .map_err(|e| StorageError::Database(format!("last_active_at column: {e}")))?;

        let parse = |s: &str| {
            DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now())
        };

        Ok(ConversationSummary {
            id,
            channel,
            sender_id,
            title: if title.is_empty() { None } else { Some(title) },
            created_at: parse(&created_at_str),
            last_active_at: parse(&last_active_str),
        })
    }
}

#[async_trait]
impl ConversationStore for SqliteStore {
    async fn ensure_conversation(
        &self,
        id: &str,
        channel: &str,
        sender_id: &str,
    ) -> Result<(), StorageError> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO conversations (id, channel, sender_id, title, created_at, last_active_at)
            VALUES (?1, ?2, ?3, '', ?4, ?4)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(channel)
        .bind(sender_id)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Database(format!("INSERT conversation: {e}")))?;
        Ok(())
    }

    async fn save_message(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
    ) -> Result<(), StorageError> {
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO messages (conversation_id, role, content, created_at)
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(conversation_id)
        .bind(role.as_str())
        .bind(content)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Database(format!("INSERT message: {e}")))?;

        sqlx::query("UPDATE conversations SET last_active_at = ?1 WHERE id = ?2")
            .bind(&now)
            .bind(conversation_id)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Database(format!("UPDATE activity: {e}")))?;

        // The first user message becomes the conversation title.
        if role == Role::User {
            let title: String = content.chars().take(50).collect();
            sqlx::query("UPDATE conversations SET title = ?1 WHERE id = ?2 AND title = ''")
                .bind(&title)
                .bind(conversation_id)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::Database(format!("UPDATE title: {e}")))?;
        }

        Ok(())
    }

    async fn recent_messages(
        &self,
        conversation_id: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Message>, StorageError> {
        let rows = sqlx::query(
            "SELECT id, role, content, created_at
             FROM messages
             WHERE conversation_id = ?1
             ORDER BY created_at DESC, id DESC
             LIMIT ?2 OFFSET ?3",
        )
        .bind(conversation_id)
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Database(format!("SELECT recent: {e}")))?;

        let mut messages: Vec<Message> = rows
            .iter()
            .map(Self::row_to_message)
            .collect::<Result<_, _>>()?;
        messages.reverse();
        Ok(messages)
    }

    async fn all_messages(&self, conversation_id: &str) -> Result<Vec<Message>, StorageError> {
        let rows = sqlx::query(
            "SELECT id, role, content, created_at
             FROM messages
             WHERE conversation_id = ?1
             ORDER BY created_at ASC, id ASC",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Database(format!("SELECT all: {e}")))?;

        rows.iter().map(Self::row_to_message).collect()
    }

    async fn list_conversations(
        &self,
        limit: u32,
    ) -> Result<Vec<ConversationSummary>, StorageError> {
        let rows = sqlx::query(
            "SELECT id, channel, sender_id, title, created_at, last_active_at
             FROM conversations
             ORDER BY last_active_at DESC
             LIMIT ?1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Database(format!("SELECT conversations: {e}")))?;

        rows.iter().map(Self::row_to_summary).collect()
    }

    async fn delete_conversation(&self, id: &str) -> Result<(), StorageError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::Database(format!("BEGIN: {e}")))?;

        sqlx::query("DELETE FROM messages WHERE conversation_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| StorageError::Database(format!("DELETE messages: {e}")))?;

        sqlx::query("DELETE FROM conversations WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| StorageError::Database(format!("DELETE conversation: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| StorageError::Database(format!("COMMIT: {e}")))?;
        Ok(())
    }

    async fn message_count(&self, conversation_id: &str) -> Result<u64, StorageError> {
        let row = sqlx::query("SELECT COUNT(*) as cnt FROM messages WHERE conversation_id = ?1")
            .bind(conversation_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StorageError::Database(format!("COUNT: {e}")))?;

        let cnt: i64 = row
            .try_get("cnt")
            .map_err(|e| StorageError::Database(format!("cnt column: {e}")))?;
        Ok(cnt as u64)
    }
}
