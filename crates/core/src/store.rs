//! ConversationStore trait — durable conversation history.
//!
//! The agent runtime works without any store (pure in-memory sessions,
//! lost on restart). When one is configured, every message is forwarded
//! to it and history reloads come from it first.
//!
//! Implementations: SQLite and in-memory, both in `crabwire-storage`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::message::{Message, Role};

/// Conversation metadata, without the message bodies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    /// Opaque id, same key the runtime's session table uses
    pub id: String,

    /// Which surface the conversation came from (e.g. "web", "cli")
    pub channel: String,

    /// The sender that opened it
    pub sender_id: String,

    /// Title, derived from the first user message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

/// The conversation store contract.
///
/// `recent_messages` pages from the tail: `offset` counts back from the
/// newest message, and the returned page is in chronological order.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Create the conversation row if it does not exist yet.
    async fn ensure_conversation(
        &self,
        id: &str,
        channel: &str,
        sender_id: &str,
    ) -> std::result::Result<(), StorageError>;

    /// Append one message. Also bumps the conversation's activity time and
    /// sets its title from the first user message.
    async fn save_message(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
    ) -> std::result::Result<(), StorageError>;

    /// The most recent `limit` messages, skipping `offset` from the tail,
    /// returned oldest-first.
    async fn recent_messages(
        &self,
        conversation_id: &str,
        limit: u32,
        offset: u32,
    ) -> std::result::Result<Vec<Message>, StorageError>;

    /// Full history, oldest-first.
    async fn all_messages(
        &self,
        conversation_id: &str,
    ) -> std::result::Result<Vec<Message>, StorageError>;

    /// Known conversations, most recently active first.
    async fn list_conversations(
        &self,
        limit: u32,
    ) -> std::result::Result<Vec<ConversationSummary>, StorageError>;

    /// Delete a conversation and its messages.
    async fn delete_conversation(&self, id: &str) -> std::result::Result<(), StorageError>;

    /// Number of stored messages in a conversation.
    async fn message_count(&self, conversation_id: &str)
    -> std::result::Result<u64, StorageError>;
}
