//! In-memory store — useful for tests and storage-disabled runs.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crabwire_core::error::StorageError;
use crabwire_core::message::{Message, Role};
use crabwire_core::store::{ConversationStore, ConversationSummary};
use tokio::sync::RwLock;
use uuid::Uuid;

struct Record {
    channel: String,
    sender_id: String,
    title: Option<String>,
    created_at: DateTime<Utc>,
    last_active_at: DateTime<Utc>,
    messages: Vec<Message>,
}

/// A [`ConversationStore`] that keeps everything in process memory.
/// History is lost on restart.
pub struct InMemoryStore {
    conversations: RwLock<HashMap<String, Record>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            conversations: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    async fn ensure_conversation(
        &self,
        id: &str,
        channel: &str,
        sender_id: &str,
    ) -> Result<(), StorageError> {
        let mut conversations = self.conversations.write().await;
        conversations.entry(id.to_string()).or_insert_with(|| {
            let now = Utc::now();
            Record {
                channel: channel.to_string(),
                sender_id: sender_id.to_string(),
                title: None,
                created_at: now,
                last_active_at: now,
                messages: Vec::new(),
            }
        });
        Ok(())
    }

    async fn save_message(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
    ) -> Result<(), StorageError> {
        let mut conversations = self.conversations.write().await;
        let record = conversations
            .get_mut(conversation_id)
            .ok_or_else(|| StorageError::NotFound(conversation_id.to_string()))?;

        let now = Utc::now();
        record.last_active_at = now;
        if role == Role::User && record.title.is_none() {
            record.title = Some(content.chars().take(50).collect());
        }
        record.messages.push(Message {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.to_string(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            timestamp: now,
        });
        Ok(())
    }

    async fn recent_messages(
        &self,
        conversation_id: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Message>, StorageError> {
        let conversations = self.conversations.read().await;
        let Some(record) = conversations.get(conversation_id) else {
            return Ok(Vec::new());
        };
        let len = record.messages.len();
        let end = len.saturating_sub(offset as usize);
        let start = end.saturating_sub(limit as usize);
        Ok(record.messages[start..end].to_vec())
    }

    async fn all_messages(&self, conversation_id: &str) -> Result<Vec<Message>, StorageError> {
        let conversations = self.conversations.read().await;
        Ok(conversations
            .get(conversation_id)
            .map(|r| r.messages.clone())
            .unwrap_or_default())
    }

    async fn list_conversations(
        &self,
        limit: u32,
    ) -> Result<Vec<ConversationSummary>, StorageError> {
        let conversations = self.conversations.read().await;
        let mut summaries: Vec<ConversationSummary> = conversations
            .iter()
            .map(|(id, r)| ConversationSummary {
                id: id.clone(),
                channel: r.channel.clone(),
                sender_id: r.sender_id.clone(),
                title: r.title.clone(),
                created_at: r.created_at,
                last_active_at: r.last_active_at,
            })
            .collect();
        summaries.sort_by(|a, b| b.last_active_at.cmp(&a.last_active_at));
        summaries.truncate(limit as usize);
        Ok(summaries)
    }

    async fn delete_conversation(&self, id: &str) -> Result<(), StorageError> {
        self.conversations.write().await.remove(id);
        Ok(())
    }

    async fn message_count(&self, conversation_id: &str) -> Result<u64, StorageError> {
        let conversations = self.conversations.read().await;
        Ok(conversations
            .get(conversation_id)
            .map(|r| r.messages.len() as u64)
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_requires_an_existing_conversation() {
        let store = InMemoryStore::new();
        let err = store
            .save_message("ghost", Role::User, "hello")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn save_and_load_round_trip() {
        let store = InMemoryStore::new();
        store.ensure_conversation("c1", "web", "u1").await.unwrap();
        store.save_message("c1", Role::User, "hello").await.unwrap();
        store
            .save_message("c1", Role::Assistant, "hi")
            .await
            .unwrap();

        let all = store.all_messages("c1").await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].content, "hello");
        assert_eq!(store.message_count("c1").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn recent_messages_pages_from_the_tail() {
        let store = InMemoryStore::new();
        store.ensure_conversation("c1", "web", "u1").await.unwrap();
        for i in 0..6 {
            store
                .save_message("c1", Role::User, &format!("msg {i}"))
                .await
                .unwrap();
        }

        let newest = store.recent_messages("c1", 2, 0).await.unwrap();
        assert_eq!(newest[0].content, "msg 4");
        assert_eq!(newest[1].content, "msg 5");

        let older = store.recent_messages("c1", 2, 2).await.unwrap();
        assert_eq!(older[0].content, "msg 2");

        let past_start = store.recent_messages("c1", 10, 4).await.unwrap();
        assert_eq!(past_start.len(), 2);
        assert_eq!(past_start[0].content, "msg 0");
    }

    #[tokio::test]
    async fn title_and_listing() {
        let store = InMemoryStore::new();
        store.ensure_conversation("c1", "web", "u1").await.unwrap();
        store
            .save_message("c1", Role::User, "what's the weather")
            .await
            .unwrap();

        let list = store.list_conversations(10).await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].title.as_deref(), Some("what's the weather"));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = InMemoryStore::new();
        store.ensure_conversation("c1", "web", "u1").await.unwrap();
        store.delete_conversation("c1").await.unwrap();
        store.delete_conversation("c1").await.unwrap();
        assert!(store.list_conversations(10).await.unwrap().is_empty());
    }
}
