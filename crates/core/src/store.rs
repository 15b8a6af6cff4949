//! Message store — the persisted conversation log.
//!
//! The store is the single source of truth for a conversation. The run loop
//! re-reads it at the start of every step, so writes made by tools or by
//! other tasks are always visible to the next context assembly.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::message::{Message, MessagePatch};

/// Selects one conversation log.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationKey {
    pub session_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_id: Option<String>,

    /// Dedicated thread inside a topic (used by delegated tasks)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
}

impl ConversationKey {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            topic_id: None,
            thread_id: None,
        }
    }

    pub fn with_topic(mut self, topic_id: impl Into<String>) -> Self {
        self.topic_id = Some(topic_id.into());
        self
    }

    pub fn with_thread(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }
}

/// Narrow read/write interface over persisted messages.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Append a message to a conversation. Returns the stored message.
    async fn create(&self, key: &ConversationKey, message: Message) -> Result<Message, StoreError>;

    /// Apply a partial update to an existing message.
    async fn update(&self, id: &str, patch: MessagePatch) -> Result<Message, StoreError>;

    /// All messages of a conversation, in insertion order.
    async fn query(&self, key: &ConversationKey) -> Result<Vec<Message>, StoreError>;
}

/// A store that keeps every conversation in a Vec.
/// Useful for testing and sessions where persistence isn't needed.
#[derive(Clone, Default)]
pub struct InMemoryMessageStore {
    entries: Arc<RwLock<Vec<(ConversationKey, Message)>>>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total messages across all conversations.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn create(&self, key: &ConversationKey, message: Message) -> Result<Message, StoreError> {
        let mut entries = self.entries.write().await;
        if entries.iter().any(|(_, m)| m.id == message.id) {
            return Err(StoreError::Storage(format!(
                "message {} already exists",
                message.id
            )));
        }
        entries.push((key.clone(), message.clone()));
        Ok(message)
    }

    async fn update(&self, id: &str, patch: MessagePatch) -> Result<Message, StoreError> {
        let mut entries = self.entries.write().await;
        let (_, message) = entries
            .iter_mut()
            .find(|(_, m)| m.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        message.apply(patch);
        Ok(message.clone())
    }

    async fn query(&self, key: &ConversationKey) -> Result<Vec<Message>, StoreError> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, m)| m.clone())
            .collect())
    }
}
