//! Conversation persistence interface
//!
//! Persistence is fire-and-forget relative to the live transcript: the
//! store assigns identifiers asynchronously and the session worker feeds
//! them back into the in-memory transcript without reordering it.

use async_trait::async_trait;

use parley_protocol::{Conversation, TranscriptMessage};

use crate::error::Result;

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// List conversations belonging to a project, newest first
    async fn list_conversations(&self, project_path: &str) -> Result<Vec<Conversation>>;

    async fn create_conversation(&self, conversation: &Conversation) -> Result<()>;

    /// Load a conversation's messages in transcript order
    async fn get_messages(&self, conversation_id: &str) -> Result<Vec<TranscriptMessage>>;

    /// Append a message and return its assigned identifier
    async fn save_message(
        &self,
        conversation_id: &str,
        message: &TranscriptMessage,
    ) -> Result<u64>;

    async fn update_title(&self, conversation_id: &str, title: &str) -> Result<()>;
}

/// In-memory store for tests and ephemeral sessions
#[derive(Default)]
pub struct MemoryStore {
    inner: parking_lot::Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    conversations: Vec<Conversation>,
    messages: std::collections::HashMap<String, Vec<TranscriptMessage>>,
    next_id: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn list_conversations(&self, project_path: &str) -> Result<Vec<Conversation>> {
        let inner = self.inner.lock();
        let mut found: Vec<Conversation> = inner
            .conversations
            .iter()
            .filter(|c| c.project_path == project_path)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(found)
    }

    async fn create_conversation(&self, conversation: &Conversation) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.conversations.push(conversation.clone());
        inner
            .messages
            .entry(conversation.id.clone())
            .or_default();
        Ok(())
    }

    async fn get_messages(&self, conversation_id: &str) -> Result<Vec<TranscriptMessage>> {
        Ok(self
            .inner
            .lock()
            .messages
            .get(conversation_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn save_message(
        &self,
        conversation_id: &str,
        message: &TranscriptMessage,
    ) -> Result<u64> {
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        let mut stored = message.clone();
        stored.persisted_id = Some(id);
        inner
            .messages
            .entry(conversation_id.to_string())
            .or_default()
            .push(stored);
        if let Some(conv) = inner
            .conversations
            .iter_mut()
            .find(|c| c.id == conversation_id)
        {
            conv.updated_at = chrono::Utc::now().timestamp_millis();
        }
        Ok(id)
    }

    async fn update_title(&self, conversation_id: &str, title: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Some(conv) = inner
            .conversations
            .iter_mut()
            .find(|c| c.id == conversation_id)
        {
            conv.title = Some(title.to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_round_trip() {
        let store = MemoryStore::new();
        let conv = Conversation::new("/p", "/p");
        store.create_conversation(&conv).await.unwrap();

        let id = store
            .save_message(&conv.id, &TranscriptMessage::user_text("hi"))
            .await
            .unwrap();
        assert_eq!(id, 1);
        let id = store
            .save_message(&conv.id, &TranscriptMessage::assistant_text("hello"))
            .await
            .unwrap();
        assert_eq!(id, 2);

        let messages = store.get_messages(&conv.id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].persisted_id, Some(1));

        store.update_title(&conv.id, "greeting").await.unwrap();
        let listed = store.list_conversations("/p").await.unwrap();
        assert_eq!(listed[0].title.as_deref(), Some("greeting"));
        assert!(store.list_conversations("/other").await.unwrap().is_empty());
    }
}
