//! JSONL conversation storage
//!
//! One file per conversation: a metadata line followed by one line per
//! message. Message identifiers are monotonic within a conversation and
//! assigned at append time.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use parley_protocol::{Conversation, TranscriptMessage};
use parley_session::error::{Error, Result};
use parley_session::store::ConversationStore;

/// Entry types for the JSONL format
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StoreEntry {
    /// First line of every file
    Metadata { conversation: Conversation },
    /// A message in the conversation
    Message {
        id: u64,
        message: TranscriptMessage,
    },
}

pub struct JsonlStore {
    dir: PathBuf,
    /// conversation id -> next message id
    next_ids: Mutex<HashMap<String, u64>>,
}

impl JsonlStore {
    pub fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            next_ids: Mutex::new(HashMap::new()),
        })
    }

    fn path_for(&self, conversation_id: &str) -> PathBuf {
        self.dir.join(format!("{}.jsonl", conversation_id))
    }

    fn read_entries(path: &Path) -> Result<Vec<StoreEntry>> {
        let file = File::open(path).map_err(store_err)?;
        let reader = BufReader::new(file);
        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line.map_err(store_err)?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    // A torn write must not make the whole file unreadable
                    tracing::warn!(path = %path.display(), error = %e, "skipping malformed entry");
                }
            }
        }
        Ok(entries)
    }

    fn next_id(&self, conversation_id: &str, path: &Path) -> Result<u64> {
        let mut ids = self.next_ids.lock();
        if let Some(next) = ids.get_mut(conversation_id) {
            let id = *next;
            *next += 1;
            return Ok(id);
        }
        let mut max = 0;
        if path.exists() {
            for entry in Self::read_entries(path)? {
                if let StoreEntry::Message { id, .. } = entry {
                    max = max.max(id);
                }
            }
        }
        ids.insert(conversation_id.to_string(), max + 2);
        Ok(max + 1)
    }
}

fn store_err(e: impl std::fmt::Display) -> Error {
    Error::Store(e.to_string())
}

#[async_trait]
impl ConversationStore for JsonlStore {
    async fn list_conversations(&self, project_path: &str) -> Result<Vec<Conversation>> {
        let mut found = Vec::new();
        let entries = fs::read_dir(&self.dir).map_err(store_err)?;
        for dirent in entries {
            let path = dirent.map_err(store_err)?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            let file_entries = Self::read_entries(&path)?;
            let Some(StoreEntry::Metadata { mut conversation }) = file_entries.first().cloned()
            else {
                continue;
            };
            if conversation.project_path != project_path {
                continue;
            }
            // Last message timestamp is the effective update time
            for entry in &file_entries {
                if let StoreEntry::Message { message, .. } = entry {
                    conversation.updated_at = conversation.updated_at.max(message.timestamp);
                }
            }
            found.push(conversation);
        }
        found.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(found)
    }

    async fn create_conversation(&self, conversation: &Conversation) -> Result<()> {
        let path = self.path_for(&conversation.id);
        let mut file = File::create(&path).map_err(store_err)?;
        let entry = StoreEntry::Metadata {
            conversation: conversation.clone(),
        };
        writeln!(
            file,
            "{}",
            serde_json::to_string(&entry).map_err(store_err)?
        )
        .map_err(store_err)?;
        self.next_ids.lock().insert(conversation.id.clone(), 1);
        Ok(())
    }

    async fn get_messages(&self, conversation_id: &str) -> Result<Vec<TranscriptMessage>> {
        let path = self.path_for(conversation_id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let mut messages = Vec::new();
        for entry in Self::read_entries(&path)? {
            if let StoreEntry::Message { id, mut message } = entry {
                message.persisted_id = Some(id);
                messages.push(message);
            }
        }
        Ok(messages)
    }

    async fn save_message(
        &self,
        conversation_id: &str,
        message: &TranscriptMessage,
    ) -> Result<u64> {
        let path = self.path_for(conversation_id);
        if !path.exists() {
            return Err(Error::Store(format!(
                "unknown conversation: {}",
                conversation_id
            )));
        }
        let id = self.next_id(conversation_id, &path)?;
        let entry = StoreEntry::Message {
            id,
            message: message.clone(),
        };
        let mut file = File::options()
            .append(true)
            .open(&path)
            .map_err(store_err)?;
        writeln!(
            file,
            "{}",
            serde_json::to_string(&entry).map_err(store_err)?
        )
        .map_err(store_err)?;
        Ok(id)
    }

    async fn update_title(&self, conversation_id: &str, title: &str) -> Result<()> {
        let path = self.path_for(conversation_id);
        let mut entries = Self::read_entries(&path)?;
        let Some(StoreEntry::Metadata { conversation }) = entries.first_mut() else {
            return Err(Error::Store(format!(
                "missing metadata: {}",
                conversation_id
            )));
        };
        conversation.title = Some(title.to_string());
        conversation.updated_at = chrono::Utc::now().timestamp_millis();

        let mut file = File::create(&path).map_err(store_err)?;
        for entry in &entries {
            writeln!(
                file,
                "{}",
                serde_json::to_string(entry).map_err(store_err)?
            )
            .map_err(store_err)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (JsonlStore, PathBuf) {
        let dir = std::env::temp_dir().join(format!("parley-store-{}", uuid::Uuid::new_v4()));
        (JsonlStore::new(&dir).unwrap(), dir)
    }

    #[tokio::test]
    async fn test_round_trip_and_monotonic_ids() {
        let (store, dir) = temp_store();
        let conv = Conversation::new("/proj", "/proj");
        store.create_conversation(&conv).await.unwrap();

        assert_eq!(
            store
                .save_message(&conv.id, &TranscriptMessage::user_text("one"))
                .await
                .unwrap(),
            1
        );
        assert_eq!(
            store
                .save_message(&conv.id, &TranscriptMessage::assistant_text("two"))
                .await
                .unwrap(),
            2
        );

        let messages = store.get_messages(&conv.id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].persisted_id, Some(1));
        assert_eq!(messages[1].text(), "two");

        // A fresh store over the same directory continues the sequence
        let store = JsonlStore::new(&dir).unwrap();
        assert_eq!(
            store
                .save_message(&conv.id, &TranscriptMessage::user_text("three"))
                .await
                .unwrap(),
            3
        );

        fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn test_list_filters_by_project_and_orders_newest_first() {
        let (store, dir) = temp_store();
        let mut old = Conversation::new("/proj", "/proj");
        old.updated_at = 100;
        old.created_at = 100;
        let mut new = Conversation::new("/proj", "/proj");
        new.updated_at = 200;
        new.created_at = 200;
        let other = Conversation::new("/elsewhere", "/elsewhere");
        store.create_conversation(&old).await.unwrap();
        store.create_conversation(&new).await.unwrap();
        store.create_conversation(&other).await.unwrap();

        let listed = store.list_conversations("/proj").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, new.id);
        assert_eq!(listed[1].id, old.id);

        fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn test_update_title_preserves_messages() {
        let (store, dir) = temp_store();
        let conv = Conversation::new("/proj", "/proj");
        store.create_conversation(&conv).await.unwrap();
        store
            .save_message(&conv.id, &TranscriptMessage::user_text("hello"))
            .await
            .unwrap();

        store.update_title(&conv.id, "greeting").await.unwrap();
        let listed = store.list_conversations("/proj").await.unwrap();
        assert_eq!(listed[0].title.as_deref(), Some("greeting"));
        assert_eq!(store.get_messages(&conv.id).await.unwrap().len(), 1);

        fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn test_malformed_line_is_skipped() {
        let (store, dir) = temp_store();
        let conv = Conversation::new("/proj", "/proj");
        store.create_conversation(&conv).await.unwrap();
        store
            .save_message(&conv.id, &TranscriptMessage::user_text("kept"))
            .await
            .unwrap();

        let path = dir.join(format!("{}.jsonl", conv.id));
        let mut file = File::options().append(true).open(&path).unwrap();
        writeln!(file, "{{ torn").unwrap();

        let messages = store.get_messages(&conv.id).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text(), "kept");

        fs::remove_dir_all(dir).ok();
    }
}
