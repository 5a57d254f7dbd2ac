use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::types::{ChatMessage, SessionUsage, Usage, UsageKind};

/// Per-user overrides on top of the engine defaults. `None` means "use the
/// configured default".
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct UserSettings {
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub summarization_enabled: Option<bool>,
    pub retrieval_filter_enabled: Option<bool>,
    pub retrieval_min_similarity: Option<f64>,
}

/// Durable state per user: conversation history, usage counters, settings.
///
/// Writes are per-call; the engine appends each message as it is produced
/// rather than flushing whole conversations, so a crash mid-turn loses at
/// most the in-flight message.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn append_message(&self, user: &str, message: &ChatMessage) -> Result<()>;
    async fn load_messages(&self, user: &str) -> Result<Vec<ChatMessage>>;
    /// Replace the whole history in one step (used by compaction).
    async fn replace_messages(&self, user: &str, messages: Vec<ChatMessage>) -> Result<()>;
    async fn delete_messages(&self, user: &str) -> Result<()>;

    async fn add_usage(&self, user: &str, kind: UsageKind, usage: &Usage) -> Result<()>;
    async fn load_usage(&self, user: &str) -> Result<SessionUsage>;
    async fn reset_usage(&self, user: &str) -> Result<()>;

    async fn load_settings(&self, user: &str) -> Result<UserSettings>;
    async fn save_settings(&self, user: &str, settings: &UserSettings) -> Result<()>;
}

#[derive(Default)]
struct UserRecord {
    messages: Vec<ChatMessage>,
    usage: SessionUsage,
    settings: UserSettings,
}

/// In-memory store. State lives for the process lifetime only.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, UserRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn append_message(&self, user: &str, message: &ChatMessage) -> Result<()> {
        let mut records = self.records.write().await;
        records
            .entry(user.to_owned())
            .or_default()
            .messages
            .push(message.clone());
        Ok(())
    }

    async fn load_messages(&self, user: &str) -> Result<Vec<ChatMessage>> {
        let records = self.records.read().await;
        Ok(records
            .get(user)
            .map(|record| record.messages.clone())
            .unwrap_or_default())
    }

    async fn replace_messages(&self, user: &str, messages: Vec<ChatMessage>) -> Result<()> {
        let mut records = self.records.write().await;
        records.entry(user.to_owned()).or_default().messages = messages;
        Ok(())
    }

    async fn delete_messages(&self, user: &str) -> Result<()> {
        let mut records = self.records.write().await;
        if let Some(record) = records.get_mut(user) {
            record.messages.clear();
        }
        Ok(())
    }

    async fn add_usage(&self, user: &str, kind: UsageKind, usage: &Usage) -> Result<()> {
        let mut records = self.records.write().await;
        records
            .entry(user.to_owned())
            .or_default()
            .usage
            .totals_mut(kind)
            .add(usage);
        Ok(())
    }

    async fn load_usage(&self, user: &str) -> Result<SessionUsage> {
        let records = self.records.read().await;
        Ok(records
            .get(user)
            .map(|record| record.usage.clone())
            .unwrap_or_default())
    }

    async fn reset_usage(&self, user: &str) -> Result<()> {
        let mut records = self.records.write().await;
        if let Some(record) = records.get_mut(user) {
            record.usage = SessionUsage::default();
        }
        Ok(())
    }

    async fn load_settings(&self, user: &str) -> Result<UserSettings> {
        let records = self.records.read().await;
        Ok(records
            .get(user)
            .map(|record| record.settings.clone())
            .unwrap_or_default())
    }

    async fn save_settings(&self, user: &str, settings: &UserSettings) -> Result<()> {
        let mut records = self.records.write().await;
        records.entry(user.to_owned()).or_default().settings = settings.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn messages_round_trip_per_user() {
        let store = MemoryStore::new();
        store
            .append_message("alice", &ChatMessage::user("hello"))
            .await
            .unwrap();
        store
            .append_message("bob", &ChatMessage::user("hi"))
            .await
            .unwrap();

        let alice = store.load_messages("alice").await.unwrap();
        assert_eq!(alice.len(), 1);
        assert_eq!(alice[0].text_content(), "hello");
        assert_eq!(store.load_messages("bob").await.unwrap().len(), 1);
        assert!(store.load_messages("carol").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn usage_accumulates_by_kind_and_resets() {
        let store = MemoryStore::new();
        let usage = Usage {
            input_tokens: 10,
            output_tokens: 5,
            cached_input_tokens: None,
            cost: 0.01,
        };
        store.add_usage("alice", UsageKind::Chat, &usage).await.unwrap();
        store.add_usage("alice", UsageKind::Chat, &usage).await.unwrap();
        store
            .add_usage("alice", UsageKind::Summarization, &usage)
            .await
            .unwrap();

        let loaded = store.load_usage("alice").await.unwrap();
        assert_eq!(loaded.chat.input_tokens, 20);
        assert_eq!(loaded.chat.request_count, 2);
        assert_eq!(loaded.summarization.request_count, 1);

        store.reset_usage("alice").await.unwrap();
        let reset = store.load_usage("alice").await.unwrap();
        assert_eq!(reset.chat.request_count, 0);
        assert_eq!(reset.summarization.input_tokens, 0);
    }

    #[tokio::test]
    async fn delete_clears_history_but_keeps_settings() {
        let store = MemoryStore::new();
        store
            .append_message("alice", &ChatMessage::user("hello"))
            .await
            .unwrap();
        let settings = UserSettings {
            model: Some("gpt-4o".into()),
            ..Default::default()
        };
        store.save_settings("alice", &settings).await.unwrap();

        store.delete_messages("alice").await.unwrap();
        assert!(store.load_messages("alice").await.unwrap().is_empty());
        assert_eq!(store.load_settings("alice").await.unwrap(), settings);
    }
}
