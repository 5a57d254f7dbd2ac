//! Per-user conversation state.

pub mod store;

use crate::config::EngineConfig;
use crate::error::Result;
use crate::types::{ChatMessage, Role, Usage, UsageKind};

pub use store::{MemoryStore, SessionStore, UserSettings};

/// Settings in effect for one user: engine defaults with the user's
/// overrides applied.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveSettings {
    pub model: String,
    pub temperature: f32,
    pub summarization_enabled: bool,
    pub retrieval_filter_enabled: bool,
    pub retrieval_min_similarity: f64,
}

impl EffectiveSettings {
    pub fn resolve(config: &EngineConfig, user: &UserSettings) -> Self {
        Self {
            model: user.model.clone().unwrap_or_else(|| config.model.clone()),
            temperature: user.temperature.unwrap_or(config.temperature),
            summarization_enabled: user
                .summarization_enabled
                .unwrap_or(config.summarization.enabled),
            retrieval_filter_enabled: user
                .retrieval_filter_enabled
                .unwrap_or(config.retrieval.filter_enabled),
            retrieval_min_similarity: user
                .retrieval_min_similarity
                .unwrap_or(config.retrieval.min_similarity),
        }
    }
}

/// One user's loaded conversation. The store remains the source of truth;
/// every append goes to the store first, then to the in-memory copy.
pub struct ConversationSession {
    user: String,
    pub messages: Vec<ChatMessage>,
    pub settings: EffectiveSettings,
}

impl ConversationSession {
    pub async fn load(
        store: &dyn SessionStore,
        config: &EngineConfig,
        user: &str,
    ) -> Result<Self> {
        let messages = store.load_messages(user).await?;
        let settings = EffectiveSettings::resolve(config, &store.load_settings(user).await?);
        Ok(Self {
            user: user.to_owned(),
            messages,
            settings,
        })
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    /// Count of user and assistant messages; tool traffic and system
    /// messages do not count toward the compaction threshold.
    pub fn conversational_len(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| matches!(m.role, Role::User | Role::Assistant))
            .count()
    }

    pub async fn append(&mut self, store: &dyn SessionStore, message: ChatMessage) -> Result<()> {
        store.append_message(&self.user, &message).await?;
        self.messages.push(message);
        Ok(())
    }

    /// Swap the persisted history for a new one atomically.
    pub async fn replace_history(
        &mut self,
        store: &dyn SessionStore,
        messages: Vec<ChatMessage>,
    ) -> Result<()> {
        store.replace_messages(&self.user, messages.clone()).await?;
        self.messages = messages;
        Ok(())
    }

    pub async fn record_usage(
        &self,
        store: &dyn SessionStore,
        kind: UsageKind,
        usage: &Usage,
    ) -> Result<()> {
        store.add_usage(&self.user, kind, usage).await
    }
}

/// Wipe a user's history and usage counters. Settings survive a reset.
pub async fn reset_user(store: &dyn SessionStore, user: &str) -> Result<()> {
    store.delete_messages(user).await?;
    store.reset_usage(user).await
}
