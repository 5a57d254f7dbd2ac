//! Conversation history compaction.
//!
//! Once a conversation accumulates enough user/assistant messages the whole
//! history is summarized by the model and replaced with a single marked
//! assistant message. Replacement is destructive; the summary is the only
//! thing the next turn sees. A failed summarization leaves the history
//! exactly as it was.

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::Result;
use crate::provider::{ChatRequest, ModelClient};
use crate::session::{ConversationSession, SessionStore};
use crate::types::{ChatMessage, Role, UsageKind};

pub const SUMMARY_OPEN: &str = "<conversation_summary>";
pub const SUMMARY_CLOSE: &str = "</conversation_summary>";

const SUMMARIZER_INSTRUCTIONS: &str = "You summarize conversations so they can \
continue with less context. Produce a compact summary with these sections:\n\
1. Narrative context: what the conversation is about and how it developed.\n\
2. Key facts: concrete values, names, decisions and results that were established.\n\
3. Active constraints: preferences or rules the user stated that still apply.\n\
4. Task status: what is in progress, done, or still open.\n\
Write plainly. Do not address the user. Do not invent details.";

/// Is `message` a compaction summary from an earlier pass?
pub fn is_summary_message(message: &ChatMessage) -> bool {
    message.role == Role::Assistant && message.text_content().starts_with(SUMMARY_OPEN)
}

pub struct ContextCompactor {
    client: Arc<dyn ModelClient>,
    threshold: usize,
    max_tokens: u32,
}

impl ContextCompactor {
    pub fn new(client: Arc<dyn ModelClient>, threshold: usize, max_tokens: u32) -> Self {
        Self {
            client,
            threshold,
            max_tokens,
        }
    }

    /// Compact the session history when the threshold is reached. Returns
    /// whether a compaction happened. Summarization faults are swallowed
    /// (logged) so a turn can proceed on the uncompacted history.
    pub async fn maybe_compact(
        &self,
        session: &mut ConversationSession,
        store: &dyn SessionStore,
    ) -> Result<bool> {
        if !session.settings.summarization_enabled {
            return Ok(false);
        }
        if session.conversational_len() < self.threshold {
            return Ok(false);
        }

        let transcript = render_transcript(&session.messages);
        let request = ChatRequest {
            model: session.settings.model.clone(),
            messages: vec![
                ChatMessage::system(SUMMARIZER_INSTRUCTIONS),
                ChatMessage::user(format!("Summarize this conversation:\n\n{transcript}")),
            ],
            temperature: 0.3,
            max_tokens: self.max_tokens,
            tools: Vec::new(),
        };

        let response = match self.client.chat(&request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(user = session.user(), error = %e, "summarization failed, keeping full history");
                return Ok(false);
            }
        };

        session
            .record_usage(store, UsageKind::Summarization, &response.usage)
            .await?;

        let summary = match response.content.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => text.to_owned(),
            _ => {
                warn!(user = session.user(), "summarizer returned no text, keeping full history");
                return Ok(false);
            }
        };

        let replaced = session.messages.len();
        let marked = format!("{SUMMARY_OPEN}\n{summary}\n{SUMMARY_CLOSE}");
        session
            .replace_history(store, vec![ChatMessage::assistant(marked)])
            .await?;
        info!(user = session.user(), replaced, "conversation history compacted");
        Ok(true)
    }
}

/// Flatten a history into readable transcript lines. Tool results are
/// included since they often carry the facts worth keeping.
fn render_transcript(messages: &[ChatMessage]) -> String {
    let mut out = String::new();
    for message in messages {
        match message.role {
            Role::System => continue,
            Role::Tool => {
                out.push_str(&format!("[tool result] {}\n", message.text_content()));
            }
            role => {
                let text = message.text_content();
                if text.is_empty() {
                    continue;
                }
                out.push_str(&format!("{role}: {text}\n"));
            }
        }
    }
    out
}
