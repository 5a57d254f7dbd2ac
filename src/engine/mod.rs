//! The turn orchestration engine.
//!
//! One call to [`ChatEngine::process_message`] is one turn: compact the
//! history if due, fetch retrieval context, then run the bounded
//! model/tool loop until the model answers without tool calls or the
//! iteration cap is reached.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::compaction::ContextCompactor;
use crate::config::EngineConfig;
use crate::error::{ConfabError, Result};
use crate::mcp::ToolCatalog;
use crate::provider::{ChatRequest, ModelClient};
use crate::retrieval::{RetrievalAugmenter, RetrievedContext};
use crate::session::{reset_user, ConversationSession, SessionStore, UserSettings};
use crate::types::{coerce_arguments, ChatMessage, ToolCallRequest, Usage, UsageKind};

/// Returned when the model never stopped calling tools within the cap.
const ITERATION_CAP_FALLBACK: &str =
    "Sorry, I couldn't finish working through that request. Please try asking again, \
     perhaps in a simpler form.";

/// Returned when the final model response carried no text.
const EMPTY_ANSWER_FALLBACK: &str = "Sorry, I don't have an answer for that.";

/// Returned without calling the model when the input exceeds the size limit.
const INPUT_TOO_LONG: &str =
    "Sorry, that message is too long for me to process. Please shorten it and try again.";

/// Token and cost totals for a single turn, rendered into the footer.
#[derive(Debug, Default, Clone, Copy)]
struct TurnUsage {
    input_tokens: u64,
    output_tokens: u64,
    cost: f64,
}

impl TurnUsage {
    fn add(&mut self, usage: &Usage) {
        self.input_tokens += usage.input_tokens;
        self.output_tokens += usage.output_tokens;
        self.cost += usage.cost;
    }
}

/// Outcome of the bounded model/tool loop.
struct LoopOutcome {
    /// Final answer text; `None` when the iteration cap was exhausted.
    content: Option<String>,
    /// Assistant tool-call and tool-result bookkeeping, in emission order.
    scratch: Vec<ChatMessage>,
    usage: TurnUsage,
}

pub struct ChatEngine {
    config: EngineConfig,
    model: Arc<dyn ModelClient>,
    catalog: ToolCatalog,
    store: Arc<dyn SessionStore>,
    augmenter: RetrievalAugmenter,
    compactor: ContextCompactor,
}

impl ChatEngine {
    pub fn new(
        config: EngineConfig,
        model: Arc<dyn ModelClient>,
        catalog: ToolCatalog,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        let tool_timeout = Duration::from_secs(config.limits.tool_call_timeout_secs);
        let augmenter = RetrievalAugmenter::new(config.retrieval.clone(), tool_timeout);
        let compactor = ContextCompactor::new(
            Arc::clone(&model),
            config.summarization.threshold,
            config.max_tokens,
        );
        Self {
            config,
            model,
            catalog,
            store,
            augmenter,
            compactor,
        }
    }

    /// Run one conversation turn and return the text to show the user.
    ///
    /// Tool and retrieval failures degrade silently; only a model API
    /// failure fails the turn, and then nothing from the turn is persisted.
    pub async fn process_message(&self, user: &str, text: &str) -> Result<String> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(EMPTY_ANSWER_FALLBACK.to_owned());
        }
        if text.chars().count() > self.config.limits.max_message_chars {
            return Ok(INPUT_TOO_LONG.to_owned());
        }

        let mut session =
            ConversationSession::load(self.store.as_ref(), &self.config, user).await?;
        self.compactor
            .maybe_compact(&mut session, self.store.as_ref())
            .await?;

        let context = self
            .augmenter
            .augment(&self.catalog, text, &session.settings)
            .await;

        let wire = self.build_wire(&session, text, context.as_ref());
        let cap = self.config.limits.max_chat_iterations;
        let outcome = self.run_loop(&session, wire, cap).await?;

        let answer = match &outcome.content {
            Some(content) if !content.trim().is_empty() => content.clone(),
            Some(_) => EMPTY_ANSWER_FALLBACK.to_owned(),
            None => {
                info!(user, "iteration cap exhausted, returning fallback");
                ITERATION_CAP_FALLBACK.to_owned()
            }
        };

        // The raw user text is persisted, not the retrieval-enriched copy;
        // tool scratch messages are kept so later turns see their context.
        session.append(self.store.as_ref(), ChatMessage::user(text)).await?;
        for message in outcome.scratch {
            session.append(self.store.as_ref(), message).await?;
        }
        session
            .append(self.store.as_ref(), ChatMessage::assistant(answer.clone()))
            .await?;

        Ok(self.decorate(answer, outcome.usage, context.as_ref()))
    }

    /// Run a standalone prompt with the larger iteration cap, without
    /// reading or writing the user's conversation history. Usage is still
    /// billed to the user's chat counters.
    pub async fn generate_report(&self, user: &str, prompt: &str) -> Result<String> {
        let session =
            ConversationSession::load(self.store.as_ref(), &self.config, user).await?;
        let mut wire = Vec::new();
        if let Some(system) = &self.config.system_prompt {
            wire.push(ChatMessage::system(system));
        }
        wire.push(ChatMessage::user(prompt));

        let cap = self.config.limits.max_report_iterations;
        let outcome = self.run_loop(&session, wire, cap).await?;
        match outcome.content {
            Some(content) if !content.trim().is_empty() => Ok(content),
            _ => Ok(ITERATION_CAP_FALLBACK.to_owned()),
        }
    }

    /// Clear the user's history and usage counters. Settings survive.
    pub async fn reset(&self, user: &str) -> Result<()> {
        info!(user, "resetting session");
        reset_user(self.store.as_ref(), user).await
    }

    /// Render the user's accumulated usage totals.
    pub async fn usage_report(&self, user: &str) -> Result<String> {
        let usage = self.store.load_usage(user).await?;
        Ok(format!(
            "chat: {} requests, {} in / {} out tokens\n\
             summarization: {} requests, {} in / {} out tokens\n\
             total cost: ${:.4}",
            usage.chat.request_count,
            usage.chat.input_tokens,
            usage.chat.output_tokens,
            usage.summarization.request_count,
            usage.summarization.input_tokens,
            usage.summarization.output_tokens,
            usage.total_cost(),
        ))
    }

    pub async fn set_model(&self, user: &str, model: &str) -> Result<()> {
        self.update_settings(user, |s| s.model = Some(model.to_owned()))
            .await
    }

    pub async fn set_temperature(&self, user: &str, temperature: f32) -> Result<()> {
        if !(0.0..=2.0).contains(&temperature) {
            return Err(ConfabError::InvalidArgument(format!(
                "temperature must be within 0.0..=2.0, got {temperature}"
            )));
        }
        self.update_settings(user, |s| s.temperature = Some(temperature))
            .await
    }

    pub async fn set_summarization(&self, user: &str, enabled: bool) -> Result<()> {
        self.update_settings(user, |s| s.summarization_enabled = Some(enabled))
            .await
    }

    pub async fn set_retrieval_filter(
        &self,
        user: &str,
        enabled: bool,
        min_similarity: Option<f64>,
    ) -> Result<()> {
        self.update_settings(user, |s| {
            s.retrieval_filter_enabled = Some(enabled);
            if let Some(threshold) = min_similarity {
                s.retrieval_min_similarity = Some(threshold);
            }
        })
        .await
    }

    /// Shut down every tool provider. Call once at process exit.
    pub async fn shutdown(&mut self) {
        self.catalog.shutdown().await;
    }

    async fn update_settings(
        &self,
        user: &str,
        apply: impl FnOnce(&mut UserSettings),
    ) -> Result<()> {
        let mut settings = self.store.load_settings(user).await?;
        apply(&mut settings);
        self.store.save_settings(user, &settings).await
    }

    fn build_wire(
        &self,
        session: &ConversationSession,
        text: &str,
        context: Option<&RetrievedContext>,
    ) -> Vec<ChatMessage> {
        let mut wire = Vec::with_capacity(session.messages.len() + 2);
        if let Some(system) = &self.config.system_prompt {
            wire.push(ChatMessage::system(system));
        }
        wire.extend(session.messages.iter().cloned());
        let content = match context {
            Some(context) => format!("{}\n\nThe user's message:\n{text}", context.block),
            None => text.to_owned(),
        };
        wire.push(ChatMessage::user(content));
        wire
    }

    /// The bounded model/tool round-trip loop. Model failures propagate;
    /// everything tool-shaped is fed back into the conversation instead.
    async fn run_loop(
        &self,
        session: &ConversationSession,
        mut wire: Vec<ChatMessage>,
        cap: usize,
    ) -> Result<LoopOutcome> {
        let tools = self.catalog.as_model_schema();
        let tool_timeout = Duration::from_secs(self.config.limits.tool_call_timeout_secs);
        let mut scratch = Vec::new();
        let mut usage = TurnUsage::default();

        for iteration in 0..cap {
            let request = ChatRequest {
                model: session.settings.model.clone(),
                messages: wire.clone(),
                temperature: session.settings.temperature,
                max_tokens: self.config.max_tokens,
                tools: tools.clone(),
            };
            let response = self.model.chat(&request).await?;
            session
                .record_usage(self.store.as_ref(), UsageKind::Chat, &response.usage)
                .await?;
            usage.add(&response.usage);

            let executable = self.executable_calls(&response.tool_calls);
            if executable.is_empty() {
                debug!(iteration, "final answer");
                return Ok(LoopOutcome {
                    content: Some(response.content.unwrap_or_default()),
                    scratch,
                    usage,
                });
            }

            // Only the final iteration's text reaches the user; interim
            // content rides along on the tool-call message.
            let assistant =
                ChatMessage::assistant_tool_calls(response.content.clone(), executable.clone());
            wire.push(assistant.clone());
            scratch.push(assistant);

            for call in executable {
                debug!(iteration, tool = %call.name, "invoking tool");
                let result = self
                    .catalog
                    .route(&call.name, call.arguments, tool_timeout)
                    .await;
                let content = if result.success {
                    result.payload.unwrap_or_default()
                } else {
                    let reason = result.error.unwrap_or_else(|| "unknown error".to_owned());
                    warn!(tool = %call.name, %reason, "tool call failed");
                    format!("Error executing tool '{}': {reason}", call.name)
                };
                let message = ChatMessage::tool_result(call.id, content);
                wire.push(message.clone());
                scratch.push(message);
            }
        }

        Ok(LoopOutcome {
            content: None,
            scratch,
            usage,
        })
    }

    /// Keep only calls that name a registered tool and carry well-formed
    /// arguments. A bad call is dropped without affecting its siblings.
    fn executable_calls(&self, calls: &[ToolCallRequest]) -> Vec<ToolCallRequest> {
        calls
            .iter()
            .filter_map(|call| {
                if !self.catalog.has_tool(&call.name) {
                    warn!(tool = %call.name, "dropping call to unknown tool");
                    return None;
                }
                match coerce_arguments(&call.arguments) {
                    Ok(arguments) => Some(ToolCallRequest {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        arguments,
                    }),
                    Err(e) => {
                        warn!(tool = %call.name, error = %e, "dropping call with malformed arguments");
                        None
                    }
                }
            })
            .collect()
    }

    fn decorate(
        &self,
        answer: String,
        usage: TurnUsage,
        context: Option<&RetrievedContext>,
    ) -> String {
        let mut out = answer;
        if let Some(context) = context {
            if !context.sources.is_empty() {
                out.push_str("\n\nSources: ");
                out.push_str(&context.sources.join(", "));
            }
        }
        out.push_str(&format!(
            "\n\n({} in / {} out tokens · ${:.4})",
            usage.input_tokens, usage.output_tokens, usage.cost
        ));
        out
    }
}
