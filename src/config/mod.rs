//! Layered configuration (TOML file overridden by environment).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ConfabError, Result};

/// One out-of-process tool provider to spawn at startup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderSpec {
    /// Stable identifier used in logs and registration order.
    pub id: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Retrieval augmentation defaults. Per-user filter settings on the session
/// override `filter_enabled` / `min_similarity`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievalConfig {
    #[serde(default = "default_retrieval_tool")]
    pub tool_name: String,
    #[serde(default = "default_top_k")]
    pub top_k: u32,
    #[serde(default)]
    pub filter_enabled: bool,
    #[serde(default)]
    pub min_similarity: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            tool_name: default_retrieval_tool(),
            top_k: default_top_k(),
            filter_enabled: false,
            min_similarity: 0.0,
        }
    }
}

/// Summarization (history compaction) defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SummarizationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// User+assistant message count that triggers compaction.
    #[serde(default = "default_compaction_threshold")]
    pub threshold: usize,
}

impl Default for SummarizationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: default_compaction_threshold(),
        }
    }
}

/// Timeouts and loop bounds, in the units named by each field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LimitsConfig {
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,
    #[serde(default = "default_discovery_timeout")]
    pub discovery_timeout_secs: u64,
    #[serde(default = "default_tool_call_timeout")]
    pub tool_call_timeout_secs: u64,
    #[serde(default = "default_teardown_timeout")]
    pub teardown_timeout_secs: u64,
    #[serde(default = "default_model_timeout")]
    pub model_timeout_secs: u64,
    #[serde(default = "default_chat_iterations")]
    pub max_chat_iterations: usize,
    #[serde(default = "default_report_iterations")]
    pub max_report_iterations: usize,
    #[serde(default = "default_max_message_chars")]
    pub max_message_chars: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_secs: default_handshake_timeout(),
            discovery_timeout_secs: default_discovery_timeout(),
            tool_call_timeout_secs: default_tool_call_timeout(),
            teardown_timeout_secs: default_teardown_timeout(),
            model_timeout_secs: default_model_timeout(),
            max_chat_iterations: default_chat_iterations(),
            max_report_iterations: default_report_iterations(),
            max_message_chars: default_max_message_chars(),
        }
    }
}

/// Full engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Usually supplied via `CONFAB_API_KEY` rather than the file.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub providers: Vec<ProviderSpec>,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub summarization: SummarizationConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            base_url: default_base_url(),
            api_key: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            system_prompt: None,
            providers: Vec::new(),
            retrieval: RetrievalConfig::default(),
            summarization: SummarizationConfig::default(),
            limits: LimitsConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parse a TOML config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&raw)
            .map_err(|e| ConfabError::Configuration(format!("invalid config file: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides (`.env` is loaded if present).
    pub fn apply_env(mut self) -> Self {
        let _ = dotenvy::dotenv();
        if let Ok(key) = std::env::var("CONFAB_API_KEY") {
            self.api_key = Some(key);
        }
        if let Ok(url) = std::env::var("CONFAB_BASE_URL") {
            self.base_url = url;
        }
        if let Ok(model) = std::env::var("CONFAB_MODEL") {
            self.model = model;
        }
        self
    }

    /// Default config file location (`~/.config/confab/config.toml` on Linux).
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "confab")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfabError::Configuration(format!(
                "temperature must be within 0.0..=2.0, got {}",
                self.temperature
            )));
        }
        if self.limits.max_chat_iterations == 0 || self.limits.max_report_iterations == 0 {
            return Err(ConfabError::Configuration(
                "iteration caps must be at least 1".into(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for provider in &self.providers {
            let id = provider.id.trim();
            if id.is_empty() {
                return Err(ConfabError::Configuration(
                    "provider id must not be empty".into(),
                ));
            }
            if !seen.insert(id.to_owned()) {
                return Err(ConfabError::Configuration(format!(
                    "duplicate provider id '{id}'"
                )));
            }
        }
        Ok(())
    }
}

fn default_model() -> String {
    "gpt-4o-mini".into()
}

fn default_base_url() -> String {
    "http://localhost:11434/v1".into()
}

fn default_retrieval_tool() -> String {
    "search_articles".into()
}

fn default_top_k() -> u32 {
    5
}

fn default_true() -> bool {
    true
}

fn default_compaction_threshold() -> usize {
    10
}

fn default_temperature() -> f32 {
    0.3
}

fn default_max_tokens() -> u32 {
    2000
}

fn default_handshake_timeout() -> u64 {
    15
}

fn default_discovery_timeout() -> u64 {
    5
}

fn default_tool_call_timeout() -> u64 {
    30
}

fn default_teardown_timeout() -> u64 {
    2
}

fn default_model_timeout() -> u64 {
    60
}

fn default_chat_iterations() -> usize {
    3
}

fn default_report_iterations() -> usize {
    10
}

fn default_max_message_chars() -> usize {
    4000
}
