//! Retrieval augmentation over the tool catalog.
//!
//! The augmenter calls the configured retrieval tool before the model sees
//! the user's message. Retrieval is strictly best-effort: any failure
//! (missing tool, invocation error, unparseable payload, nothing relevant)
//! degrades to answering without context.

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::config::RetrievalConfig;
use crate::mcp::ToolCatalog;
use crate::session::EffectiveSettings;

/// Context assembled from retrieval hits, ready to prepend to the prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedContext {
    /// Text block for a system message.
    pub block: String,
    /// Deduplicated source identifiers, best hit first.
    pub sources: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RetrievalPayload {
    #[serde(default)]
    results: Vec<RetrievalHit>,
}

/// One hit as the retrieval tool reports it. Scores come under different
/// names depending on whether the backend reranks; the fallback order is
/// rerank_score, then similarity, then score, then zero.
#[derive(Debug, Deserialize)]
struct RetrievalHit {
    #[serde(default)]
    rerank_score: Option<f64>,
    #[serde(default)]
    similarity: Option<f64>,
    #[serde(default)]
    score: Option<f64>,
    #[serde(default)]
    source_path: Option<String>,
    #[serde(default)]
    chunk_idx: Option<u64>,
    #[serde(default)]
    text: String,
}

impl RetrievalHit {
    fn effective_score(&self) -> f64 {
        self.rerank_score
            .or(self.similarity)
            .or(self.score)
            .unwrap_or(0.0)
    }

    fn source(&self) -> String {
        match (&self.source_path, self.chunk_idx) {
            (Some(path), Some(idx)) => format!("{path}#{idx}"),
            (Some(path), None) => path.clone(),
            (None, _) => "unknown".to_owned(),
        }
    }
}

pub struct RetrievalAugmenter {
    config: RetrievalConfig,
    tool_timeout: Duration,
}

impl RetrievalAugmenter {
    pub fn new(config: RetrievalConfig, tool_timeout: Duration) -> Self {
        Self {
            config,
            tool_timeout,
        }
    }

    /// Fetch context for one user message. `None` means "answer without
    /// context", never an error.
    pub async fn augment(
        &self,
        catalog: &ToolCatalog,
        query: &str,
        settings: &EffectiveSettings,
    ) -> Option<RetrievedContext> {
        if !catalog.has_tool(&self.config.tool_name) {
            debug!(tool = %self.config.tool_name, "retrieval tool not available");
            return None;
        }

        let arguments = json!({"query": query, "top_k": self.config.top_k});
        let result = catalog
            .route(&self.config.tool_name, arguments, self.tool_timeout)
            .await;
        if !result.success {
            warn!(
                tool = %self.config.tool_name,
                error = result.error.as_deref().unwrap_or("unknown"),
                "retrieval failed, continuing without context"
            );
            return None;
        }

        let payload = result.payload?;
        let parsed: RetrievalPayload = match serde_json::from_str(&payload) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, "unparseable retrieval payload, continuing without context");
                return None;
            }
        };

        self.assemble(parsed.results, settings)
    }

    fn assemble(
        &self,
        mut hits: Vec<RetrievalHit>,
        settings: &EffectiveSettings,
    ) -> Option<RetrievedContext> {
        hits.sort_by(|a, b| {
            b.effective_score()
                .partial_cmp(&a.effective_score())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        if settings.retrieval_filter_enabled {
            hits.retain(|hit| hit.effective_score() >= settings.retrieval_min_similarity);
        }
        hits.retain(|hit| !hit.text.trim().is_empty());
        if hits.is_empty() {
            return None;
        }

        let mut sources = Vec::new();
        for hit in &hits {
            let source = hit.source();
            if !sources.contains(&source) {
                sources.push(source);
            }
        }

        let mut block = String::from(
            "Reference material retrieved for the user's message. \
             Use it only if it is relevant; otherwise ignore it.\n",
        );
        for (i, hit) in hits.iter().enumerate() {
            block.push_str(&format!(
                "\n[{n}] (source: {source})\n{text}\n",
                n = i + 1,
                source = hit.source(),
                text = hit.text.trim(),
            ));
        }

        Some(RetrievedContext { block, sources })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::config::EngineConfig;
    use crate::mcp::catalog::test_support::FakeBackend;
    use crate::session::{EffectiveSettings, UserSettings};

    fn settings(filter: bool, threshold: f64) -> EffectiveSettings {
        let mut config = EngineConfig::default();
        config.retrieval.filter_enabled = filter;
        config.retrieval.min_similarity = threshold;
        EffectiveSettings::resolve(&config, &UserSettings::default())
    }

    fn augmenter() -> RetrievalAugmenter {
        RetrievalAugmenter::new(RetrievalConfig::default(), Duration::from_secs(30))
    }

    async fn catalog_with_payload(payload: &str) -> ToolCatalog {
        let mut catalog = ToolCatalog::new();
        catalog
            .register(Box::new(
                FakeBackend::new("rag", &["search_articles"]).with_response("search_articles", payload),
            ))
            .await;
        catalog
    }

    #[tokio::test]
    async fn hits_are_sorted_by_best_available_score() {
        let payload = serde_json::to_string(&json!({
            "results": [
                {"score": 0.2, "source_path": "a.md", "chunk_idx": 0, "text": "low"},
                {"rerank_score": 0.9, "similarity": 0.1, "source_path": "b.md", "chunk_idx": 1, "text": "reranked"},
                {"similarity": 0.5, "source_path": "c.md", "chunk_idx": 2, "text": "mid"},
            ]
        }))
        .unwrap();
        let catalog = catalog_with_payload(&payload).await;

        let context = augmenter()
            .augment(&catalog, "query", &settings(false, 0.0))
            .await
            .expect("hits should produce context");
        assert_eq!(context.sources, vec!["b.md#1", "c.md#2", "a.md#0"]);
        let reranked = context.block.find("reranked").unwrap();
        let mid = context.block.find("mid").unwrap();
        assert!(reranked < mid);
    }

    #[tokio::test]
    async fn filter_applies_only_when_enabled() {
        let payload = serde_json::to_string(&json!({
            "results": [
                {"similarity": 0.9, "source_path": "a.md", "chunk_idx": 0, "text": "strong"},
                {"similarity": 0.5, "source_path": "b.md", "chunk_idx": 0, "text": "middling"},
                {"similarity": 0.1, "source_path": "c.md", "chunk_idx": 0, "text": "weak"},
            ]
        }))
        .unwrap();

        let catalog = catalog_with_payload(&payload).await;
        let unfiltered = augmenter()
            .augment(&catalog, "q", &settings(false, 0.3))
            .await
            .unwrap();
        assert_eq!(unfiltered.sources, vec!["a.md#0", "b.md#0", "c.md#0"]);

        let catalog = catalog_with_payload(&payload).await;
        let filtered = augmenter()
            .augment(&catalog, "q", &settings(true, 0.3))
            .await
            .unwrap();
        assert_eq!(filtered.sources, vec!["a.md#0", "b.md#0"]);
    }

    #[tokio::test]
    async fn all_hits_filtered_degrades_to_none() {
        let payload = serde_json::to_string(&json!({
            "results": [{"similarity": 0.1, "source_path": "a.md", "chunk_idx": 0, "text": "weak"}]
        }))
        .unwrap();
        let catalog = catalog_with_payload(&payload).await;

        let context = augmenter()
            .augment(&catalog, "q", &settings(true, 0.5))
            .await;
        assert!(context.is_none());
    }

    #[tokio::test]
    async fn duplicate_sources_are_reported_once() {
        let payload = serde_json::to_string(&json!({
            "results": [
                {"similarity": 0.9, "source_path": "a.md", "chunk_idx": 3, "text": "one"},
                {"similarity": 0.8, "source_path": "a.md", "chunk_idx": 3, "text": "two"},
            ]
        }))
        .unwrap();
        let catalog = catalog_with_payload(&payload).await;

        let context = augmenter()
            .augment(&catalog, "q", &settings(false, 0.0))
            .await
            .unwrap();
        assert_eq!(context.sources, vec!["a.md#3"]);
    }

    #[tokio::test]
    async fn missing_tool_and_bad_payload_degrade_to_none() {
        let empty = ToolCatalog::new();
        assert!(augmenter()
            .augment(&empty, "q", &settings(false, 0.0))
            .await
            .is_none());

        let catalog = catalog_with_payload("this is not json").await;
        assert!(augmenter()
            .augment(&catalog, "q", &settings(false, 0.0))
            .await
            .is_none());
    }
}
