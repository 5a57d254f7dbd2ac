//! Confab — tool-augmented conversation engine.
//!
//! Drives multi-turn exchanges between a chat model and out-of-process tool
//! providers: providers are spawned and handshaken over stdio JSON-RPC,
//! their tools aggregated into one catalog the model can call, and each user
//! turn runs a bounded model/tool loop with retrieval augmentation and
//! automatic history compaction.
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use confab::config::EngineConfig;
//! use confab::engine::ChatEngine;
//! use confab::mcp::ToolCatalog;
//! use confab::provider::OpenAiCompatibleClient;
//! use confab::session::MemoryStore;
//!
//! # async fn example() -> confab::error::Result<()> {
//! let config = EngineConfig::default().apply_env();
//! let model = Arc::new(OpenAiCompatibleClient::new(&config.base_url, config.api_key.clone()));
//! let engine = ChatEngine::new(config, model, ToolCatalog::new(), Arc::new(MemoryStore::new()));
//! let answer = engine.process_message("alice", "Hello!").await?;
//! println!("{answer}");
//! # Ok(())
//! # }
//! ```

pub mod compaction;
pub mod config;
pub mod engine;
pub mod error;
pub mod mcp;
pub mod provider;
pub mod retrieval;
pub mod session;
pub mod types;
pub mod util;

pub use engine::ChatEngine;
pub use error::{ConfabError, Result};
