//! Core data types shared across the engine.

pub mod message;
pub mod usage;

pub use message::{coerce_arguments, ChatMessage, Role, ToolCallRequest};
pub use usage::{SessionUsage, Usage, UsageKind, UsageTotals};
