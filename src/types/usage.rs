//! Token usage and cost accounting types.

use serde::{Deserialize, Serialize};

/// Token usage reported for one model request.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_input_tokens: Option<u64>,
    /// Cost in USD when the gateway reports one.
    #[serde(default)]
    pub cost: f64,
}

/// Which accumulator a usage record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum UsageKind {
    Chat,
    Summarization,
}

/// Monotonic per-user usage accumulator. Counters only decrease on an
/// explicit session reset.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct UsageTotals {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
    pub request_count: u64,
}

impl UsageTotals {
    /// Fold one request's usage into the totals.
    pub fn add(&mut self, usage: &Usage) {
        self.input_tokens += usage.input_tokens;
        self.output_tokens += usage.output_tokens;
        self.cost += usage.cost;
        self.request_count += 1;
    }
}

/// Combined chat + summarization accounting for one user.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SessionUsage {
    pub chat: UsageTotals,
    pub summarization: UsageTotals,
}

impl SessionUsage {
    pub fn totals_mut(&mut self, kind: UsageKind) -> &mut UsageTotals {
        match kind {
            UsageKind::Chat => &mut self.chat,
            UsageKind::Summarization => &mut self.summarization,
        }
    }

    pub fn total_cost(&self) -> f64 {
        self.chat.cost + self.summarization.cost
    }
}
