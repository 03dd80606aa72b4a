//! Structured outcome of one agent invocation.

use serde::{Deserialize, Serialize};

use crate::core::event::AgentEvent;

/// Token accounting reported by the agent tool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
    pub total: u64,
}

impl TokenUsage {
    pub fn new(input: u64, output: u64) -> Self {
        Self {
            input,
            output,
            total: input + output,
        }
    }

    /// Add another usage record (turn records are per-turn, not running totals).
    pub fn accumulate(&mut self, input: u64, output: u64) {
        self.input += input;
        self.output += output;
        self.total = self.input + self.output;
    }
}

/// Lifecycle signal an agent reports through `AGENTIUM_STATUS:`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSignal {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Output of a single agent invocation after parsing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IterationResult {
    pub exit_code: i32,
    pub success: bool,
    /// Aggregate decoded text (assistant text, thinking, tool output) in stream order.
    pub raw_text: String,
    /// Text the assistant addressed to the user.
    pub assistant_text: String,
    pub tokens: TokenUsage,
    pub events: Vec<AgentEvent>,
    pub status: Option<StatusSignal>,
    pub pushed_changes: bool,
    pub prs_created: Vec<String>,
    pub tasks_closed: Vec<String>,
    pub error: Option<String>,
    pub stop_reason: Option<String>,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_session: Option<String>,
}

impl IterationResult {
    pub fn status_name(&self) -> Option<&str> {
        self.status.as_ref().map(|status| status.name.as_str())
    }

    /// Text best suited for reading a model's answer (assistant text, else the aggregate).
    pub fn answer_text(&self) -> &str {
        if self.assistant_text.trim().is_empty() {
            &self.raw_text
        } else {
            &self.assistant_text
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulate_keeps_total_consistent() {
        let mut usage = TokenUsage::default();
        usage.accumulate(1000, 500);
        usage.accumulate(800, 300);
        assert_eq!(usage, TokenUsage::new(1800, 800));
        assert_eq!(usage.total, 2600);
    }

    #[test]
    fn answer_text_falls_back_to_raw() {
        let result = IterationResult {
            raw_text: "raw".to_string(),
            ..IterationResult::default()
        };
        assert_eq!(result.answer_text(), "raw");
    }
}
