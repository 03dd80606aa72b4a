//! Decoders for agent process output.
//!
//! Each adapter picks one [`OutputFormat`]. Decoding never fails: lines that do
//! not parse are skipped, and the shared signal pipeline in
//! [`crate::core::signals`] runs on whatever text was recovered.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::event::{AgentEvent, truncate_bytes};
use crate::core::result::{IterationResult, TokenUsage};
use crate::core::signals::apply_signals;

pub mod block_stream;
pub mod item_stream;

/// Upper bound on stored thinking content per block, in bytes.
pub const MAX_THINKING_BYTES: usize = 4096;

/// Wire format of an agent's stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// Line-delimited records with nested content blocks (`assistant`/`user`/`result`).
    BlockStream,
    /// Line-delimited flat records (`item.completed`, `turn.completed`, deltas).
    ItemStream,
    /// Unstructured text.
    PlainText,
}

/// Intermediate decode of one output stream.
#[derive(Debug, Clone, Default)]
pub struct ParsedStream {
    /// Number of JSON records that decoded successfully.
    pub records: usize,
    pub raw_text: String,
    pub assistant_text: String,
    pub events: Vec<AgentEvent>,
    pub tokens: TokenUsage,
    pub stop_reason: Option<String>,
    pub error: Option<String>,
    /// Conversation id the agent tool assigned, for resuming it later.
    pub agent_session: Option<String>,
}

impl ParsedStream {
    /// Plain-text decode: the whole stdout is both aggregate and assistant text.
    pub fn plain(adapter: &str, stdout: &str) -> Self {
        let mut parsed = Self {
            raw_text: stdout.to_string(),
            assistant_text: stdout.to_string(),
            ..Self::default()
        };
        if !stdout.trim().is_empty() {
            parsed.events.push(AgentEvent::text(adapter, stdout));
        }
        parsed
    }

    pub(crate) fn push_aggregate(&mut self, text: &str) {
        append_chunk(&mut self.raw_text, text);
    }

    pub(crate) fn push_assistant(&mut self, text: &str) {
        append_chunk(&mut self.assistant_text, text);
    }

    /// Fold in the shared signal pipeline and produce the final result.
    pub fn into_result(self, exit_code: i32, stderr: &str) -> IterationResult {
        let mut result = IterationResult {
            exit_code,
            raw_text: self.raw_text,
            assistant_text: self.assistant_text,
            tokens: self.tokens,
            events: self.events,
            error: self.error,
            stop_reason: self.stop_reason,
            agent_session: self.agent_session,
            ..IterationResult::default()
        };
        apply_signals(&mut result, stderr);
        result
    }
}

/// Decode `stdout` in `format` and apply the signal pipeline.
pub fn parse_output(
    format: OutputFormat,
    adapter: &str,
    exit_code: i32,
    stdout: &str,
    stderr: &str,
) -> IterationResult {
    let parsed = match format {
        OutputFormat::BlockStream => block_stream::parse(adapter, stdout),
        OutputFormat::ItemStream => item_stream::parse(adapter, stdout),
        OutputFormat::PlainText => ParsedStream::plain(adapter, stdout),
    };
    parsed.into_result(exit_code, stderr)
}

/// Hard-cap thinking content at [`MAX_THINKING_BYTES`].
pub fn cap_thinking(content: &str) -> String {
    truncate_bytes(content, MAX_THINKING_BYTES).to_string()
}

/// Decode one JSON line into an object value, or `None` when it is not one.
pub(crate) fn decode_record(line: &str) -> Option<Value> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let value: Value = serde_json::from_str(line).ok()?;
    value.is_object().then_some(value)
}

pub(crate) fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

fn append_chunk(buf: &mut String, text: &str) {
    if text.is_empty() {
        return;
    }
    if !buf.is_empty() {
        buf.push('\n');
    }
    buf.push_str(text);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thinking_over_budget_is_cut_to_budget() {
        let long = "t".repeat(MAX_THINKING_BYTES + 100);
        assert_eq!(cap_thinking(&long).len(), MAX_THINKING_BYTES);
    }

    #[test]
    fn thinking_at_or_under_budget_is_untouched() {
        let exact = "t".repeat(MAX_THINKING_BYTES);
        assert_eq!(cap_thinking(&exact), exact);
        assert_eq!(cap_thinking("short"), "short");
    }

    #[test]
    fn plain_text_runs_signal_pipeline() {
        let result = parse_output(
            OutputFormat::PlainText,
            "aider",
            0,
            "Opened PR #5\nAGENTIUM_STATUS: PR_CREATED",
            "",
        );
        assert_eq!(result.prs_created, vec!["5"]);
        assert!(result.pushed_changes);
        assert_eq!(result.events.len(), 1);
    }

    #[test]
    fn decode_record_rejects_non_objects() {
        assert!(decode_record("[1,2]").is_none());
        assert!(decode_record("not json").is_none());
        assert!(decode_record("  ").is_none());
        assert!(decode_record(r#"{"type":"x"}"#).is_some());
    }
}
