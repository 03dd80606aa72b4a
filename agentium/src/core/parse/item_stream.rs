//! Item-stream decoder.
//!
//! Records are flat objects keyed by a dotted `type`. Completed items carry
//! whole messages, reasoning, shell commands and file edits; delta records
//! carry incremental message text; `turn.completed` records carry per-turn
//! usage that is summed.

use serde_json::Value;
use tracing::debug;

use super::{ParsedStream, cap_thinking, decode_record, str_field};
use crate::core::event::{AgentEvent, EventKind};

/// Delta text waiting for its completed message, keyed by item id.
#[derive(Debug, Default)]
struct PendingDeltas {
    entries: Vec<(String, String)>,
}

impl PendingDeltas {
    fn append(&mut self, item_id: &str, text: &str) {
        match self.entries.iter_mut().find(|(id, _)| id == item_id) {
            Some((_, buf)) => buf.push_str(text),
            None => self.entries.push((item_id.to_string(), text.to_string())),
        }
    }

    fn discard(&mut self, item_id: &str) {
        self.entries.retain(|(id, _)| id != item_id);
    }

    /// Emit buffered text as messages, in the order the items first appeared.
    fn flush(&mut self, adapter: &str, parsed: &mut ParsedStream) {
        for (_, text) in std::mem::take(&mut self.entries) {
            push_message(adapter, &text, parsed);
        }
    }
}

pub fn parse(adapter: &str, stdout: &str) -> ParsedStream {
    let mut parsed = ParsedStream::default();
    let mut pending = PendingDeltas::default();

    for line in stdout.lines() {
        let Some(record) = decode_record(line) else {
            continue;
        };
        parsed.records += 1;

        let kind = str_field(&record, "type");
        if !matches!(kind, Some("item.delta" | "item.agent_message.delta")) {
            // A completed message replaces its own deltas; any other pending
            // text happened before this record.
            if let Some(id) = completed_message_id(&record) {
                pending.discard(id);
            }
            pending.flush(adapter, &mut parsed);
        }

        match kind {
            Some("thread.started") => {
                if parsed.agent_session.is_none()
                    && let Some(thread) = str_field(&record, "thread_id")
                {
                    parsed.agent_session = Some(thread.to_string());
                }
            }
            Some("item.completed") => {
                if let Some(item) = record.get("item") {
                    decode_item(adapter, item, &mut parsed);
                }
            }
            Some("item.delta" | "item.agent_message.delta") => {
                let item_id = str_field(&record, "item_id")
                    .or_else(|| record.get("item").and_then(|item| str_field(item, "id")))
                    .unwrap_or_default();
                if let Some(text) = delta_text(&record) {
                    pending.append(item_id, text);
                }
            }
            Some("turn.completed") => {
                if let Some(usage) = record.get("usage") {
                    parsed.tokens.accumulate(
                        usage.get("input_tokens").and_then(Value::as_u64).unwrap_or(0),
                        usage.get("output_tokens").and_then(Value::as_u64).unwrap_or(0),
                    );
                }
            }
            Some("turn.failed" | "error") => {
                let message = error_message(&record);
                parsed.push_aggregate(&message);
                parsed.events.push(AgentEvent::error(adapter, message.clone()));
                parsed.error = Some(message);
            }
            _ => {}
        }
    }

    pending.flush(adapter, &mut parsed);

    if parsed.records == 0 || parsed.raw_text.trim().is_empty() {
        debug!(records = parsed.records, "item stream yielded no text, using raw stdout");
        let mut fallback = ParsedStream::plain(adapter, stdout);
        fallback.records = parsed.records;
        fallback.tokens = parsed.tokens;
        fallback.error = parsed.error;
        fallback.agent_session = parsed.agent_session;
        if !parsed.events.is_empty() {
            parsed.events.append(&mut fallback.events);
            fallback.events = parsed.events;
        }
        return fallback;
    }
    parsed
}

fn completed_message_id(record: &Value) -> Option<&str> {
    if str_field(record, "type") != Some("item.completed") {
        return None;
    }
    let item = record.get("item")?;
    if str_field(item, "type") != Some("agent_message") {
        return None;
    }
    str_field(item, "id")
}

fn decode_item(adapter: &str, item: &Value, parsed: &mut ParsedStream) {
    match str_field(item, "type") {
        Some("agent_message") => {
            if let Some(text) = str_field(item, "text") {
                push_message(adapter, text, parsed);
            }
        }
        Some("reasoning") => {
            let thinking = cap_thinking(str_field(item, "text").unwrap_or_default());
            parsed.push_aggregate(&thinking);
            parsed.events.push(AgentEvent::thinking(adapter, thinking));
        }
        Some("command_execution") => {
            let command = str_field(item, "command").unwrap_or_default().to_string();
            let output = str_field(item, "aggregated_output").unwrap_or_default();
            let exit_code = item
                .get("exit_code")
                .and_then(Value::as_i64)
                .and_then(|code| i32::try_from(code).ok());
            parsed.push_aggregate(output);
            parsed
                .events
                .push(AgentEvent::new(adapter, EventKind::Command { command, exit_code }, output));
        }
        Some("file_change") => {
            let Some(Value::Array(changes)) = item.get("changes") else {
                return;
            };
            for change in changes {
                let path = str_field(change, "path").unwrap_or_default().to_string();
                let action = str_field(change, "kind").unwrap_or("update").to_string();
                parsed
                    .events
                    .push(AgentEvent::new(adapter, EventKind::FileChange { path, action }, ""));
            }
        }
        _ => {}
    }
}

fn push_message(adapter: &str, text: &str, parsed: &mut ParsedStream) {
    if text.is_empty() {
        return;
    }
    parsed.push_aggregate(text);
    parsed.push_assistant(text);
    parsed.events.push(AgentEvent::text(adapter, text));
}

fn delta_text(record: &Value) -> Option<&str> {
    str_field(record, "delta")
        .or_else(|| str_field(record, "text"))
        .or_else(|| record.get("delta").and_then(|delta| str_field(delta, "text")))
}

fn error_message(record: &Value) -> String {
    str_field(record, "message")
        .or_else(|| record.get("error").and_then(|error| str_field(error, "message")))
        .or_else(|| str_field(record, "error"))
        .unwrap_or("agent turn failed")
        .to_string()
}
