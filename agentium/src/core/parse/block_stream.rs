//! Block-stream decoder.
//!
//! Each line is a record whose top-level `type` is `assistant`, `user`,
//! `system` or `result`. Message records nest an array of content blocks under
//! `message.content`; every block becomes one [`AgentEvent`]. The closing
//! `result` record carries usage and the stop reason.

use serde_json::Value;
use tracing::debug;

use super::{ParsedStream, cap_thinking, decode_record, str_field};
use crate::core::event::{AgentEvent, EventKind};

pub fn parse(adapter: &str, stdout: &str) -> ParsedStream {
    let mut parsed = ParsedStream::default();
    let mut skipped = 0usize;

    for line in stdout.lines() {
        let Some(record) = decode_record(line) else {
            if !line.trim().is_empty() {
                skipped += 1;
            }
            continue;
        };
        parsed.records += 1;
        if parsed.agent_session.is_none()
            && let Some(id) = str_field(&record, "session_id")
        {
            parsed.agent_session = Some(id.to_string());
        }

        match str_field(&record, "type") {
            Some(top @ ("assistant" | "user")) => {
                let from_assistant = top == "assistant";
                match record.pointer("/message/content") {
                    Some(Value::Array(blocks)) => {
                        for block in blocks {
                            decode_block(adapter, block, from_assistant, &mut parsed);
                        }
                    }
                    Some(Value::String(text)) if from_assistant => {
                        push_text(adapter, text, true, &mut parsed);
                    }
                    _ => {}
                }
            }
            Some("result") => decode_result(&record, &mut parsed),
            _ => {}
        }
    }

    if skipped > 0 {
        debug!(skipped, records = parsed.records, "skipped undecodable stream lines");
    }
    parsed
}

fn decode_block(adapter: &str, block: &Value, from_assistant: bool, parsed: &mut ParsedStream) {
    match str_field(block, "type") {
        Some("text") => {
            if let Some(text) = str_field(block, "text") {
                push_text(adapter, text, from_assistant, parsed);
            }
        }
        Some("thinking") => {
            let thinking = cap_thinking(str_field(block, "thinking").unwrap_or_default());
            parsed.push_aggregate(&thinking);
            parsed.events.push(AgentEvent::thinking(adapter, thinking));
        }
        Some("tool_use") => {
            let tool_name = str_field(block, "name").unwrap_or("unknown").to_string();
            let tool_input = block.get("input").cloned().unwrap_or(Value::Null);
            let content = describe_tool_input(&tool_input);
            parsed.events.push(AgentEvent::new(
                adapter,
                EventKind::ToolUse {
                    tool_name,
                    tool_input,
                },
                content,
            ));
        }
        Some("tool_result") => {
            let content = tool_result_text(block.get("content"));
            parsed.push_aggregate(&content);
            parsed.events.push(AgentEvent::new(
                adapter,
                EventKind::ToolResult {
                    tool_use_id: str_field(block, "tool_use_id").unwrap_or_default().to_string(),
                    is_error: block
                        .get("is_error")
                        .and_then(Value::as_bool)
                        .unwrap_or(false),
                },
                content,
            ));
        }
        _ => {}
    }
}

fn push_text(adapter: &str, text: &str, from_assistant: bool, parsed: &mut ParsedStream) {
    parsed.push_aggregate(text);
    if from_assistant {
        parsed.push_assistant(text);
    }
    parsed.events.push(AgentEvent::text(adapter, text));
}

fn decode_result(record: &Value, parsed: &mut ParsedStream) {
    let nested = record.get("usage");
    let input = usage_field(nested, record, "input_tokens");
    let output = usage_field(nested, record, "output_tokens");
    if input.is_some() || output.is_some() {
        parsed.tokens = crate::core::result::TokenUsage::new(
            input.unwrap_or_default(),
            output.unwrap_or_default(),
        );
    }

    if let Some(reason) = str_field(record, "stop_reason") {
        parsed.stop_reason = Some(reason.to_string());
    }

    let final_text = str_field(record, "result").unwrap_or_default();
    if record.get("is_error").and_then(Value::as_bool) == Some(true) {
        let message = if final_text.is_empty() {
            str_field(record, "subtype").unwrap_or("agent reported an error")
        } else {
            final_text
        };
        parsed.error = Some(message.to_string());
        return;
    }
    if parsed.assistant_text.trim().is_empty() && !final_text.is_empty() {
        parsed.push_aggregate(final_text);
        parsed.push_assistant(final_text);
    }
}

// Nested `usage.*` wins over the top-level field of the same name.
fn usage_field(nested: Option<&Value>, record: &Value, key: &str) -> Option<u64> {
    nested
        .and_then(|usage| usage.get(key))
        .and_then(Value::as_u64)
        .or_else(|| record.get(key).and_then(Value::as_u64))
}

fn tool_result_text(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|part| match part {
                Value::String(text) => Some(text.as_str()),
                other => str_field(other, "text"),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

fn describe_tool_input(input: &Value) -> String {
    for key in ["command", "file_path", "path", "pattern", "url"] {
        if let Some(value) = str_field(input, key) {
            return value.to_string();
        }
    }
    if input.is_null() {
        return String::new();
    }
    input.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::parse::{MAX_THINKING_BYTES, OutputFormat, parse_output};

    const STREAM: &str = r#"{"type":"system","subtype":"init","session_id":"abc"}
{"type":"assistant","message":{"content":[{"type":"thinking","thinking":"plan the fix"},{"type":"text","text":"Looking at the repo."}]}}
{"type":"assistant","message":{"content":[{"type":"tool_use","id":"toolu_1","name":"Bash","input":{"command":"git push origin fix"}}]}}
this line is not json
{"type":"user","message":{"content":[{"type":"tool_result","tool_use_id":"toolu_1","content":[{"type":"text","text":"To github.com:o/r.git"},{"type":"text","text":"   1a2b3c4..5d6e7f8  fix -> fix"}]}]}}
{"type":"assistant","message":{"content":[{"type":"text","text":"Created pull request #12\nAGENTIUM_STATUS: PR_CREATED"}]}}
{"type":"result","subtype":"success","result":"done","stop_reason":"end_turn","usage":{"input_tokens":1200,"output_tokens":340},"input_tokens":1}
"#;

    #[test]
    fn decodes_blocks_into_events_in_stream_order() {
        let parsed = parse("claude-code", STREAM);
        let kinds: Vec<&str> = parsed.events.iter().map(|e| e.kind.as_str()).collect();
        assert_eq!(
            kinds,
            vec!["thinking", "text", "tool_use", "tool_result", "text"]
        );
        assert_eq!(parsed.records, 6);
        assert!(parsed.raw_text.starts_with("plan the fix\nLooking at the repo."));
    }

    #[test]
    fn tool_result_sub_blocks_join_with_newlines() {
        let parsed = parse("claude-code", STREAM);
        let result = &parsed.events[3];
        assert_eq!(
            result.content,
            "To github.com:o/r.git\n   1a2b3c4..5d6e7f8  fix -> fix"
        );
        match &result.kind {
            EventKind::ToolResult { tool_use_id, is_error } => {
                assert_eq!(tool_use_id, "toolu_1");
                assert!(!is_error);
            }
            other => panic!("unexpected kind {other:?}"),
        }
    }

    #[test]
    fn tool_use_keeps_input_and_names_tool() {
        let parsed = parse("claude-code", STREAM);
        match &parsed.events[2].kind {
            EventKind::ToolUse { tool_name, tool_input } => {
                assert_eq!(tool_name, "Bash");
                assert_eq!(tool_input["command"], "git push origin fix");
            }
            other => panic!("unexpected kind {other:?}"),
        }
        assert_eq!(parsed.events[2].summary, "Bash: git push origin fix");
    }

    #[test]
    fn nested_usage_takes_precedence() {
        let parsed = parse("claude-code", STREAM);
        assert_eq!(parsed.tokens.input, 1200);
        assert_eq!(parsed.tokens.output, 340);
        assert_eq!(parsed.stop_reason.as_deref(), Some("end_turn"));
    }

    #[test]
    fn init_record_names_the_conversation() {
        let result = parse_output(OutputFormat::BlockStream, "claude-code", 0, STREAM, "");
        assert_eq!(result.agent_session.as_deref(), Some("abc"));
        assert_eq!(parse("claude-code", "{\"type\":\"result\"}").agent_session, None);
    }

    #[test]
    fn top_level_usage_used_when_nested_missing() {
        let parsed = parse(
            "claude-code",
            r#"{"type":"result","input_tokens":10,"output_tokens":4}"#,
        );
        assert_eq!(parsed.tokens.input, 10);
        assert_eq!(parsed.tokens.output, 4);
        assert_eq!(parsed.tokens.total, 14);
    }

    #[test]
    fn full_parse_extracts_signals() {
        let result = parse_output(OutputFormat::BlockStream, "claude-code", 0, STREAM, "");
        assert_eq!(result.prs_created, vec!["12"]);
        assert!(result.pushed_changes);
        assert_eq!(result.status_name(), Some("PR_CREATED"));
        assert!(result.success);
        assert_eq!(
            result.assistant_text,
            "Looking at the repo.\nCreated pull request #12\nAGENTIUM_STATUS: PR_CREATED"
        );
    }

    #[test]
    fn long_thinking_is_truncated() {
        let thinking = "x".repeat(MAX_THINKING_BYTES * 2);
        let line = serde_json::json!({
            "type": "assistant",
            "message": {"content": [{"type": "thinking", "thinking": thinking}]}
        })
        .to_string();
        let parsed = parse("claude-code", &line);
        assert_eq!(parsed.events[0].content.len(), MAX_THINKING_BYTES);
    }

    #[test]
    fn result_text_fills_missing_assistant_text() {
        let parsed = parse(
            "claude-code",
            r#"{"type":"result","result":"AGENTIUM_EVAL: ADVANCE"}"#,
        );
        assert_eq!(parsed.assistant_text, "AGENTIUM_EVAL: ADVANCE");
    }

    #[test]
    fn error_result_sets_error() {
        let parsed = parse(
            "claude-code",
            r#"{"type":"result","subtype":"error_max_turns","is_error":true}"#,
        );
        assert_eq!(parsed.error.as_deref(), Some("error_max_turns"));
    }

    #[test]
    fn garbage_only_stream_is_empty_not_fatal() {
        let parsed = parse("claude-code", "{{{\nnope\n");
        assert_eq!(parsed.records, 0);
        assert!(parsed.events.is_empty());
    }
}
