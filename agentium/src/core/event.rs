//! Normalized agent activity events.
//!
//! Every adapter decodes its own wire format into [`AgentEvent`] so that one
//! session can mix events from different backends in a single audit stream.
//! The kind-specific fields live inside [`EventKind`], which means an event can
//! never carry fields belonging to another kind.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Maximum length of an event summary line, in bytes.
pub const SUMMARY_MAX_BYTES: usize = 120;

/// One unit of observable agent activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub iteration: u32,
    pub adapter: String,
    #[serde(flatten)]
    pub kind: EventKind,
    pub summary: String,
    #[serde(default)]
    pub content: String,
}

/// Closed set of event kinds with their kind-specific payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    Text,
    Thinking,
    ToolUse {
        tool_name: String,
        #[serde(default)]
        tool_input: Value,
    },
    ToolResult {
        #[serde(default)]
        tool_use_id: String,
        #[serde(default)]
        is_error: bool,
    },
    Command {
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
    },
    FileChange {
        path: String,
        action: String,
    },
    Error,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Text => "text",
            EventKind::Thinking => "thinking",
            EventKind::ToolUse { .. } => "tool_use",
            EventKind::ToolResult { .. } => "tool_result",
            EventKind::Command { .. } => "command",
            EventKind::FileChange { .. } => "file_change",
            EventKind::Error => "error",
        }
    }
}

impl AgentEvent {
    /// Create an event stamped with the current time and no session identity.
    ///
    /// Parsers run without session context; the controller calls
    /// [`AgentEvent::stamp`] before the event reaches the sink.
    pub fn new(adapter: &str, kind: EventKind, content: impl Into<String>) -> Self {
        let content = content.into();
        let summary = summarize(&kind, &content);
        Self {
            timestamp: Utc::now(),
            session_id: String::new(),
            iteration: 0,
            adapter: adapter.to_string(),
            kind,
            summary,
            content,
        }
    }

    pub fn text(adapter: &str, content: impl Into<String>) -> Self {
        Self::new(adapter, EventKind::Text, content)
    }

    pub fn thinking(adapter: &str, content: impl Into<String>) -> Self {
        Self::new(adapter, EventKind::Thinking, content)
    }

    pub fn error(adapter: &str, content: impl Into<String>) -> Self {
        Self::new(adapter, EventKind::Error, content)
    }

    /// Attach session identity to an event produced by a parser.
    pub fn stamp(&mut self, session_id: &str, iteration: u32) {
        self.session_id = session_id.to_string();
        self.iteration = iteration;
    }
}

fn summarize(kind: &EventKind, content: &str) -> String {
    let headline = match kind {
        EventKind::ToolUse { tool_name, .. } => format!("{tool_name}: {}", first_line(content)),
        EventKind::Command { command, exit_code } => match exit_code {
            Some(code) => format!("$ {command} (exit {code})"),
            None => format!("$ {command}"),
        },
        EventKind::FileChange { path, action } => format!("{action} {path}"),
        _ => first_line(content).to_string(),
    };
    truncate_bytes(&headline, SUMMARY_MAX_BYTES).to_string()
}

fn first_line(content: &str) -> &str {
    content
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("")
}

/// Truncate `s` to at most `max` bytes without splitting a UTF-8 character.
pub fn truncate_bytes(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
