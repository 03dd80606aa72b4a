//! Adapter for the `claude` CLI (block-stream output).

use std::collections::BTreeMap;

use anyhow::Result;

use super::{Adapter, base_env};
use crate::core::parse::OutputFormat;
use crate::core::session::{ProviderCredential, Session};

pub const NAME: &str = "claude-code";
pub const DEFAULT_IMAGE: &str = "ghcr.io/agentium/claude-code:latest";

const PROGRAM: &str = "claude";

#[derive(Debug, Clone)]
pub struct ClaudeCodeAdapter {
    image: String,
}

impl ClaudeCodeAdapter {
    pub fn new(image: String) -> Self {
        Self { image }
    }

    /// Permission, output and model flags shared by fresh and resumed runs.
    fn run_flags(&self, session: &Session, args: &mut Vec<String>) {
        if !session.interactive {
            args.extend(
                ["--print", "--verbose", "--output-format", "stream-json"].map(String::from),
            );
            if session.is_planning() {
                args.extend(["--permission-mode", "plan"].map(String::from));
            } else {
                args.push("--dangerously-skip-permissions".to_string());
            }
        }
        if let Some(model) = session.context.model_override.as_deref() {
            args.extend(["--model".to_string(), model.to_string()]);
        }
    }

    fn finish(&self, session: &Session, iteration: u32, mut args: Vec<String>) -> Result<Vec<String>> {
        if session.interactive {
            args.push(self.build_prompt(session, iteration)?);
        }
        Ok(args)
    }
}

/// Map a reasoning level to a thinking-token budget; numbers pass through.
pub fn thinking_tokens(level: &str) -> Option<String> {
    let level = level.trim();
    if !level.is_empty() && level.chars().all(|c| c.is_ascii_digit()) {
        return Some(level.to_string());
    }
    let budget = match level.to_ascii_lowercase().as_str() {
        "low" => 4_000,
        "medium" => 10_000,
        "high" => 31_999,
        _ => return None,
    };
    Some(budget.to_string())
}

impl Adapter for ClaudeCodeAdapter {
    fn name(&self) -> &str {
        NAME
    }

    fn provider(&self) -> &str {
        "anthropic"
    }

    fn image(&self) -> &str {
        &self.image
    }

    fn output_format(&self) -> OutputFormat {
        OutputFormat::BlockStream
    }

    fn build_env(&self, session: &Session, iteration: u32) -> BTreeMap<String, String> {
        let mut env = base_env(self, session, iteration);
        match session.credentials.get(self.provider()) {
            Some(ProviderCredential::ApiKey { key }) => {
                env.insert("ANTHROPIC_API_KEY".to_string(), key.clone());
            }
            Some(ProviderCredential::OAuth { access_token, .. }) => {
                env.insert("CLAUDE_CODE_OAUTH_TOKEN".to_string(), access_token.clone());
            }
            None => {}
        }
        if let Some(tokens) = session
            .context
            .reasoning_override
            .as_deref()
            .and_then(thinking_tokens)
        {
            env.insert("MAX_THINKING_TOKENS".to_string(), tokens);
        }
        env
    }

    fn build_command(&self, session: &Session, iteration: u32) -> Result<Vec<String>> {
        let mut args = vec![PROGRAM.to_string()];
        self.run_flags(session, &mut args);
        if let Some(system) = session.effective_system_prompt() {
            args.extend(["--system-prompt".to_string(), system.to_string()]);
        }
        if let Some(project) = session.project_prompt() {
            args.extend(["--append-system-prompt".to_string(), project.to_string()]);
        }
        self.finish(session, iteration, args)
    }

    fn stdin_prompt(&self, session: &Session, iteration: u32) -> Result<Option<String>> {
        if session.interactive {
            return Ok(None);
        }
        self.build_prompt(session, iteration).map(Some)
    }

    fn supports_plan_mode(&self) -> bool {
        true
    }

    fn build_continue_command(
        &self,
        session: &Session,
        iteration: u32,
    ) -> Result<Option<Vec<String>>> {
        let Some(id) = session.context.resume_session.as_deref() else {
            return Ok(None);
        };
        let mut args = vec![PROGRAM.to_string(), "--resume".to_string(), id.to_string()];
        self.run_flags(session, &mut args);
        self.finish(session, iteration, args).map(Some)
    }
}
