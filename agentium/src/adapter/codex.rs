//! Adapter for `codex exec` (item-stream output).

use std::collections::BTreeMap;

use anyhow::Result;

use super::{Adapter, base_env, prompt_with_system};
use crate::core::parse::OutputFormat;
use crate::core::session::{ProviderCredential, Session};

pub const NAME: &str = "codex";
pub const DEFAULT_IMAGE: &str = "ghcr.io/agentium/codex:latest";

const PROGRAM: &str = "codex";

#[derive(Debug, Clone)]
pub struct CodexAdapter {
    image: String,
}

impl CodexAdapter {
    pub fn new(image: String) -> Self {
        Self { image }
    }

    fn run_flags(&self, session: &Session, args: &mut Vec<String>) {
        if !session.interactive {
            args.push("--json".to_string());
            if session.is_planning() {
                args.extend(["--sandbox", "read-only"].map(String::from));
            } else {
                args.push("--dangerously-bypass-approvals-and-sandbox".to_string());
            }
        }
        if let Some(model) = session.context.model_override.as_deref() {
            args.extend(["--model".to_string(), model.to_string()]);
        }
        if let Some(level) = session
            .context
            .reasoning_override
            .as_deref()
            .filter(|level| !level.trim().is_empty())
        {
            args.extend([
                "-c".to_string(),
                format!("model_reasoning_effort=\"{}\"", level.trim()),
            ]);
        }
    }

    /// Non-interactive runs read the prompt from stdin (`-`); interactive runs take it inline.
    fn finish(&self, session: &Session, iteration: u32, mut args: Vec<String>) -> Result<Vec<String>> {
        if session.interactive {
            args.push(self.full_prompt(session, iteration)?);
        } else {
            args.push("-".to_string());
        }
        Ok(args)
    }

    fn full_prompt(&self, session: &Session, iteration: u32) -> Result<String> {
        Ok(prompt_with_system(session, self.build_prompt(session, iteration)?))
    }
}

impl Adapter for CodexAdapter {
    fn name(&self) -> &str {
        NAME
    }

    fn provider(&self) -> &str {
        "openai"
    }

    fn image(&self) -> &str {
        &self.image
    }

    fn output_format(&self) -> OutputFormat {
        OutputFormat::ItemStream
    }

    fn build_env(&self, session: &Session, iteration: u32) -> BTreeMap<String, String> {
        let mut env = base_env(self, session, iteration);
        match session.credentials.get(self.provider()) {
            Some(ProviderCredential::ApiKey { key }) => {
                env.insert("OPENAI_API_KEY".to_string(), key.clone());
            }
            Some(ProviderCredential::OAuth { access_token, .. }) => {
                env.insert("CODEX_ACCESS_TOKEN".to_string(), access_token.clone());
            }
            None => {}
        }
        env
    }

    fn build_command(&self, session: &Session, iteration: u32) -> Result<Vec<String>> {
        let mut args = vec![PROGRAM.to_string()];
        if !session.interactive {
            args.push("exec".to_string());
        }
        self.run_flags(session, &mut args);
        self.finish(session, iteration, args)
    }

    fn stdin_prompt(&self, session: &Session, iteration: u32) -> Result<Option<String>> {
        if session.interactive {
            return Ok(None);
        }
        if session.context.resume_session.is_some() {
            return self.build_prompt(session, iteration).map(Some);
        }
        self.full_prompt(session, iteration).map(Some)
    }

    fn supports_plan_mode(&self) -> bool {
        true
    }

    /// The resumed conversation already holds the system prompt, so only the
    /// task prompt is sent.
    fn build_continue_command(
        &self,
        session: &Session,
        iteration: u32,
    ) -> Result<Option<Vec<String>>> {
        let Some(id) = session.context.resume_session.as_deref() else {
            return Ok(None);
        };
        let mut args = vec![PROGRAM.to_string()];
        if !session.interactive {
            args.push("exec".to_string());
        }
        args.extend(["resume".to_string(), id.to_string()]);
        self.run_flags(session, &mut args);
        if session.interactive {
            args.push(self.build_prompt(session, iteration)?);
        } else {
            args.push("-".to_string());
        }
        Ok(Some(args))
    }
}
