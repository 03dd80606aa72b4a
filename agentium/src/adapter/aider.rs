//! Adapter for `aider` (plain-text output, no resume support).

use std::collections::BTreeMap;

use anyhow::Result;

use super::{Adapter, base_env, prompt_with_system};
use crate::core::parse::OutputFormat;
use crate::core::session::Session;

pub const NAME: &str = "aider";
pub const DEFAULT_IMAGE: &str = "ghcr.io/agentium/aider:latest";

const PROGRAM: &str = "aider";

#[derive(Debug, Clone)]
pub struct AiderAdapter {
    image: String,
}

impl AiderAdapter {
    pub fn new(image: String) -> Self {
        Self { image }
    }
}

impl Adapter for AiderAdapter {
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
        OutputFormat::PlainText
    }

    fn build_env(&self, session: &Session, iteration: u32) -> BTreeMap<String, String> {
        let mut env = base_env(self, session, iteration);
        if let Some(credential) = session.credentials.get(self.provider()) {
            env.insert("OPENAI_API_KEY".to_string(), credential.secret().to_string());
        }
        env
    }

    fn build_command(&self, session: &Session, iteration: u32) -> Result<Vec<String>> {
        let mut args = vec![PROGRAM.to_string()];
        if !session.interactive {
            args.extend(["--no-pretty", "--no-stream"].map(String::from));
            if session.is_planning() {
                args.extend(["--chat-mode", "ask"].map(String::from));
            } else {
                args.push("--yes-always".to_string());
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
            args.extend(["--reasoning-effort".to_string(), level.trim().to_string()]);
        }
        // Positional arguments are files to aider, so the prompt rides on --message.
        if session.interactive {
            let prompt = prompt_with_system(session, self.build_prompt(session, iteration)?);
            args.extend(["--message".to_string(), prompt]);
        } else {
            args.extend(["--message-file", "/dev/stdin"].map(String::from));
        }
        Ok(args)
    }

    fn stdin_prompt(&self, session: &Session, iteration: u32) -> Result<Option<String>> {
        if session.interactive {
            return Ok(None);
        }
        let prompt = self.build_prompt(session, iteration)?;
        Ok(Some(prompt_with_system(session, prompt)))
    }

    fn supports_plan_mode(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::phase::Phase;
    use crate::core::session::ProviderCredential;
    use crate::test_support::sample_session;

    fn adapter() -> AiderAdapter {
        AiderAdapter::new(DEFAULT_IMAGE.to_string())
    }

    #[test]
    fn unattended_run_reads_stdin() {
        let session = sample_session();
        let args = adapter().build_command(&session, 1).expect("command");
        assert!(args.contains(&"--yes-always".to_string()));
        assert_eq!(&args[args.len() - 2..], &["--message-file", "/dev/stdin"].map(String::from));
        assert!(adapter().stdin_prompt(&session, 1).expect("stdin").is_some());
    }

    #[test]
    fn planning_switches_to_ask_mode() {
        let mut session = sample_session();
        session.context.phase = Some(Phase::Plan.worker());
        session.context.reasoning_override = Some("low".to_string());
        let args = adapter().build_command(&session, 1).expect("command");
        assert!(args.windows(2).any(|w| w[0] == "--chat-mode" && w[1] == "ask"));
        assert!(args.windows(2).any(|w| w[0] == "--reasoning-effort" && w[1] == "low"));
        assert!(!args.contains(&"--yes-always".to_string()));
    }

    #[test]
    fn interactive_prompt_is_last_argument_with_project_prompt() {
        let mut session = sample_session();
        session.interactive = true;
        session.project_prompt = Some("Use pnpm.".to_string());
        let args = adapter().build_command(&session, 1).expect("command");
        let prompt = args.last().expect("prompt");
        assert!(prompt.starts_with("Use pnpm."));
        assert!(prompt.contains("Task #12"));
        assert!(!args.contains(&"--yes-always".to_string()));
    }

    #[test]
    fn no_continuation_support() {
        let session = sample_session();
        assert_eq!(adapter().build_continue_command(&session, 2).expect("continue"), None);
    }

    #[test]
    fn oauth_token_is_passed_as_key() {
        let mut session = sample_session();
        session.credentials.insert(
            "openai",
            ProviderCredential::OAuth {
                access_token: "oa-token".to_string(),
                refresh_token: None,
                expires_at: None,
            },
        );
        assert_eq!(adapter().build_env(&session, 1)["OPENAI_API_KEY"], "oa-token");
    }
}
