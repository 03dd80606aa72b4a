//! Backend adapters for coding-agent CLIs.
//!
//! An [`Adapter`] turns session state into one process invocation (argv, env,
//! optional stdin) and turns that process's output back into an
//! [`IterationResult`]. Capabilities not every tool has are default methods
//! that report "absent".

use std::collections::BTreeMap;

use anyhow::{Context, Result, anyhow};

use crate::core::parse::{OutputFormat, parse_output};
use crate::core::result::IterationResult;
use crate::core::session::Session;
use crate::io::prompt::{PromptEngine, TaskPromptInputs};

pub mod aider;
pub mod claude;
pub mod codex;

pub use aider::AiderAdapter;
pub use claude::ClaudeCodeAdapter;
pub use codex::CodexAdapter;

/// Adapter names the registry knows how to build.
pub const BUILTIN_ADAPTERS: [&str; 3] = [claude::NAME, codex::NAME, aider::NAME];

/// Workdir the agent sees inside its container.
pub const CONTAINER_WORKDIR: &str = "/workspace";

pub trait Adapter: Send + Sync {
    fn name(&self) -> &str;

    /// Credential provider key (`anthropic`, `openai`).
    fn provider(&self) -> &str;

    /// Container image reference.
    fn image(&self) -> &str;

    fn output_format(&self) -> OutputFormat;

    fn build_env(&self, session: &Session, iteration: u32) -> BTreeMap<String, String>;

    fn build_command(&self, session: &Session, iteration: u32) -> Result<Vec<String>>;

    fn build_prompt(&self, session: &Session, iteration: u32) -> Result<String> {
        compose_prompt(session, iteration)
    }

    /// Decode output and run the signal pipeline. Never fails.
    fn parse_output(&self, exit_code: i32, stdout: &str, stderr: &str) -> IterationResult {
        parse_output(self.output_format(), self.name(), exit_code, stdout, stderr)
    }

    fn validate(&self) -> Result<()> {
        if self.image().trim().is_empty() {
            return Err(anyhow!("adapter '{}' has no container image", self.name()));
        }
        Ok(())
    }

    /// Prompt text to pipe on stdin, when the tool reads it there.
    fn stdin_prompt(&self, _session: &Session, _iteration: u32) -> Result<Option<String>> {
        Ok(None)
    }

    fn supports_plan_mode(&self) -> bool {
        false
    }

    /// Command that resumes the conversation named by
    /// `session.context.resume_session`, or `None` to start fresh.
    fn build_continue_command(
        &self,
        _session: &Session,
        _iteration: u32,
    ) -> Result<Option<Vec<String>>> {
        Ok(None)
    }
}

/// Adapters keyed by name, owned by whoever builds the controller.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: BTreeMap<String, Box<dyn Adapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in adapters, using `images` to override their default image references.
    pub fn with_defaults(images: &BTreeMap<String, String>) -> Self {
        let image = |name: &str, fallback: &str| {
            images
                .get(name)
                .cloned()
                .unwrap_or_else(|| fallback.to_string())
        };
        let mut registry = Self::new();
        registry.register(Box::new(ClaudeCodeAdapter::new(image(
            claude::NAME,
            claude::DEFAULT_IMAGE,
        ))));
        registry.register(Box::new(CodexAdapter::new(image(
            codex::NAME,
            codex::DEFAULT_IMAGE,
        ))));
        registry.register(Box::new(AiderAdapter::new(image(
            aider::NAME,
            aider::DEFAULT_IMAGE,
        ))));
        registry
    }

    pub fn register(&mut self, adapter: Box<dyn Adapter>) {
        self.adapters.insert(adapter.name().to_string(), adapter);
    }

    pub fn get(&self, name: &str) -> Result<&dyn Adapter> {
        self.adapters
            .get(name)
            .map(Box::as_ref)
            .ok_or_else(|| anyhow!("unknown adapter '{name}'"))
    }

    pub fn names(&self) -> Vec<&str> {
        self.adapters.keys().map(String::as_str).collect()
    }
}

/// Environment every adapter passes to its agent.
///
/// Secrets never appear here; adapters add their own credential variables.
pub fn base_env(adapter: &dyn Adapter, session: &Session, iteration: u32) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    env.insert("AGENTIUM_SESSION_ID".to_string(), session.id.clone());
    env.insert("AGENTIUM_ITERATION".to_string(), iteration.to_string());
    env.insert("AGENTIUM_REPOSITORY".to_string(), session.repository.clone());
    env.insert("AGENTIUM_WORKDIR".to_string(), CONTAINER_WORKDIR.to_string());
    env.insert(
        "AGENTIUM_AUTH_MODE".to_string(),
        session.credentials.auth_mode(adapter.provider()).to_string(),
    );
    for (key, value) in &session.metadata {
        if let Some(name) = metadata_env_name(key) {
            env.insert(name, value.clone());
        }
    }
    env
}

/// `AGENTIUM_META_<KEY>` for metadata keys that do not look secret.
pub fn metadata_env_name(key: &str) -> Option<String> {
    let lowered = key.to_ascii_lowercase();
    if ["key", "secret", "token"]
        .iter()
        .any(|needle| lowered.contains(needle))
    {
        return None;
    }
    let normalized: String = key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    Some(format!("AGENTIUM_META_{normalized}"))
}

/// Shared prompt: the focused task prompt verbatim, else the generic task list,
/// followed by the hand-off or (when there is none) the memory context.
pub fn compose_prompt(session: &Session, iteration: u32) -> Result<String> {
    let mut prompt = match session
        .task_prompt
        .as_deref()
        .filter(|p| !p.trim().is_empty())
    {
        Some(focused) => focused.to_string(),
        None => {
            let engine = PromptEngine::new()?;
            engine
                .render_task(&TaskPromptInputs {
                    repository: &session.repository,
                    tasks: &session.tasks,
                    prs: &session.prs,
                    iteration,
                })
                .context("render task prompt")?
        }
    };

    let context = &session.context;
    let trailer = context
        .handoff
        .as_deref()
        .filter(|h| !h.trim().is_empty())
        .map(|h| format!("## Feedback from the previous step\n\n{}", h.trim()))
        .or_else(|| context.memory_context());
    if let Some(trailer) = trailer {
        prompt.push_str("\n\n");
        prompt.push_str(trailer.trim_end());
    }
    Ok(prompt)
}

/// Prompt with the composed system/project prompt in front, for tools
/// without a system-prompt flag.
pub fn prompt_with_system(session: &Session, prompt: String) -> String {
    match session.composed_system_prompt() {
        Some(system) => format!("{system}\n\n---\n\n{prompt}"),
        None => prompt,
    }
}
