//! Session state owned by the controller for one engagement.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::phase::PhaseKey;

/// Secret material for one provider.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderCredential {
    ApiKey {
        key: String,
    },
    #[serde(rename = "oauth")]
    OAuth {
        access_token: String,
        #[serde(default)]
        refresh_token: Option<String>,
        #[serde(default)]
        expires_at: Option<String>,
    },
}

impl ProviderCredential {
    pub fn auth_mode(&self) -> &'static str {
        match self {
            ProviderCredential::ApiKey { .. } => "api_key",
            ProviderCredential::OAuth { .. } => "oauth",
        }
    }

    /// The bearer secret an agent tool needs, whichever shape it came in.
    pub fn secret(&self) -> &str {
        match self {
            ProviderCredential::ApiKey { key } => key,
            ProviderCredential::OAuth { access_token, .. } => access_token,
        }
    }
}

impl fmt::Debug for ProviderCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderCredential::ApiKey { .. } => f
                .debug_struct("ApiKey")
                .field("key", &"<redacted>")
                .finish(),
            ProviderCredential::OAuth { expires_at, .. } => f
                .debug_struct("OAuth")
                .field("access_token", &"<redacted>")
                .field("refresh_token", &"<redacted>")
                .field("expires_at", expires_at)
                .finish(),
        }
    }
}

/// Credentials keyed by provider name (`anthropic`, `openai`, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credentials(pub BTreeMap<String, ProviderCredential>);

impl Credentials {
    pub fn get(&self, provider: &str) -> Option<&ProviderCredential> {
        self.0.get(provider)
    }

    pub fn insert(&mut self, provider: &str, credential: ProviderCredential) {
        self.0.insert(provider.to_string(), credential);
    }

    pub fn auth_mode(&self, provider: &str) -> &'static str {
        self.get(provider)
            .map_or("none", ProviderCredential::auth_mode)
    }
}

/// Per-iteration state the controller rewrites between steps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IterationContext {
    pub phase: Option<PhaseKey>,
    /// Composed phase instructions; replaces the session system prompt when set.
    pub skills_prompt: Option<String>,
    pub model_override: Option<String>,
    pub reasoning_override: Option<String>,
    /// Structured input from the previous step (judge feedback, scope errors).
    pub handoff: Option<String>,
    pub memory: Vec<String>,
    /// Agent conversation this invocation continues, when resuming.
    pub resume_session: Option<String>,
}

impl IterationContext {
    pub fn memory_context(&self) -> Option<String> {
        if self.memory.is_empty() {
            return None;
        }
        let mut out = String::from("Previous iterations:\n");
        for entry in &self.memory {
            out.push_str("- ");
            out.push_str(entry);
            out.push('\n');
        }
        Some(out)
    }

    /// Append a memory entry, dropping the oldest beyond `limit`.
    pub fn remember(&mut self, entry: String, limit: usize) {
        if limit == 0 {
            return;
        }
        self.memory.push(entry);
        if self.memory.len() > limit {
            let excess = self.memory.len() - limit;
            self.memory.drain(..excess);
        }
    }
}

fn default_max_iterations() -> u32 {
    5
}

fn default_max_duration_secs() -> u64 {
    2 * 60 * 60
}

/// One engagement with a target repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub repository: String,
    #[serde(default)]
    pub tasks: Vec<String>,
    #[serde(default)]
    pub prs: Vec<String>,
    pub agent: String,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_max_duration_secs")]
    pub max_duration_secs: u64,
    #[serde(default)]
    pub interactive: bool,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub credentials: Credentials,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub project_prompt: Option<String>,
    #[serde(default)]
    pub task_prompt: Option<String>,
    #[serde(skip)]
    pub context: IterationContext,
}

impl Session {
    pub fn new(id: &str, repository: &str, agent: &str) -> Self {
        Self {
            id: id.to_string(),
            repository: repository.to_string(),
            tasks: Vec::new(),
            prs: Vec::new(),
            agent: agent.to_string(),
            max_iterations: default_max_iterations(),
            max_duration_secs: default_max_duration_secs(),
            interactive: false,
            metadata: BTreeMap::new(),
            credentials: Credentials::default(),
            system_prompt: None,
            project_prompt: None,
            task_prompt: None,
            context: IterationContext::default(),
        }
    }

    pub fn max_duration(&self) -> Duration {
        Duration::from_secs(self.max_duration_secs)
    }

    /// System prompt in effect: phase skills replace the session prompt.
    pub fn effective_system_prompt(&self) -> Option<&str> {
        self.context
            .skills_prompt
            .as_deref()
            .or(self.system_prompt.as_deref())
            .filter(|prompt| !prompt.trim().is_empty())
    }

    pub fn project_prompt(&self) -> Option<&str> {
        self.project_prompt
            .as_deref()
            .filter(|prompt| !prompt.trim().is_empty())
    }

    /// Effective system prompt followed by the project prompt.
    pub fn composed_system_prompt(&self) -> Option<String> {
        match (self.effective_system_prompt(), self.project_prompt()) {
            (Some(system), Some(project)) => Some(format!("{system}\n\n{project}")),
            (Some(system), None) => Some(system.to_string()),
            (None, Some(project)) => Some(project.to_string()),
            (None, None) => None,
        }
    }

    pub fn is_planning(&self) -> bool {
        self.context
            .phase
            .is_some_and(|key| key.phase.is_planning())
    }
}
