//! Test-only helpers: scripted executors, throwaway git repos, sample sessions.

use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::process::Command;
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use serde_json::json;
use tempfile::TempDir;

use crate::core::session::{ProviderCredential, Session};
use crate::io::process::{CancelToken, ExecOutput, ExecRequest, ProcessExecutor};

/// One scripted invocation: the output to return and files to write into the
/// workdir first, as if the agent had edited them.
#[derive(Debug, Clone, Default)]
pub struct ScriptedExec {
    pub output: ExecOutput,
    pub files: Vec<(String, String)>,
}

impl From<ExecOutput> for ScriptedExec {
    fn from(output: ExecOutput) -> Self {
        Self {
            output,
            files: Vec::new(),
        }
    }
}

/// Executor that replays queued outputs in order and records every request.
pub struct ScriptedExecutor {
    script: Mutex<VecDeque<ScriptedExec>>,
    requests: Mutex<Vec<ExecRequest>>,
}

impl ScriptedExecutor {
    pub fn new(outputs: Vec<ExecOutput>) -> Self {
        Self::scripted(outputs.into_iter().map(ScriptedExec::from).collect())
    }

    pub fn scripted(script: Vec<ScriptedExec>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ExecRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    pub fn calls(&self) -> usize {
        self.requests().len()
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().map(|script| script.len()).unwrap_or(0)
    }
}

impl ProcessExecutor for ScriptedExecutor {
    fn execute(&self, request: &ExecRequest, _cancel: &CancelToken) -> Result<ExecOutput> {
        self.requests
            .lock()
            .map_err(|_| anyhow!("requests lock poisoned"))?
            .push(request.clone());
        let next = self
            .script
            .lock()
            .map_err(|_| anyhow!("script lock poisoned"))?
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted output left for {:?}", request.argv))?;
        for (rel, contents) in &next.files {
            write_file(&request.workdir.join(rel), contents)?;
        }
        Ok(next.output)
    }
}

/// A block-stream transcript with one assistant text block and a result record.
pub fn agent_reply(text: &str) -> ExecOutput {
    let assistant = json!({
        "type": "assistant",
        "message": { "content": [{ "type": "text", "text": text }] },
    });
    let result = json!({
        "type": "result",
        "subtype": "success",
        "is_error": false,
        "usage": { "input_tokens": 100, "output_tokens": 20 },
    });
    ExecOutput::success(format!("{assistant}\n{result}\n"))
}

/// Like [`agent_reply`], opened by an init record naming the agent's conversation.
pub fn agent_reply_in(conversation: &str, text: &str) -> ExecOutput {
    let init = json!({ "type": "system", "subtype": "init", "session_id": conversation });
    let mut output = agent_reply(text);
    output.stdout = format!("{init}\n{}", output.stdout);
    output
}

/// A git repository in a temp dir with one initial commit.
pub struct TestRepo {
    dir: TempDir,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir().context("create temp dir")?;
        let repo = Self { dir };
        repo.git(&["init", "-q"])?;
        repo.git(&["config", "user.email", "test@example.com"])?;
        repo.git(&["config", "user.name", "test"])?;
        repo.write("README.md", "hi\n")?;
        repo.commit_all("chore: init")?;
        Ok(repo)
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn write(&self, rel: &str, contents: &str) -> Result<()> {
        write_file(&self.path().join(rel), contents)
    }

    pub fn commit_all(&self, message: &str) -> Result<()> {
        self.git(&["add", "-A"])?;
        self.git(&["commit", "-q", "-m", message])
    }

    fn git(&self, args: &[&str]) -> Result<()> {
        let status = Command::new("git")
            .args(args)
            .current_dir(self.path())
            .status()
            .with_context(|| format!("spawn git {}", args.join(" ")))?;
        if !status.success() {
            return Err(anyhow!("git {} failed: {status}", args.join(" ")));
        }
        Ok(())
    }
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

/// Non-interactive claude-code session for task #12 with an API key.
pub fn sample_session() -> Session {
    let mut session = Session::new("sess-1", "acme/widgets", "claude-code");
    session.tasks = vec!["12".to_string()];
    session.credentials.insert(
        "anthropic",
        ProviderCredential::ApiKey {
            key: "sk-test".to_string(),
        },
    );
    session
}
