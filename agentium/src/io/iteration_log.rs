//! Per-iteration audit logs under `<state_dir>/iterations/`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::result::TokenUsage;

const STATE_GITIGNORE: &str = "*\n";

/// Locations of controller-owned files inside the workdir.
#[derive(Debug, Clone)]
pub struct StatePaths {
    pub state_dir: PathBuf,
    pub gitignore_path: PathBuf,
    pub iterations_dir: PathBuf,
    pub events_dir: PathBuf,
}

impl StatePaths {
    pub fn new(workdir: &Path, state_dir: &str) -> Self {
        let state_dir = workdir.join(state_dir);
        Self {
            gitignore_path: state_dir.join(".gitignore"),
            iterations_dir: state_dir.join("iterations"),
            events_dir: state_dir.join("events"),
            state_dir,
        }
    }

    pub fn events_path(&self, session_id: &str) -> PathBuf {
        self.events_dir.join(format!("{session_id}.jsonl"))
    }

    /// Create the state dir and make git ignore everything in it.
    pub fn ensure(&self) -> Result<()> {
        fs::create_dir_all(&self.state_dir)
            .with_context(|| format!("create state dir {}", self.state_dir.display()))?;
        let current = fs::read_to_string(&self.gitignore_path).unwrap_or_default();
        if current != STATE_GITIGNORE {
            write_text(&self.gitignore_path, STATE_GITIGNORE)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IterationMeta {
    pub session_id: String,
    pub seq: u32,
    pub phase_key: String,
    pub phase_iteration: u32,
    pub adapter: String,
    pub model: Option<String>,
    pub argv: Vec<String>,
    pub exit_code: i32,
    pub success: bool,
    pub timed_out: bool,
    pub cancelled: bool,
    pub status: Option<String>,
    pub tokens: TokenUsage,
    pub summary: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct IterationPaths {
    pub dir: PathBuf,
    pub meta_path: PathBuf,
    pub stdout_path: PathBuf,
    pub stderr_path: PathBuf,
    pub prompt_path: PathBuf,
}

impl IterationPaths {
    /// `<iterations>/<session>/<NNN>-<KEY>/`; `seq` orders every invocation in a session.
    pub fn new(paths: &StatePaths, session_id: &str, seq: u32, phase_key: &str) -> Self {
        let dir = paths
            .iterations_dir
            .join(session_id)
            .join(format!("{seq:03}-{phase_key}"));
        Self {
            meta_path: dir.join("meta.json"),
            stdout_path: dir.join("stdout.log"),
            stderr_path: dir.join("stderr.log"),
            prompt_path: dir.join("prompt.md"),
            dir,
        }
    }
}

pub struct IterationWriteRequest<'a> {
    pub paths: &'a IterationPaths,
    pub meta: &'a IterationMeta,
    pub prompt: &'a str,
    /// `None` when stdout was already streamed to `stdout_path`.
    pub stdout: Option<&'a str>,
    pub stderr: &'a str,
}

pub fn write_iteration(request: &IterationWriteRequest<'_>) -> Result<()> {
    let paths = request.paths;
    fs::create_dir_all(&paths.dir)
        .with_context(|| format!("create iteration dir {}", paths.dir.display()))?;

    write_json(&paths.meta_path, request.meta)?;
    write_text(&paths.prompt_path, request.prompt)?;
    if let Some(stdout) = request.stdout {
        write_text(&paths.stdout_path, stdout)?;
    }
    write_text(&paths.stderr_path, request.stderr)?;
    Ok(())
}

fn write_text(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    write_text(path, &buf)
}
