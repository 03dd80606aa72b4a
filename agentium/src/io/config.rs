//! Controller configuration (TOML).

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::adapter::BUILTIN_ADAPTERS;
use crate::core::phase::{Phase, is_recognized_key};
use crate::core::routing::{PhaseRouter, PhaseRouting};

/// Controller configuration.
///
/// Missing fields take the defaults below; a missing file is the default config.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ControllerConfig {
    /// Iteration ceiling per phase. Falls back to the session ceiling.
    pub max_iterations_per_phase: Option<u32>,

    /// Wall-clock ceiling for a single agent invocation, in seconds.
    pub iteration_timeout_secs: u64,

    pub skip_phases: Vec<Phase>,

    /// Workdir-relative path whose existence means planning is already done.
    pub plan_artifact: Option<String>,

    /// Skills prompt per phase key (`IMPLEMENT`, `PLAN_REVIEW`, ...).
    pub phase_instructions: BTreeMap<String, String>,

    /// Package path changes must stay within (multi-package repositories).
    pub package_scope: Option<String>,

    /// Consecutive iterations without a status signal before giving up.
    pub no_signal_ceiling: u32,

    /// Times a judge may send the session back to planning.
    pub max_regressions: u32,

    /// Iteration summaries carried forward as memory context.
    pub memory_entries: usize,

    /// Bytes of agent stdout/stderr kept in memory per invocation.
    pub output_limit_bytes: usize,

    /// Workdir-relative directory for audit logs and the event stream.
    pub state_dir: String,

    pub routing: PhaseRouting,

    /// Container image reference per adapter name.
    pub images: BTreeMap<String, String>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_iterations_per_phase: None,
            iteration_timeout_secs: 30 * 60,
            skip_phases: Vec::new(),
            plan_artifact: None,
            phase_instructions: BTreeMap::new(),
            package_scope: None,
            no_signal_ceiling: 3,
            max_regressions: 1,
            memory_entries: 5,
            output_limit_bytes: 1_000_000,
            state_dir: ".agentium".to_string(),
            routing: PhaseRouting::default(),
            images: BTreeMap::new(),
        }
    }
}

impl ControllerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations_per_phase == Some(0) {
            return Err(anyhow!("max_iterations_per_phase must be > 0"));
        }
        if self.iteration_timeout_secs == 0 {
            return Err(anyhow!("iteration_timeout_secs must be > 0"));
        }
        if self.no_signal_ceiling == 0 {
            return Err(anyhow!("no_signal_ceiling must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.state_dir.trim().is_empty() {
            return Err(anyhow!("state_dir must be non-empty"));
        }

        let router = self.router();
        let unknown = router.unknown_phases();
        if !unknown.is_empty() {
            return Err(anyhow!("unknown routing phase keys: {}", unknown.join(", ")));
        }
        for adapter in router.adapters() {
            if !BUILTIN_ADAPTERS.contains(&adapter.as_str()) {
                return Err(anyhow!("routing references unknown adapter '{adapter}'"));
            }
        }
        for key in self.phase_instructions.keys() {
            if !is_recognized_key(key) {
                return Err(anyhow!("unknown phase_instructions key '{key}'"));
            }
        }
        Ok(())
    }

    pub fn router(&self) -> PhaseRouter {
        PhaseRouter::new(self.routing.clone())
    }
}

/// Load and validate config from a TOML file.
///
/// If the file is missing, returns `ControllerConfig::default()`.
pub fn load_config(path: &Path) -> Result<ControllerConfig> {
    let cfg = read_config(path)?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Parse config without validating it, for commands that report problems
/// instead of failing on them.
pub fn read_config(path: &Path) -> Result<ControllerConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "config missing, using defaults");
        return Ok(ControllerConfig::default());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &ControllerConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::routing::ModelConfig;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, ControllerConfig::default());
    }

    #[test]
    fn write_then_load_preserves_routing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested/agentium.toml");
        let mut cfg = ControllerConfig {
            skip_phases: vec![Phase::Docs],
            package_scope: Some("packages/core".to_string()),
            ..ControllerConfig::default()
        };
        cfg.routing.overrides.insert(
            "IMPLEMENT_JUDGE".to_string(),
            ModelConfig {
                adapter: "codex".to_string(),
                model: "gpt-5".to_string(),
                reasoning: "high".to_string(),
            },
        );
        write_config(&path, &cfg).expect("write");
        assert!(!path.with_extension("toml.tmp").exists());
        assert_eq!(load_config(&path).expect("load"), cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("agentium.toml");
        fs::write(&path, "skip_phases = [\"PLAN\", \"PR_CREATION\"]\nmax_regressions = 0\n")
            .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.skip_phases, vec![Phase::Plan, Phase::PrCreation]);
        assert_eq!(cfg.max_regressions, 0);
        assert_eq!(cfg.no_signal_ceiling, 3);
    }

    #[test]
    fn rejects_unknown_routing_key() {
        let mut cfg = ControllerConfig::default();
        cfg.routing
            .overrides
            .insert("DEPLOY".to_string(), ModelConfig::default());
        let err = cfg.validate().expect_err("invalid");
        assert!(err.to_string().contains("DEPLOY"));
    }

    #[test]
    fn rejects_unknown_adapter_and_zero_limits() {
        let mut cfg = ControllerConfig::default();
        cfg.routing.default_config.adapter = "cursor".to_string();
        assert!(cfg.validate().is_err());

        let cfg = ControllerConfig {
            no_signal_ceiling: 0,
            ..ControllerConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn read_config_keeps_invalid_keys_for_reporting() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "[routing.overrides.DEPLOY]\nadapter = \"codex\"\n").expect("write");

        let cfg = read_config(&path).expect("read");
        assert_eq!(cfg.router().unknown_phases(), vec!["DEPLOY"]);
        assert!(load_config(&path).is_err());
    }
}
