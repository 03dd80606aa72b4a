//! Working-tree owner that enforces package scope between iterations.

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::core::scope::{ScopeValidator, ValidationResult};
use crate::io::git::Git;

/// Exclusive handle on a session's working tree.
///
/// `begin_iteration` records the base revision; `check` compares the tree
/// against it and `reset_changes` rolls the tree back to it.
#[derive(Debug)]
pub struct WorkspaceScope {
    git: Git,
    validator: ScopeValidator,
    base: Option<String>,
}

impl WorkspaceScope {
    pub fn new(git: Git, validator: ScopeValidator) -> Self {
        Self {
            git,
            validator,
            base: None,
        }
    }

    pub fn is_enforced(&self) -> bool {
        self.validator.package().is_some()
    }

    pub fn validator(&self) -> &ScopeValidator {
        &self.validator
    }

    /// Record HEAD as the revision this iteration starts from.
    pub fn begin_iteration(&mut self) -> Result<()> {
        if !self.is_enforced() {
            return Ok(());
        }
        let head = self.git.head_sha().context("record iteration base")?;
        self.base = Some(head);
        Ok(())
    }

    #[instrument(skip_all, fields(package = self.validator.package()))]
    pub fn check(&mut self) -> Result<ValidationResult> {
        let Some(base) = self.base.as_deref() else {
            return Ok(self.validator.validate_files::<&str>(&[]));
        };
        let files = self.git.changed_files(base)?;
        let result = self.validator.validate_files(&files);
        if !result.valid {
            warn!(violations = result.violations.len(), "changes outside package scope");
        }
        Ok(result)
    }

    /// Hard reset to the iteration base and remove untracked files.
    pub fn reset_changes(&mut self) -> Result<()> {
        let Some(base) = self.base.as_deref() else {
            return Ok(());
        };
        self.git
            .reset_hard_and_clean(base)
            .context("reset out-of-scope changes")?;
        info!(base, "reverted out-of-scope changes");
        Ok(())
    }

    pub fn format_violation_error(&self, result: &ValidationResult) -> String {
        self.validator.format_violation_error(result)
    }
}
