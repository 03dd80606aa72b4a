//! Thin wrapper around `git` subprocess calls in the session workdir.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

/// Parsed `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked.
    pub code: String,
    pub path: String,
}

#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Full SHA of HEAD.
    pub fn head_sha(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "HEAD"])?;
        Ok(out.trim().to_string())
    }

    /// Get status entries (including untracked) in porcelain format.
    pub fn status_porcelain(&self) -> Result<Vec<StatusEntry>> {
        let out = self.run_capture(&["status", "--porcelain=v1", "-uall", "--no-renames"])?;
        let mut entries = Vec::new();
        for line in out.lines() {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(parse_status_line(line)?);
        }
        Ok(entries)
    }

    /// Paths committed since `base` plus uncommitted and untracked paths, sorted.
    ///
    /// Renames count as a deletion of the old path plus an addition of the new.
    #[instrument(skip_all, fields(base))]
    pub fn changed_files(&self, base: &str) -> Result<Vec<String>> {
        let mut paths = BTreeSet::new();
        let range = format!("{base}..HEAD");
        let committed = self.run_capture(&["diff", "--name-only", "--no-renames", &range])?;
        paths.extend(
            committed
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string),
        );
        paths.extend(self.status_porcelain()?.into_iter().map(|entry| entry.path));
        debug!(count = paths.len(), "collected changed files");
        Ok(paths.into_iter().collect())
    }

    /// Discard commits and edits since `base`, then remove untracked files.
    ///
    /// Ignored files survive, so the controller's state directory is untouched.
    #[instrument(skip_all, fields(base))]
    pub fn reset_hard_and_clean(&self, base: &str) -> Result<()> {
        warn!(base, "resetting working tree");
        self.run_checked(&["reset", "--hard", base])?;
        self.run_checked(&["clean", "-fd"])?;
        Ok(())
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

fn parse_status_line(line: &str) -> Result<StatusEntry> {
    if let Some(path) = line.strip_prefix("?? ") {
        return Ok(StatusEntry {
            code: "??".to_string(),
            path: path.trim().to_string(),
        });
    }
    if line.len() < 4 {
        return Err(anyhow!("unexpected porcelain line: '{line}'"));
    }
    let code = line[..2].to_string();
    let mut path = line[3..].trim().to_string();
    if let Some((_, new)) = path.split_once("->") {
        path = new.trim().to_string();
    }
    Ok(StatusEntry { code, path })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestRepo;

    #[test]
    fn parses_untracked_line() {
        let e = parse_status_line("?? foo.txt").expect("parse");
        assert_eq!(e.code, "??");
        assert_eq!(e.path, "foo.txt");
    }

    #[test]
    fn parses_rename_line_uses_new_path() {
        let e = parse_status_line("R  old.txt -> new.txt").expect("parse");
        assert_eq!(e.path, "new.txt");
    }

    #[test]
    fn changed_files_cover_commits_edits_and_untracked() {
        let repo = TestRepo::new().expect("repo");
        let git = Git::new(repo.path());
        let base = git.head_sha().expect("head");

        repo.write("packages/core/a.ts", "a").expect("write");
        repo.commit_all("add a").expect("commit");
        repo.write("README.md", "changed").expect("write");
        repo.write("notes/new.txt", "n").expect("write");

        let files = git.changed_files(&base).expect("changed");
        assert_eq!(files, vec!["README.md", "notes/new.txt", "packages/core/a.ts"]);
    }

    #[test]
    fn moves_report_both_source_and_destination() {
        let repo = TestRepo::new().expect("repo");
        repo.write("packages/web/x.ts", "export const x = 1;\n").expect("write");
        repo.write("packages/web/y.ts", "export const y = 2;\n").expect("write");
        repo.commit_all("web files").expect("commit");
        let git = Git::new(repo.path());
        let base = git.head_sha().expect("head");

        let root = repo.path();
        std::fs::create_dir_all(root.join("packages/core")).expect("mkdir");
        std::fs::rename(root.join("packages/web/x.ts"), root.join("packages/core/x.ts"))
            .expect("move x");
        repo.commit_all("move x").expect("commit");
        std::fs::rename(root.join("packages/web/y.ts"), root.join("packages/core/y.ts"))
            .expect("move y");
        git.run_checked(&["add", "-A"]).expect("stage");

        let files = git.changed_files(&base).expect("changed");
        assert_eq!(
            files,
            vec![
                "packages/core/x.ts",
                "packages/core/y.ts",
                "packages/web/x.ts",
                "packages/web/y.ts",
            ]
        );
    }

    #[test]
    fn reset_restores_base_and_removes_untracked() {
        let repo = TestRepo::new().expect("repo");
        let git = Git::new(repo.path());
        let base = git.head_sha().expect("head");

        repo.write("stray.txt", "x").expect("write");
        repo.commit_all("stray").expect("commit");
        repo.write("untracked/file.txt", "y").expect("write");
        git.reset_hard_and_clean(&base).expect("reset");

        assert_eq!(git.head_sha().expect("head"), base);
        assert!(!repo.path().join("stray.txt").exists());
        assert!(!repo.path().join("untracked").exists());
        assert!(git.changed_files(&base).expect("changed").is_empty());
    }
}
