//! Heuristic signal extraction over decoded agent text.
//!
//! Each rule is a standalone function from text to a value so it can be tested
//! in isolation. [`apply_signals`] runs all of them over one iteration's output
//! and folds the findings into an [`IterationResult`].

use std::sync::LazyLock;

use regex::Regex;

use crate::core::result::{IterationResult, StatusSignal};

/// Prefix of the in-band status protocol line.
pub const STATUS_PREFIX: &str = "AGENTIUM_STATUS:";

/// Statuses that imply the agent pushed its work.
pub const PUSH_STATUSES: [&str; 3] = ["PUSHED", "COMPLETE", "PR_CREATED"];

/// Status that marks an iteration successful regardless of exit code.
pub const NOTHING_TO_DO: &str = "NOTHING_TO_DO";

static STATUS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*AGENTIUM_STATUS:[ \t]+([A-Z][A-Z0-9_]*)(?:[ \t]+([^\r\n]*))?[ \t]*\r?$")
        .expect("status regex")
});

// The creation verb is mandatory: bare "PR #12" mentions are usually cross-references.
static PR_CREATED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:created|opened)\s+(?:pull\s+request|PR)\s*#?(\d+)")
        .expect("pr created regex")
});

static PR_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https://github\.com/[A-Za-z0-9_.-]+/[A-Za-z0-9_.-]+/pull/(\d+)")
        .expect("pr url regex")
});

static TASK_CLOSED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:fixes|closes|resolves)\s+#?(\d+)").expect("task regex")
});

static PUSH_TARGET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^To (?:https://github\.com|git@github\.com|github\.com)")
        .expect("push target regex")
});

static HASH_RANGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[0-9a-f]{7,40}\.{2,3}[0-9a-f]{7,40}\b").expect("hash range regex")
});

/// Return the last `AGENTIUM_STATUS:` line in `text`, if any.
pub fn extract_status(text: &str) -> Option<StatusSignal> {
    let caps = STATUS_RE.captures_iter(text).last()?;
    let name = caps.get(1)?.as_str().to_string();
    let message = caps
        .get(2)
        .map(|m| m.as_str().trim())
        .filter(|m| !m.is_empty())
        .map(str::to_string);
    Some(StatusSignal { name, message })
}

/// PR numbers the agent reports having created, unique, in first-seen order.
///
/// Both "Created pull request #N" phrases and GitHub pull URLs count.
pub fn extract_created_prs(text: &str) -> Vec<String> {
    let mut found: Vec<(usize, String)> = PR_CREATED_RE
        .captures_iter(text)
        .chain(PR_URL_RE.captures_iter(text))
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            Some((whole.start(), caps.get(1)?.as_str().to_string()))
        })
        .collect();
    found.sort_by_key(|(pos, _)| *pos);

    let mut ids = Vec::new();
    for (_, id) in found {
        push_unique(&mut ids, id);
    }
    ids
}

/// Task numbers referenced with closing keywords (`fixes #12`, `Closes 7`).
pub fn extract_closed_tasks(text: &str) -> Vec<String> {
    let mut ids = Vec::new();
    for caps in TASK_CLOSED_RE.captures_iter(text) {
        if let Some(id) = caps.get(1) {
            push_unique(&mut ids, id.as_str().to_string());
        }
    }
    ids
}

/// True when `text` contains git push output targeting GitHub with an updated ref range.
pub fn detect_push(text: &str) -> bool {
    let Some(target) = PUSH_TARGET_RE.find(text) else {
        return false;
    };
    HASH_RANGE_RE.is_match(&text[target.start()..])
}

/// Best-effort error line from stderr of a failed process.
pub fn extract_error(stderr: &str, exit_code: i32) -> String {
    let prefixed = stderr.lines().map(str::trim).find(|line| {
        line.starts_with("error:") || line.starts_with("fatal:") || line.starts_with("Error:")
    });
    if let Some(line) = prefixed {
        return line.to_string();
    }
    stderr
        .lines()
        .map(str::trim)
        .rfind(|line| !line.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("exit code {exit_code}"))
}

/// Human summary for an iteration.
pub fn summarize(result: &IterationResult) -> String {
    if !result.prs_created.is_empty() {
        let refs: Vec<String> = result
            .prs_created
            .iter()
            .map(|id| format!("#{id}"))
            .collect();
        return format!(
            "Created {} PR(s): {}",
            result.prs_created.len(),
            refs.join(", ")
        );
    }
    if result.success {
        return "Iteration completed successfully".to_string();
    }
    format!(
        "Iteration failed: {}",
        result.error.as_deref().unwrap_or("unknown error")
    )
}

/// Run every extraction rule over `result.raw_text` plus `stderr`.
///
/// Expects `exit_code`, `raw_text` and any parser-detected `error` to be set.
pub fn apply_signals(result: &mut IterationResult, stderr: &str) {
    let haystack = if stderr.trim().is_empty() {
        result.raw_text.clone()
    } else {
        format!("{}\n{}", result.raw_text, stderr)
    };

    if result.exit_code != 0 && result.error.is_none() {
        result.error = Some(extract_error(stderr, result.exit_code));
    }
    result.success = result.exit_code == 0 && result.error.is_none();

    if let Some(status) = extract_status(&haystack) {
        if PUSH_STATUSES.contains(&status.name.as_str()) {
            result.pushed_changes = true;
        }
        if status.name == NOTHING_TO_DO {
            result.success = true;
        }
        result.status = Some(status);
    }

    for id in extract_created_prs(&haystack) {
        push_unique(&mut result.prs_created, id);
    }
    for id in extract_closed_tasks(&haystack) {
        push_unique(&mut result.tasks_closed, id);
    }
    if detect_push(&haystack) {
        result.pushed_changes = true;
    }

    result.summary = summarize(result);
}

fn push_unique(ids: &mut Vec<String>, id: String) {
    if !ids.contains(&id) {
        ids.push(id);
    }
}
