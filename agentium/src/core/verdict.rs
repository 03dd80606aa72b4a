//! Judge verdict protocol: `AGENTIUM_EVAL: <KEYWORD> [reason]`.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

pub const EVAL_PREFIX: &str = "AGENTIUM_EVAL:";

static EVAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*AGENTIUM_EVAL:[ \t]+(ADVANCE|ITERATE|BLOCKED|REGRESS)\b[ \t]*([^\r\n]*)")
        .expect("eval regex")
});

/// Decision a judge makes after reading reviewer feedback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", content = "reason", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Advance,
    Iterate(String),
    Blocked(String),
    Regress(String),
}

impl Verdict {
    pub fn keyword(&self) -> &'static str {
        match self {
            Verdict::Advance => "ADVANCE",
            Verdict::Iterate(_) => "ITERATE",
            Verdict::Blocked(_) => "BLOCKED",
            Verdict::Regress(_) => "REGRESS",
        }
    }
}

/// Parse the last verdict line in `text`, if any.
pub fn parse_verdict(text: &str) -> Option<Verdict> {
    let caps = EVAL_RE.captures_iter(text).last()?;
    let reason = caps
        .get(2)
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default();
    let verdict = match caps.get(1)?.as_str() {
        "ADVANCE" => Verdict::Advance,
        "ITERATE" => Verdict::Iterate(reason),
        "BLOCKED" => Verdict::Blocked(reason),
        _ => Verdict::Regress(reason),
    };
    Some(verdict)
}
