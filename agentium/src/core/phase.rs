//! Workflow phases and the compound keys used for routing and audit logs.

use std::fmt;
use std::str::FromStr;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

/// Named workflow stage, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Plan,
    Implement,
    Docs,
    PrCreation,
}

impl Phase {
    pub const ALL: [Phase; 4] = [Phase::Plan, Phase::Implement, Phase::Docs, Phase::PrCreation];

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Plan => "PLAN",
            Phase::Implement => "IMPLEMENT",
            Phase::Docs => "DOCS",
            Phase::PrCreation => "PR_CREATION",
        }
    }

    /// Planning phases run read-only.
    pub fn is_planning(self) -> bool {
        self == Phase::Plan
    }

    /// Phase that follows this one, or `None` after the last.
    pub fn next(self) -> Option<Phase> {
        match self {
            Phase::Plan => Some(Phase::Implement),
            Phase::Implement => Some(Phase::Docs),
            Phase::Docs => Some(Phase::PrCreation),
            Phase::PrCreation => None,
        }
    }

    pub fn worker(self) -> PhaseKey {
        PhaseKey::new(self, Role::Worker)
    }

    pub fn review(self) -> PhaseKey {
        PhaseKey::new(self, Role::Review)
    }

    pub fn judge(self) -> PhaseKey {
        PhaseKey::new(self, Role::Judge)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Phase::ALL
            .into_iter()
            .find(|phase| phase.as_str() == s.trim().to_ascii_uppercase())
            .ok_or_else(|| anyhow!("unknown phase '{s}'"))
    }
}

/// Who runs within a phase step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Worker,
    Review,
    Judge,
}

/// A phase plus role, rendered as `IMPLEMENT`, `IMPLEMENT_REVIEW`, `IMPLEMENT_JUDGE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PhaseKey {
    pub phase: Phase,
    pub role: Role,
}

impl PhaseKey {
    pub fn new(phase: Phase, role: Role) -> Self {
        Self { phase, role }
    }

    pub fn key(&self) -> String {
        match self.role {
            Role::Worker => self.phase.as_str().to_string(),
            Role::Review => format!("{}_REVIEW", self.phase.as_str()),
            Role::Judge => format!("{}_JUDGE", self.phase.as_str()),
        }
    }
}

impl fmt::Display for PhaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// All twelve keys a routing table may override.
pub fn recognized_keys() -> Vec<String> {
    let mut keys = Vec::with_capacity(Phase::ALL.len() * 3);
    for phase in Phase::ALL {
        for role in [Role::Worker, Role::Review, Role::Judge] {
            keys.push(PhaseKey::new(phase, role).key());
        }
    }
    keys
}

pub fn is_recognized_key(key: &str) -> bool {
    recognized_keys().iter().any(|known| known == key)
}
