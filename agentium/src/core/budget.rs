//! Wall-clock budget helpers for the session loop.

use std::fmt;
use std::time::{Duration, Instant};

use anyhow::Result;

/// Returned when a session deadline has already passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetExhausted;

impl fmt::Display for BudgetExhausted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session time budget exhausted")
    }
}

impl std::error::Error for BudgetExhausted {}

/// Return the remaining time budget until the provided deadline.
pub fn remaining_budget(deadline: Instant) -> Result<Duration> {
    let remaining = deadline
        .checked_duration_since(Instant::now())
        .unwrap_or(Duration::from_secs(0));
    if remaining.is_zero() {
        return Err(BudgetExhausted.into());
    }
    Ok(remaining)
}

/// Cap `budget` at `ceiling` when a per-invocation ceiling is configured.
pub fn clamp_budget(budget: Duration, ceiling: Option<Duration>) -> Duration {
    match ceiling {
        Some(ceiling) if ceiling < budget => ceiling,
        _ => budget,
    }
}
