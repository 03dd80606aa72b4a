//! Stable exit codes for `agentium` CLI commands.

use crate::controller::SessionStop;

/// Session completed every phase, or a read-only command succeeded.
pub const OK: i32 = 0;
/// Invalid config/session, preflight failure, or an infrastructure error.
pub const ERROR: i32 = 1;
/// A phase ran out of iterations or the session ran out of time.
pub const EXHAUSTED: i32 = 2;
/// The judge blocked the session or the agent stopped reporting status.
pub const BLOCKED: i32 = 3;
/// The session was cancelled.
pub const CANCELLED: i32 = 130;

pub fn for_stop(stop: &SessionStop) -> i32 {
    match stop {
        SessionStop::Completed => OK,
        SessionStop::IterationsExhausted { .. } | SessionStop::TimedOut { .. } => EXHAUSTED,
        SessionStop::Blocked { .. } | SessionStop::NoSignal { .. } => BLOCKED,
        SessionStop::Cancelled { .. } => CANCELLED,
    }
}
