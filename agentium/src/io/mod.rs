//! Side-effecting helpers: processes, git, logs, config and prompts.

pub mod config;
pub mod event_log;
pub mod git;
pub mod iteration_log;
pub mod process;
pub mod prompt;
pub mod scope;
pub mod tail;
