//! Session controller for autonomous coding-agent CLIs.
//!
//! A session walks a fixed phase sequence (plan, implement, docs, PR
//! creation). Each phase iterates worker, reviewer and judge invocations
//! until the judge advances it or a budget runs out. The architecture keeps a
//! strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (output parsing, signal
//!   extraction, routing, scope checks, verdicts). No I/O.
//! - **[`io`]**: Side-effecting operations (process execution, git, config,
//!   audit and event logs, prompt templates). Isolated behind traits where
//!   tests need to swap them.
//! - **[`adapter`]**: One translation layer per agent CLI.
//!
//! [`controller`] ties them together into the phase/iteration state machine.

pub mod adapter;
pub mod controller;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
