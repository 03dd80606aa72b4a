//! Deterministic logic shared by the controller and adapters.
//!
//! Core modules are free of I/O side effects. They operate on in-memory data
//! and return deterministic outputs suitable for tests.

pub mod budget;
pub mod event;
pub mod parse;
pub mod phase;
pub mod result;
pub mod routing;
pub mod scope;
pub mod session;
pub mod signals;
pub mod verdict;
