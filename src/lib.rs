//! Hermes - dependency-ordered orchestration of AI coding agents
//!
//! Tasks are scheduled in dependency order, each one runs in its own git
//! worktree, and finished branches are checked for conflicts and merged back
//! into the base branch. A circuit breaker halts runs that stop making
//! progress.

pub mod analyzer;
pub mod breaker;
pub mod conflict;
pub mod domain;
pub mod error;
pub mod prompt;
pub mod provider;
pub mod runner;
pub mod scheduler;
pub mod store;
pub mod worktree;

pub use error::{HermesError, Result};
