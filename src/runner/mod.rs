//! Runner module - drives tasks through agents and merges the results.
//!
//! This module provides the run loop:
//! - Orchestrator for batch selection, the worker pool and merging
//! - Worker for the per-task attempt loop
//! - RunSummary for reporting what a run did

mod orchestrator;
mod worker;

pub use orchestrator::{DEFAULT_MAX_ATTEMPTS, Orchestrator, OrchestratorConfig, RunSummary};
pub use worker::{AttemptEvent, Worker, WorkerOutcome};
