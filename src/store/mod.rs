//! Persistence for Hermes.
//!
//! - `TaskStore`: task definitions and status changes (YAML task file)
//! - `StateDir`: project-local JSON records (breaker state and history),
//!   rewritten atomically on every update

mod state_dir;
mod task_store;

pub use state_dir::{StateDir, write_atomic};
pub use task_store::{MemoryTaskStore, TaskFile, TaskStore, YamlTaskStore};
