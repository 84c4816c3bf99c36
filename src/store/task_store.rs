//! Task store: persisted task definitions and their status changes.
//!
//! The YAML task file is the source of truth. Status changes rewrite the
//! whole file atomically, so concurrent writers are serialized by a mutex.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::domain::{Feature, Task};
use crate::error::{HermesError, Result};
use crate::store::state_dir::write_atomic;

/// Source of Features/Tasks and sink for their status changes.
pub trait TaskStore: Send + Sync {
    /// Load every feature with its tasks.
    fn load(&self) -> Result<Vec<Feature>>;

    /// Persist a task's current status and history.
    fn save_task(&self, task: &Task) -> Result<()>;

    /// All tasks in declaration order, stamped with their feature ID.
    fn tasks(&self) -> Result<Vec<Task>> {
        Ok(self
            .load()?
            .into_iter()
            .flat_map(|f| {
                let feature_id = f.id;
                f.tasks.into_iter().map(move |mut t| {
                    t.feature_id = feature_id.clone();
                    t
                })
            })
            .collect())
    }
}

/// On-disk layout of the task file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskFile {
    #[serde(default)]
    pub features: Vec<Feature>,
}

/// YAML-backed task store.
#[derive(Debug)]
pub struct YamlTaskStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl YamlTaskStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<TaskFile> {
        let content = fs::read_to_string(&self.path)
            .map_err(|e| HermesError::Storage(format!("Failed to read {}: {}", self.path.display(), e)))?;
        let mut file: TaskFile = serde_yaml::from_str(&content)?;
        for feature in &mut file.features {
            for task in &mut feature.tasks {
                task.feature_id = feature.id.clone();
            }
        }
        Ok(file)
    }

    fn write(&self, file: &TaskFile) -> Result<()> {
        write_atomic(&self.path, &serde_yaml::to_string(file)?)
    }
}

impl TaskStore for YamlTaskStore {
    fn load(&self) -> Result<Vec<Feature>> {
        let _guard = self.lock.lock().map_err(|e| HermesError::Storage(e.to_string()))?;
        Ok(self.read()?.features)
    }

    fn save_task(&self, task: &Task) -> Result<()> {
        let _guard = self.lock.lock().map_err(|e| HermesError::Storage(e.to_string()))?;
        let mut file = self.read()?;

        let slot = file
            .features
            .iter_mut()
            .flat_map(|f| f.tasks.iter_mut())
            .find(|t| t.id == task.id)
            .ok_or_else(|| HermesError::TaskNotFound(task.id.clone()))?;
        slot.status = task.status;
        slot.history = task.history.clone();

        self.write(&file)?;
        log::debug!("Persisted task {} as {}", task.id, task.status);
        Ok(())
    }
}

/// In-memory task store, for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    features: Mutex<Vec<Feature>>,
}

impl MemoryTaskStore {
    pub fn new(features: Vec<Feature>) -> Self {
        Self {
            features: Mutex::new(features),
        }
    }
}

impl TaskStore for MemoryTaskStore {
    fn load(&self) -> Result<Vec<Feature>> {
        Ok(self
            .features
            .lock()
            .map_err(|e| HermesError::Storage(e.to_string()))?
            .clone())
    }

    fn save_task(&self, task: &Task) -> Result<()> {
        let mut features = self.features.lock().map_err(|e| HermesError::Storage(e.to_string()))?;
        let slot = features
            .iter_mut()
            .flat_map(|f| f.tasks.iter_mut())
            .find(|t| t.id == task.id)
            .ok_or_else(|| HermesError::TaskNotFound(task.id.clone()))?;
        slot.status = task.status;
        slot.history = task.history.clone();
        Ok(())
    }
}
