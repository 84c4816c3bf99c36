//! Project-local state directory with atomic JSON records.
//!
//! Every write goes to a temp file first and is renamed into place, so a
//! crash mid-write never leaves a truncated record behind.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Serialize, de::DeserializeOwned};

use crate::error::{HermesError, Result};

/// Handle to `<repo>/.hermes/state` (or any directory) holding JSON records.
#[derive(Debug, Clone)]
pub struct StateDir {
    root: PathBuf,
}

impl StateDir {
    /// Open (creating if needed) a state directory.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)
            .map_err(|e| HermesError::Storage(format!("Failed to create state dir {}: {}", root.display(), e)))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a named record.
    pub fn path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.json", name))
    }

    /// Load a record, `None` if it has never been written.
    pub fn load<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        let path = self.path(name);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        let value = serde_json::from_str(&content)?;
        log::debug!("Loaded state record {}", path.display());
        Ok(Some(value))
    }

    /// Atomically rewrite a record.
    pub fn save<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        let mut buf = serde_json::to_string_pretty(value)?;
        buf.push('\n');
        write_atomic(&self.path(name), &buf)
    }

    pub fn remove(&self, name: &str) -> Result<()> {
        let path = self.path(name);
        if path.exists() {
            fs::remove_file(&path)?;
        }
        Ok(())
    }
}

/// Write `contents` to `path` via temp file + rename.
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, contents)
        .map_err(|e| HermesError::Storage(format!("Failed to write temp file {}: {}", tmp_path.display(), e)))?;
    fs::rename(&tmp_path, path)
        .map_err(|e| HermesError::Storage(format!("Failed to replace {}: {}", path.display(), e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Counter {
        value: u32,
    }

    #[test]
    fn test_load_missing_is_none() {
        let temp = TempDir::new().unwrap();
        let dir = StateDir::open(temp.path().join("state")).unwrap();
        let loaded: Option<Counter> = dir.load("counter").unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_save_and_reload() {
        let temp = TempDir::new().unwrap();
        let dir = StateDir::open(temp.path()).unwrap();
        dir.save("counter", &Counter { value: 3 }).unwrap();
        dir.save("counter", &Counter { value: 4 }).unwrap();

        let reopened = StateDir::open(temp.path()).unwrap();
        let loaded: Option<Counter> = reopened.load("counter").unwrap();
        assert_eq!(loaded, Some(Counter { value: 4 }));
        assert!(!temp.path().join("counter.tmp").exists());
    }

    #[test]
    fn test_remove() {
        let temp = TempDir::new().unwrap();
        let dir = StateDir::open(temp.path()).unwrap();
        dir.save("counter", &Counter { value: 1 }).unwrap();
        dir.remove("counter").unwrap();
        assert!(!dir.path("counter").exists());
        dir.remove("counter").unwrap();
    }

    #[test]
    fn test_corrupt_record_is_error() {
        let temp = TempDir::new().unwrap();
        let dir = StateDir::open(temp.path()).unwrap();
        std::fs::write(dir.path("counter"), "{ not json").unwrap();
        let loaded: Result<Option<Counter>> = dir.load("counter");
        assert!(matches!(loaded, Err(HermesError::Json(_))));
    }
}
