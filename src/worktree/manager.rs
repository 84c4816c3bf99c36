//! WorkspaceManager provisions one branch + worktree per task.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{HermesError, Result};
use crate::worktree::vcs::{VersionControl, WorktreeEntry};

/// Branch prefix for task branches.
pub const BRANCH_PREFIX: &str = "hermes/";

/// Isolated (or shared) checkout a task runs in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    pub task_id: String,
    /// Main repository root
    pub base_path: PathBuf,
    /// Directory the agent works in
    pub work_path: PathBuf,
    pub branch: String,
    /// True when `work_path == base_path` and no branch was created
    pub shared: bool,
}

/// Manages git worktrees for task isolation.
///
/// The base branch is captured once at construction; every task branch is
/// created from it and merged back into it.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    vcs: Arc<dyn VersionControl>,
    repo_root: PathBuf,
    worktree_dir: PathBuf,
    base_branch: String,
}

impl WorkspaceManager {
    /// Create a manager for `repo_root`, placing worktrees under
    /// `worktree_dir` (relative paths resolve against the repo root).
    pub fn new(vcs: Arc<dyn VersionControl>, repo_root: impl Into<PathBuf>, worktree_dir: impl AsRef<Path>) -> Result<Self> {
        let repo_root = repo_root.into();
        let worktree_dir = if worktree_dir.as_ref().is_absolute() {
            worktree_dir.as_ref().to_path_buf()
        } else {
            repo_root.join(worktree_dir)
        };

        let base_branch = vcs.current_branch(&repo_root)?;
        let manager = Self {
            vcs,
            repo_root,
            worktree_dir,
            base_branch,
        };
        manager.exclude(&manager.worktree_dir)?;
        log::debug!(
            "WorkspaceManager on {} (base branch {})",
            manager.repo_root.display(),
            manager.base_branch
        );
        Ok(manager)
    }

    pub fn base_branch(&self) -> &str {
        &self.base_branch
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    pub fn worktree_dir(&self) -> &Path {
        &self.worktree_dir
    }

    pub fn vcs(&self) -> &Arc<dyn VersionControl> {
        &self.vcs
    }

    pub fn branch_name(&self, task_id: &str) -> String {
        format!("{}{}", BRANCH_PREFIX, task_id)
    }

    /// Deterministic worktree path: sanitized ID plus a short hash of the
    /// raw ID, so IDs that sanitize alike never collide.
    pub fn work_path(&self, task_id: &str) -> PathBuf {
        let sanitized: String = task_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
            .collect();
        let digest = hex::encode(Sha256::digest(task_id.as_bytes()));
        self.worktree_dir.join(format!("{}-{}", sanitized, &digest[..8]))
    }

    /// Create (or reuse) the task's branch and worktree.
    pub fn setup(&self, task_id: &str) -> Result<Workspace> {
        let branch = self.branch_name(task_id);
        let work_path = self.work_path(task_id);
        let workspace = Workspace {
            task_id: task_id.to_string(),
            base_path: self.repo_root.clone(),
            work_path: work_path.clone(),
            branch: branch.clone(),
            shared: false,
        };

        if self.find_worktree(&work_path)?.is_some_and(|e| e.branch.as_deref() == Some(branch.as_str())) {
            log::info!("Reusing worktree for {} at {}", task_id, work_path.display());
            return Ok(workspace);
        }

        if work_path.exists() {
            log::warn!("Removing stale workspace directory {}", work_path.display());
            fs::remove_dir_all(&work_path).map_err(|e| {
                HermesError::Workspace(format!("Failed to remove stale {}: {}", work_path.display(), e))
            })?;
        }
        self.vcs.worktree_prune(&self.repo_root)?;

        if self.vcs.branch_exists(&self.repo_root, &branch)? {
            log::debug!("Reusing existing branch {}", branch);
        } else {
            self.vcs.create_branch(&self.repo_root, &branch, &self.base_branch)?;
        }

        fs::create_dir_all(&self.worktree_dir)
            .map_err(|e| HermesError::Workspace(format!("Failed to create worktree dir: {}", e)))?;
        self.vcs.worktree_add(&self.repo_root, &work_path, &branch)?;

        log::info!("Created workspace for {} at {}", task_id, work_path.display());
        Ok(workspace)
    }

    /// Workspace that runs directly in the main repository.
    pub fn setup_shared(&self, task_id: &str) -> Workspace {
        Workspace {
            task_id: task_id.to_string(),
            base_path: self.repo_root.clone(),
            work_path: self.repo_root.clone(),
            branch: self.base_branch.clone(),
            shared: true,
        }
    }

    /// Files changed in the working tree relative to HEAD.
    pub fn get_changes(&self, ws: &Workspace) -> Result<Vec<String>> {
        self.vcs.changed_files(&ws.work_path, "HEAD")
    }

    /// Unified diff of the working tree relative to HEAD.
    pub fn get_diff(&self, ws: &Workspace) -> Result<String> {
        self.vcs.diff(&ws.work_path, "HEAD")
    }

    /// Files changed since the branch left the base branch.
    pub fn get_branch_changes(&self, ws: &Workspace) -> Result<Vec<String>> {
        let base = self.fork_point(ws)?;
        self.vcs.changed_files(&ws.work_path, &base)
    }

    /// Diff since the branch left the base branch.
    pub fn get_branch_diff(&self, ws: &Workspace) -> Result<String> {
        let base = self.fork_point(ws)?;
        self.vcs.diff(&ws.work_path, &base)
    }

    /// Stage everything and commit if anything is staged.
    pub fn commit_changes(&self, ws: &Workspace, message: &str) -> Result<bool> {
        self.vcs.stage_all(&ws.work_path)?;
        if !self.vcs.has_staged_changes(&ws.work_path)? {
            log::debug!("Nothing to commit for {}", ws.task_id);
            return Ok(false);
        }
        self.vcs.commit(&ws.work_path, message)?;
        Ok(true)
    }

    /// Remove the worktree. The branch is kept; see `delete_branch`.
    pub fn cleanup(&self, ws: &Workspace) -> Result<()> {
        if ws.shared {
            return Ok(());
        }

        if let Err(e) = self.vcs.worktree_remove(&self.repo_root, &ws.work_path) {
            log::warn!("worktree remove failed for {}: {}", ws.task_id, e);
            if ws.work_path.exists() {
                fs::remove_dir_all(&ws.work_path).map_err(|e| {
                    HermesError::Workspace(format!("Failed to delete {}: {}", ws.work_path.display(), e))
                })?;
            }
        }
        self.vcs.worktree_prune(&self.repo_root)?;
        log::debug!("Cleaned up workspace for {}", ws.task_id);
        Ok(())
    }

    pub fn delete_branch(&self, task_id: &str) -> Result<()> {
        self.vcs.delete_branch(&self.repo_root, &self.branch_name(task_id))
    }

    /// Worktrees registered under the worktree directory.
    pub fn list(&self) -> Result<Vec<WorktreeEntry>> {
        let root = canonical(&self.worktree_dir);
        Ok(self
            .vcs
            .worktree_list(&self.repo_root)?
            .into_iter()
            .filter(|e| canonical(&e.path).starts_with(&root))
            .collect())
    }

    fn fork_point(&self, ws: &Workspace) -> Result<String> {
        self.vcs.merge_base(&ws.work_path, &self.base_branch, "HEAD")
    }

    fn find_worktree(&self, path: &Path) -> Result<Option<WorktreeEntry>> {
        if !path.exists() {
            return Ok(None);
        }
        let target = canonical(path);
        Ok(self
            .vcs
            .worktree_list(&self.repo_root)?
            .into_iter()
            .find(|e| canonical(&e.path) == target))
    }

    /// Keep `dir` out of `git status` when it lives inside the repository.
    pub fn exclude(&self, dir: &Path) -> Result<()> {
        let dir = if dir.is_absolute() { dir.to_path_buf() } else { self.repo_root.join(dir) };
        let Ok(relative) = dir.strip_prefix(&self.repo_root) else {
            return Ok(());
        };
        let info_dir = self.repo_root.join(".git").join("info");
        if !self.repo_root.join(".git").is_dir() {
            log::debug!("{} is not a primary checkout; skipping exclude", self.repo_root.display());
            return Ok(());
        }

        let pattern = format!("/{}/", relative.to_string_lossy().trim_end_matches('/'));
        let exclude = info_dir.join("exclude");
        let existing = fs::read_to_string(&exclude).unwrap_or_default();
        if existing.lines().any(|l| l.trim() == pattern) {
            return Ok(());
        }

        fs::create_dir_all(&info_dir)?;
        let mut file = OpenOptions::new().create(true).append(true).open(&exclude)?;
        if !existing.is_empty() && !existing.ends_with('\n') {
            writeln!(file)?;
        }
        writeln!(file, "{}", pattern)?;
        Ok(())
    }
}

fn canonical(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worktree::GitCli;
    use crate::worktree::testing::{git, setup_test_repo};
    use tempfile::TempDir;

    fn manager(repo: &Path) -> WorkspaceManager {
        WorkspaceManager::new(Arc::new(GitCli::new()), repo, ".hermes/worktrees").unwrap()
    }

    #[test]
    fn test_base_branch_captured() {
        let (_temp, repo) = setup_test_repo();
        let m = manager(&repo);
        assert_eq!(m.base_branch(), "main");
        assert_eq!(m.worktree_dir(), repo.join(".hermes/worktrees"));
    }

    #[test]
    fn test_work_path_deterministic_and_distinct() {
        let (_temp, repo) = setup_test_repo();
        let m = manager(&repo);
        let a = m.work_path("feat/login");
        let b = m.work_path("feat-login");
        assert_eq!(a, m.work_path("feat/login"));
        assert_ne!(a, b);
        let name = a.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("feat-login-"));
        assert_eq!(name.len(), "feat-login-".len() + 8);
    }

    #[test]
    fn test_exclude_written_once() {
        let (_temp, repo) = setup_test_repo();
        manager(&repo);
        manager(&repo);
        let exclude = std::fs::read_to_string(repo.join(".git/info/exclude")).unwrap();
        assert_eq!(exclude.matches("/.hermes/worktrees/").count(), 1);
    }

    #[test]
    fn test_setup_creates_branch_and_worktree() {
        let (_temp, repo) = setup_test_repo();
        let m = manager(&repo);
        let ws = m.setup("T1").unwrap();

        assert_eq!(ws.branch, "hermes/T1");
        assert!(!ws.shared);
        assert!(ws.work_path.join("README.md").exists());
        assert!(m.vcs().branch_exists(&repo, "hermes/T1").unwrap());
        assert_eq!(m.list().unwrap().len(), 1);
    }

    #[test]
    fn test_setup_is_idempotent() {
        let (_temp, repo) = setup_test_repo();
        let m = manager(&repo);
        let first = m.setup("T1").unwrap();
        std::fs::write(first.work_path.join("wip.txt"), "keep me").unwrap();

        let second = m.setup("T1").unwrap();
        assert_eq!(first, second);
        assert!(second.work_path.join("wip.txt").exists());
    }

    #[test]
    fn test_setup_replaces_stale_directory() {
        let (_temp, repo) = setup_test_repo();
        let m = manager(&repo);
        let path = m.work_path("T1");
        std::fs::create_dir_all(&path).unwrap();
        std::fs::write(path.join("junk"), "x").unwrap();

        let ws = m.setup("T1").unwrap();
        assert!(!ws.work_path.join("junk").exists());
        assert!(ws.work_path.join("README.md").exists());
    }

    #[test]
    fn test_setup_reuses_existing_branch() {
        let (_temp, repo) = setup_test_repo();
        let m = manager(&repo);
        let ws = m.setup("T1").unwrap();
        std::fs::write(ws.work_path.join("done.txt"), "done\n").unwrap();
        assert!(m.commit_changes(&ws, "work").unwrap());
        m.cleanup(&ws).unwrap();

        let again = m.setup("T1").unwrap();
        assert!(again.work_path.join("done.txt").exists());
    }

    #[test]
    fn test_shared_workspace() {
        let (_temp, repo) = setup_test_repo();
        let m = manager(&repo);
        let ws = m.setup_shared("T1");
        assert!(ws.shared);
        assert_eq!(ws.work_path, repo);
        assert_eq!(ws.branch, "main");
        m.cleanup(&ws).unwrap();
        assert!(repo.exists());
    }

    #[test]
    fn test_changes_and_diff() {
        let (_temp, repo) = setup_test_repo();
        let m = manager(&repo);
        let ws = m.setup("T1").unwrap();
        std::fs::write(ws.work_path.join("lib.rs"), "fn main() {}\n").unwrap();

        assert_eq!(m.get_changes(&ws).unwrap(), vec!["lib.rs".to_string()]);
        assert!(m.get_diff(&ws).unwrap().contains("+fn main() {}"));
    }

    #[test]
    fn test_branch_changes_include_commits() {
        let (_temp, repo) = setup_test_repo();
        let m = manager(&repo);
        let ws = m.setup("T1").unwrap();
        std::fs::write(ws.work_path.join("a.txt"), "a\n").unwrap();
        m.commit_changes(&ws, "agent commit").unwrap();

        assert!(m.get_changes(&ws).unwrap().is_empty());
        assert_eq!(m.get_branch_changes(&ws).unwrap(), vec!["a.txt".to_string()]);
        assert!(m.get_branch_diff(&ws).unwrap().contains("+a"));
    }

    #[test]
    fn test_commit_changes_nothing_staged() {
        let (_temp, repo) = setup_test_repo();
        let m = manager(&repo);
        let ws = m.setup("T1").unwrap();
        assert!(!m.commit_changes(&ws, "empty").unwrap());
    }

    #[test]
    fn test_cleanup_keeps_branch() {
        let (_temp, repo) = setup_test_repo();
        let m = manager(&repo);
        let ws = m.setup("T1").unwrap();
        m.cleanup(&ws).unwrap();

        assert!(!ws.work_path.exists());
        assert!(m.vcs().branch_exists(&repo, "hermes/T1").unwrap());
        assert!(m.list().unwrap().is_empty());

        m.delete_branch("T1").unwrap();
        assert!(!m.vcs().branch_exists(&repo, "hermes/T1").unwrap());
    }

    #[test]
    fn test_cleanup_after_manual_delete() {
        let (_temp, repo) = setup_test_repo();
        let m = manager(&repo);
        let ws = m.setup("T1").unwrap();
        std::fs::remove_dir_all(&ws.work_path).unwrap();
        m.cleanup(&ws).unwrap();
        assert!(m.list().unwrap().is_empty());
    }

    #[test]
    fn test_external_worktree_dir_not_excluded() {
        let (_temp, repo) = setup_test_repo();
        let outside = TempDir::new().unwrap();
        let m = WorkspaceManager::new(Arc::new(GitCli::new()), &repo, outside.path()).unwrap();
        let ws = m.setup("T2").unwrap();
        assert!(ws.work_path.starts_with(outside.path()));
        let exclude = std::fs::read_to_string(repo.join(".git/info/exclude")).unwrap_or_default();
        assert!(!exclude.contains("hermes"));
        git(&repo, &["worktree", "remove", "--force", ws.work_path.to_str().unwrap()]);
    }
}
