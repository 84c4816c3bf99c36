//! Git worktree management for task isolation.
//!
//! Each task gets its own worktree on a dedicated `hermes/<task>` branch, so
//! concurrent agents never share a working tree.

mod manager;
mod vcs;

pub use manager::{BRANCH_PREFIX, Workspace, WorkspaceManager};
pub use vcs::{GitCli, MergeOutcome, VersionControl, WorktreeEntry};

#[cfg(test)]
pub(crate) mod testing {
    use std::path::{Path, PathBuf};
    use std::process::Command;

    use tempfile::TempDir;

    pub fn git(dir: &Path, args: &[&str]) -> String {
        let output = Command::new("git").args(args).current_dir(dir).output().unwrap();
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).into_owned()
    }

    pub fn commit_file(dir: &Path, path: &str, content: &str, message: &str) {
        let target = dir.join(path);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(target, content).unwrap();
        git(dir, &["add", "-A"]);
        git(dir, &["commit", "-m", message]);
    }

    /// Temp repo on `main` with one commit of `README.md`.
    pub fn setup_test_repo() -> (TempDir, PathBuf) {
        let temp = TempDir::new().unwrap();
        let repo = temp.path().join("repo");
        std::fs::create_dir(&repo).unwrap();

        git(&repo, &["init", "--quiet"]);
        git(&repo, &["symbolic-ref", "HEAD", "refs/heads/main"]);
        git(&repo, &["config", "user.email", "test@test.com"]);
        git(&repo, &["config", "user.name", "Test"]);
        git(&repo, &["config", "commit.gpgsign", "false"]);
        commit_file(&repo, "README.md", "# Test\n", "Initial commit");

        (temp, repo)
    }
}
