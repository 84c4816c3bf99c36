//! Version-control capability and its `git` subprocess implementation.
//!
//! Everything above this layer talks to `VersionControl`; only `GitCli`
//! knows about command lines. Exit status and stderr are the whole contract.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use crate::error::{HermesError, Result};

/// Result of merging one branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// A merge commit was created
    Merged,
    /// Nothing to merge
    AlreadyUpToDate,
    /// Git stopped with these files unmerged; the merge is still in progress
    Conflicted(Vec<String>),
}

/// One entry of `git worktree list`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeEntry {
    pub path: PathBuf,
    pub branch: Option<String>,
}

/// Narrow version-control surface used by workspaces and merges.
pub trait VersionControl: Send + Sync + fmt::Debug {
    fn current_branch(&self, dir: &Path) -> Result<String>;
    fn branch_exists(&self, repo: &Path, branch: &str) -> Result<bool>;
    fn create_branch(&self, repo: &Path, branch: &str, from: &str) -> Result<()>;
    fn delete_branch(&self, repo: &Path, branch: &str) -> Result<()>;

    fn worktree_add(&self, repo: &Path, path: &Path, branch: &str) -> Result<()>;
    fn worktree_remove(&self, repo: &Path, path: &Path) -> Result<()>;
    fn worktree_prune(&self, repo: &Path) -> Result<()>;
    fn worktree_list(&self, repo: &Path) -> Result<Vec<WorktreeEntry>>;

    fn stage_all(&self, dir: &Path) -> Result<()>;
    fn has_staged_changes(&self, dir: &Path) -> Result<bool>;
    fn commit(&self, dir: &Path, message: &str) -> Result<()>;

    /// Files changed in the working tree relative to `against`, untracked included.
    fn changed_files(&self, dir: &Path, against: &str) -> Result<Vec<String>>;
    /// Zero-context unified diff of the working tree relative to `against`.
    fn diff(&self, dir: &Path, against: &str) -> Result<String>;
    fn merge_base(&self, dir: &Path, a: &str, b: &str) -> Result<String>;

    /// `--no-ff` merge of `branch` into the branch checked out at `repo`.
    fn merge(&self, repo: &Path, branch: &str, message: &str) -> Result<MergeOutcome>;
    fn merge_abort(&self, repo: &Path) -> Result<()>;
    fn conflicted_files(&self, repo: &Path) -> Result<Vec<String>>;

    fn rev_parse(&self, dir: &Path, rev: &str) -> Result<String>;
    fn reset_hard(&self, dir: &Path, rev: &str) -> Result<()>;
    fn checkout(&self, dir: &Path, branch: &str) -> Result<()>;
    /// File content at a revision, `None` if absent there.
    fn show_file(&self, dir: &Path, rev: &str, path: &str) -> Result<Option<String>>;
    fn write_and_stage(&self, dir: &Path, path: &str, content: &str) -> Result<()>;
}

/// `VersionControl` backed by the `git` binary.
#[derive(Debug, Clone, Default)]
pub struct GitCli;

impl GitCli {
    pub fn new() -> Self {
        Self
    }

    fn output(&self, dir: &Path, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .map_err(|e| HermesError::Workspace(format!("Failed to execute git: {}", e)))
    }

    /// Run git and return stdout, failing on a non-zero exit.
    fn run(&self, dir: &Path, args: &[&str]) -> Result<String> {
        let output = self.output(dir, args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(HermesError::Workspace(format!(
                "git {} failed: {}",
                args.first().copied().unwrap_or_default(),
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn lines(stdout: &str) -> Vec<String> {
        stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect()
    }

    fn path_arg(path: &Path) -> Result<&str> {
        path.to_str()
            .ok_or_else(|| HermesError::Workspace(format!("Non UTF-8 path: {}", path.display())))
    }

    fn intent_to_add(&self, dir: &Path) -> Result<()> {
        self.run(dir, &["add", "--intent-to-add", "-A"])?;
        Ok(())
    }
}

impl VersionControl for GitCli {
    fn current_branch(&self, dir: &Path) -> Result<String> {
        Ok(self.run(dir, &["rev-parse", "--abbrev-ref", "HEAD"])?.trim().to_string())
    }

    fn branch_exists(&self, repo: &Path, branch: &str) -> Result<bool> {
        let refname = format!("refs/heads/{}", branch);
        let output = self.output(repo, &["show-ref", "--verify", "--quiet", &refname])?;
        Ok(output.status.success())
    }

    fn create_branch(&self, repo: &Path, branch: &str, from: &str) -> Result<()> {
        self.run(repo, &["branch", branch, from])?;
        Ok(())
    }

    fn delete_branch(&self, repo: &Path, branch: &str) -> Result<()> {
        self.run(repo, &["branch", "-D", branch])?;
        Ok(())
    }

    fn worktree_add(&self, repo: &Path, path: &Path, branch: &str) -> Result<()> {
        self.run(repo, &["worktree", "add", Self::path_arg(path)?, branch])?;
        Ok(())
    }

    fn worktree_remove(&self, repo: &Path, path: &Path) -> Result<()> {
        self.run(repo, &["worktree", "remove", "--force", Self::path_arg(path)?])?;
        Ok(())
    }

    fn worktree_prune(&self, repo: &Path) -> Result<()> {
        self.run(repo, &["worktree", "prune"])?;
        Ok(())
    }

    fn worktree_list(&self, repo: &Path) -> Result<Vec<WorktreeEntry>> {
        let stdout = self.run(repo, &["worktree", "list", "--porcelain"])?;
        let mut entries: Vec<WorktreeEntry> = Vec::new();

        for line in stdout.lines() {
            if let Some(path) = line.strip_prefix("worktree ") {
                entries.push(WorktreeEntry {
                    path: PathBuf::from(path),
                    branch: None,
                });
            } else if let Some(refname) = line.strip_prefix("branch ")
                && let Some(entry) = entries.last_mut()
            {
                entry.branch = Some(refname.trim_start_matches("refs/heads/").to_string());
            }
        }

        Ok(entries)
    }

    fn stage_all(&self, dir: &Path) -> Result<()> {
        self.run(dir, &["add", "-A"])?;
        Ok(())
    }

    fn has_staged_changes(&self, dir: &Path) -> Result<bool> {
        let output = self.output(dir, &["diff", "--cached", "--quiet"])?;
        match output.status.code() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(HermesError::Workspace(format!(
                "git diff --cached failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ))),
        }
    }

    fn commit(&self, dir: &Path, message: &str) -> Result<()> {
        self.run(dir, &["commit", "--no-verify", "-m", message])?;
        Ok(())
    }

    fn changed_files(&self, dir: &Path, against: &str) -> Result<Vec<String>> {
        self.intent_to_add(dir)?;
        let stdout = self.run(dir, &["diff", "--name-only", against])?;
        Ok(Self::lines(&stdout))
    }

    fn diff(&self, dir: &Path, against: &str) -> Result<String> {
        self.intent_to_add(dir)?;
        self.run(dir, &["diff", "-U0", "--no-color", "--no-ext-diff", against])
    }

    fn merge_base(&self, dir: &Path, a: &str, b: &str) -> Result<String> {
        Ok(self.run(dir, &["merge-base", a, b])?.trim().to_string())
    }

    fn merge(&self, repo: &Path, branch: &str, message: &str) -> Result<MergeOutcome> {
        let output = self.output(repo, &["merge", "--no-ff", "--no-edit", "-m", message, branch])?;
        let stdout = String::from_utf8_lossy(&output.stdout);

        if output.status.success() {
            if stdout.contains("Already up to date") || stdout.contains("Already up-to-date") {
                return Ok(MergeOutcome::AlreadyUpToDate);
            }
            return Ok(MergeOutcome::Merged);
        }

        let files = self.conflicted_files(repo)?;
        if files.is_empty() {
            return Err(HermesError::Workspace(format!(
                "git merge {} failed: {}",
                branch,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(MergeOutcome::Conflicted(files))
    }

    fn merge_abort(&self, repo: &Path) -> Result<()> {
        self.run(repo, &["merge", "--abort"])?;
        Ok(())
    }

    fn conflicted_files(&self, repo: &Path) -> Result<Vec<String>> {
        let stdout = self.run(repo, &["diff", "--name-only", "--diff-filter=U"])?;
        Ok(Self::lines(&stdout))
    }

    fn rev_parse(&self, dir: &Path, rev: &str) -> Result<String> {
        Ok(self.run(dir, &["rev-parse", rev])?.trim().to_string())
    }

    fn reset_hard(&self, dir: &Path, rev: &str) -> Result<()> {
        self.run(dir, &["reset", "--hard", rev])?;
        Ok(())
    }

    fn checkout(&self, dir: &Path, branch: &str) -> Result<()> {
        self.run(dir, &["checkout", branch])?;
        Ok(())
    }

    fn show_file(&self, dir: &Path, rev: &str, path: &str) -> Result<Option<String>> {
        let spec = format!("{}:{}", rev, path);
        let output = self.output(dir, &["show", &spec])?;
        if !output.status.success() {
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&output.stdout).into_owned()))
    }

    fn write_and_stage(&self, dir: &Path, path: &str, content: &str) -> Result<()> {
        let target = dir.join(path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, content)?;
        self.run(dir, &["add", "--", path])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worktree::testing::{commit_file, git, setup_test_repo};

    #[test]
    fn test_current_branch() {
        let (_temp, repo) = setup_test_repo();
        assert_eq!(GitCli::new().current_branch(&repo).unwrap(), "main");
    }

    #[test]
    fn test_branch_lifecycle() {
        let (_temp, repo) = setup_test_repo();
        let vcs = GitCli::new();
        assert!(!vcs.branch_exists(&repo, "hermes/T1").unwrap());
        vcs.create_branch(&repo, "hermes/T1", "main").unwrap();
        assert!(vcs.branch_exists(&repo, "hermes/T1").unwrap());
        vcs.delete_branch(&repo, "hermes/T1").unwrap();
        assert!(!vcs.branch_exists(&repo, "hermes/T1").unwrap());
    }

    #[test]
    fn test_changed_files_include_untracked() {
        let (_temp, repo) = setup_test_repo();
        let vcs = GitCli::new();
        std::fs::write(repo.join("README.md"), "# Changed\n").unwrap();
        std::fs::write(repo.join("new.txt"), "hello\n").unwrap();

        let files = vcs.changed_files(&repo, "HEAD").unwrap();
        assert_eq!(files, vec!["README.md".to_string(), "new.txt".to_string()]);
        let diff = vcs.diff(&repo, "HEAD").unwrap();
        assert!(diff.contains("+hello"));
        assert!(diff.contains("@@ -1 +1 @@"));
    }

    #[test]
    fn test_has_staged_changes() {
        let (_temp, repo) = setup_test_repo();
        let vcs = GitCli::new();
        assert!(!vcs.has_staged_changes(&repo).unwrap());
        std::fs::write(repo.join("a.txt"), "a\n").unwrap();
        vcs.stage_all(&repo).unwrap();
        assert!(vcs.has_staged_changes(&repo).unwrap());
    }

    #[test]
    fn test_merge_clean_and_up_to_date() {
        let (_temp, repo) = setup_test_repo();
        let vcs = GitCli::new();
        git(&repo, &["checkout", "-b", "feature"]);
        commit_file(&repo, "feature.txt", "feature\n", "add feature");
        git(&repo, &["checkout", "main"]);

        assert_eq!(vcs.merge(&repo, "feature", "merge feature").unwrap(), MergeOutcome::Merged);
        assert!(repo.join("feature.txt").exists());
        assert_eq!(
            vcs.merge(&repo, "feature", "merge feature").unwrap(),
            MergeOutcome::AlreadyUpToDate
        );
    }

    #[test]
    fn test_merge_conflict_and_abort() {
        let (_temp, repo) = setup_test_repo();
        let vcs = GitCli::new();
        git(&repo, &["checkout", "-b", "other"]);
        commit_file(&repo, "README.md", "# Other\n", "other edit");
        git(&repo, &["checkout", "main"]);
        commit_file(&repo, "README.md", "# Main\n", "main edit");
        let head = vcs.rev_parse(&repo, "HEAD").unwrap();

        let outcome = vcs.merge(&repo, "other", "merge other").unwrap();
        assert_eq!(outcome, MergeOutcome::Conflicted(vec!["README.md".to_string()]));
        vcs.merge_abort(&repo).unwrap();
        assert_eq!(vcs.rev_parse(&repo, "HEAD").unwrap(), head);
        assert_eq!(std::fs::read_to_string(repo.join("README.md")).unwrap(), "# Main\n");
    }

    #[test]
    fn test_show_file() {
        let (_temp, repo) = setup_test_repo();
        let vcs = GitCli::new();
        assert_eq!(vcs.show_file(&repo, "HEAD", "README.md").unwrap().as_deref(), Some("# Test\n"));
        assert_eq!(vcs.show_file(&repo, "HEAD", "missing.rs").unwrap(), None);
    }

    #[test]
    fn test_worktree_list() {
        let (temp, repo) = setup_test_repo();
        let vcs = GitCli::new();
        let wt = temp.path().join("wt");
        vcs.create_branch(&repo, "hermes/X", "main").unwrap();
        vcs.worktree_add(&repo, &wt, "hermes/X").unwrap();

        let entries = vcs.worktree_list(&repo).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].branch.as_deref(), Some("hermes/X"));

        vcs.worktree_remove(&repo, &wt).unwrap();
        assert_eq!(vcs.worktree_list(&repo).unwrap().len(), 1);
    }
}
