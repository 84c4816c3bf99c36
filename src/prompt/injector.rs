//! Injects the task prompt into the agent's instruction file.
//!
//! The section lives between fixed HTML-comment markers so it can be
//! replaced or removed without touching the rest of the file.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;

pub const SECTION_START: &str = "<!-- hermes:task:start -->";
pub const SECTION_END: &str = "<!-- hermes:task:end -->";

/// Default instruction file read by the agent.
pub const DEFAULT_INSTRUCTION_FILE: &str = "CLAUDE.md";

#[derive(Debug, Clone)]
pub struct PromptInjector {
    file_name: String,
}

impl Default for PromptInjector {
    fn default() -> Self {
        Self::new(DEFAULT_INSTRUCTION_FILE)
    }
}

impl PromptInjector {
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
        }
    }

    pub fn path(&self, workdir: &Path) -> PathBuf {
        workdir.join(&self.file_name)
    }

    /// Write `prompt` into the marked section, replacing any previous one.
    ///
    /// The section is appended after a blank line, or forms the whole file
    /// when there was none, so `remove` can restore the original bytes.
    pub fn inject(&self, workdir: &Path, prompt: &str) -> Result<()> {
        let path = self.path(workdir);
        let original = if path.exists() {
            let existing = fs::read_to_string(&path)?;
            match split_section(&existing) {
                Some(Original::Created(rest)) if rest.is_empty() => None,
                Some(Original::Created(rest)) => Some(rest),
                Some(Original::Existing(text)) => Some(text),
                None => Some(existing),
            }
        } else {
            None
        };

        let section = format!("{}\n{}\n{}\n", SECTION_START, prompt.trim_end(), SECTION_END);
        let content = match original {
            Some(text) => format!("{}{}{}", text, SEPARATOR, section),
            None => section,
        };

        fs::write(&path, content)?;
        log::debug!("Injected task prompt into {}", path.display());
        Ok(())
    }

    /// Remove the marked section, leaving the file as it was before
    /// `inject`. A file that `inject` created is deleted.
    pub fn remove(&self, workdir: &Path) -> Result<()> {
        let path = self.path(workdir);
        if !path.exists() {
            return Ok(());
        }
        let existing = fs::read_to_string(&path)?;
        match split_section(&existing) {
            None => {}
            Some(Original::Created(rest)) if rest.is_empty() => fs::remove_file(&path)?,
            Some(Original::Created(rest)) | Some(Original::Existing(rest)) => fs::write(&path, rest)?,
        }
        Ok(())
    }
}

const SEPARATOR: &str = "\n\n";

/// File content with the injected section cut out.
enum Original {
    /// The section opened the file, so `inject` created it
    Created(String),
    Existing(String),
}

fn split_section(content: &str) -> Option<Original> {
    let start = content.find(SECTION_START)?;
    let mut end = content[start..]
        .find(SECTION_END)
        .map(|i| start + i + SECTION_END.len())
        .unwrap_or(content.len());
    if content[end..].starts_with('\n') {
        end += 1;
    }

    let tail = &content[end..];
    if start == 0 {
        return Some(Original::Created(tail.to_string()));
    }
    let head = &content[..start];
    let head = head.strip_suffix(SEPARATOR).unwrap_or(head);
    Some(Original::Existing(format!("{}{}", head, tail)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_inject_creates_and_remove_deletes() {
        let dir = TempDir::new().unwrap();
        let injector = PromptInjector::default();

        injector.inject(dir.path(), "Do the thing").unwrap();
        let content = std::fs::read_to_string(dir.path().join("CLAUDE.md")).unwrap();
        assert!(content.contains(SECTION_START));
        assert!(content.contains("Do the thing"));

        injector.remove(dir.path()).unwrap();
        assert!(!dir.path().join("CLAUDE.md").exists());
    }

    #[test]
    fn test_existing_content_preserved() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("CLAUDE.md");
        std::fs::write(&path, "# Project rules\n\nUse tabs.\n").unwrap();
        let injector = PromptInjector::default();

        injector.inject(dir.path(), "Task one").unwrap();
        injector.inject(dir.path(), "Task two").unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.matches(SECTION_START).count(), 1);
        assert!(content.contains("Task two"));
        assert!(!content.contains("Task one"));
        assert!(content.starts_with("# Project rules"));

        injector.remove(dir.path()).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# Project rules\n\nUse tabs.\n");
    }

    #[test]
    fn test_round_trip_restores_exact_bytes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("CLAUDE.md");
        let injector = PromptInjector::default();

        for original in ["rules", "rules\n", "", "  \n", "a\n\n\nb"] {
            std::fs::write(&path, original).unwrap();
            injector.inject(dir.path(), "Task").unwrap();
            injector.inject(dir.path(), "Task, second attempt").unwrap();
            injector.remove(dir.path()).unwrap();
            assert_eq!(std::fs::read_to_string(&path).unwrap(), original);
        }
    }

    #[test]
    fn test_remove_without_section_is_noop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("AGENTS.md");
        std::fs::write(&path, "notes\n").unwrap();
        let injector = PromptInjector::new("AGENTS.md");
        injector.remove(dir.path()).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "notes\n");
    }
}
