//! Phrase and regex tables used by the heuristic path.

use std::sync::LazyLock;

use regex::Regex;

/// Agent says there was nothing left to do.
pub const NO_WORK_PHRASES: &[&str] = &[
    "nothing to do",
    "already implemented",
    "no changes needed",
    "no changes are needed",
    "already complete",
    "no work remaining",
];

/// Agent claims the task is finished.
pub const COMPLETION_KEYWORDS: &[&str] = &[
    "all tasks complete",
    "task complete",
    "completed successfully",
    "finished",
    "done",
    "ready for review",
];

/// Test runner invocations.
pub static TEST_COMMAND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(cargo test|cargo nextest|npm (run )?test|yarn test|pnpm test|pytest|go test|jest|vitest|mvn test|gradle test|make test|running \d+ tests?)\b",
    )
    .unwrap()
});

/// Evidence that code was written: a creation verb aimed at a code artifact.
pub static IMPLEMENTATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(creat(e|ed|ing)|implement(ed|ing)|add(ed|ing)|modif(ied|ying)|updat(ed|ing)|wr(ote|iting)|refactor(ed|ing))\b[^\n]{0,40}?\b(files?|functions?|methods?|structs?|class(es)?|modules?|components?|endpoints?|types?|traits?)\b",
    )
    .unwrap()
});

/// Lowercase containment check for any phrase in `table`.
pub fn contains_any(lower: &str, table: &[&str]) -> bool {
    table.iter().any(|p| contains_phrase(lower, p))
}

/// Word-bounded phrase match on already-lowercased text.
fn contains_phrase(lower: &str, phrase: &str) -> bool {
    let is_word = |c: char| c.is_alphanumeric() || c == '_';
    lower.match_indices(phrase).any(|(start, _)| {
        let before = lower[..start].chars().next_back();
        let after = lower[start + phrase.len()..].chars().next();
        !before.is_some_and(is_word) && !after.is_some_and(is_word)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phrase_word_bounded() {
        assert!(contains_any("we are done.", COMPLETION_KEYWORDS));
        assert!(!contains_any("abandoned the approach", COMPLETION_KEYWORDS));
        assert!(!contains_any("undone changes", COMPLETION_KEYWORDS));
    }

    #[test]
    fn test_test_command() {
        assert!(TEST_COMMAND.is_match("$ cargo test --all"));
        assert!(TEST_COMMAND.is_match("running 12 tests"));
        assert!(TEST_COMMAND.is_match("npm run test"));
        assert!(!TEST_COMMAND.is_match("testing the waters"));
    }

    #[test]
    fn test_implementation() {
        assert!(IMPLEMENTATION.is_match("Created the file src/auth.rs"));
        assert!(IMPLEMENTATION.is_match("I implemented a new function for parsing"));
        assert!(IMPLEMENTATION.is_match("added login endpoint"));
        assert!(!IMPLEMENTATION.is_match("ran the suite again"));
    }
}
