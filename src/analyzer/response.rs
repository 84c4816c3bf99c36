//! Analysis result types and the structured status block.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const STATUS_START: &str = "---HERMES_STATUS---";
pub const STATUS_END: &str = "---END_HERMES_STATUS---";

/// Where a result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisSource {
    StatusBlock,
    Heuristic,
}

/// `WORK_TYPE:` values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkType {
    Implementation,
    Testing,
    Documentation,
    Refactoring,
    Other(String),
}

impl WorkType {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "IMPLEMENTATION" => WorkType::Implementation,
            "TESTING" => WorkType::Testing,
            "DOCUMENTATION" => WorkType::Documentation,
            "REFACTORING" => WorkType::Refactoring,
            other => WorkType::Other(other.to_string()),
        }
    }
}

impl fmt::Display for WorkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkType::Implementation => f.write_str("IMPLEMENTATION"),
            WorkType::Testing => f.write_str("TESTING"),
            WorkType::Documentation => f.write_str("DOCUMENTATION"),
            WorkType::Refactoring => f.write_str("REFACTORING"),
            WorkType::Other(s) => f.write_str(s),
        }
    }
}

/// Structured signal derived from one agent transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub has_progress: bool,
    pub is_complete: bool,
    pub is_test_only: bool,
    pub is_stuck: bool,
    pub exit_signal: bool,
    /// Always within [0, 1]
    pub confidence: f64,
    pub error_count: usize,
    pub work_type: Option<WorkType>,
    pub recommendation: Option<String>,
    pub source: AnalysisSource,
}

/// Malformed status block; the analyzer falls back to heuristics.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnalysisError {
    #[error("status block start marker without end marker")]
    Unterminated,

    #[error("status block contains no recognised field")]
    Empty,
}

/// Parsed `---HERMES_STATUS---` block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusBlock {
    pub status: Option<String>,
    pub exit_signal: Option<bool>,
    pub work_type: Option<WorkType>,
    pub recommendation: Option<String>,
}

impl StatusBlock {
    /// Extract the block from a transcript.
    ///
    /// `Ok(None)` when no start marker is present.
    pub fn extract(output: &str) -> Result<Option<Self>, AnalysisError> {
        let Some(start) = output.find(STATUS_START) else {
            return Ok(None);
        };
        let body_start = start + STATUS_START.len();
        let end = output[body_start..]
            .find(STATUS_END)
            .ok_or(AnalysisError::Unterminated)?;
        let body = &output[body_start..body_start + end];

        let mut block = StatusBlock::default();
        let mut recognised = false;
        for line in body.lines() {
            let Some((key, value)) = line.trim().split_once(':') else {
                continue;
            };
            let value = value.trim();
            match key.trim().to_ascii_uppercase().as_str() {
                "STATUS" => block.status = Some(value.to_ascii_uppercase()),
                "EXIT_SIGNAL" => block.exit_signal = Some(value.eq_ignore_ascii_case("true")),
                "WORK_TYPE" => block.work_type = Some(WorkType::parse(value)),
                "RECOMMENDATION" => block.recommendation = Some(value.to_string()),
                _ => continue,
            }
            recognised = true;
        }

        if !recognised {
            return Err(AnalysisError::Empty);
        }
        Ok(Some(block))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_absent() {
        assert_eq!(StatusBlock::extract("plain transcript").unwrap(), None);
    }

    #[test]
    fn test_extract_fields() {
        let output = "work...\n---HERMES_STATUS---\nSTATUS: in_progress\nEXIT_SIGNAL: false\nWORK_TYPE: testing\nRECOMMENDATION: add more cases\n---END_HERMES_STATUS---\n";
        let block = StatusBlock::extract(output).unwrap().unwrap();
        assert_eq!(block.status.as_deref(), Some("IN_PROGRESS"));
        assert_eq!(block.exit_signal, Some(false));
        assert_eq!(block.work_type, Some(WorkType::Testing));
        assert_eq!(block.recommendation.as_deref(), Some("add more cases"));
    }

    #[test]
    fn test_unterminated() {
        let output = "---HERMES_STATUS---\nSTATUS: COMPLETE\n";
        assert_eq!(StatusBlock::extract(output), Err(AnalysisError::Unterminated));
    }

    #[test]
    fn test_no_fields() {
        let output = "---HERMES_STATUS---\nhello\n---END_HERMES_STATUS---";
        assert_eq!(StatusBlock::extract(output), Err(AnalysisError::Empty));
    }

    #[test]
    fn test_work_type_other() {
        assert_eq!(WorkType::parse("planning"), WorkType::Other("PLANNING".to_string()));
        assert_eq!(WorkType::Refactoring.to_string(), "REFACTORING");
    }
}
