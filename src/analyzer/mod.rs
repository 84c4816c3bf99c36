//! Response analyzer: agent transcript -> progress/completion signal.
//!
//! A structured status block wins over everything. Without one, heuristics
//! apply in a fixed order: no-work phrase, completion keywords, test-only
//! detection, error counting, then the progress decision.

mod patterns;
mod response;

pub use response::{AnalysisError, AnalysisResult, AnalysisSource, STATUS_END, STATUS_START, StatusBlock, WorkType};

use patterns::{COMPLETION_KEYWORDS, IMPLEMENTATION, NO_WORK_PHRASES, TEST_COMMAND, contains_any};

/// More "error" occurrences than this marks the loop as stuck.
pub const STUCK_ERROR_THRESHOLD: usize = 5;

/// Transcripts shorter than this carry no progress on their own.
pub const MIN_PROGRESS_CHARS: usize = 100;

const BLOCK_CONFIDENCE: f64 = 0.5;
const COMPLETE_CONFIDENCE: f64 = 0.9;
const EXIT_CONFIDENCE: f64 = 1.0;
const NO_WORK_BOOST: f64 = 0.3;
const COMPLETION_BOOST: f64 = 0.4;

/// Stateless transcript analyzer.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseAnalyzer;

impl ResponseAnalyzer {
    pub fn new() -> Self {
        Self
    }

    pub fn analyze(&self, output: &str) -> AnalysisResult {
        let error_count = count_errors(output);

        match StatusBlock::extract(output) {
            Ok(Some(block)) => Self::from_block(block, error_count),
            Ok(None) => Self::heuristic(output, error_count),
            Err(e) => {
                log::debug!("Malformed status block ({}), using heuristics", e);
                Self::heuristic(output, error_count)
            }
        }
    }

    fn from_block(block: StatusBlock, error_count: usize) -> AnalysisResult {
        let exit_signal = block.exit_signal.unwrap_or(false);
        let status = block.status.as_deref();

        let (is_complete, confidence) = if exit_signal {
            (true, EXIT_CONFIDENCE)
        } else if status == Some("COMPLETE") {
            (true, COMPLETE_CONFIDENCE)
        } else {
            (false, BLOCK_CONFIDENCE)
        };

        AnalysisResult {
            has_progress: status != Some("BLOCKED"),
            is_complete,
            is_test_only: block.work_type == Some(WorkType::Testing),
            is_stuck: error_count > STUCK_ERROR_THRESHOLD,
            exit_signal,
            confidence: confidence.clamp(0.0, 1.0),
            error_count,
            work_type: block.work_type,
            recommendation: block.recommendation,
            source: AnalysisSource::StatusBlock,
        }
    }

    fn heuristic(output: &str, error_count: usize) -> AnalysisResult {
        let lower = output.to_lowercase();
        let mut confidence = 0.0;

        let no_work = contains_any(&lower, NO_WORK_PHRASES);
        if no_work {
            confidence += NO_WORK_BOOST;
        }

        let is_complete = contains_any(&lower, COMPLETION_KEYWORDS);
        if is_complete {
            confidence += COMPLETION_BOOST;
        }

        let implemented = IMPLEMENTATION.is_match(output);
        let is_test_only = TEST_COMMAND.is_match(output) && !implemented;

        let has_progress = if no_work {
            false
        } else if is_complete || implemented {
            true
        } else {
            output.trim().chars().count() >= MIN_PROGRESS_CHARS && !is_test_only
        };

        AnalysisResult {
            has_progress,
            is_complete,
            is_test_only,
            is_stuck: error_count > STUCK_ERROR_THRESHOLD,
            exit_signal: no_work,
            confidence: f64::clamp(confidence, 0.0, 1.0),
            error_count,
            work_type: None,
            recommendation: None,
            source: AnalysisSource::Heuristic,
        }
    }
}

fn count_errors(output: &str) -> usize {
    output.to_lowercase().matches("error").count()
}
