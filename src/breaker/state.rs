//! Persisted breaker records.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Breaker position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation
    #[default]
    Closed,
    /// Progress has stalled; one more empty loop opens the circuit
    HalfOpen,
    /// Execution halted until an explicit reset
    Open,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::HalfOpen => "HALF_OPEN",
            CircuitState::Open => "OPEN",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Breaker state, one per project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerState {
    pub state: CircuitState,
    pub consecutive_no_progress: u32,
    pub consecutive_errors: u32,
    pub last_progress_loop: u64,
    pub current_loop: u64,
    pub total_opens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub last_updated: DateTime<Utc>,
}

impl Default for BreakerState {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_no_progress: 0,
            consecutive_errors: 0,
            last_progress_loop: 0,
            current_loop: 0,
            total_opens: 0,
            reason: None,
            last_updated: Utc::now(),
        }
    }
}

/// Audit entry for one state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerTransition {
    pub timestamp: DateTime<Utc>,
    pub loop_number: u64,
    pub from: CircuitState,
    pub to: CircuitState,
    pub reason: String,
    pub had_progress: bool,
    pub had_error: bool,
}

/// Thresholds for the breaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive no-progress loops before CLOSED -> HALF_OPEN
    pub half_open_threshold: u32,
    /// Consecutive no-progress loops before -> OPEN
    pub open_threshold: u32,
    /// Audit entries retained
    pub history_limit: usize,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            half_open_threshold: 2,
            open_threshold: 3,
            history_limit: 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_serde_names() {
        assert_eq!(serde_json::to_string(&CircuitState::HalfOpen).unwrap(), "\"HALF_OPEN\"");
        let parsed: CircuitState = serde_json::from_str("\"OPEN\"").unwrap();
        assert_eq!(parsed, CircuitState::Open);
    }

    #[test]
    fn test_config_partial_yaml() {
        let config: BreakerConfig = serde_yaml::from_str("open_threshold: 5").unwrap();
        assert_eq!(config.open_threshold, 5);
        assert_eq!(config.half_open_threshold, 2);
        assert_eq!(config.history_limit, 100);
    }
}
