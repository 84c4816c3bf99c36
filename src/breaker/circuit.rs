//! Progress/stall circuit breaker.
//!
//! Each agent loop reports whether it made progress and whether it errored.
//! Consecutive empty loops move the breaker CLOSED -> HALF_OPEN -> OPEN.
//! OPEN halts execution until `reset` is called.

use std::fmt;

use chrono::Utc;

use crate::breaker::state::{BreakerConfig, BreakerState, BreakerTransition, CircuitState};
use crate::error::Result;
use crate::store::StateDir;

const STATE_RECORD: &str = "breaker";
const HISTORY_RECORD: &str = "breaker_history";

/// Snapshot for display.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerStatus {
    pub state: CircuitState,
    pub consecutive_no_progress: u32,
    pub consecutive_errors: u32,
    pub last_progress_loop: u64,
    pub current_loop: u64,
    pub total_opens: u32,
    pub reason: Option<String>,
}

impl fmt::Display for BreakerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (loop {}, no progress {}, errors {}, last progress at loop {}, opened {} times)",
            self.state,
            self.current_loop,
            self.consecutive_no_progress,
            self.consecutive_errors,
            self.last_progress_loop,
            self.total_opens
        )?;
        if let Some(reason) = &self.reason {
            write!(f, ": {}", reason)?;
        }
        Ok(())
    }
}

/// Circuit breaker, optionally persisted to a state directory.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    state: BreakerState,
    history: Vec<BreakerTransition>,
    store: Option<StateDir>,
}

impl CircuitBreaker {
    /// In-memory breaker starting CLOSED.
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: BreakerState::default(),
            history: Vec::new(),
            store: None,
        }
    }

    /// Breaker backed by `<state_dir>/breaker.json` and
    /// `<state_dir>/breaker_history.json`, resuming any saved state.
    pub fn open(config: BreakerConfig, store: StateDir) -> Result<Self> {
        let state: BreakerState = store.load(STATE_RECORD)?.unwrap_or_default();
        let history: Vec<BreakerTransition> = store.load(HISTORY_RECORD)?.unwrap_or_default();
        log::debug!("Breaker loaded: {} at loop {}", state.state, state.current_loop);
        Ok(Self {
            config,
            state,
            history,
            store: Some(store),
        })
    }

    pub fn state(&self) -> CircuitState {
        self.state.state
    }

    pub fn record(&self) -> &BreakerState {
        &self.state
    }

    pub fn history(&self) -> &[BreakerTransition] {
        &self.history
    }

    /// True unless the circuit is OPEN.
    pub fn can_execute(&self) -> bool {
        self.state.state != CircuitState::Open
    }

    pub fn should_halt(&self) -> bool {
        !self.can_execute()
    }

    pub fn status(&self) -> BreakerStatus {
        BreakerStatus {
            state: self.state.state,
            consecutive_no_progress: self.state.consecutive_no_progress,
            consecutive_errors: self.state.consecutive_errors,
            last_progress_loop: self.state.last_progress_loop,
            current_loop: self.state.current_loop,
            total_opens: self.state.total_opens,
            reason: self.state.reason.clone(),
        }
    }

    /// Record the outcome of one loop and return the resulting state.
    ///
    /// Results arriving while OPEN still update the counters but never
    /// leave OPEN; only `reset` does that.
    pub fn add_loop_result(&mut self, has_progress: bool, has_error: bool, loop_number: u64) -> Result<CircuitState> {
        let from = self.state.state;
        self.state.current_loop = loop_number;

        if has_error {
            self.state.consecutive_errors += 1;
        } else {
            self.state.consecutive_errors = 0;
        }

        if has_progress {
            self.state.consecutive_no_progress = 0;
            self.state.last_progress_loop = loop_number;
        } else {
            self.state.consecutive_no_progress += 1;
        }

        let no_progress = self.state.consecutive_no_progress;
        let open_at = self.config.open_threshold.max(1);
        let to = match from {
            CircuitState::Open => CircuitState::Open,
            _ if has_progress => CircuitState::Closed,
            _ if no_progress >= open_at => CircuitState::Open,
            CircuitState::Closed if no_progress >= self.config.half_open_threshold => CircuitState::HalfOpen,
            other => other,
        };

        if to != from {
            let reason = match to {
                CircuitState::Closed => format!("Progress detected at loop {}", loop_number),
                CircuitState::HalfOpen => format!("No progress in {} consecutive loops", no_progress),
                CircuitState::Open => format!("No progress in {} consecutive loops, halting", no_progress),
            };
            if to == CircuitState::Open {
                self.state.total_opens += 1;
                log::warn!("Circuit breaker OPEN at loop {}: {}", loop_number, reason);
            } else {
                log::info!("Circuit breaker {} -> {}: {}", from, to, reason);
            }
            self.state.state = to;
            self.state.reason = Some(reason.clone());
            self.push_transition(loop_number, from, to, reason, has_progress, has_error);
        }

        self.state.last_updated = Utc::now();
        self.persist()?;
        Ok(to)
    }

    /// Force CLOSED and zero the counters. `total_opens` is kept.
    pub fn reset(&mut self, reason: &str) -> Result<()> {
        let from = self.state.state;
        let loop_number = self.state.current_loop;
        let reason = format!("Manual reset: {}", reason);

        if from != CircuitState::Closed {
            log::info!("Circuit breaker {} -> CLOSED: {}", from, reason);
            self.push_transition(loop_number, from, CircuitState::Closed, reason.clone(), false, false);
        }

        self.state = BreakerState {
            total_opens: self.state.total_opens,
            current_loop: loop_number,
            last_progress_loop: self.state.last_progress_loop,
            reason: Some(reason),
            ..BreakerState::default()
        };
        self.persist()
    }

    fn push_transition(
        &mut self,
        loop_number: u64,
        from: CircuitState,
        to: CircuitState,
        reason: String,
        had_progress: bool,
        had_error: bool,
    ) {
        self.history.push(BreakerTransition {
            timestamp: Utc::now(),
            loop_number,
            from,
            to,
            reason,
            had_progress,
            had_error,
        });
        let limit = self.config.history_limit.max(1);
        if self.history.len() > limit {
            let excess = self.history.len() - limit;
            self.history.drain(..excess);
        }
    }

    fn persist(&self) -> Result<()> {
        if let Some(store) = &self.store {
            store.save(STATE_RECORD, &self.state)?;
            store.save(HISTORY_RECORD, &self.history)?;
        }
        Ok(())
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn feed(breaker: &mut CircuitBreaker, results: &[(bool, bool)]) -> CircuitState {
        let mut state = breaker.state();
        for (i, (progress, error)) in results.iter().enumerate() {
            state = breaker.add_loop_result(*progress, *error, i as u64 + 1).unwrap();
        }
        state
    }

    #[test]
    fn test_starts_closed() {
        let breaker = CircuitBreaker::default();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.can_execute());
        assert!(!breaker.should_halt());
    }

    #[test]
    fn test_two_empty_loops_half_open() {
        let mut breaker = CircuitBreaker::default();
        assert_eq!(feed(&mut breaker, &[(false, false), (false, false)]), CircuitState::HalfOpen);
        assert!(breaker.can_execute());
    }

    #[test]
    fn test_three_empty_loops_open() {
        let mut breaker = CircuitBreaker::default();
        let state = feed(&mut breaker, &[(false, false), (false, false), (false, false)]);
        assert_eq!(state, CircuitState::Open);
        assert!(!breaker.can_execute());
        assert!(breaker.should_halt());
        assert_eq!(breaker.record().total_opens, 1);
    }

    #[test]
    fn test_progress_closes_half_open() {
        let mut breaker = CircuitBreaker::default();
        feed(&mut breaker, &[(false, false), (false, false)]);
        let state = breaker.add_loop_result(true, false, 3).unwrap();
        assert_eq!(state, CircuitState::Closed);
        assert_eq!(breaker.record().consecutive_no_progress, 0);
        assert_eq!(breaker.record().last_progress_loop, 3);
    }

    #[test]
    fn test_progress_does_not_leave_open() {
        let mut breaker = CircuitBreaker::default();
        feed(&mut breaker, &[(false, false), (false, false), (false, false)]);
        let state = breaker.add_loop_result(true, false, 4).unwrap();
        assert_eq!(state, CircuitState::Open);
        assert!(!breaker.can_execute());
    }

    #[test]
    fn test_error_counter_resets() {
        let mut breaker = CircuitBreaker::default();
        feed(&mut breaker, &[(true, true), (true, true)]);
        assert_eq!(breaker.record().consecutive_errors, 2);
        breaker.add_loop_result(true, false, 3).unwrap();
        assert_eq!(breaker.record().consecutive_errors, 0);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_transitions_audited() {
        let mut breaker = CircuitBreaker::default();
        feed(&mut breaker, &[(false, true), (false, false), (false, false)]);
        let history = breaker.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].from, CircuitState::Closed);
        assert_eq!(history[0].to, CircuitState::HalfOpen);
        assert_eq!(history[0].loop_number, 2);
        assert_eq!(history[1].to, CircuitState::Open);
        assert!(!history[1].had_progress);
    }

    #[test]
    fn test_history_bounded() {
        let mut breaker = CircuitBreaker::new(BreakerConfig {
            history_limit: 4,
            ..BreakerConfig::default()
        });
        for n in 0..10u64 {
            breaker.add_loop_result(false, false, n * 3 + 1).unwrap();
            breaker.add_loop_result(false, false, n * 3 + 2).unwrap();
            breaker.add_loop_result(true, false, n * 3 + 3).unwrap();
        }
        assert_eq!(breaker.history().len(), 4);
        assert_eq!(breaker.history().last().unwrap().loop_number, 30);
    }

    #[test]
    fn test_reset_keeps_total_opens() {
        let mut breaker = CircuitBreaker::default();
        feed(&mut breaker, &[(false, false), (false, false), (false, true)]);
        breaker.reset("operator fixed the task").unwrap();

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.record().consecutive_no_progress, 0);
        assert_eq!(breaker.record().consecutive_errors, 0);
        assert_eq!(breaker.record().total_opens, 1);
        let last = breaker.history().last().unwrap();
        assert_eq!(last.from, CircuitState::Open);
        assert!(last.reason.contains("operator fixed the task"));
    }

    #[test]
    fn test_total_opens_accumulates_across_resets() {
        let mut breaker = CircuitBreaker::default();
        let stalled = [(false, false), (false, false), (false, false)];

        assert_eq!(feed(&mut breaker, &stalled), CircuitState::Open);
        breaker.reset("first fix").unwrap();
        assert_eq!(feed(&mut breaker, &stalled), CircuitState::Open);

        assert_eq!(breaker.record().total_opens, 2);
        breaker.reset("second fix").unwrap();
        assert_eq!(breaker.record().total_opens, 2);
        assert_eq!(breaker.status().total_opens, 2);
    }

    #[test]
    fn test_default_history_capped_at_limit() {
        let temp = TempDir::new().unwrap();
        let mut breaker = CircuitBreaker::open(BreakerConfig::default(), StateDir::open(temp.path()).unwrap()).unwrap();
        let stalled = [(false, false), (false, false), (false, false)];

        // Each cycle records CLOSED->HALF_OPEN, HALF_OPEN->OPEN and OPEN->CLOSED
        for cycle in 0..40 {
            feed(&mut breaker, &stalled);
            breaker.reset(&format!("cycle {}", cycle)).unwrap();
        }

        assert_eq!(breaker.record().total_opens, 40);
        assert_eq!(breaker.history().len(), 100);
        assert!(breaker.history().last().unwrap().reason.contains("cycle 39"));

        let reopened = CircuitBreaker::open(BreakerConfig::default(), StateDir::open(temp.path()).unwrap()).unwrap();
        assert_eq!(reopened.history().len(), 100);
        assert_eq!(reopened.record().total_opens, 40);
    }

    #[test]
    fn test_reset_when_closed_adds_no_history() {
        let mut breaker = CircuitBreaker::default();
        breaker.reset("noop").unwrap();
        assert!(breaker.history().is_empty());
    }

    #[test]
    fn test_custom_thresholds() {
        let mut breaker = CircuitBreaker::new(BreakerConfig {
            half_open_threshold: 1,
            open_threshold: 2,
            ..BreakerConfig::default()
        });
        assert_eq!(breaker.add_loop_result(false, false, 1).unwrap(), CircuitState::HalfOpen);
        assert_eq!(breaker.add_loop_result(false, false, 2).unwrap(), CircuitState::Open);
    }

    #[test]
    fn test_persisted_across_reopen() {
        let temp = TempDir::new().unwrap();
        {
            let store = StateDir::open(temp.path()).unwrap();
            let mut breaker = CircuitBreaker::open(BreakerConfig::default(), store).unwrap();
            feed(&mut breaker, &[(false, false), (false, false), (false, false)]);
        }

        let store = StateDir::open(temp.path()).unwrap();
        let breaker = CircuitBreaker::open(BreakerConfig::default(), store).unwrap();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.record().current_loop, 3);
        assert_eq!(breaker.history().len(), 2);
        assert!(temp.path().join("breaker.json").exists());
        assert!(temp.path().join("breaker_history.json").exists());
    }

    #[test]
    fn test_status_display() {
        let mut breaker = CircuitBreaker::default();
        feed(&mut breaker, &[(false, false), (false, false)]);
        let text = breaker.status().to_string();
        assert!(text.starts_with("HALF_OPEN"));
        assert!(text.contains("no progress 2"));
    }
}
