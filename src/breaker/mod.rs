//! Circuit breaker halting runs that stop making progress.

mod circuit;
mod state;

pub use circuit::{BreakerStatus, CircuitBreaker};
pub use state::{BreakerConfig, BreakerState, BreakerTransition, CircuitState};
