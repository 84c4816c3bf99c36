//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - run: execute pending tasks and merge the results
//! - plan: show the batches a run would execute
//! - status: task and circuit breaker status
//! - reset: close an open circuit breaker
//! - analyze: run the response analyzer over a transcript
//! - conflicts: check live task branches for overlapping edits

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Hermes - dependency-ordered orchestration of AI coding agents
#[derive(Parser, Debug)]
#[command(name = "hermes")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Repository to orchestrate (defaults to the current directory)
    #[arg(short, long, global = true)]
    pub repo: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run pending tasks until none are runnable
    Run {
        /// Task file (overrides config)
        #[arg(short, long)]
        tasks: Option<PathBuf>,

        /// Maximum concurrent agents
        #[arg(short = 'w', long)]
        max_workers: Option<usize>,

        /// Run one task at a time on the base branch
        #[arg(long)]
        serial: bool,

        /// Print the run summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the batches a run would execute
    Plan {
        /// Task file (overrides config)
        #[arg(short, long)]
        tasks: Option<PathBuf>,
    },

    /// Show task and circuit breaker status
    Status {
        /// Task file (overrides config)
        #[arg(short, long)]
        tasks: Option<PathBuf>,

        /// Include each task's status history
        #[arg(short, long)]
        detailed: bool,
    },

    /// Reset the circuit breaker to CLOSED
    Reset {
        /// Reason recorded in the breaker history
        #[arg(short, long, default_value = "manual reset")]
        reason: String,
    },

    /// Analyze an agent transcript
    Analyze {
        /// Transcript file
        file: PathBuf,
    },

    /// Detect conflicts between live task branches
    Conflicts,
}
