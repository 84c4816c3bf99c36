//! CLI module for hermes - command-line interface and subcommands.

pub mod commands;

pub use commands::Cli;
