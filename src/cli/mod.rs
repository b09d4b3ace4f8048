//! Command-line interface for swe-testbed.
//!
//! Provides batch evaluation and build probing over JSONL task files, plus
//! report parsing and cache inspection helpers.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
