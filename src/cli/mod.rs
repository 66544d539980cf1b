//! Command-line interface for precise-indexer.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands, RunArgs};
