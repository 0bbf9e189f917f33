//! Command-line interface for scene-forge.
//!
//! Provides commands to produce, plan and inspect scene projects.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
