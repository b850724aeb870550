// src/cli/mod.rs
//! Command-line interface definitions.

/// Flag definitions.
pub mod commands;

pub use commands::Cli;
