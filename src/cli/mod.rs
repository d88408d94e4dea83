//! CLI module for chorus - store maintenance and inspection.
//!
//! Provides subcommands for running the janitor, printing the resolved
//! configuration and inspecting channel presence.

pub mod commands;

pub use commands::Cli;
