//! CLI module for mcprun - command-line interface and subcommands.
//!
//! Provides the main entry point with subcommands to run a task, list the
//! tools the configured servers expose, and check server prerequisites.

pub mod commands;

pub use commands::Cli;
