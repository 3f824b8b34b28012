//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - run: execute a task against the configured tool servers
//! - tools: list the tools each server exposes
//! - check: verify server executables are installed

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// mcprun - drive an LLM agent through MCP tool servers
#[derive(Parser, Debug)]
#[command(name = "mcprun")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
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
    /// Run a task to completion
    Run {
        /// Task description given to the agent
        task: String,

        /// Maximum model turns before giving up
        #[arg(short, long)]
        max_turns: Option<u32>,

        /// Model provider (openai, azure, anthropic, deepseek, gemini)
        #[arg(short, long)]
        provider: Option<String>,

        /// Model name
        #[arg(short = 'm', long)]
        model: Option<String>,

        /// Workspace directory for the filesystem server
        #[arg(short, long)]
        workspace: Option<PathBuf>,

        /// File with system instructions
        #[arg(short, long)]
        instructions: Option<PathBuf>,
    },

    /// List the tools each configured server exposes
    Tools,

    /// Check that every server executable can be found
    Check,
}
