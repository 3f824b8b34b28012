//! mcprun - run a language-model agent against MCP tool servers
//!
//! Tool servers are spawned as subprocesses speaking JSON-RPC over stdio,
//! their tools are merged into one catalog, and a turn-bounded loop lets the
//! model call those tools until it produces a final answer.

pub mod config;
pub mod domain;
pub mod error;
pub mod id;
pub mod llm;
pub mod runner;
pub mod server;
pub mod session;
pub mod tools;

pub use error::{Result, RunError};
