//! Domain types for mcprun
//!
//! This module contains the per-run data model:
//! - Transcript: the append-only conversation for one run
//! - RunState: the turn loop's state machine
//! - RunResult / TerminalReason: what a finished run reports

pub mod outcome;
pub mod transcript;

pub use outcome::{RunResult, RunState, TerminalReason};
pub use transcript::{Transcript, Turn};
