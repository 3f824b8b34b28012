//! Turn runner module - the bounded model/tool conversation loop.
//!
//! This module provides:
//! - TurnRunner for executing one task to a terminal state
//! - TurnRunnerConfig for turn limit, model timeout and retry policy

mod turn_loop;

pub use turn_loop::{CANCELLED, TurnRunner, TurnRunnerConfig};
