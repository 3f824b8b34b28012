//! Run state machine and outcome types.
//!
//! This module defines the states a run moves through and the result handed
//! back to the caller once it reaches a terminal state.

use std::fmt;

use super::Transcript;
use crate::llm::Usage;

/// State of the turn loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Waiting on the model
    Running,
    /// Model asked for tools, dispatching them
    AwaitingToolResults,
    /// Model produced a final answer
    Completed,
    /// Model did not answer within the turn limit
    TurnLimitExceeded,
    /// Fatal model or dispatch error
    Failed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Completed | RunState::TurnLimitExceeded | RunState::Failed
        )
    }

    /// Terminal reason for a terminal state
    pub fn terminal_reason(&self) -> Option<TerminalReason> {
        match self {
            RunState::Completed => Some(TerminalReason::Completed),
            RunState::TurnLimitExceeded => Some(TerminalReason::TurnLimitExceeded),
            RunState::Failed => Some(TerminalReason::Failed),
            RunState::Running | RunState::AwaitingToolResults => None,
        }
    }
}

/// Why a run stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalReason {
    Completed,
    /// Not an error: the safety valve tripped
    TurnLimitExceeded,
    Failed,
}

impl fmt::Display for TerminalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TerminalReason::Completed => "completed",
            TerminalReason::TurnLimitExceeded => "turn limit exceeded",
            TerminalReason::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Outcome of a run
#[derive(Debug, Clone)]
pub struct RunResult {
    /// Final answer text; only set when the run completed
    pub final_output: Option<String>,
    /// Turns consumed (model completions issued)
    pub turns: u32,
    pub reason: TerminalReason,
    /// Failure description when `reason` is `Failed`
    pub error: Option<String>,
    /// Full transcript, partial unless the run completed
    pub transcript: Transcript,
    pub usage: Usage,
}

impl RunResult {
    /// A run that failed before its first model call
    pub fn failed_before_start(transcript: Transcript, error: impl Into<String>) -> Self {
        Self {
            final_output: None,
            turns: 0,
            reason: TerminalReason::Failed,
            error: Some(error.into()),
            transcript,
            usage: Usage::default(),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.reason == TerminalReason::Completed
    }

    pub fn is_failed(&self) -> bool {
        self.reason == TerminalReason::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!RunState::Running.is_terminal());
        assert!(!RunState::AwaitingToolResults.is_terminal());
        assert!(RunState::Completed.is_terminal());
        assert!(RunState::TurnLimitExceeded.is_terminal());
        assert!(RunState::Failed.is_terminal());
    }

    #[test]
    fn test_terminal_reason_mapping() {
        assert_eq!(RunState::Running.terminal_reason(), None);
        assert_eq!(
            RunState::TurnLimitExceeded.terminal_reason(),
            Some(TerminalReason::TurnLimitExceeded)
        );
        assert_eq!(RunState::Failed.terminal_reason(), Some(TerminalReason::Failed));
    }

    #[test]
    fn test_terminal_reason_display() {
        assert_eq!(TerminalReason::Completed.to_string(), "completed");
        assert_eq!(TerminalReason::TurnLimitExceeded.to_string(), "turn limit exceeded");
        assert_eq!(TerminalReason::Failed.to_string(), "failed");
    }

    #[test]
    fn test_turn_limit_is_not_failure() {
        let result = RunResult {
            final_output: None,
            turns: 10,
            reason: TerminalReason::TurnLimitExceeded,
            error: None,
            transcript: Transcript::default(),
            usage: Usage::default(),
        };
        assert!(!result.is_failed());
        assert!(!result.is_completed());
    }
}
