//! Conversation transcript for a single run
//!
//! The transcript is append-only: turns are pushed, never edited or removed.
//! It lives for one run and is handed back to the caller inside the
//! [`RunResult`](super::RunResult); nothing persists it.

use serde::{Deserialize, Serialize};

use crate::id::now_ms;
use crate::llm::{Role, ToolCallRequest, ToolCallResult};

/// One entry in the transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,

    /// Text content (may be empty for pure tool-call or tool-result turns)
    pub content: String,

    /// Tool calls the assistant requested in this turn
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,

    /// Results for the previous assistant turn's tool calls
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_results: Vec<ToolCallResult>,

    pub created_at: u64,
}

impl Turn {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
            created_at: now_ms(),
        }
    }
}

/// Ordered, append-only conversation state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    turns: Vec<Turn>,
}

impl Transcript {
    /// Seed a transcript with system instructions and the user's task
    pub fn new(instructions: impl Into<String>, task: impl Into<String>) -> Self {
        let instructions = instructions.into();
        let mut turns = Vec::with_capacity(2);
        if !instructions.trim().is_empty() {
            turns.push(Turn::new(Role::System, instructions));
        }
        turns.push(Turn::new(Role::User, task));
        Self { turns }
    }

    /// Append the model's final answer
    pub fn push_answer(&mut self, text: impl Into<String>) {
        self.turns.push(Turn::new(Role::Assistant, text));
    }

    /// Append an assistant turn that requested tool calls
    pub fn push_tool_calls(&mut self, text: Option<String>, calls: Vec<ToolCallRequest>) {
        let mut turn = Turn::new(Role::Assistant, text.unwrap_or_default());
        turn.tool_calls = calls;
        self.turns.push(turn);
    }

    /// Append the complete set of results for one turn of tool calls
    pub fn push_tool_results(&mut self, results: Vec<ToolCallResult>) {
        let mut turn = Turn::new(Role::Tool, String::new());
        turn.tool_results = results;
        self.turns.push(turn);
    }

    /// System instructions, if the transcript was seeded with any
    pub fn system_prompt(&self) -> Option<&str> {
        self.turns
            .iter()
            .find(|t| t.role == Role::System)
            .map(|t| t.content.as_str())
    }

    /// Every turn except the system prompt, in order
    pub fn conversation(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter().filter(|t| t.role != Role::System)
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Number of tool calls the assistant requested over the whole run
    pub fn tool_call_count(&self) -> usize {
        self.turns.iter().map(|t| t.tool_calls.len()).sum()
    }
}
