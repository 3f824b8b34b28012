//! LLM types shared by every provider backend
//!
//! This module defines the provider-neutral tool and response types. The
//! conversation itself lives in [`crate::domain::Transcript`].

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Role in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// Tool definition for the LLM
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

impl ToolDefinition {
    /// Create a new tool definition
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }

    /// Convert to Anthropic API schema format
    pub fn to_anthropic_schema(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "input_schema": self.input_schema
        })
    }

    /// Convert to OpenAI chat-completions `tools` entry
    pub fn to_openai_schema(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.input_schema
            }
        })
    }

    /// Convert to a Gemini `functionDeclarations` entry
    ///
    /// Gemini accepts an OpenAPI subset, so JSON-Schema-only keywords are stripped.
    pub fn to_gemini_declaration(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "parameters": strip_unsupported_schema_keys(&self.input_schema)
        })
    }
}

fn strip_unsupported_schema_keys(schema: &Value) -> Value {
    const UNSUPPORTED: [&str; 3] = ["$schema", "additionalProperties", "default"];
    match schema {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(k, _)| !UNSUPPORTED.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), strip_unsupported_schema_keys(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(strip_unsupported_schema_keys).collect()),
        other => other.clone(),
    }
}

/// A tool call requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Correlation id, echoed back in the matching result
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

impl ToolCallRequest {
    /// Create a new tool call
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// Result of a tool call, fed back to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub call_id: String,
    /// Tool name, needed by backends that match results by name
    pub name: String,
    pub content: String,
    pub is_error: bool,
}

impl ToolCallResult {
    /// Create a successful tool result
    pub fn success(call: &ToolCallRequest, content: impl Into<String>) -> Self {
        Self {
            call_id: call.id.clone(),
            name: call.name.clone(),
            content: content.into(),
            is_error: false,
        }
    }

    /// Create an error tool result
    pub fn error(call: &ToolCallRequest, content: impl Into<String>) -> Self {
        Self {
            call_id: call.id.clone(),
            name: call.name.clone(),
            content: content.into(),
            is_error: true,
        }
    }
}

/// What the model decided to do this turn
#[derive(Debug, Clone, PartialEq)]
pub enum ModelTurn {
    /// The model is done
    FinalAnswer(String),
    /// The model wants one or more tools run; `text` is any reasoning it emitted alongside
    ToolCalls {
        text: Option<String>,
        calls: Vec<ToolCallRequest>,
    },
}

impl ModelTurn {
    /// Build a turn from the text and calls a backend parsed out of a response
    pub fn from_parts(text: String, calls: Vec<ToolCallRequest>) -> Self {
        if calls.is_empty() {
            ModelTurn::FinalAnswer(text)
        } else {
            let text = if text.trim().is_empty() { None } else { Some(text) };
            ModelTurn::ToolCalls { text, calls }
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, ModelTurn::FinalAnswer(_))
    }
}

/// Response from a model completion
#[derive(Debug, Clone, PartialEq)]
pub struct ModelResponse {
    pub turn: ModelTurn,
    pub usage: Usage,
}

/// Token usage statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Usage {
    /// Create new usage stats
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    /// Calculate total tokens
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    /// Accumulate usage from another instance
    pub fn add(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}
