//! Anthropic messages API translation
//!
//! Converts a transcript into a `/v1/messages` request body and a response
//! body back into a [`ModelTurn`]. Sending is done by [`HttpLlmClient`](super::HttpLlmClient).

use reqwest::RequestBuilder;
use serde_json::{Value, json};

use super::client::LlmError;
use super::types::{ModelResponse, ModelTurn, Role, ToolCallRequest, ToolDefinition, Usage};
use crate::domain::{Transcript, Turn};

/// Anthropic API base URL
pub const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";

/// Anthropic API version
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Default model to use
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// Request/response translation for the Anthropic messages API
#[derive(Debug, Clone)]
pub struct AnthropicBackend {
    pub model: String,
    pub max_tokens: u32,
    pub url: String,
}

impl AnthropicBackend {
    pub fn new(model: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            model: model.into(),
            max_tokens,
            url: ANTHROPIC_API_URL.to_string(),
        }
    }

    pub fn authorize(&self, builder: RequestBuilder, api_key: &str) -> RequestBuilder {
        builder
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
    }

    /// Build the request body for the Anthropic API
    pub fn build_request(&self, transcript: &Transcript, tools: &[ToolDefinition]) -> Value {
        let messages: Vec<Value> = transcript.conversation().map(message_for).collect();

        let mut body = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "messages": messages
        });

        if let Some(system) = transcript.system_prompt() {
            body["system"] = json!(system);
        }

        if !tools.is_empty() {
            let tools: Vec<Value> = tools.iter().map(|t| t.to_anthropic_schema()).collect();
            body["tools"] = json!(tools);
        }

        body
    }

    /// Parse the API response into a ModelResponse
    pub fn parse_response(&self, body: Value) -> Result<ModelResponse, LlmError> {
        let blocks = body["content"]
            .as_array()
            .ok_or_else(|| LlmError::InvalidResponse("missing content array".to_string()))?;

        let usage = body
            .get("usage")
            .map(|u| {
                Usage::new(
                    u["input_tokens"].as_u64().unwrap_or(0),
                    u["output_tokens"].as_u64().unwrap_or(0),
                )
            })
            .unwrap_or_default();

        let mut content = String::new();
        let mut calls = Vec::new();

        for block in blocks {
            match block["type"].as_str() {
                Some("text") => {
                    if let Some(text) = block["text"].as_str() {
                        if !content.is_empty() {
                            content.push('\n');
                        }
                        content.push_str(text);
                    }
                }
                Some("tool_use") => {
                    let id = block["id"].as_str().unwrap_or_default();
                    let name = block["name"]
                        .as_str()
                        .ok_or_else(|| LlmError::InvalidResponse("tool_use block without name".to_string()))?;
                    calls.push(ToolCallRequest::new(id, name, block["input"].clone()));
                }
                _ => {}
            }
        }

        Ok(ModelResponse {
            turn: ModelTurn::from_parts(content, calls),
            usage,
        })
    }
}

fn message_for(turn: &Turn) -> Value {
    match turn.role {
        Role::Assistant if !turn.tool_calls.is_empty() => {
            let mut blocks = Vec::new();
            if !turn.content.is_empty() {
                blocks.push(json!({ "type": "text", "text": turn.content }));
            }
            blocks.extend(turn.tool_calls.iter().map(|c| {
                json!({
                    "type": "tool_use",
                    "id": c.id,
                    "name": c.name,
                    "input": c.arguments
                })
            }));
            json!({ "role": "assistant", "content": blocks })
        }
        Role::Assistant => json!({ "role": "assistant", "content": turn.content }),
        Role::Tool => {
            let results: Vec<Value> = turn
                .tool_results
                .iter()
                .map(|r| {
                    json!({
                        "type": "tool_result",
                        "tool_use_id": r.call_id,
                        "content": r.content,
                        "is_error": r.is_error
                    })
                })
                .collect();
            json!({ "role": "user", "content": results })
        }
        Role::User | Role::System => json!({ "role": "user", "content": turn.content }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ToolCallResult;

    fn backend() -> AnthropicBackend {
        AnthropicBackend::new(DEFAULT_MODEL, 4096)
    }

    #[test]
    fn test_build_request_basic() {
        let transcript = Transcript::new("You are helpful", "Hello");
        let body = backend().build_request(&transcript, &[]);

        assert_eq!(body["model"], DEFAULT_MODEL);
        assert_eq!(body["max_tokens"], 4096);
        assert_eq!(body["system"], "You are helpful");
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "Hello");
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn test_build_request_with_tools() {
        let tool = ToolDefinition::new(
            "read_file",
            "Read a file",
            json!({ "type": "object", "properties": { "path": { "type": "string" } } }),
        );
        let body = backend().build_request(&Transcript::new("", "Read foo.txt"), &[tool]);

        assert!(body.get("system").is_none());
        assert!(body["tools"].is_array());
        assert_eq!(body["tools"][0]["name"], "read_file");
    }

    #[test]
    fn test_build_request_tool_round() {
        let mut transcript = Transcript::new("system", "Read the file");
        let call = ToolCallRequest::new("toolu_123", "read_file", json!({"path": "a.txt"}));
        transcript.push_tool_calls(Some("I'll read the file".into()), vec![call.clone()]);
        transcript.push_tool_results(vec![ToolCallResult::error(&call, "File not found")]);

        let body = backend().build_request(&transcript, &[]);
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);

        assert_eq!(messages[1]["role"], "assistant");
        assert_eq!(messages[1]["content"][0]["type"], "text");
        assert_eq!(messages[1]["content"][1]["type"], "tool_use");
        assert_eq!(messages[1]["content"][1]["id"], "toolu_123");

        assert_eq!(messages[2]["role"], "user");
        assert_eq!(messages[2]["content"][0]["type"], "tool_result");
        assert_eq!(messages[2]["content"][0]["tool_use_id"], "toolu_123");
        assert!(messages[2]["content"][0]["is_error"].as_bool().unwrap());
    }

    #[test]
    fn test_parse_response_text_only() {
        let api_response = json!({
            "content": [ { "type": "text", "text": "Hello there!" } ],
            "stop_reason": "end_turn",
            "usage": { "input_tokens": 10, "output_tokens": 5 }
        });

        let response = backend().parse_response(api_response).unwrap();
        assert_eq!(response.turn, ModelTurn::FinalAnswer("Hello there!".into()));
        assert_eq!(response.usage, Usage::new(10, 5));
    }

    #[test]
    fn test_parse_response_multiple_tool_calls() {
        let api_response = json!({
            "content": [
                { "type": "text", "text": "Let me look" },
                { "type": "tool_use", "id": "toolu_1", "name": "read_file", "input": { "path": "a.txt" } },
                { "type": "tool_use", "id": "toolu_2", "name": "list_directory", "input": { "path": "." } }
            ],
            "stop_reason": "tool_use",
            "usage": { "input_tokens": 100, "output_tokens": 50 }
        });

        let response = backend().parse_response(api_response).unwrap();
        match response.turn {
            ModelTurn::ToolCalls { text, calls } => {
                assert_eq!(text.as_deref(), Some("Let me look"));
                assert_eq!(calls.len(), 2);
                assert_eq!(calls[0].id, "toolu_1");
                assert_eq!(calls[1].name, "list_directory");
                assert_eq!(calls[0].arguments["path"], "a.txt");
            }
            other => panic!("expected tool calls, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_response_missing_content() {
        let result = backend().parse_response(json!({ "type": "error" }));
        assert!(matches!(result, Err(LlmError::InvalidResponse(_))));
    }
}
