//! OpenAI-compatible chat completions translation
//!
//! Covers api.openai.com, Azure OpenAI deployments and any other endpoint that
//! speaks the chat-completions dialect (DeepSeek, local gateways).

use reqwest::RequestBuilder;
use serde_json::{Value, json};

use super::client::LlmError;
use super::types::{ModelResponse, ModelTurn, Role, ToolCallRequest, ToolDefinition, Usage};
use crate::domain::{Transcript, Turn};
use crate::id::generate_call_id;

/// Default OpenAI base URL
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Default DeepSeek base URL
pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com/v1";

/// Default Azure OpenAI API version
pub const AZURE_API_VERSION: &str = "2024-10-21";

/// Where chat-completion requests go and how they authenticate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenAiEndpoint {
    /// `{base_url}/chat/completions` with a bearer token
    Standard { base_url: String },
    /// Azure deployment URL with an `api-key` header
    Azure {
        endpoint: String,
        deployment: String,
        api_version: String,
    },
}

impl OpenAiEndpoint {
    pub fn url(&self) -> String {
        match self {
            OpenAiEndpoint::Standard { base_url } => {
                format!("{}/chat/completions", base_url.trim_end_matches('/'))
            }
            OpenAiEndpoint::Azure {
                endpoint,
                deployment,
                api_version,
            } => format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                endpoint.trim_end_matches('/'),
                deployment,
                api_version
            ),
        }
    }
}

/// Request/response translation for chat completions
#[derive(Debug, Clone)]
pub struct OpenAiBackend {
    pub model: String,
    pub max_tokens: u32,
    pub endpoint: OpenAiEndpoint,
}

impl OpenAiBackend {
    pub fn new(model: impl Into<String>, max_tokens: u32, endpoint: OpenAiEndpoint) -> Self {
        Self {
            model: model.into(),
            max_tokens,
            endpoint,
        }
    }

    pub fn url(&self) -> String {
        self.endpoint.url()
    }

    pub fn authorize(&self, builder: RequestBuilder, api_key: &str) -> RequestBuilder {
        match self.endpoint {
            OpenAiEndpoint::Standard { .. } => builder.bearer_auth(api_key),
            OpenAiEndpoint::Azure { .. } => builder.header("api-key", api_key),
        }
    }

    pub fn build_request(&self, transcript: &Transcript, tools: &[ToolDefinition]) -> Value {
        let mut messages = Vec::new();
        if let Some(system) = transcript.system_prompt() {
            messages.push(json!({ "role": "system", "content": system }));
        }
        for turn in transcript.conversation() {
            push_messages(turn, &mut messages);
        }

        let mut body = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "messages": messages
        });

        if !tools.is_empty() {
            let tools: Vec<Value> = tools.iter().map(|t| t.to_openai_schema()).collect();
            body["tools"] = json!(tools);
            body["tool_choice"] = json!("auto");
        }

        body
    }

    pub fn parse_response(&self, body: Value) -> Result<ModelResponse, LlmError> {
        let message = body["choices"]
            .get(0)
            .map(|c| &c["message"])
            .ok_or_else(|| LlmError::InvalidResponse("response has no choices".to_string()))?;

        let content = message["content"].as_str().unwrap_or_default().to_string();

        let mut calls = Vec::new();
        if let Some(tool_calls) = message["tool_calls"].as_array() {
            for call in tool_calls {
                let name = call["function"]["name"]
                    .as_str()
                    .ok_or_else(|| LlmError::InvalidResponse("tool call without function name".to_string()))?;
                let id = call["id"]
                    .as_str()
                    .map(String::from)
                    .unwrap_or_else(generate_call_id);
                let arguments = parse_arguments(&call["function"]["arguments"]);
                calls.push(ToolCallRequest::new(id, name, arguments));
            }
        }

        let usage = body
            .get("usage")
            .map(|u| {
                Usage::new(
                    u["prompt_tokens"].as_u64().unwrap_or(0),
                    u["completion_tokens"].as_u64().unwrap_or(0),
                )
            })
            .unwrap_or_default();

        Ok(ModelResponse {
            turn: ModelTurn::from_parts(content, calls),
            usage,
        })
    }
}

/// Arguments arrive as a JSON-encoded string; a malformed string is passed
/// through so the tool server rejects it and the model sees why.
fn parse_arguments(raw: &Value) -> Value {
    match raw {
        Value::String(s) if s.trim().is_empty() => json!({}),
        Value::String(s) => serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.clone())),
        Value::Null => json!({}),
        other => other.clone(),
    }
}

fn push_messages(turn: &Turn, messages: &mut Vec<Value>) {
    match turn.role {
        Role::Assistant if !turn.tool_calls.is_empty() => {
            let calls: Vec<Value> = turn
                .tool_calls
                .iter()
                .map(|c| {
                    json!({
                        "id": c.id,
                        "type": "function",
                        "function": {
                            "name": c.name,
                            "arguments": c.arguments.to_string()
                        }
                    })
                })
                .collect();
            let content = if turn.content.is_empty() {
                Value::Null
            } else {
                json!(turn.content)
            };
            messages.push(json!({ "role": "assistant", "content": content, "tool_calls": calls }));
        }
        Role::Assistant => messages.push(json!({ "role": "assistant", "content": turn.content })),
        Role::Tool => {
            for result in &turn.tool_results {
                let content = if result.is_error {
                    format!("Error: {}", result.content)
                } else {
                    result.content.clone()
                };
                messages.push(json!({
                    "role": "tool",
                    "tool_call_id": result.call_id,
                    "content": content
                }));
            }
        }
        Role::User | Role::System => messages.push(json!({ "role": "user", "content": turn.content })),
    }
}
