//! Google Gemini `generateContent` translation

use reqwest::RequestBuilder;
use serde_json::{Value, json};

use super::client::LlmError;
use super::types::{ModelResponse, ModelTurn, Role, ToolCallRequest, ToolDefinition, Usage};
use crate::domain::{Transcript, Turn};
use crate::id::generate_call_id;

/// Gemini API base URL
pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, Clone)]
pub struct GeminiBackend {
    pub model: String,
    pub max_tokens: u32,
    pub base_url: String,
}

impl GeminiBackend {
    pub fn new(model: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            model: model.into(),
            max_tokens,
            base_url: GEMINI_BASE_URL.to_string(),
        }
    }

    pub fn url(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        )
    }

    pub fn authorize(&self, builder: RequestBuilder, api_key: &str) -> RequestBuilder {
        builder.header("x-goog-api-key", api_key)
    }

    pub fn build_request(&self, transcript: &Transcript, tools: &[ToolDefinition]) -> Value {
        let contents: Vec<Value> = transcript.conversation().map(content_for).collect();

        let mut body = json!({
            "contents": contents,
            "generationConfig": { "maxOutputTokens": self.max_tokens }
        });

        if let Some(system) = transcript.system_prompt() {
            body["systemInstruction"] = json!({ "parts": [ { "text": system } ] });
        }

        if !tools.is_empty() {
            let declarations: Vec<Value> = tools.iter().map(|t| t.to_gemini_declaration()).collect();
            body["tools"] = json!([ { "functionDeclarations": declarations } ]);
        }

        body
    }

    /// Gemini does not identify function calls, so correlation ids are minted here
    pub fn parse_response(&self, body: Value) -> Result<ModelResponse, LlmError> {
        let parts = body["candidates"]
            .get(0)
            .and_then(|c| c["content"]["parts"].as_array())
            .ok_or_else(|| LlmError::InvalidResponse("response has no candidate parts".to_string()))?;

        let mut content = String::new();
        let mut calls = Vec::new();

        for part in parts {
            if let Some(text) = part["text"].as_str() {
                if !content.is_empty() {
                    content.push('\n');
                }
                content.push_str(text);
            } else if let Some(call) = part.get("functionCall") {
                let name = call["name"]
                    .as_str()
                    .ok_or_else(|| LlmError::InvalidResponse("functionCall without name".to_string()))?;
                let args = if call["args"].is_null() {
                    json!({})
                } else {
                    call["args"].clone()
                };
                calls.push(ToolCallRequest::new(generate_call_id(), name, args));
            }
        }

        let usage = body
            .get("usageMetadata")
            .map(|u| {
                Usage::new(
                    u["promptTokenCount"].as_u64().unwrap_or(0),
                    u["candidatesTokenCount"].as_u64().unwrap_or(0),
                )
            })
            .unwrap_or_default();

        Ok(ModelResponse {
            turn: ModelTurn::from_parts(content, calls),
            usage,
        })
    }
}

fn content_for(turn: &Turn) -> Value {
    match turn.role {
        Role::Assistant => {
            let mut parts = Vec::new();
            if !turn.content.is_empty() {
                parts.push(json!({ "text": turn.content }));
            }
            parts.extend(turn.tool_calls.iter().map(|c| {
                json!({ "functionCall": { "name": c.name, "args": c.arguments } })
            }));
            json!({ "role": "model", "parts": parts })
        }
        Role::Tool => {
            let parts: Vec<Value> = turn
                .tool_results
                .iter()
                .map(|r| {
                    let response = if r.is_error {
                        json!({ "error": r.content })
                    } else {
                        json!({ "result": r.content })
                    };
                    json!({ "functionResponse": { "name": r.name, "response": response } })
                })
                .collect();
            json!({ "role": "user", "parts": parts })
        }
        Role::User | Role::System => json!({ "role": "user", "parts": [ { "text": turn.content } ] }),
    }
}
