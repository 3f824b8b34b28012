//! MCP stdio framing: one JSON-RPC 2.0 message per line

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Protocol revision sent in `initialize`
pub const PROTOCOL_VERSION: &str = "2024-11-05";

pub fn request(id: u64, method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params
    })
}

pub fn notification(method: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": method
    })
}

pub fn initialize_params() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION")
        }
    })
}

pub fn tools_list_params(cursor: Option<&str>) -> Value {
    match cursor {
        Some(cursor) => json!({ "cursor": cursor }),
        None => json!({}),
    }
}

pub fn tools_call_params(tool: &str, arguments: Value) -> Value {
    json!({ "name": tool, "arguments": arguments })
}

/// JSON-RPC error object
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RpcError {
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

/// Payload of a response matched to a pending request
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Result(Value),
    Error(RpcError),
    /// Carried an id but neither a usable result nor error
    Malformed(String),
}

/// A decoded line read from a server's stdout
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Response { id: u64, reply: Reply },
    Notification { method: String },
    /// Server-initiated request; not supported, logged and ignored
    Request { method: String },
}

/// Decode one stdout line. Lines that are not JSON-RPC at all are `Err`.
pub fn parse_line(line: &str) -> Result<Incoming, String> {
    let message: Value = serde_json::from_str(line).map_err(|e| format!("invalid JSON: {}", e))?;
    if !message.is_object() {
        return Err("message is not an object".to_string());
    }

    if let Some(method) = message["method"].as_str() {
        return Ok(if message.get("id").is_some_and(|id| !id.is_null()) {
            Incoming::Request {
                method: method.to_string(),
            }
        } else {
            Incoming::Notification {
                method: method.to_string(),
            }
        });
    }

    let id = message["id"]
        .as_u64()
        .ok_or_else(|| "response without a numeric id".to_string())?;

    let reply = if let Some(error) = message.get("error") {
        match serde_json::from_value::<RpcError>(error.clone()) {
            Ok(err) => Reply::Error(err),
            Err(e) => Reply::Malformed(format!("unreadable error object: {}", e)),
        }
    } else if let Some(result) = message.get("result") {
        Reply::Result(result.clone())
    } else {
        Reply::Malformed("response carries neither result nor error".to_string())
    };

    Ok(Incoming::Response { id, reply })
}

/// A tool as advertised by `tools/list`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "inputSchema", default = "empty_schema")]
    pub input_schema: Value,
}

fn empty_schema() -> Value {
    json!({ "type": "object", "properties": {} })
}

/// One page of a `tools/list` result and the cursor for the next one
pub fn parse_tools_page(result: &Value) -> Result<(Vec<ToolInfo>, Option<String>), String> {
    let tools = result
        .get("tools")
        .cloned()
        .ok_or_else(|| "tools/list result has no 'tools' array".to_string())?;
    let tools: Vec<ToolInfo> = serde_json::from_value(tools).map_err(|e| format!("unreadable tool list: {}", e))?;
    let next = result["nextCursor"].as_str().filter(|c| !c.is_empty()).map(String::from);
    Ok((tools, next))
}

/// Text output of a `tools/call`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub content: String,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

/// Flatten a `tools/call` result into text
pub fn parse_call_result(result: &Value) -> Result<ToolOutput, String> {
    if !result.is_object() {
        return Err("tools/call result is not an object".to_string());
    }

    let parts: Vec<String> = result["content"]
        .as_array()
        .map(|items| items.iter().map(summarize_part).collect())
        .unwrap_or_default();

    Ok(ToolOutput {
        content: parts.join("\n"),
        is_error: result["isError"].as_bool().unwrap_or(false),
    })
}

fn summarize_part(part: &Value) -> String {
    match part["type"].as_str() {
        Some("text") => part["text"].as_str().unwrap_or_default().to_string(),
        Some("image") => format!("[image: {}]", part["mimeType"].as_str().unwrap_or("unknown")),
        Some("resource") => format!("[resource: {}]", part["resource"]["uri"].as_str().unwrap_or("unknown")),
        Some(other) => format!("[{} content]", other),
        None => "[unknown content]".to_string(),
    }
}
