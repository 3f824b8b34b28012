//! LLM Client Layer - one contract over several provider backends
//!
//! This module provides:
//! - Provider-neutral tool and response types
//! - LlmClient trait for API abstraction
//! - Per-provider request/response translation (OpenAI-compatible, Anthropic, Gemini)
//! - HttpLlmClient, the single HTTP sender shared by every backend

pub mod anthropic;
pub mod client;
pub mod gemini;
pub mod openai;
pub mod provider;
pub mod types;

pub use anthropic::AnthropicBackend;
pub use client::{LlmClient, LlmError, MockLlmClient};
pub use gemini::GeminiBackend;
pub use openai::{OpenAiBackend, OpenAiEndpoint};
pub use provider::{HttpLlmClient, ProviderBackend, ProviderKind};
pub use types::{ModelResponse, ModelTurn, Role, ToolCallRequest, ToolCallResult, ToolDefinition, Usage};
