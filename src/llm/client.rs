//! Core LLM client trait, errors, and a scripted client for tests

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::types::{ModelResponse, ModelTurn, ToolDefinition, Usage};
use crate::domain::Transcript;

/// Stateless model client - the transcript carries all conversation state
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// One completion over the whole transcript with the run's tool catalog
    async fn complete(
        &self,
        transcript: &Transcript,
        tools: &[ToolDefinition],
    ) -> Result<ModelResponse, LlmError>;

    /// Model identifier used for requests
    fn model(&self) -> &str;
}

/// Errors that can occur during LLM operations
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("API error {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Missing API key: environment variable {env_var} not set")]
    MissingApiKey { env_var: String },

    #[error("Invalid model config: {0}")]
    Config(String),
}

impl LlmError {
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, LlmError::RateLimited { .. })
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::RateLimited { .. } => true,
            LlmError::ApiError { status, .. } => *status >= 500,
            LlmError::Network(_) => true,
            LlmError::Timeout(_) => true,
            LlmError::InvalidResponse(_) => false,
            LlmError::MissingApiKey { .. } => false,
            LlmError::Config(_) => false,
        }
    }

    /// Server-suggested delay before the next attempt, if any
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            LlmError::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

/// Scripted client that replays queued results in order
///
/// Once the script runs dry it keeps returning `fallback` if one is set,
/// otherwise an `InvalidResponse` error.
#[derive(Default)]
pub struct MockLlmClient {
    script: Mutex<VecDeque<Result<ModelTurn, LlmError>>>,
    fallback: Option<ModelTurn>,
    calls: AtomicU32,
    seen_tools: Mutex<Vec<Vec<String>>>,
}

impl MockLlmClient {
    pub fn new(turns: Vec<ModelTurn>) -> Self {
        Self {
            script: Mutex::new(turns.into_iter().map(Ok).collect()),
            ..Default::default()
        }
    }

    /// Script that mixes successful turns and errors
    pub fn with_results(results: Vec<Result<ModelTurn, LlmError>>) -> Self {
        Self {
            script: Mutex::new(results.into_iter().collect()),
            ..Default::default()
        }
    }

    /// Turn returned forever after the script is exhausted
    pub fn repeating(mut self, turn: ModelTurn) -> Self {
        self.fallback = Some(turn);
        self
    }

    /// Number of completions requested so far
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Tool names offered on each completion, in call order
    pub fn seen_tools(&self) -> Vec<Vec<String>> {
        self.seen_tools.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(
        &self,
        _transcript: &Transcript,
        tools: &[ToolDefinition],
    ) -> Result<ModelResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut seen) = self.seen_tools.lock() {
            seen.push(tools.iter().map(|t| t.name.clone()).collect());
        }

        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        let turn = match next {
            Some(result) => result?,
            None => self
                .fallback
                .clone()
                .ok_or_else(|| LlmError::InvalidResponse("mock script exhausted".to_string()))?,
        };

        Ok(ModelResponse {
            turn,
            usage: Usage::new(10, 5),
        })
    }

    fn model(&self) -> &str {
        "mock-model"
    }
}
