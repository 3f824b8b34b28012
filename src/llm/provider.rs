//! Provider selection and the shared HTTP client
//!
//! Every backend differs only in request/response translation, so the
//! backends are variants of [`ProviderBackend`] and one [`HttpLlmClient`]
//! does the sending, status handling and usage tracking for all of them.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::anthropic::{self, AnthropicBackend};
use super::client::{LlmClient, LlmError};
use super::gemini::GeminiBackend;
use super::openai::{AZURE_API_VERSION, DEEPSEEK_BASE_URL, OPENAI_BASE_URL, OpenAiBackend, OpenAiEndpoint};
use super::types::{ModelResponse, ToolDefinition, Usage};
use crate::config::ModelConfig;
use crate::domain::Transcript;

/// Which model provider to talk to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[serde(rename = "openai")]
    OpenAi,
    Azure,
    #[serde(alias = "claude")]
    Anthropic,
    #[serde(rename = "deepseek")]
    DeepSeek,
    #[serde(alias = "google")]
    Gemini,
}

impl ProviderKind {
    /// Parse from string representation
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Some(Self::OpenAi),
            "azure" | "azure-openai" => Some(Self::Azure),
            "anthropic" | "claude" => Some(Self::Anthropic),
            "deepseek" => Some(Self::DeepSeek),
            "gemini" | "google" => Some(Self::Gemini),
            _ => None,
        }
    }

    /// Environment variable holding the API key when the config names none
    pub fn default_api_key_env(&self) -> &'static str {
        match self {
            Self::OpenAi => "OPENAI_API_KEY",
            Self::Azure => "AZURE_OPENAI_API_KEY",
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::DeepSeek => "DEEPSEEK_API_KEY",
            Self::Gemini => "GEMINI_API_KEY",
        }
    }

    /// Model used when the config names none
    pub fn default_model(&self) -> &'static str {
        match self {
            Self::OpenAi | Self::Azure => "gpt-4o",
            Self::Anthropic => anthropic::DEFAULT_MODEL,
            Self::DeepSeek => "deepseek-chat",
            Self::Gemini => "gemini-1.5-pro",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::OpenAi => "openai",
            Self::Azure => "azure",
            Self::Anthropic => "anthropic",
            Self::DeepSeek => "deepseek",
            Self::Gemini => "gemini",
        };
        f.write_str(s)
    }
}

/// Request/response translation for one provider family
#[derive(Debug, Clone)]
pub enum ProviderBackend {
    OpenAi(OpenAiBackend),
    Anthropic(AnthropicBackend),
    Gemini(GeminiBackend),
}

impl ProviderBackend {
    /// Build the backend described by the model config
    pub fn from_config(config: &ModelConfig) -> Result<Self, LlmError> {
        let model = config.resolved_model();
        let backend = match config.provider {
            ProviderKind::OpenAi | ProviderKind::DeepSeek => {
                let default_base = if config.provider == ProviderKind::DeepSeek {
                    DEEPSEEK_BASE_URL
                } else {
                    OPENAI_BASE_URL
                };
                let base_url = config.base_url.clone().unwrap_or_else(|| default_base.to_string());
                Self::OpenAi(OpenAiBackend::new(
                    model,
                    config.max_tokens,
                    OpenAiEndpoint::Standard { base_url },
                ))
            }
            ProviderKind::Azure => {
                let endpoint = config.base_url.clone().ok_or_else(|| {
                    LlmError::Config("azure requires model.base_url (the resource endpoint)".to_string())
                })?;
                let deployment = config.deployment.clone().unwrap_or_else(|| model.clone());
                let api_version = config
                    .api_version
                    .clone()
                    .unwrap_or_else(|| AZURE_API_VERSION.to_string());
                Self::OpenAi(OpenAiBackend::new(
                    model,
                    config.max_tokens,
                    OpenAiEndpoint::Azure {
                        endpoint,
                        deployment,
                        api_version,
                    },
                ))
            }
            ProviderKind::Anthropic => {
                let mut backend = AnthropicBackend::new(model, config.max_tokens);
                if let Some(url) = &config.base_url {
                    backend.url = url.clone();
                }
                Self::Anthropic(backend)
            }
            ProviderKind::Gemini => {
                let mut backend = GeminiBackend::new(model, config.max_tokens);
                if let Some(url) = &config.base_url {
                    backend.base_url = url.clone();
                }
                Self::Gemini(backend)
            }
        };
        Ok(backend)
    }

    pub fn model(&self) -> &str {
        match self {
            Self::OpenAi(b) => &b.model,
            Self::Anthropic(b) => &b.model,
            Self::Gemini(b) => &b.model,
        }
    }

    pub fn url(&self) -> String {
        match self {
            Self::OpenAi(b) => b.url(),
            Self::Anthropic(b) => b.url.clone(),
            Self::Gemini(b) => b.url(),
        }
    }

    fn authorize(&self, builder: RequestBuilder, api_key: &str) -> RequestBuilder {
        match self {
            Self::OpenAi(b) => b.authorize(builder, api_key),
            Self::Anthropic(b) => b.authorize(builder, api_key),
            Self::Gemini(b) => b.authorize(builder, api_key),
        }
    }

    pub fn build_request(&self, transcript: &Transcript, tools: &[ToolDefinition]) -> Value {
        match self {
            Self::OpenAi(b) => b.build_request(transcript, tools),
            Self::Anthropic(b) => b.build_request(transcript, tools),
            Self::Gemini(b) => b.build_request(transcript, tools),
        }
    }

    pub fn parse_response(&self, body: Value) -> Result<ModelResponse, LlmError> {
        match self {
            Self::OpenAi(b) => b.parse_response(body),
            Self::Anthropic(b) => b.parse_response(body),
            Self::Gemini(b) => b.parse_response(body),
        }
    }
}

/// HTTP model client shared by all providers
pub struct HttpLlmClient {
    client: Client,
    api_key: String,
    backend: ProviderBackend,
    usage: Arc<Mutex<Usage>>,
}

impl HttpLlmClient {
    /// Create a client from config, reading the API key from the environment
    pub fn from_config(config: &ModelConfig) -> Result<Self, LlmError> {
        let env_var = config.api_key_env();
        let api_key = std::env::var(&env_var).map_err(|_| LlmError::MissingApiKey { env_var })?;
        let backend = ProviderBackend::from_config(config)?;
        Self::with_api_key(backend, api_key, Duration::from_millis(config.timeout_ms))
    }

    /// Create a client with an explicit API key
    pub fn with_api_key(backend: ProviderBackend, api_key: String, timeout: Duration) -> Result<Self, LlmError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            api_key,
            backend,
            usage: Arc::new(Mutex::new(Usage::default())),
        })
    }

    /// Send a request body to the provider
    async fn send_request(&self, body: Value) -> Result<Value, LlmError> {
        let builder = self
            .client
            .post(self.backend.url())
            .header("content-type", "application/json")
            .json(&body);

        let response = self.backend.authorize(builder, &self.api_key).send().await?;
        let status = response.status();

        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(LlmError::RateLimited {
                retry_after: Duration::from_secs(retry_after),
            });
        }

        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(LlmError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(format!("undecodable body: {}", e)))
    }

    /// Get cumulative token usage
    pub fn total_usage(&self) -> Usage {
        self.usage.lock().map(|u| *u).unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(
        &self,
        transcript: &Transcript,
        tools: &[ToolDefinition],
    ) -> Result<ModelResponse, LlmError> {
        let body = self.backend.build_request(transcript, tools);
        log::debug!(
            "Sending completion to {} ({} turns, {} tools)",
            self.backend.url(),
            transcript.len(),
            tools.len()
        );
        let raw = self.send_request(body).await?;
        let response = self.backend.parse_response(raw)?;

        if let Ok(mut total) = self.usage.lock() {
            total.add(&response.usage);
        }

        Ok(response)
    }

    fn model(&self) -> &str {
        self.backend.model()
    }
}

impl fmt::Debug for HttpLlmClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpLlmClient")
            .field("backend", &self.backend)
            .finish()
    }
}
