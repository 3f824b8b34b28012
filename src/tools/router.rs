//! Tool call routing
//!
//! Defines the ToolRouter trait the runner dispatches through and
//! CatalogRouter, which sends each call to the server owning the tool.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Result, RunError};
use crate::llm::{ToolCallRequest, ToolCallResult, ToolDefinition};

use super::catalog::ToolCatalog;

/// Trait for routing and executing tool calls
#[async_trait]
pub trait ToolRouter: Send + Sync {
    /// Execute one call. Failures the model can react to come back as error
    /// results; `Err` means the run cannot continue.
    async fn dispatch(&self, call: &ToolCallRequest) -> Result<ToolCallResult>;

    /// Tools to advertise to the model
    fn definitions(&self) -> Vec<ToolDefinition>;
}

/// Routes calls through a [`ToolCatalog`] to the owning server
pub struct CatalogRouter {
    catalog: ToolCatalog,
    retries: u32,
    backoff: Duration,
}

impl CatalogRouter {
    pub fn new(catalog: ToolCatalog) -> Self {
        Self {
            catalog,
            retries: 0,
            backoff: Duration::from_millis(500),
        }
    }

    /// Retry protocol-level failures `retries` extra times, waiting
    /// `backoff * attempt` between attempts
    pub fn with_retries(mut self, retries: u32, backoff: Duration) -> Self {
        self.retries = retries;
        self.backoff = backoff;
        self
    }

    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }
}

#[async_trait]
impl ToolRouter for CatalogRouter {
    async fn dispatch(&self, call: &ToolCallRequest) -> Result<ToolCallResult> {
        let descriptor = match self.catalog.resolve(&call.name) {
            Ok(descriptor) => descriptor,
            Err(e) if e.is_recoverable() => {
                log::warn!("Model requested unknown tool '{}'", call.name);
                return Ok(ToolCallResult::error(call, e.to_string()));
            }
            Err(e) => return Err(e),
        };

        let server = descriptor
            .handle()
            .ok_or_else(|| RunError::invocation(&descriptor.server, "server is no longer available"))?;

        let mut attempt = 0;
        loop {
            match server.invoke(&call.name, call.arguments.clone()).await {
                Ok(output) if output.is_error => return Ok(ToolCallResult::error(call, output.content)),
                Ok(output) => return Ok(ToolCallResult::success(call, output.content)),
                Err(e @ RunError::Invocation { .. }) if attempt < self.retries => {
                    attempt += 1;
                    log::warn!(
                        "Tool '{}' failed (attempt {}/{}): {}",
                        call.name,
                        attempt,
                        self.retries + 1,
                        e
                    );
                    tokio::time::sleep(self.backoff * attempt).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        self.catalog.definitions()
    }
}
