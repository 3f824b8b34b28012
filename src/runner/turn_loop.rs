//! Turn runner implementation - drives one bounded conversation.
//!
//! Each turn the model either answers (run completes) or asks for tools.
//! Requested tools are dispatched concurrently and every result is appended,
//! in request order, before the model is asked again.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::domain::{RunResult, RunState, TerminalReason, Transcript};
use crate::error::RunError;
use crate::llm::{LlmClient, LlmError, ModelResponse, ModelTurn, ToolDefinition, Usage};
use crate::tools::ToolRouter;

/// Failure message recorded when a run is cancelled
pub const CANCELLED: &str = "cancelled";

/// Configuration for the TurnRunner.
#[derive(Debug, Clone)]
pub struct TurnRunnerConfig {
    /// Upper bound on model completions per run
    pub max_turns: u32,
    /// Deadline for one model completion
    pub model_timeout: Duration,
    /// Extra attempts after a retryable model failure
    pub model_retries: u32,
    /// First retry delay; doubles each attempt
    pub retry_backoff: Duration,
}

impl Default for TurnRunnerConfig {
    fn default() -> Self {
        Self {
            max_turns: 100,
            model_timeout: Duration::from_secs(300),
            model_retries: 3,
            retry_backoff: Duration::from_secs(1),
        }
    }
}

impl TurnRunnerConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_turns: config.runner.max_turns,
            model_timeout: Duration::from_millis(config.model.timeout_ms),
            model_retries: config.runner.model_retries,
            retry_backoff: Duration::from_millis(config.runner.retry_backoff_ms),
        }
    }

    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }
}

/// Mutable state of one run
struct RunContext {
    state: RunState,
    turns: u32,
    transcript: Transcript,
    usage: Usage,
}

impl RunContext {
    fn transition(&mut self, next: RunState) {
        tracing::debug!(turn = self.turns, from = ?self.state, to = ?next, "run state transition");
        self.state = next;
    }

    fn finish(mut self, state: RunState, final_output: Option<String>, error: Option<String>) -> RunResult {
        self.transition(state);
        let reason = state.terminal_reason().unwrap_or(TerminalReason::Failed);
        tracing::info!(
            reason = %reason,
            turns = self.turns,
            tokens = self.usage.total(),
            error = error.as_deref().unwrap_or(""),
            "run finished"
        );
        RunResult {
            final_output,
            turns: self.turns,
            reason,
            error,
            transcript: self.transcript,
            usage: self.usage,
        }
    }

    fn fail(self, error: impl Into<String>) -> RunResult {
        self.finish(RunState::Failed, None, Some(error.into()))
    }
}

/// TurnRunner executes one task against a model and a set of tools.
///
/// Generic over the model client and the router so tests can swap either.
pub struct TurnRunner<L, R>
where
    L: LlmClient,
    R: ToolRouter,
{
    /// LLM client for completions
    llm: Arc<L>,
    /// Tool router for executing tool calls
    router: Arc<R>,
    config: TurnRunnerConfig,
}

impl<L, R> TurnRunner<L, R>
where
    L: LlmClient,
    R: ToolRouter,
{
    /// Create a new TurnRunner with default configuration.
    pub fn new(llm: Arc<L>, router: Arc<R>) -> Self {
        Self::with_config(llm, router, TurnRunnerConfig::default())
    }

    /// Create a new TurnRunner with custom configuration.
    pub fn with_config(llm: Arc<L>, router: Arc<R>, config: TurnRunnerConfig) -> Self {
        Self { llm, router, config }
    }

    pub fn config(&self) -> &TurnRunnerConfig {
        &self.config
    }

    /// Run until the model answers, the turn limit trips, a fatal error
    /// occurs, or `cancel` fires. Never more than `max_turns` model calls.
    pub async fn run(&self, instructions: &str, task: &str, cancel: &CancellationToken) -> RunResult {
        let tools = self.router.definitions();
        let mut ctx = RunContext {
            state: RunState::Running,
            turns: 0,
            transcript: Transcript::new(instructions, task),
            usage: Usage::default(),
        };

        tracing::info!(
            model = self.llm.model(),
            tools = tools.len(),
            max_turns = self.config.max_turns,
            "run started"
        );

        loop {
            if ctx.turns >= self.config.max_turns {
                log::warn!("No final answer within {} turns", self.config.max_turns);
                return ctx.finish(RunState::TurnLimitExceeded, None, None);
            }
            ctx.turns += 1;
            tracing::debug!(turn = ctx.turns, "requesting completion");

            let response = tokio::select! {
                biased;
                _ = cancel.cancelled() => return ctx.fail(CANCELLED),
                response = self.complete_with_retry(&ctx.transcript, &tools) => response,
            };

            let response = match response {
                Ok(response) => response,
                Err(e) => {
                    log::error!("Turn {}: {}", ctx.turns, e);
                    return ctx.fail(e.to_string());
                }
            };
            ctx.usage.add(&response.usage);

            let (text, calls) = match response.turn {
                ModelTurn::FinalAnswer(answer) => {
                    ctx.transcript.push_answer(answer.clone());
                    return ctx.finish(RunState::Completed, Some(answer), None);
                }
                ModelTurn::ToolCalls { text, calls } => (text, calls),
            };

            let names: Vec<&str> = calls.iter().map(|c| c.name.as_str()).collect();
            tracing::info!(turn = ctx.turns, calls = calls.len(), tools = ?names, "dispatching tool calls");
            ctx.transcript.push_tool_calls(text, calls.clone());
            ctx.transition(RunState::AwaitingToolResults);

            let outcomes = tokio::select! {
                biased;
                _ = cancel.cancelled() => return ctx.fail(CANCELLED),
                outcomes = join_all(calls.iter().map(|call| self.router.dispatch(call))) => outcomes,
            };

            let mut results = Vec::with_capacity(outcomes.len());
            let mut fatal: Option<RunError> = None;
            for outcome in outcomes {
                match outcome {
                    Ok(result) => results.push(result),
                    Err(e) => {
                        fatal.get_or_insert(e);
                    }
                }
            }
            if let Some(e) = fatal {
                log::error!("Turn {}: tool dispatch failed: {}", ctx.turns, e);
                return ctx.fail(e.to_string());
            }

            ctx.transcript.push_tool_results(results);
            ctx.transition(RunState::Running);
        }
    }

    /// One completion with timeout and exponential backoff on retryable errors
    async fn complete_with_retry(
        &self,
        transcript: &Transcript,
        tools: &[ToolDefinition],
    ) -> Result<ModelResponse, RunError> {
        let mut attempt: u32 = 0;
        loop {
            let result = match tokio::time::timeout(self.config.model_timeout, self.llm.complete(transcript, tools)).await {
                Ok(result) => result,
                Err(_) => Err(LlmError::Timeout(self.config.model_timeout)),
            };

            match result {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt < self.config.model_retries => {
                    let delay = e
                        .retry_after()
                        .unwrap_or_else(|| self.config.retry_backoff * 2u32.saturating_pow(attempt));
                    attempt += 1;
                    log::warn!(
                        "Model call failed (attempt {}/{}), retrying in {:?}: {}",
                        attempt,
                        self.config.model_retries + 1,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(RunError::ModelUnavailable(e.to_string())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{MockLlmClient, Role, ToolCallRequest};
    use crate::server::{MockToolServer, ToolServer};
    use crate::tools::{CatalogRouter, ToolCatalog};
    use async_trait::async_trait;
    use serde_json::json;

    fn call(id: &str, name: &str) -> ModelTurn {
        ModelTurn::ToolCalls {
            text: None,
            calls: vec![ToolCallRequest::new(id, name, json!({}))],
        }
    }

    fn fast_config(max_turns: u32) -> TurnRunnerConfig {
        TurnRunnerConfig {
            max_turns,
            model_timeout: Duration::from_secs(5),
            model_retries: 2,
            retry_backoff: Duration::from_millis(1),
        }
    }

    async fn router(servers: &[Arc<MockToolServer>]) -> Arc<CatalogRouter> {
        let mut dyn_servers: Vec<Arc<dyn ToolServer>> = Vec::new();
        for server in servers {
            server.start().await.unwrap();
            dyn_servers.push(server.clone());
        }
        let catalog = ToolCatalog::build(&dyn_servers).await.unwrap();
        Arc::new(CatalogRouter::new(catalog).with_retries(1, Duration::from_millis(1)))
    }

    fn two_servers() -> Vec<Arc<MockToolServer>> {
        vec![
            Arc::new(MockToolServer::new("filesystem", &["readFile", "listDir"])),
            Arc::new(MockToolServer::new("browser", &["navigate", "click"])),
        ]
    }

    #[tokio::test]
    async fn test_completes_on_third_turn() {
        let servers = two_servers();
        let llm = Arc::new(MockLlmClient::new(vec![
            call("c1", "navigate"),
            call("c2", "readFile"),
            ModelTurn::FinalAnswer("All checks passed".into()),
        ]));
        let runner = TurnRunner::with_config(llm.clone(), router(&servers).await, fast_config(5));

        let result = runner.run("be careful", "test the page", &CancellationToken::new()).await;

        assert_eq!(result.reason, TerminalReason::Completed);
        assert_eq!(result.turns, 3);
        assert_eq!(result.final_output.as_deref(), Some("All checks passed"));
        assert_eq!(llm.calls(), 3);
        assert_eq!(servers[0].call_count(), 1);
        assert_eq!(servers[1].call_count(), 1);
        assert_eq!(result.usage, Usage::new(30, 15));
        assert_eq!(result.transcript.tool_call_count(), 2);
        assert_eq!(llm.seen_tools()[0], vec!["click", "listDir", "navigate", "readFile"]);
    }

    #[tokio::test]
    async fn test_turn_limit_exactly() {
        let servers = two_servers();
        let llm = Arc::new(MockLlmClient::default().repeating(call("c", "navigate")));
        let runner = TurnRunner::with_config(llm.clone(), router(&servers).await, fast_config(10));

        let result = runner.run("", "loop forever", &CancellationToken::new()).await;

        assert_eq!(result.reason, TerminalReason::TurnLimitExceeded);
        assert_eq!(result.turns, 10);
        assert_eq!(llm.calls(), 10);
        assert_eq!(servers[1].call_count(), 10);
        assert!(result.error.is_none());
        assert!(result.final_output.is_none());
    }

    #[tokio::test]
    async fn test_answer_on_last_allowed_turn_completes() {
        let llm = Arc::new(MockLlmClient::new(vec![
            call("c1", "click"),
            ModelTurn::FinalAnswer("done".into()),
        ]));
        let servers = two_servers();
        let runner = TurnRunner::with_config(llm.clone(), router(&servers).await, fast_config(2));

        let result = runner.run("", "task", &CancellationToken::new()).await;
        assert!(result.is_completed());
        assert_eq!(result.turns, 2);
        assert_eq!(servers[1].call_count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_tool_reported_to_model() {
        let llm = Arc::new(MockLlmClient::new(vec![
            call("c1", "format_disk"),
            ModelTurn::FinalAnswer("ok".into()),
        ]));
        let servers = two_servers();
        let runner = TurnRunner::with_config(llm, router(&servers).await, fast_config(5));

        let result = runner.run("", "task", &CancellationToken::new()).await;

        assert!(result.is_completed());
        let tool_turn = result
            .transcript
            .turns()
            .iter()
            .find(|t| t.role == Role::Tool)
            .unwrap();
        assert!(tool_turn.tool_results[0].is_error);
        assert!(tool_turn.tool_results[0].content.contains("format_disk"));
    }

    #[tokio::test]
    async fn test_fan_out_results_in_request_order() {
        let servers = two_servers();
        let llm = Arc::new(MockLlmClient::new(vec![
            ModelTurn::ToolCalls {
                text: Some("checking".into()),
                calls: vec![
                    ToolCallRequest::new("a", "navigate", json!({})),
                    ToolCallRequest::new("b", "readFile", json!({})),
                    ToolCallRequest::new("c", "click", json!({})),
                ],
            },
            ModelTurn::FinalAnswer("done".into()),
        ]));
        let runner = TurnRunner::with_config(llm, router(&servers).await, fast_config(5));

        let result = runner.run("", "task", &CancellationToken::new()).await;

        let last_tool_turn = result
            .transcript
            .turns()
            .iter()
            .rev()
            .find(|t| t.role == Role::Tool)
            .unwrap();
        let ids: Vec<&str> = last_tool_turn.tool_results.iter().map(|r| r.call_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(servers[1].call_count(), 2);
    }

    #[tokio::test]
    async fn test_crashed_server_fails_run() {
        let servers = vec![
            Arc::new(MockToolServer::new("filesystem", &["readFile"])),
            Arc::new(MockToolServer::new("browser", &["navigate"]).crash_after(1)),
        ];
        let llm = Arc::new(MockLlmClient::default().repeating(ModelTurn::ToolCalls {
            text: None,
            calls: vec![
                ToolCallRequest::new("a", "navigate", json!({})),
                ToolCallRequest::new("b", "readFile", json!({})),
            ],
        }));
        let runner = TurnRunner::with_config(llm, router(&servers).await, fast_config(10));

        let result = runner.run("", "task", &CancellationToken::new()).await;

        assert!(result.is_failed());
        assert_eq!(result.turns, 2);
        assert!(result.error.unwrap().contains("browser"));
        // the healthy call in the failing turn still ran
        assert_eq!(servers[0].call_count(), 2);
    }

    #[tokio::test]
    async fn test_retryable_model_errors_then_success() {
        let llm = Arc::new(MockLlmClient::with_results(vec![
            Err(LlmError::ApiError {
                status: 503,
                message: "overloaded".into(),
            }),
            Err(LlmError::Timeout(Duration::from_secs(1))),
            Ok(ModelTurn::FinalAnswer("finally".into())),
        ]));
        let servers = two_servers();
        let runner = TurnRunner::with_config(llm.clone(), router(&servers).await, fast_config(3));

        let result = runner.run("", "task", &CancellationToken::new()).await;

        assert!(result.is_completed());
        assert_eq!(result.turns, 1);
        assert_eq!(llm.calls(), 3);
    }

    #[tokio::test]
    async fn test_fatal_model_error_fails() {
        let llm = Arc::new(MockLlmClient::with_results(vec![Err(LlmError::ApiError {
            status: 401,
            message: "bad key".into(),
        })]));
        let servers = two_servers();
        let runner = TurnRunner::with_config(llm.clone(), router(&servers).await, fast_config(3));

        let result = runner.run("", "task", &CancellationToken::new()).await;

        assert!(result.is_failed());
        assert!(result.error.unwrap().starts_with("Model unavailable"));
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn test_retries_exhausted_fails() {
        let overloaded = || {
            Err(LlmError::ApiError {
                status: 500,
                message: "boom".into(),
            })
        };
        let llm = Arc::new(MockLlmClient::with_results(vec![overloaded(), overloaded(), overloaded()]));
        let servers = two_servers();
        let runner = TurnRunner::with_config(llm.clone(), router(&servers).await, fast_config(3));

        let result = runner.run("", "task", &CancellationToken::new()).await;

        assert!(result.is_failed());
        assert_eq!(llm.calls(), 3);
    }

    /// Model that never answers
    struct HangingLlm;

    #[async_trait]
    impl LlmClient for HangingLlm {
        async fn complete(&self, _: &Transcript, _: &[ToolDefinition]) -> Result<ModelResponse, LlmError> {
            std::future::pending().await
        }

        fn model(&self) -> &str {
            "hanging"
        }
    }

    #[tokio::test]
    async fn test_cancel_during_model_call() {
        let servers = two_servers();
        let runner = TurnRunner::with_config(Arc::new(HangingLlm), router(&servers).await, fast_config(3));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result = runner.run("", "task", &cancel).await;

        assert!(result.is_failed());
        assert_eq!(result.error.as_deref(), Some(CANCELLED));
        assert_eq!(result.turns, 1);
    }

    #[tokio::test]
    async fn test_model_timeout_counts_as_retryable() {
        let config = TurnRunnerConfig {
            max_turns: 3,
            model_timeout: Duration::from_millis(10),
            model_retries: 1,
            retry_backoff: Duration::from_millis(1),
        };
        let servers = two_servers();
        let runner = TurnRunner::with_config(Arc::new(HangingLlm), router(&servers).await, config);

        let result = runner.run("", "task", &CancellationToken::new()).await;

        assert!(result.is_failed());
        assert!(result.error.unwrap().contains("timed out"));
    }

    #[test]
    fn test_config_from_file_config() {
        let mut config = Config::default();
        config.runner.max_turns = 7;
        config.model.timeout_ms = 1500;
        let runner_config = TurnRunnerConfig::from_config(&config);
        assert_eq!(runner_config.max_turns, 7);
        assert_eq!(runner_config.model_timeout, Duration::from_millis(1500));
        assert_eq!(runner_config.with_max_turns(2).max_turns, 2);
    }
}
