//! One end-to-end run: servers up, catalog built, turn loop, servers down

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::domain::{RunResult, Transcript};
use crate::error::{Result, RunError};
use crate::llm::LlmClient;
use crate::runner::{CANCELLED, TurnRunner, TurnRunnerConfig};
use crate::server::{ToolServer, with_servers};
use crate::tools::{CatalogRouter, ToolCatalog};

/// Run `task` against `servers`
///
/// `on_ready` sees the catalog once every server is up and before the first
/// model call. Servers are stopped before this returns, on every path.
/// Cancelling during startup yields a failed result, like cancelling mid-run.
pub async fn run_task<L, F>(
    llm: Arc<L>,
    servers: Vec<Arc<dyn ToolServer>>,
    config: &Config,
    instructions: &str,
    task: &str,
    cancel: &CancellationToken,
    on_ready: F,
) -> Result<RunResult>
where
    L: LlmClient,
    F: FnOnce(&ToolCatalog),
{
    let runner_config = TurnRunnerConfig::from_config(config);
    let invocation_retries = config.runner.invocation_retries;
    let backoff = Duration::from_millis(config.runner.retry_backoff_ms);

    let outcome = with_servers(servers, cancel, |catalog| async move {
        on_ready(&catalog);
        let router = Arc::new(CatalogRouter::new(catalog).with_retries(invocation_retries, backoff));
        let runner = TurnRunner::with_config(llm, router, runner_config);
        Ok(runner.run(instructions, task, cancel).await)
    })
    .await;

    match outcome {
        Err(RunError::Cancelled) => Ok(RunResult::failed_before_start(
            Transcript::new(instructions, task),
            CANCELLED,
        )),
        other => other,
    }
}

/// Start `servers`, report their tools, stop them
pub async fn list_tools(
    servers: Vec<Arc<dyn ToolServer>>,
    cancel: &CancellationToken,
) -> Result<BTreeMap<String, Vec<String>>> {
    with_servers(servers, cancel, |catalog| async move { Ok(catalog.by_server()) }).await
}
