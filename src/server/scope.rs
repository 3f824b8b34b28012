//! Scoped acquisition of tool servers
//!
//! Every server is registered before it is started and every registered
//! server is stopped, in reverse order, however the body ends. Cancellation
//! is honoured while servers start and while the catalog is built; once the
//! body runs it owns cancellation.

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::{ServerSpec, ToolServer, ToolServerHandle};
use crate::error::{Result, RunError};
use crate::tools::ToolCatalog;

/// Wrap launch descriptors in unstarted handles
pub fn handles_for(specs: Vec<ServerSpec>) -> Vec<Arc<dyn ToolServer>> {
    specs
        .into_iter()
        .map(|spec| Arc::new(ToolServerHandle::new(spec)) as Arc<dyn ToolServer>)
        .collect()
}

/// Start `servers` in order, build the catalog, run `body`, stop everything
///
/// Fails with [`RunError::Cancelled`] if `cancel` fires before `body` starts.
pub async fn with_servers<T, F, Fut>(
    servers: Vec<Arc<dyn ToolServer>>,
    cancel: &CancellationToken,
    body: F,
) -> Result<T>
where
    F: FnOnce(ToolCatalog) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut registered: Vec<Arc<dyn ToolServer>> = Vec::with_capacity(servers.len());

    let outcome = async {
        for server in &servers {
            registered.push(server.clone());
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    log::info!("Cancelled while starting tool server '{}'", server.name());
                    return Err(RunError::Cancelled);
                }
                started = server.start() => started?,
            }
        }
        let catalog = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RunError::Cancelled),
            built = ToolCatalog::build(&servers) => built?,
        };
        body(catalog).await
    }
    .await;

    for server in registered.iter().rev() {
        server.stop().await;
    }
    log::debug!("Released {} tool servers", registered.len());

    outcome
}
