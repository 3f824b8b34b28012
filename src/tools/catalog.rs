//! Tool catalog built from running tool servers
//!
//! Merges every Ready server's tool list into one namespace. Tool names must
//! be unique across all servers.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use serde_json::Value;

use crate::error::{Result, RunError};
use crate::llm::ToolDefinition;
use crate::server::{ServerState, ToolServer};

/// A tool and the server that provides it
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    /// Name of the owning server
    pub server: String,
    /// Dispatch target; never used to start or stop the server
    handle: Weak<dyn ToolServer>,
}

impl ToolDescriptor {
    /// Server to dispatch to, if it is still alive
    pub fn handle(&self) -> Option<Arc<dyn ToolServer>> {
        self.handle.upgrade()
    }

    pub fn to_definition(&self) -> ToolDefinition {
        ToolDefinition::new(&self.name, &self.description, self.input_schema.clone())
    }
}

/// Name-addressable registry of every tool available to a run
#[derive(Debug, Clone, Default)]
pub struct ToolCatalog {
    tools: BTreeMap<String, ToolDescriptor>,
}

impl ToolCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// List tools on every Ready server and merge them
    ///
    /// Fails on the first name exposed twice; no partial catalog is returned.
    pub async fn build(servers: &[Arc<dyn ToolServer>]) -> Result<Self> {
        let mut tools: BTreeMap<String, ToolDescriptor> = BTreeMap::new();

        for server in servers {
            if server.state() != ServerState::Ready {
                log::warn!(
                    "Skipping tool server '{}' while building catalog: {}",
                    server.name(),
                    server.state()
                );
                continue;
            }

            for info in server.list_tools().await? {
                if let Some(existing) = tools.get(&info.name) {
                    return Err(RunError::DuplicateTool {
                        tool: info.name,
                        first: existing.server.clone(),
                        second: server.name().to_string(),
                    });
                }
                let descriptor = ToolDescriptor {
                    name: info.name.clone(),
                    description: info.description,
                    input_schema: info.input_schema,
                    server: server.name().to_string(),
                    handle: Arc::downgrade(server),
                };
                tools.insert(info.name, descriptor);
            }
        }

        log::info!("Tool catalog built with {} tools", tools.len());
        Ok(Self { tools })
    }

    /// Look up a tool by name
    pub fn resolve(&self, name: &str) -> Result<&ToolDescriptor> {
        self.tools
            .get(name)
            .ok_or_else(|| RunError::UnknownTool(name.to_string()))
    }

    /// Name of the server providing `name`
    pub fn server_of(&self, name: &str) -> Option<&str> {
        self.tools.get(name).map(|t| t.server.as_str())
    }

    /// Model-facing tool list, sorted by name
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(ToolDescriptor::to_definition).collect()
    }

    /// All tool names, sorted
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    /// Tool names grouped by owning server
    pub fn by_server(&self) -> BTreeMap<String, Vec<String>> {
        let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for tool in self.tools.values() {
            grouped.entry(tool.server.clone()).or_default().push(tool.name.clone());
        }
        grouped
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::MockToolServer;

    async fn ready(server: MockToolServer) -> Arc<dyn ToolServer> {
        server.start().await.unwrap();
        Arc::new(server)
    }

    #[tokio::test]
    async fn test_build_disjoint() {
        let servers = vec![
            ready(MockToolServer::new("filesystem", &["read_file", "list_directory"])).await,
            ready(MockToolServer::new("playwright", &["navigate", "click"])).await,
        ];
        let catalog = ToolCatalog::build(&servers).await.unwrap();

        assert_eq!(catalog.len(), 4);
        assert_eq!(catalog.names(), vec!["click", "list_directory", "navigate", "read_file"]);
        assert_eq!(catalog.resolve("navigate").unwrap().server, "playwright");
        assert_eq!(catalog.server_of("read_file"), Some("filesystem"));
        assert_eq!(catalog.by_server()["filesystem"], vec!["list_directory", "read_file"]);
    }

    #[tokio::test]
    async fn test_build_duplicate_across_servers() {
        let servers = vec![
            ready(MockToolServer::new("a", &["search"])).await,
            ready(MockToolServer::new("b", &["fetch", "search"])).await,
        ];
        let err = ToolCatalog::build(&servers).await.unwrap_err();
        match err {
            RunError::DuplicateTool { tool, first, second } => {
                assert_eq!(tool, "search");
                assert_eq!(first, "a");
                assert_eq!(second, "b");
            }
            other => panic!("expected duplicate, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_build_duplicate_within_server() {
        let servers = vec![ready(MockToolServer::new("a", &["search", "search"])).await];
        assert!(matches!(
            ToolCatalog::build(&servers).await,
            Err(RunError::DuplicateTool { .. })
        ));
    }

    #[tokio::test]
    async fn test_build_skips_unready() {
        let idle: Arc<dyn ToolServer> = Arc::new(MockToolServer::new("idle", &["x"]));
        let servers = vec![idle, ready(MockToolServer::new("live", &["y"])).await];
        let catalog = ToolCatalog::build(&servers).await.unwrap();
        assert_eq!(catalog.names(), vec!["y"]);
    }

    #[tokio::test]
    async fn test_resolve_unknown() {
        let catalog = ToolCatalog::new();
        assert!(catalog.is_empty());
        assert!(matches!(catalog.resolve("nope"), Err(RunError::UnknownTool(_))));
    }

    #[tokio::test]
    async fn test_handle_does_not_keep_server_alive() {
        let server = ready(MockToolServer::new("fs", &["read_file"])).await;
        let catalog = ToolCatalog::build(std::slice::from_ref(&server)).await.unwrap();
        assert!(catalog.resolve("read_file").unwrap().handle().is_some());

        drop(server);
        assert!(catalog.resolve("read_file").unwrap().handle().is_none());
    }

    #[tokio::test]
    async fn test_definitions_sorted() {
        let servers = vec![ready(MockToolServer::new("s", &["zeta", "alpha"])).await];
        let catalog = ToolCatalog::build(&servers).await.unwrap();
        let names: Vec<String> = catalog.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }
}
