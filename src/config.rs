use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::RunError;
use crate::llm::ProviderKind;
use crate::server::ServerSpec;

/// Placeholder in server args replaced by the workspace directory
pub const WORKSPACE_PLACEHOLDER: &str = "{workspace}";

/// Instructions used when neither `instructions` nor `instructions_file` is set
pub const DEFAULT_INSTRUCTIONS: &str = "\
You are an automation testing agent with access to a filesystem and a browser.

ANALYSIS & PLANNING: read the task, decide which pages to visit and what to verify.
EXECUTION: use the browser tools to perform each step and the filesystem tools to
record evidence. Check the result of every tool call before moving on.
REPORTING: finish with a concise summary of what passed, what failed, and why.";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub model: ModelConfig,
    pub runner: RunnerConfig,
    pub servers: Vec<ServerConfig>,
    /// Directory handed to the filesystem server as its root
    pub workspace: PathBuf,
    pub instructions: Option<String>,
    pub instructions_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub provider: ProviderKind,
    pub model: Option<String>,
    /// Environment variable holding the API key; defaults per provider
    pub api_key_env: Option<String>,
    /// Base URL override (required for azure: the resource endpoint)
    pub base_url: Option<String>,
    /// Azure only
    pub api_version: Option<String>,
    /// Azure only; defaults to the model name
    pub deployment: Option<String>,
    pub max_tokens: u32,
    pub timeout_ms: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::OpenAi,
            model: None,
            api_key_env: None,
            base_url: None,
            api_version: None,
            deployment: None,
            max_tokens: 4096,
            timeout_ms: 300000,
        }
    }
}

impl ModelConfig {
    pub fn resolved_model(&self) -> String {
        self.model
            .clone()
            .unwrap_or_else(|| self.provider.default_model().to_string())
    }

    pub fn api_key_env(&self) -> String {
        self.api_key_env
            .clone()
            .unwrap_or_else(|| self.provider.default_api_key_env().to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub max_turns: u32,
    /// Extra attempts after a retryable model failure
    pub model_retries: u32,
    /// Extra attempts after a protocol-level tool server failure
    pub invocation_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_turns: 100,
            model_retries: 3,
            invocation_retries: 1,
            retry_backoff_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub cwd: Option<PathBuf>,
    pub cache_tools_list: bool,
    pub start_timeout_ms: u64,
    pub call_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            command: String::new(),
            args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
            cache_tools_list: true,
            start_timeout_ms: 120000,
            call_timeout_ms: 120000,
        }
    }
}

impl ServerConfig {
    fn npx(name: &str, package: &str, extra: &[&str]) -> Self {
        let mut args = vec!["-y".to_string(), package.to_string()];
        args.extend(extra.iter().map(|s| s.to_string()));
        Self {
            name: name.to_string(),
            command: "npx".to_string(),
            args,
            ..Default::default()
        }
    }

    /// Locate the server executable the way a shell would
    pub fn resolve_command(&self) -> Option<PathBuf> {
        which::which(&self.command).ok()
    }

    /// Launch descriptor with `{workspace}` expanded
    pub fn to_spec(&self, workspace: &Path) -> ServerSpec {
        let workspace = workspace.to_string_lossy();
        ServerSpec {
            name: self.name.clone(),
            command: self.command.clone(),
            args: self
                .args
                .iter()
                .map(|a| a.replace(WORKSPACE_PLACEHOLDER, &workspace))
                .collect(),
            env: self.env.clone(),
            cwd: self.cwd.clone(),
            cache_tools_list: self.cache_tools_list,
            start_timeout: std::time::Duration::from_millis(self.start_timeout_ms),
            call_timeout: std::time::Duration::from_millis(self.call_timeout_ms),
        }
    }
}

fn default_servers() -> Vec<ServerConfig> {
    vec![
        ServerConfig::npx(
            "filesystem",
            "@modelcontextprotocol/server-filesystem",
            &[WORKSPACE_PLACEHOLDER],
        ),
        ServerConfig::npx("playwright", "@executeautomation/playwright-mcp-server", &[]),
    ]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            runner: RunnerConfig::default(),
            servers: default_servers(),
            workspace: PathBuf::from("fs_files"),
            instructions: None,
            instructions_file: None,
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        let mut config = Self::load_file_chain(config_path)?;
        config.apply_env();
        Ok(config)
    }

    fn load_file_chain(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let project_name = env!("CARGO_PKG_NAME");

        // Try primary location: ~/.config/<project>/<project>.yml
        if let Some(config_dir) = dirs::config_dir() {
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // Try fallback location: ./<project>.yml
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config = Self::from_yaml(&content)?;
        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse config file")
    }

    /// `MODEL_PROVIDER` in the environment overrides the configured provider
    fn apply_env(&mut self) {
        if let Ok(value) = std::env::var("MODEL_PROVIDER") {
            match ProviderKind::from_str(&value) {
                Some(kind) => self.model.provider = kind,
                None => log::warn!("Ignoring unsupported MODEL_PROVIDER '{}'", value),
            }
        }
    }

    /// Reject configurations the run could never start with
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.runner.max_turns == 0 {
            return Err(RunError::Config("runner.max_turns must be at least 1".to_string()));
        }
        let mut seen = std::collections::HashSet::new();
        for server in &self.servers {
            if server.name.trim().is_empty() {
                return Err(RunError::Config("every server needs a name".to_string()));
            }
            if server.command.trim().is_empty() {
                return Err(RunError::Config(format!("server '{}' has no command", server.name)));
            }
            if !seen.insert(server.name.as_str()) {
                return Err(RunError::Config(format!("server name '{}' is used twice", server.name)));
            }
        }
        Ok(())
    }

    /// Create the workspace if missing and make its path absolute
    pub fn ensure_workspace(&mut self) -> Result<PathBuf> {
        fs::create_dir_all(&self.workspace)
            .with_context(|| format!("Failed to create workspace {}", self.workspace.display()))?;
        self.workspace = self
            .workspace
            .canonicalize()
            .with_context(|| format!("Failed to resolve workspace {}", self.workspace.display()))?;
        Ok(self.workspace.clone())
    }

    /// Launch descriptors for every configured server
    pub fn server_specs(&self) -> Vec<ServerSpec> {
        self.servers.iter().map(|s| s.to_spec(&self.workspace)).collect()
    }

    /// System instructions for the agent
    pub fn load_instructions(&self) -> Result<String> {
        if let Some(text) = &self.instructions {
            return Ok(text.clone());
        }
        if let Some(path) = &self.instructions_file {
            return fs::read_to_string(path)
                .with_context(|| format!("Failed to read instructions from {}", path.display()));
        }
        Ok(DEFAULT_INSTRUCTIONS.to_string())
    }
}
