//! Toolset assembly
//!
//! A [`Toolset`] is everything handed to the orchestrator: the x402 request
//! tool, the web search tool, and the tools of every configured tool-server. It owns the running
//! servers; dropping or shutting it down stops them.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::eth::Signer;
use crate::mcp::servers::{self, GithubToolset};
use crate::mcp::{
    BridgeError, CallableTool, LaunchSpec, SchemaError, SessionOptions, ToolServerHandle,
    create_tool_server_tools,
};
use crate::search::{SearchConfig, web_search_tool};
use crate::x402::{ClientConfig, PaymentClient, RequestError, x402_request_tool};

// ============================================================================
// Configuration
// ============================================================================

/// A tool-server to launch, as written in the config file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerEntry {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default = "default_true")]
    pub inherit_env: bool,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

impl ServerEntry {
    pub fn launch_spec(&self) -> LaunchSpec {
        LaunchSpec {
            command: self.command.clone(),
            args: self.args.clone(),
            env: self.env.clone(),
            inherit_env: self.inherit_env,
            cwd: self.cwd.clone(),
        }
    }
}

/// GitHub tool-server preset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GithubConfig {
    pub token: String,
    #[serde(default)]
    pub toolsets: Vec<GithubToolset>,
    /// Docker image, defaults to the official one
    #[serde(default)]
    pub image: Option<String>,
}

/// Firecrawl tool-server preset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirecrawlConfig {
    pub api_key: String,
    /// Program and arguments, defaults to `npx -y firecrawl-mcp`
    #[serde(default)]
    pub command: Option<Vec<String>>,
}

/// A tool-server ready to launch
#[derive(Debug, Clone)]
pub struct NamedServer {
    pub name: String,
    pub spec: LaunchSpec,
}

impl NamedServer {
    pub fn github(config: &GithubConfig) -> Self {
        Self {
            name: "github".to_string(),
            spec: servers::github(&config.token, &config.toolsets, config.image.as_deref()),
        }
    }

    pub fn firecrawl(config: &FirecrawlConfig) -> Self {
        Self {
            name: "firecrawl".to_string(),
            spec: servers::firecrawl(&config.api_key, config.command.as_deref()),
        }
    }
}

/// Everything needed to assemble a [`Toolset`]
#[derive(Clone)]
pub struct ToolsetConfig {
    pub signer: Option<Arc<dyn Signer>>,
    /// Offer the `x402-request` tool
    pub x402_tool: bool,
    /// Offer the `web_search` tool
    pub web_search: Option<SearchConfig>,
    pub client: ClientConfig,
    pub session: SessionOptions,
    pub servers: Vec<NamedServer>,
}

#[derive(Debug, thiserror::Error)]
pub enum ToolsetError {
    #[error("the x402 request tool needs a signing key (set --key or X402_KEY, or pass --no-x402-tool)")]
    MissingKey,
    #[error("tool-server name `{0}` is used more than once")]
    DuplicateServer(String),
    #[error("tool-server `{0}` has an empty command")]
    EmptyCommand(String),
    #[error("the web search tool needs a SerpAPI key")]
    MissingSearchKey,
    #[error("failed to build a built-in tool: {0}")]
    Schema(#[from] SchemaError),
    #[error("failed to build the HTTP client: {0}")]
    Client(#[from] RequestError),
}

impl ToolsetConfig {
    pub fn validate(&self) -> Result<(), ToolsetError> {
        if self.x402_tool && self.signer.is_none() {
            return Err(ToolsetError::MissingKey);
        }
        if let Some(search) = &self.web_search {
            if search.api_key.trim().is_empty() {
                return Err(ToolsetError::MissingSearchKey);
            }
        }
        let mut names = HashSet::new();
        for server in &self.servers {
            if server.spec.command.trim().is_empty() {
                return Err(ToolsetError::EmptyCommand(server.name.clone()));
            }
            if !names.insert(server.name.as_str()) {
                return Err(ToolsetError::DuplicateServer(server.name.clone()));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Toolset
// ============================================================================

pub struct Toolset {
    tools: Vec<CallableTool>,
    servers: Vec<(String, ToolServerHandle)>,
    failures: Vec<(String, BridgeError)>,
}

impl Toolset {
    /// Build every configured tool.
    ///
    /// Configuration problems are errors. A tool-server that fails to come up
    /// is logged and left out; its error is kept in [`failures`](Self::failures).
    /// When two sources offer the same tool name the first one wins.
    pub async fn build(config: ToolsetConfig) -> Result<Self, ToolsetError> {
        config.validate()?;

        let mut toolset = Toolset {
            tools: Vec::new(),
            servers: Vec::new(),
            failures: Vec::new(),
        };

        if config.x402_tool {
            let client = PaymentClient::new(config.signer.clone(), &config.client)?;
            toolset.add_tools("x402", vec![x402_request_tool(client)?]);
        }
        if let Some(search) = &config.web_search {
            // Never pays, whatever key is configured
            let client = PaymentClient::new(None, &config.client)?;
            toolset.add_tools("search", vec![web_search_tool(search, client)?]);
        }

        for server in &config.servers {
            match create_tool_server_tools(&server.spec, &config.session).await {
                Ok(started) => {
                    tracing::info!(
                        server = %server.name,
                        tools = started.tools.len(),
                        "tool-server started"
                    );
                    toolset.add_tools(&server.name, started.tools);
                    toolset.servers.push((server.name.clone(), started.handle));
                }
                Err(e) => {
                    tracing::warn!(
                        server = %server.name,
                        stage = %e.stage(),
                        error = %e,
                        "skipping tool-server"
                    );
                    toolset.failures.push((server.name.clone(), e));
                }
            }
        }

        Ok(toolset)
    }

    fn add_tools(&mut self, source: &str, tools: Vec<CallableTool>) {
        for tool in tools {
            if self.tools.iter().any(|t| t.name() == tool.name()) {
                tracing::warn!(source, tool = %tool.name(), "tool name already taken, skipping");
                continue;
            }
            self.tools.push(tool);
        }
    }

    pub fn tools(&self) -> &[CallableTool] {
        &self.tools
    }

    pub fn tool(&self, name: &str) -> Option<&CallableTool> {
        self.tools.iter().find(|t| t.name() == name)
    }

    /// Names of the tool-servers that are running
    pub fn servers(&self) -> impl Iterator<Item = &str> {
        self.servers.iter().map(|(name, _)| name.as_str())
    }

    pub fn failures(&self) -> &[(String, BridgeError)] {
        &self.failures
    }

    /// Stop every tool-server. Their tools fail afterwards.
    pub async fn shutdown(&self) {
        for (name, handle) in &self.servers {
            tracing::debug!(server = %name, "stopping tool-server");
            handle.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eth::EvmSigner;
    use crate::mcp::BridgeStage;

    fn signer() -> Arc<dyn Signer> {
        Arc::new(EvmSigner::from_hex(&"11".repeat(32)).unwrap())
    }

    fn config(servers: Vec<NamedServer>) -> ToolsetConfig {
        ToolsetConfig {
            signer: Some(signer()),
            x402_tool: true,
            web_search: None,
            client: ClientConfig::default(),
            session: SessionOptions::default(),
            servers,
        }
    }

    fn named(name: &str, spec: LaunchSpec) -> NamedServer {
        NamedServer {
            name: name.to_string(),
            spec,
        }
    }

    #[test]
    fn test_validation() {
        let mut cfg = config(vec![]);
        cfg.signer = None;
        assert!(matches!(cfg.validate(), Err(ToolsetError::MissingKey)));
        cfg.x402_tool = false;
        assert!(cfg.validate().is_ok());

        let cfg = config(vec![
            named("a", LaunchSpec::new("one")),
            named("a", LaunchSpec::new("two")),
        ]);
        assert!(matches!(cfg.validate(), Err(ToolsetError::DuplicateServer(n)) if n == "a"));

        let cfg = config(vec![named("blank", LaunchSpec::new(" "))]);
        assert!(matches!(cfg.validate(), Err(ToolsetError::EmptyCommand(_))));
    }

    #[test]
    fn test_server_entry_defaults() {
        let entry: ServerEntry =
            serde_json::from_str(r#"{"name": "fs", "command": "mcp-fs"}"#).unwrap();
        let spec = entry.launch_spec();
        assert_eq!(spec.command, "mcp-fs");
        assert!(spec.args.is_empty());
        assert!(spec.inherit_env);
    }

    #[tokio::test]
    async fn test_x402_tool_only() {
        let toolset = Toolset::build(config(vec![])).await.unwrap();
        let names: Vec<&str> = toolset.tools().iter().map(|t| t.name()).collect();
        assert_eq!(names, [crate::x402::tool::TOOL_NAME]);
        assert!(toolset.servers().next().is_none());
    }

    #[tokio::test]
    async fn test_web_search_tool() {
        let mut cfg = config(vec![]);
        cfg.web_search = Some(SearchConfig {
            api_key: " ".to_string(),
            endpoint: None,
        });
        assert!(matches!(cfg.validate(), Err(ToolsetError::MissingSearchKey)));

        cfg.x402_tool = false;
        cfg.web_search = Some(SearchConfig {
            api_key: "serp".to_string(),
            endpoint: None,
        });
        let toolset = Toolset::build(cfg).await.unwrap();
        let names: Vec<&str> = toolset.tools().iter().map(|t| t.name()).collect();
        assert_eq!(names, [crate::search::TOOL_NAME]);
    }

    #[tokio::test]
    async fn test_failed_server_is_skipped() {
        let toolset = Toolset::build(config(vec![named(
            "broken",
            LaunchSpec::new("/nonexistent/tool-server"),
        )]))
        .await
        .unwrap();
        assert_eq!(toolset.tools().len(), 1);
        assert_eq!(toolset.failures().len(), 1);
        assert_eq!(toolset.failures()[0].0, "broken");
        assert_eq!(toolset.failures()[0].1.stage(), BridgeStage::Launch);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_server_tools_added_first_name_wins() {
        use crate::mcp::bridge::sh_server;

        let tools = r#"{"name":"x402-request"},{"name":"search"}"#;
        let mut cfg = config(vec![named("sh", sh_server::launch(tools))]);
        cfg.session.rpc_timeout = std::time::Duration::from_secs(5);

        let toolset = Toolset::build(cfg).await.unwrap();
        let names: Vec<&str> = toolset.tools().iter().map(|t| t.name()).collect();
        assert_eq!(names, ["x402-request", "search"]);
        assert_eq!(
            toolset.tool("x402-request").unwrap().description(),
            "Make a paid API request to an x402-enabled service. \
             Automatically handles payment via x402 protocol."
        );
        assert_eq!(toolset.servers().collect::<Vec<_>>(), ["sh"]);

        let text = toolset.tool("search").unwrap().invoke(None).await.unwrap();
        assert_eq!(text, "called");
        toolset.shutdown().await;
    }
}
