//! `serve`: stdio tool-server mode

use anyhow::Result;
use clap::Args;

use crate::config::GlobalConfig;
use crate::mcp::McpServer;
use crate::mcp::protocol::ServerInfo;
use crate::toolset::Toolset;

#[derive(Args, Clone, Debug)]
pub struct ServeArgs {
    /// Server name reported to clients
    #[arg(long, default_value = "toolbridge")]
    pub name: String,
}

pub async fn run(args: ServeArgs, config: &GlobalConfig) -> Result<()> {
    let toolset = Toolset::build(config.toolset_config()?).await?;
    if toolset.tools().is_empty() {
        anyhow::bail!("No tools to serve. Configure a key or at least one tool-server.");
    }

    let server = McpServer::new(
        ServerInfo {
            name: args.name,
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
        toolset.tools().iter().cloned(),
    );
    tracing::info!(tools = ?server.tool_names().collect::<Vec<_>>(), "serving on stdio");

    let result = server.serve_stdio().await;
    toolset.shutdown().await;
    Ok(result?)
}
