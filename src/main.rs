use anyhow::Result;
use clap::Parser;

use toolbridge::{cli, config};

#[derive(Parser)]
#[command(name = "toolbridge")]
#[command(about = "Bridge MCP tool-servers and x402 paid APIs into one toolset")]
#[command(long_about = "\
Bridge MCP tool-servers and x402 paid APIs into one toolset

toolbridge launches MCP tool-servers over stdio, discovers their tools, and
combines them with an x402-request tool that pays for HTTP 402 responses with
an EIP-3009 USDC authorization.

TYPICAL WORKFLOWS:

  Inspect a tool-server:
    toolbridge tools list -- npx -y firecrawl-mcp
    toolbridge tools call scrape -a url=https://example.com -- npx -y firecrawl-mcp

  Pay for an API call:
    toolbridge --key @key.hex --max 10000 request https://api.example.com/data

  Serve everything to an MCP client:
    toolbridge --config toolbridge.json serve

For more details on each command, use: toolbridge <command> --help
")]
struct Cli {
    /// Global configuration arguments
    #[command(flatten)]
    config: config::ConfigArgs,

    #[command(subcommand)]
    command: cli::Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let global_config = config::GlobalConfig::from_args(&cli.config)?;
    global_config.init_tracing();

    tracing::debug!("toolbridge starting");
    let result = cli::run(cli.command, &global_config).await;
    tracing::debug!("toolbridge shutting down");

    result
}
