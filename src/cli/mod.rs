pub mod key;
pub mod request;
pub mod serve;
pub mod tools;

use anyhow::Result;
use clap::Subcommand;

use crate::config::GlobalConfig;

#[derive(Subcommand)]
pub enum Commands {
    /// Make an x402-enabled HTTP request
    ///
    ///  - When the server answers 402, pays using your key and limits, then retries once.
    ///
    ///  - Prints the normalized response; the payment receipt goes to stderr.
    ///
    /// Example:
    ///
    ///  $ toolbridge --key @key.hex --max 10000 request https://api.example.com/weather
    ///
    ///  $ toolbridge request -X POST -D '{"q":"rust"}' https://api.example.com/search
    ///
    Request(request::RequestArgs),

    /// Bridge a tool-server: list or call its tools
    ///
    /// Example:
    ///
    ///  $ toolbridge tools list -- npx -y firecrawl-mcp
    ///
    ///  $ toolbridge tools call search_repositories -a query=tokio -- ./github-mcp-server stdio
    ///
    Tools(tools::ToolsArgs),

    /// Serve the configured toolset as an MCP server over stdio
    ///
    ///  - Offers the x402-request tool plus every configured tool-server's tools.
    ///
    /// Example:
    ///
    ///  $ toolbridge --key @key.hex serve
    ///
    ///  $ toolbridge --config toolbridge.json --no-x402-tool serve
    ///
    Serve(serve::ServeArgs),

    /// Key utilities
    ///
    /// Example:
    ///
    ///  $ toolbridge --key @key.hex key address
    ///
    Key(key::KeyCommandArgs),

    /// Display version information
    ///
    /// Example output:
    ///
    ///  $ toolbridge version
    ///
    ///  toolbridge 0.1.0 x86_64 linux gnu dynamic release
    ///
    Version,
}

pub async fn run(cmd: Commands, config: &GlobalConfig) -> Result<()> {
    match cmd {
        Commands::Request(args) => request::run(args, config).await,
        Commands::Tools(args) => tools::run(args, config).await,
        Commands::Serve(args) => serve::run(args, config).await,
        Commands::Key(args) => key::run(args, config).await,
        Commands::Version => {
            println!("{}", version("toolbridge"));
            Ok(())
        }
    }
}

/// Get version string with build details
pub fn version(name: &str) -> String {
    let build_type = if cfg!(debug_assertions) { "debug" } else { "release" };
    let link_mode = if cfg!(target_feature = "crt-static") { "static" } else { "dynamic" };
    let target_env = if cfg!(target_env = "gnu") { "gnu" }
        else if cfg!(target_env = "musl") { "musl" }
        else if cfg!(target_env = "msvc") { "msvc" }
        else { "unknown" };

    format!("{} {} {} {} {} {} {}",
        name,
        env!("CARGO_PKG_VERSION"),
        std::env::consts::ARCH,
        std::env::consts::OS,
        target_env,
        link_mode,
        build_type,
    )
}
