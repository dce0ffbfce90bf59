//! Global configuration management for toolbridge
//!
//! Configuration can be loaded from:
//! - A JSON file or an inline JSON string (`--config`, `TOOLBRIDGE_CONFIG`)
//! - CLI flags and their environment variables, which override the file
//!
//! The configuration covers:
//! - The signing key used for x402 payments (hex, or `@file`)
//! - Payment limits and network preferences
//! - HTTP and tool-server RPC timeouts
//! - Tool-servers to launch, including the GitHub and Firecrawl presets
//! - The SerpAPI key for the web search tool

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use serde::{Deserialize, Serialize};

use crate::eth::{EvmSigner, Network, Signer};
use crate::logging::{LogFormat, TracingConfig};
use crate::mcp::SessionOptions;
use crate::mcp::servers::GithubToolset;
use crate::search::SearchConfig;
use crate::toolset::{FirecrawlConfig, GithubConfig, NamedServer, ServerEntry, ToolsetConfig};
use crate::x402::{ClientConfig, TokenAmount};

// ============================================================================
// Configuration Arguments
// ============================================================================

/// Common configuration arguments (used across CLI commands)
#[derive(Args, Clone, Debug, Default)]
pub struct ConfigArgs {
    /// Configuration file (JSON file path or JSON string).
    ///
    /// - A file path: --config toolbridge.json
    ///
    /// - Inline JSON: --config '{"servers":[{"name":"fs","command":"mcp-fs"}]}'
    ///
    #[arg(long = "config", short = 'c', env = "TOOLBRIDGE_CONFIG", value_name = "file.json or {json}")]
    pub config: Option<String>,

    /// Private key for x402 payments (hex, or @file to read it from a file)
    #[arg(long, short = 'k', env = "X402_KEY", hide_env_values = true)]
    pub key: Option<String>,

    /// Refuse to pay more than this per request, in token base units
    ///
    /// For USDC (6 decimals) 10000 is one cent.
    ///
    #[arg(long = "max", env = "X402_MAX_AMOUNT", value_name = "AMOUNT")]
    pub max_amount: Option<TokenAmount>,

    /// Networks to pay on, most preferred first (can be repeated)
    #[arg(long, value_name = "NETWORK", value_parser = parse_network, value_delimiter = ',')]
    pub prefer: Vec<Network>,

    /// Connection timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub connect_timeout: Option<u64>,

    /// Total request timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub request_timeout: Option<u64>,

    /// Per-call tool-server RPC timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub rpc_timeout: Option<u64>,

    /// Do not offer the x402-request tool
    #[arg(long)]
    pub no_x402_tool: bool,

    /// GitHub personal access token; enables the GitHub tool-server
    #[arg(long, env = "GITHUB_PERSONAL_ACCESS_TOKEN", hide_env_values = true)]
    pub github_token: Option<String>,

    /// Fallback for --github-token, read from GITHUB_TOKEN
    #[arg(long = "gh-token", env = "GITHUB_TOKEN", hide = true, hide_env_values = true)]
    pub gh_token: Option<String>,

    /// GitHub toolsets to enable (comma-separated, default all)
    #[arg(long, value_enum, value_delimiter = ',')]
    pub github_toolsets: Vec<GithubToolset>,

    /// Firecrawl API key; enables the Firecrawl tool-server
    #[arg(long, env = "FIRECRAWL_API_KEY", hide_env_values = true)]
    pub firecrawl_api_key: Option<String>,

    /// SerpAPI key; enables the web_search tool
    #[arg(long, env = "SERPAPI_API_KEY", hide_env_values = true)]
    pub serpapi_key: Option<String>,

    // -------------------------------------------------------------------------
    // Logging/Tracing Options
    // -------------------------------------------------------------------------

    /// Enable verbose output (INFO level logging)
    ///
    /// Default is WARN level. Use -v for INFO, -d for DEBUG.
    ///
    #[arg(short = 'v', long, env = "TOOLBRIDGE_VERBOSE")]
    pub verbose: bool,

    /// Enable debug output (DEBUG level logging)
    #[arg(short = 'd', long, env = "TOOLBRIDGE_DEBUG", conflicts_with = "verbose")]
    pub debug: bool,

    /// Quiet mode - only show errors
    #[arg(short = 'q', long, conflicts_with_all = ["verbose", "debug"])]
    pub quiet: bool,

    /// Silent mode - suppress all terminal log output
    ///
    /// Log file output (if configured) is unaffected.
    ///
    #[arg(long, short = 's', conflicts_with_all = ["verbose", "debug", "quiet"])]
    pub silent: bool,

    /// Log output format
    #[arg(long, short = 'L', value_enum, env = "TOOLBRIDGE_LOG_FORMAT")]
    pub log_format: Option<LogFormat>,

    /// Write debug logs to file
    #[arg(long, short = 'l', env = "TOOLBRIDGE_LOG_FILE", value_name = "FILE")]
    pub log_file: Option<PathBuf>,
}

fn parse_network(s: &str) -> Result<Network, String> {
    Network::parse(s).ok_or_else(|| format!("unknown network: {s}"))
}

// ============================================================================
// Global Configuration
// ============================================================================

/// Global configuration structure (can be serialized/deserialized from JSON)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// Private key for x402 payments (hex string or @filename)
    pub key: Option<String>,

    /// Offer the `x402-request` tool
    pub x402_tool: bool,

    /// Per-request payment ceiling in token base units
    pub max_amount: Option<TokenAmount>,

    /// Networks to pay on, most preferred first
    pub prefer: Vec<Network>,

    pub connect_timeout: Option<u64>,
    pub request_timeout: Option<u64>,
    pub follow_redirects: bool,

    /// Per-call tool-server RPC timeout in seconds
    pub rpc_timeout: Option<u64>,

    /// Tool-servers to launch
    pub servers: Vec<ServerEntry>,
    pub github: Option<GithubConfig>,
    pub firecrawl: Option<FirecrawlConfig>,

    /// Web search tool settings
    pub web_search: Option<SearchConfig>,

    pub verbose: bool,
    pub debug: bool,
    pub quiet: bool,
    pub silent: bool,
    pub log_format: LogFormat,
    pub log_file: Option<PathBuf>,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            key: None,
            x402_tool: true,
            max_amount: None,
            prefer: Vec::new(),
            connect_timeout: None,
            request_timeout: None,
            follow_redirects: false,
            rpc_timeout: None,
            servers: Vec::new(),
            github: None,
            firecrawl: None,
            web_search: None,
            verbose: false,
            debug: false,
            quiet: false,
            silent: false,
            log_format: LogFormat::default(),
            log_file: None,
        }
    }
}

impl GlobalConfig {
    /// Load the config file named by `args`, then apply the CLI overrides
    pub fn from_args(args: &ConfigArgs) -> Result<Self> {
        let mut config = match &args.config {
            Some(input) => {
                let json = load_json_string(input)?;
                serde_json::from_str(&json).context("Failed to parse config JSON")?
            }
            None => GlobalConfig::default(),
        };
        config.merge_args(args);
        Ok(config)
    }

    fn merge_args(&mut self, args: &ConfigArgs) {
        if let Some(key) = &args.key {
            self.key = Some(key.clone());
        }
        if let Some(max) = args.max_amount {
            self.max_amount = Some(max);
        }
        if !args.prefer.is_empty() {
            self.prefer = args.prefer.clone();
        }
        if args.connect_timeout.is_some() {
            self.connect_timeout = args.connect_timeout;
        }
        if args.request_timeout.is_some() {
            self.request_timeout = args.request_timeout;
        }
        if args.rpc_timeout.is_some() {
            self.rpc_timeout = args.rpc_timeout;
        }
        if args.no_x402_tool {
            self.x402_tool = false;
        }

        if let Some(token) = args.github_token.as_ref().or(args.gh_token.as_ref()) {
            let github = self.github.get_or_insert_with(|| GithubConfig {
                token: String::new(),
                toolsets: Vec::new(),
                image: None,
            });
            github.token = token.clone();
        }
        if !args.github_toolsets.is_empty() {
            if let Some(github) = &mut self.github {
                github.toolsets = args.github_toolsets.clone();
            }
        }
        if let Some(api_key) = &args.firecrawl_api_key {
            let firecrawl = self.firecrawl.get_or_insert_with(|| FirecrawlConfig {
                api_key: String::new(),
                command: None,
            });
            firecrawl.api_key = api_key.clone();
        }
        if let Some(api_key) = &args.serpapi_key {
            let search = self.web_search.get_or_insert_with(|| SearchConfig {
                api_key: String::new(),
                endpoint: None,
            });
            search.api_key = api_key.clone();
        }

        self.verbose |= args.verbose;
        self.debug |= args.debug;
        self.quiet |= args.quiet;
        self.silent |= args.silent;
        if let Some(format) = &args.log_format {
            self.log_format = format.clone();
        }
        if let Some(log_file) = &args.log_file {
            self.log_file = Some(log_file.clone());
        }
    }

    /// Load an EvmSigner from the configured key. `None` if no key is set.
    pub fn load_signer(&self) -> Result<Option<EvmSigner>> {
        let Some(key) = &self.key else {
            return Ok(None);
        };
        let key = resolve_key(key)?;
        let signer = EvmSigner::from_hex(&key).context("Invalid private key")?;
        Ok(Some(signer))
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            follow_redirects: self.follow_redirects,
            connect_timeout: self.connect_timeout,
            timeout: self.request_timeout,
            max_amount: self.max_amount,
            prefer: self.prefer.clone(),
        }
    }

    pub fn session_options(&self) -> SessionOptions {
        let mut options = SessionOptions::default();
        if let Some(secs) = self.rpc_timeout {
            options.rpc_timeout = Duration::from_secs(secs);
        }
        options
    }

    /// Resolve the key and tool-servers into a validated [`ToolsetConfig`]
    pub fn toolset_config(&self) -> Result<ToolsetConfig> {
        let signer = self
            .load_signer()?
            .map(|s| Arc::new(s) as Arc<dyn Signer>);

        let mut servers: Vec<NamedServer> = self
            .servers
            .iter()
            .map(|entry| NamedServer {
                name: entry.name.clone(),
                spec: entry.launch_spec(),
            })
            .collect();
        if let Some(github) = &self.github {
            anyhow::ensure!(!github.token.trim().is_empty(), "GitHub token is empty");
            servers.push(NamedServer::github(github));
        }
        if let Some(firecrawl) = &self.firecrawl {
            anyhow::ensure!(!firecrawl.api_key.trim().is_empty(), "Firecrawl API key is empty");
            servers.push(NamedServer::firecrawl(firecrawl));
        }

        let config = ToolsetConfig {
            signer,
            x402_tool: self.x402_tool,
            web_search: self.web_search.clone(),
            client: self.client_config(),
            session: self.session_options(),
            servers,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn tracing_config(&self) -> TracingConfig {
        TracingConfig {
            verbose: self.verbose,
            debug: self.debug,
            quiet: self.quiet,
            silent: self.silent,
            format: self.log_format.clone(),
            log_file: self.log_file.clone(),
        }
    }

    /// Initialize tracing from this configuration. Call once, early in main().
    pub fn init_tracing(&self) {
        crate::logging::init_tracing(self.tracing_config());
    }
}

// ============================================================================
// Configuration Loading
// ============================================================================

/// Inline JSON is returned as-is, anything else is read as a file path
fn load_json_string(input: &str) -> Result<String> {
    let trimmed = input.trim_start();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return Ok(input.to_string());
    }
    let path = Path::new(input);
    std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))
}

/// `@path` reads the key from a file, anything else is the key itself
fn resolve_key(key: &str) -> Result<String> {
    match key.strip_prefix('@') {
        Some(path) => Ok(std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read key from file '{}'", path))?
            .trim()
            .to_string()),
        None => Ok(key.trim().to_string()),
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Parser)]
    struct Cli {
        #[command(flatten)]
        config: ConfigArgs,
    }

    fn parse(args: &[&str]) -> ConfigArgs {
        Cli::try_parse_from(std::iter::once("toolbridge").chain(args.iter().copied()))
            .unwrap()
            .config
    }

    const KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

    #[test]
    fn test_defaults() {
        let config = GlobalConfig::default();
        assert!(config.x402_tool);
        assert!(config.servers.is_empty());
        assert_eq!(config.load_signer().unwrap().map(|s| s.address()), None);
        assert_eq!(config.session_options().rpc_timeout, SessionOptions::default().rpc_timeout);
    }

    #[test]
    fn test_inline_json_and_cli_override() {
        let file = r#"{
            "max_amount": "5000",
            "prefer": ["base"],
            "rpc_timeout": 12,
            "servers": [{"name": "fs", "command": "mcp-fs", "args": ["--root", "/tmp"]}],
            "log_format": "json"
        }"#;
        let args = parse(&["--config", file, "--max", "100", "--prefer", "base-sepolia,polygon"]);
        let config = GlobalConfig::from_args(&args).unwrap();

        assert_eq!(config.max_amount, Some(TokenAmount::from(100)));
        assert_eq!(config.prefer, [Network::BaseSepolia, Network::Polygon]);
        assert_eq!(config.session_options().rpc_timeout, Duration::from_secs(12));
        assert_eq!(config.servers[0].args, ["--root", "/tmp"]);
        assert_eq!(config.log_format, LogFormat::Json);
        assert!(config.x402_tool);
    }

    #[test]
    fn test_unknown_network_rejected() {
        let result = Cli::try_parse_from(["toolbridge", "--prefer", "solana"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_key_from_file() {
        let path = std::env::temp_dir().join(format!("toolbridge-key-{}", std::process::id()));
        std::fs::write(&path, format!("{KEY}\n")).unwrap();

        let args = parse(&["--key", &format!("@{}", path.display())]);
        let config = GlobalConfig::from_args(&args).unwrap();
        let signer = config.load_signer().unwrap().unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(signer.address(), EvmSigner::from_hex(KEY).unwrap().address());
    }

    #[test]
    fn test_bad_key_is_an_error() {
        let config = GlobalConfig {
            key: Some("0xnothex".to_string()),
            ..Default::default()
        };
        assert!(config.load_signer().is_err());
    }

    #[test]
    fn test_toolset_config_presets() {
        let args = parse(&[
            "--key",
            KEY,
            "--github-token",
            "ghp_x",
            "--github-toolsets",
            "repos,issues",
            "--firecrawl-api-key",
            "fc",
        ]);
        let toolset = GlobalConfig::from_args(&args).unwrap().toolset_config().unwrap();
        let names: Vec<&str> = toolset.servers.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["github", "firecrawl"]);
        assert_eq!(toolset.servers[0].spec.env["TOOLSETS"], "repos,issues");
        assert!(toolset.signer.is_some());
    }

    #[test]
    fn test_toolset_config_requires_key_for_x402_tool() {
        assert!(GlobalConfig::default().toolset_config().is_err());
        let args = parse(&["--no-x402-tool"]);
        let toolset = GlobalConfig::from_args(&args).unwrap().toolset_config().unwrap();
        assert!(!toolset.x402_tool);
    }

    #[test]
    fn test_github_token_fallback() {
        let args = parse(&["--gh-token", "ghp_fallback", "--no-x402-tool"]);
        let config = GlobalConfig::from_args(&args).unwrap();
        assert_eq!(config.github.unwrap().token, "ghp_fallback");

        let args = parse(&["--github-token", "ghp_pat", "--gh-token", "ghp_fallback"]);
        let config = GlobalConfig::from_args(&args).unwrap();
        assert_eq!(config.github.unwrap().token, "ghp_pat");
    }

    #[test]
    fn test_web_search_key() {
        let file = r#"{"web_search": {"api_key": "from-file", "endpoint": "http://serp.test/search"}}"#;
        let args = parse(&["--config", file, "--serpapi-key", "from-cli", "--no-x402-tool"]);
        let toolset = GlobalConfig::from_args(&args).unwrap().toolset_config().unwrap();
        let search = toolset.web_search.unwrap();
        assert_eq!(search.api_key, "from-cli");
        assert_eq!(search.endpoint.as_deref(), Some("http://serp.test/search"));
    }
}
