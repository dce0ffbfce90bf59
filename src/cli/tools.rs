//! `tools` subcommands
//!
//! Bridge a tool-server from the command line:
//! - `list`: show the tools a server (or the configured toolset) offers
//! - `call`: invoke one of them

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use serde_json::{Value, json};

use crate::config::GlobalConfig;
use crate::mcp::{CallableTool, LaunchSpec, ToolServer, create_tool_server_tools};
use crate::toolset::Toolset;

#[derive(Args, Clone, Debug)]
pub struct ToolsArgs {
    #[command(subcommand)]
    pub command: ToolsCommand,
}

#[derive(Subcommand, Clone, Debug)]
pub enum ToolsCommand {
    /// List the tools a tool-server offers
    ///
    /// Without a command after `--`, lists the configured toolset.
    ///
    /// Example:
    ///
    ///  $ toolbridge tools list -- npx -y firecrawl-mcp
    ///
    ///  $ toolbridge tools list -o json --github-token ghp_... --no-x402-tool
    ///
    List(ListArgs),

    /// Call a tool
    ///
    /// Example:
    ///
    ///  $ toolbridge tools call echo -a text=hello -- ./my-mcp-server
    ///
    ///  $ toolbridge tools call x402-request -i '{"url": "https://api.example.com/data"}'
    ///
    Call(CallArgs),
}

/// How to reach the tools
#[derive(Args, Clone, Debug)]
pub struct ServerArgs {
    /// Extra environment for the tool-server (KEY=VALUE, can be repeated)
    #[arg(short = 'e', long = "env", value_name = "KEY=VALUE")]
    pub env: Vec<String>,

    /// Tool-server command and arguments
    #[arg(last = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

#[derive(Args, Clone, Debug)]
pub struct ListArgs {
    #[command(flatten)]
    pub server: ServerArgs,

    /// Output format: text, json, or raw
    #[arg(short = 'o', long, default_value = "text")]
    pub output: OutputFormat,
}

#[derive(Args, Clone, Debug)]
pub struct CallArgs {
    /// Tool name
    #[arg(value_name = "TOOL")]
    pub tool: String,

    /// Input arguments as JSON object
    ///
    /// Example: --input '{"text": "hello", "count": 5}'
    ///
    #[arg(short = 'i', long, value_name = "JSON")]
    pub input: Option<String>,

    /// Input argument as key=value (can be repeated)
    ///
    /// Values are parsed as JSON if possible, otherwise as strings.
    ///
    #[arg(short = 'a', long = "arg", value_name = "KEY=VALUE")]
    pub args: Vec<String>,

    #[command(flatten)]
    pub server: ServerArgs,

    /// Output format: text, json, or raw
    #[arg(short = 'o', long, default_value = "text")]
    pub output: OutputFormat,
}

/// Output format for tool listings and results
#[derive(Clone, Debug, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    #[default]
    Text,
    /// JSON output
    Json,
    /// Raw output (just the content, no formatting)
    Raw,
}

pub async fn run(args: ToolsArgs, config: &GlobalConfig) -> Result<()> {
    match args.command {
        ToolsCommand::List(list) => {
            let source = ToolSource::open(&list.server, config).await?;
            let result = print_tools(source.tools(), &list.output);
            source.close().await;
            result
        }
        ToolsCommand::Call(call) => {
            let input = build_input(call.input.as_deref(), &call.args)?;
            let source = ToolSource::open(&call.server, config).await?;
            let result = call_tool(&source, &call.tool, input, &call.output).await;
            source.close().await;
            result
        }
    }
}

/// Either one tool-server from the command line or the configured toolset
enum ToolSource {
    Server(ToolServer),
    Toolset(Toolset),
}

impl ToolSource {
    async fn open(args: &ServerArgs, config: &GlobalConfig) -> Result<Self> {
        let Some((program, rest)) = args.command.split_first() else {
            let toolset = Toolset::build(config.toolset_config()?).await?;
            return Ok(ToolSource::Toolset(toolset));
        };

        let mut spec = LaunchSpec::new(program.as_str()).args(rest.iter().cloned());
        for pair in &args.env {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| anyhow::anyhow!("Invalid --env '{}'. Expected KEY=VALUE", pair))?;
            spec = spec.env(key, value);
        }

        let server = create_tool_server_tools(&spec, &config.session_options())
            .await
            .with_context(|| format!("Failed to start tool-server `{}`", spec.display()))?;
        for rejected in &server.rejected {
            eprintln!("warning: {rejected}");
        }
        Ok(ToolSource::Server(server))
    }

    fn tools(&self) -> &[CallableTool] {
        match self {
            ToolSource::Server(server) => &server.tools,
            ToolSource::Toolset(toolset) => toolset.tools(),
        }
    }

    async fn close(&self) {
        match self {
            ToolSource::Server(server) => server.handle.close().await,
            ToolSource::Toolset(toolset) => toolset.shutdown().await,
        }
    }
}

fn print_tools(tools: &[CallableTool], output: &OutputFormat) -> Result<()> {
    match output {
        OutputFormat::Json => {
            let infos: Vec<_> = tools.iter().map(CallableTool::info).collect();
            println!("{}", serde_json::to_string_pretty(&infos)?);
        }
        OutputFormat::Raw => {
            for tool in tools {
                println!("{}", tool.name());
            }
        }
        OutputFormat::Text => {
            println!("Available tools:");
            println!();
            for tool in tools {
                println!("  {} - {}", tool.name(), tool.description());
                for (name, schema, required) in tool.schema().parameters() {
                    let marker = if required { "" } else { "?" };
                    let description = schema.description.as_deref().unwrap_or("");
                    println!("      {name}{marker}: {} {description}", schema.type_label());
                }
            }
            println!();
            println!("Total: {} tools", tools.len());
        }
    }
    Ok(())
}

async fn call_tool(source: &ToolSource, name: &str, input: Value, output: &OutputFormat) -> Result<()> {
    let tool = source
        .tools()
        .iter()
        .find(|t| t.name() == name)
        .ok_or_else(|| {
            anyhow::anyhow!(
                "Tool '{}' not found. Available: {}",
                name,
                source
                    .tools()
                    .iter()
                    .map(CallableTool::name)
                    .collect::<Vec<_>>()
                    .join(", ")
            )
        })?;

    tracing::debug!(tool = %name, input = %input, "calling tool");
    let result = tool.call(Some(input)).await;

    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormat::Raw | OutputFormat::Text => {
            let text = result
                .joined_text()
                .unwrap_or_else(|| serde_json::to_string_pretty(&result).unwrap_or_default());
            println!("{text}");
        }
    }

    if result.is_error {
        anyhow::bail!("Tool '{}' returned an error", name);
    }
    Ok(())
}

/// `--input` JSON with `-a` pairs laid over it
fn build_input(input: Option<&str>, pairs: &[String]) -> Result<Value> {
    let mut object = match input {
        Some(raw) => match serde_json::from_str(raw).context("Invalid JSON in --input")? {
            Value::Object(map) => map,
            other => anyhow::bail!("--input must be a JSON object, got {other}"),
        },
        None => serde_json::Map::new(),
    };

    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("Invalid argument format: '{}'. Expected KEY=VALUE", pair))?;
        let value = serde_json::from_str(value).unwrap_or_else(|_| json!(value));
        object.insert(key.to_string(), value);
    }
    Ok(Value::Object(object))
}
