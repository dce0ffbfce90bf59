//! MCP (Model Context Protocol) tool-server bridge
//!
//! Launches a tool-server as a child process, speaks newline-delimited
//! JSON-RPC 2.0 to it over stdio, and turns the tools it advertises into
//! [`CallableTool`]s. The same tools can be served back out over stdio with
//! [`McpServer`].
//!
//! # Example
//!
//! ```bash
//! # List a tool-server's tools
//! toolbridge tools list -- npx -y firecrawl-mcp
//!
//! # Serve the x402 request tool to an MCP client
//! toolbridge serve --key @key.hex
//! ```

pub mod bridge;
pub mod discovery;
pub mod protocol;
pub mod schema;
pub mod server;
pub mod servers;
pub mod session;
pub mod tool;
pub mod transport;

pub use bridge::{BridgeError, BridgeStage, ToolServer, ToolServerHandle, create_tool_server_tools};
pub use discovery::{Discovery, DiscoveryError, adapt_descriptors, discover_tools};
pub use schema::{ParamSchema, SchemaError, ValidationError};
pub use server::McpServer;
pub use session::{McpError, RpcSession, SessionOptions};
pub use tool::{CallableTool, ToolError, ToolInvoker};
pub use transport::{LaunchSpec, ProcessTransport, Transport, TransportError};
