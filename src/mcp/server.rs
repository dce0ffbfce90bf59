//! Stdio tool-server mode
//!
//! Serves a set of [`CallableTool`]s to an MCP client: reads JSON-RPC lines,
//! answers requests in order, and stops at EOF.

use indexmap::IndexMap;
use serde_json::{Value, json};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use super::protocol::*;
use super::tool::CallableTool;

pub struct McpServer {
    info: ServerInfo,
    tools: IndexMap<String, CallableTool>,
}

impl McpServer {
    /// Later tools with a name already taken are dropped
    pub fn new(info: ServerInfo, tools: impl IntoIterator<Item = CallableTool>) -> Self {
        let mut by_name = IndexMap::new();
        for tool in tools {
            if by_name.contains_key(tool.name()) {
                tracing::warn!(target: "mcp", tool = %tool.name(), "duplicate tool name, skipping");
                continue;
            }
            by_name.insert(tool.name().to_string(), tool);
        }
        Self {
            info,
            tools: by_name,
        }
    }

    pub fn tool_names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }

    /// Serve on the process's stdin and stdout
    pub async fn serve_stdio(&self) -> std::io::Result<()> {
        let stdin = BufReader::new(tokio::io::stdin());
        let stdout = tokio::io::stdout();
        self.run(stdin, stdout).await
    }

    pub async fn run<R, W>(&self, mut reader: R, mut writer: W) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        tracing::debug!(
            target: "mcp",
            tools = ?self.tools.keys().collect::<Vec<_>>(),
            "serving tools on stdio"
        );

        let mut line = String::new();
        loop {
            line.clear();
            if reader.read_line(&mut line).await? == 0 {
                tracing::debug!(target: "mcp", "EOF received, shutting down");
                return Ok(());
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let request: JsonRpcRequest = match serde_json::from_str(trimmed) {
                Ok(req) => req,
                Err(e) => {
                    write_response(&mut writer, &JsonRpcResponse::parse_error(&e.to_string()))
                        .await?;
                    continue;
                }
            };

            tracing::debug!(target: "mcp", method = %request.method, id = ?request.id, "<-");
            if request.is_notification() {
                self.handle_notification(&request);
                continue;
            }

            let response = self.handle_request(request).await;
            if let Some(error) = &response.error {
                tracing::debug!(target: "mcp", %error, "-> error");
            }
            write_response(&mut writer, &response).await?;
        }
    }

    fn handle_notification(&self, request: &JsonRpcRequest) {
        match request.method.as_str() {
            "notifications/initialized" => tracing::debug!(target: "mcp", "client initialized"),
            other => tracing::debug!(target: "mcp", method = other, "ignoring notification"),
        }
    }

    async fn handle_request(&self, req: JsonRpcRequest) -> JsonRpcResponse {
        let result = match req.method.as_str() {
            "initialize" => self.handle_initialize(),
            "tools/list" => self.handle_tools_list(),
            "tools/call" => self.handle_tools_call(req.params).await,
            "ping" => Ok(json!({})),
            method => Err(JsonRpcError::method_not_found(method)),
        };
        match result {
            Ok(value) => JsonRpcResponse::success(req.id, value),
            Err(error) => JsonRpcResponse::error(req.id, error),
        }
    }

    fn handle_initialize(&self) -> Result<Value, JsonRpcError> {
        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: json!({ "tools": { "listChanged": false } }),
            server_info: self.info.clone(),
        };
        serde_json::to_value(result).map_err(|e| JsonRpcError::internal(e.to_string()))
    }

    fn handle_tools_list(&self) -> Result<Value, JsonRpcError> {
        let tools: Vec<ToolInfo> = self.tools.values().map(CallableTool::info).collect();
        Ok(json!({ "tools": tools }))
    }

    async fn handle_tools_call(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let params: ToolCallParams = params
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| JsonRpcError::invalid_params(e.to_string()))?
            .ok_or_else(|| JsonRpcError::invalid_params("Missing params"))?;

        let tool = self
            .tools
            .get(&params.name)
            .ok_or_else(|| JsonRpcError::invalid_params(format!("Unknown tool: {}", params.name)))?;

        let result = tool.call(params.arguments).await;
        serde_json::to_value(result).map_err(|e| JsonRpcError::internal(e.to_string()))
    }
}

async fn write_response<W: AsyncWrite + Unpin>(
    writer: &mut W,
    response: &JsonRpcResponse,
) -> std::io::Result<()> {
    let mut output = serde_json::to_vec(response)?;
    output.push(b'\n');
    writer.write_all(&output).await?;
    writer.flush().await
}
