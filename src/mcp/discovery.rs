//! Tool discovery: `tools/list` to [`CallableTool`]s

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::{Value, json};

use super::protocol::{ToolInfo, ToolsListResult};
use super::session::{McpError, RpcSession};
use super::tool::{CallableTool, RemoteInvoker, ToolInvoker};

/// Upper bound on `tools/list` pages, against servers that never stop paging
const MAX_PAGES: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("tools/list failed: {0}")]
    List(#[source] McpError),
    #[error("tool #{index} ({name}) rejected: {reason}")]
    InvalidDescriptor {
        index: usize,
        name: String,
        reason: String,
    },
}

/// Outcome of discovery: the usable tools, in server order, and why any
/// others were left out
#[derive(Debug, Default)]
pub struct Discovery {
    pub tools: Vec<CallableTool>,
    pub rejected: Vec<DiscoveryError>,
}

/// List every tool the session's server offers and adapt each one
pub async fn discover_tools(session: Arc<RpcSession>) -> Result<Discovery, DiscoveryError> {
    let descriptors = list_all(&session).await?;
    let invoker: Arc<dyn ToolInvoker> = Arc::new(RemoteInvoker::new(session));
    let discovery = adapt_descriptors(descriptors, invoker);

    for rejected in &discovery.rejected {
        tracing::warn!(target: "mcp", "{}", rejected);
    }
    tracing::debug!(
        target: "mcp",
        accepted = discovery.tools.len(),
        rejected = discovery.rejected.len(),
        "discovered tools"
    );
    Ok(discovery)
}

async fn list_all(session: &RpcSession) -> Result<Vec<Value>, DiscoveryError> {
    let mut descriptors = Vec::new();
    let mut cursor: Option<String> = None;

    for _ in 0..MAX_PAGES {
        let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
        let raw = session
            .call("tools/list", params)
            .await
            .map_err(DiscoveryError::List)?;
        let page: ToolsListResult = serde_json::from_value(raw).map_err(|e| {
            DiscoveryError::List(McpError::InvalidResponse(format!(
                "malformed tools/list result: {e}"
            )))
        })?;
        descriptors.extend(page.tools);

        match page.next_cursor {
            Some(next) if !next.is_empty() => cursor = Some(next),
            _ => return Ok(descriptors),
        }
    }

    tracing::warn!(target: "mcp", pages = MAX_PAGES, "tools/list still paging, stopping");
    Ok(descriptors)
}

/// Turn raw descriptors into tools. Each descriptor stands or falls on its
/// own; accepted tools keep their original order.
pub fn adapt_descriptors(descriptors: Vec<Value>, invoker: Arc<dyn ToolInvoker>) -> Discovery {
    let mut seen = HashSet::new();
    let mut discovery = Discovery::default();

    for (index, raw) in descriptors.into_iter().enumerate() {
        let label = raw
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("<unnamed>")
            .to_string();
        let reject = |reason: String| DiscoveryError::InvalidDescriptor {
            index,
            name: label.clone(),
            reason,
        };

        let info: ToolInfo = match serde_json::from_value(raw) {
            Ok(info) => info,
            Err(e) => {
                discovery.rejected.push(reject(format!("malformed descriptor: {e}")));
                continue;
            }
        };
        if info.name.trim().is_empty() {
            discovery.rejected.push(reject("empty name".to_string()));
            continue;
        }
        if seen.contains(&info.name) {
            discovery.rejected.push(reject("duplicate name".to_string()));
            continue;
        }

        match CallableTool::new(
            info.name.clone(),
            info.description.unwrap_or_default(),
            info.input_schema,
            invoker.clone(),
        ) {
            Ok(tool) => {
                seen.insert(info.name);
                discovery.tools.push(tool);
            }
            Err(e) => discovery.rejected.push(reject(e.to_string())),
        }
    }

    discovery
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::mcp::protocol::{JsonRpcRequest, PROTOCOL_VERSION, ToolCallResult};
    use crate::mcp::session::SessionOptions;
    use crate::mcp::tool::ToolError;
    use crate::mcp::transport::memory::{self, Peer};
    use async_trait::async_trait;

    struct Unused;

    #[async_trait]
    impl ToolInvoker for Unused {
        async fn invoke(&self, _: &str, _: Value) -> Result<ToolCallResult, ToolError> {
            Ok(ToolCallResult::text(""))
        }
    }

    #[test]
    fn test_bad_descriptors_rejected_independently() {
        let discovery = adapt_descriptors(
            vec![
                json!({"name": "get_me", "description": "Current user"}),
                json!({"description": "no name here"}),
                json!({"name": "list_issues", "inputSchema": {"type": "object"}}),
            ],
            Arc::new(Unused),
        );
        let names: Vec<&str> = discovery.tools.iter().map(|t| t.name()).collect();
        assert_eq!(names, ["get_me", "list_issues"]);
        assert_eq!(discovery.rejected.len(), 1);
        assert!(matches!(
            discovery.rejected[0],
            DiscoveryError::InvalidDescriptor { index: 1, .. }
        ));
    }

    #[test]
    fn test_duplicates_empty_names_and_bad_schemas() {
        let discovery = adapt_descriptors(
            vec![
                json!({"name": "scrape"}),
                json!({"name": "scrape"}),
                json!({"name": "  "}),
                json!({"name": "crawl", "inputSchema": {"type": "string"}}),
                json!({"name": "map", "inputSchema": {"type": "object", "required": "url"}}),
                json!("not even an object"),
            ],
            Arc::new(Unused),
        );
        assert_eq!(discovery.tools.len(), 1);
        assert_eq!(discovery.rejected.len(), 5);
    }

    /// Answers tools/list from `pages`, keyed by the cursor it was asked for
    fn serve_pages(mut peer: Peer, pages: Vec<Value>) {
        tokio::spawn(async move {
            while let Some(line) = peer.outbound.recv().await {
                let req: JsonRpcRequest = serde_json::from_str(&line).unwrap();
                let result = match req.method.as_str() {
                    "initialize" => json!({
                        "protocolVersion": PROTOCOL_VERSION,
                        "serverInfo": {"name": "pager", "version": "0"}
                    }),
                    "tools/list" => {
                        let cursor = req
                            .params
                            .as_ref()
                            .and_then(|p| p["cursor"].as_str())
                            .map(|c| c.parse::<usize>().unwrap())
                            .unwrap_or(0);
                        pages[cursor].clone()
                    }
                    _ => continue,
                };
                peer.reply(json!({"jsonrpc": "2.0", "id": req.id, "result": result}).to_string());
            }
        });
    }

    #[tokio::test]
    async fn test_follows_pagination() {
        let (transport, events, peer) = memory::pair();
        serve_pages(
            peer,
            vec![
                json!({"tools": [{"name": "a"}, {"name": "b"}], "nextCursor": "1"}),
                json!({"tools": [{"name": "c"}], "nextCursor": "2"}),
                json!({"tools": [{"name": "d"}]}),
            ],
        );
        let options = SessionOptions {
            rpc_timeout: Duration::from_secs(5),
            ..Default::default()
        };
        let session = Arc::new(RpcSession::new(Arc::new(transport), events, options));
        session.initialize().await.unwrap();

        let discovery = discover_tools(session).await.unwrap();
        let names: Vec<&str> = discovery.tools.iter().map(|t| t.name()).collect();
        assert_eq!(names, ["a", "b", "c", "d"]);
        assert!(discovery.rejected.is_empty());
    }

    #[tokio::test]
    async fn test_list_failure() {
        let (transport, events, peer) = memory::pair();
        serve_pages(peer, vec![json!({"tools": "nope"})]);
        let session = Arc::new(RpcSession::new(
            Arc::new(transport),
            events,
            SessionOptions::default(),
        ));
        session.initialize().await.unwrap();
        assert!(matches!(
            discover_tools(session).await,
            Err(DiscoveryError::List(_))
        ));
    }
}
