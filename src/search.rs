//! The `web_search` tool
//!
//! Runs a SerpAPI search and returns the organic results as pretty JSON, each
//! with a short plain-text preview of the page it links to. Requests go out
//! on a [`PaymentClient`] built without a signer, so nothing is ever paid.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::task::JoinSet;

use crate::mcp::protocol::ToolCallResult;
use crate::mcp::schema::SchemaError;
use crate::mcp::tool::{CallableTool, ToolError, ToolInvoker};
use crate::x402::client::{HttpRequest, PaymentClient};

pub const TOOL_NAME: &str = "web_search";
pub const DEFAULT_ENDPOINT: &str = "https://serpapi.com/search";

const TOOL_DESCRIPTION: &str =
    "Perform a web search for up-to-date information or to do research on a topic.";

const PAGE_TIMEOUT: Duration = Duration::from_secs(10);
const PREVIEW_CHARS: usize = 1000;
const FETCH_FAILED: &str = "Error fetching content";

/// Web search settings, as written in the config file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchConfig {
    pub api_key: String,
    /// Search endpoint, defaults to SerpAPI's
    #[serde(default)]
    pub endpoint: Option<String>,
}

fn input_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "query": {
                "type": "string",
                "description": "The search query string."
            },
            "num": {
                "type": "integer",
                "default": 10,
                "description": "Number of results to return"
            },
            "engine": {
                "type": "string",
                "default": "google",
                "description": "Search engine to use - supported: google, or custom engine string"
            },
            "timeout": {
                "type": "integer",
                "default": 10000,
                "description": "Search request timeout in milliseconds"
            }
        },
        "required": ["query"]
    })
}

/// Build the tool around a client. The client should carry no signer.
pub fn web_search_tool(
    config: &SearchConfig,
    client: PaymentClient,
) -> Result<CallableTool, SchemaError> {
    CallableTool::new(
        TOOL_NAME,
        TOOL_DESCRIPTION,
        Some(input_schema()),
        Arc::new(WebSearchInvoker {
            client,
            api_key: config.api_key.clone(),
            endpoint: config
                .endpoint
                .clone()
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
        }),
    )
}

#[derive(Debug, Deserialize)]
struct SearchArgs {
    query: String,
    num: u64,
    engine: String,
    timeout: u64,
}

#[derive(Debug, Deserialize)]
struct OrganicResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    snippet: String,
    #[serde(default)]
    link: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchResult {
    title: String,
    snippet: String,
    link: String,
    full_content: String,
}

struct WebSearchInvoker {
    client: PaymentClient,
    api_key: String,
    endpoint: String,
}

#[async_trait]
impl ToolInvoker for WebSearchInvoker {
    async fn invoke(&self, _name: &str, arguments: Value) -> Result<ToolCallResult, ToolError> {
        let args: SearchArgs = serde_json::from_value(arguments)
            .map_err(|e| ToolError::Failed(format!("invalid arguments: {e}")))?;

        let mut request = HttpRequest::get(&self.endpoint);
        request.query.insert("api_key".into(), self.api_key.clone());
        request.query.insert("engine".into(), args.engine.clone());
        request.query.insert("q".into(), args.query.clone());
        request.query.insert("num".into(), args.num.to_string());

        let deadline = Duration::from_millis(args.timeout);
        let response = match tokio::time::timeout(deadline, self.client.request(&request)).await {
            Ok(Ok(response)) if response.is_success() => response,
            Ok(Ok(response)) => {
                return Ok(self.failure(format!(
                    "search failed with status code {}",
                    response.status
                )));
            }
            Ok(Err(e)) => return Ok(self.failure(e.to_string())),
            Err(_) => {
                return Ok(self.failure(format!("search timed out after {}ms", args.timeout)));
            }
        };

        let mut hits = organic_results(&response.body);
        hits.truncate(usize::try_from(args.num).unwrap_or(usize::MAX));
        if hits.is_empty() {
            return Ok(ToolCallResult::text("No results found."));
        }
        tracing::debug!(query = %args.query, results = hits.len(), "web search returned");

        let results = self.with_previews(hits).await;
        let text = serde_json::to_string_pretty(&results).unwrap_or_default();
        Ok(ToolCallResult::text(text))
    }
}

impl WebSearchInvoker {
    /// Fetch every linked page at once; results keep the search order
    async fn with_previews(&self, hits: Vec<OrganicResult>) -> Vec<SearchResult> {
        let mut pages = JoinSet::new();
        for (index, hit) in hits.iter().enumerate() {
            let client = self.client.clone();
            let link = hit.link.clone();
            pages.spawn(async move { (index, fetch_preview(&client, &link).await) });
        }

        let mut previews: Vec<Option<String>> = vec![None; hits.len()];
        while let Some(joined) = pages.join_next().await {
            if let Ok((index, preview)) = joined {
                previews[index] = preview;
            }
        }

        hits.into_iter()
            .zip(previews)
            .map(|(hit, preview)| SearchResult {
                title: hit.title,
                snippet: hit.snippet,
                link: hit.link,
                full_content: preview.unwrap_or_else(|| FETCH_FAILED.to_string()),
            })
            .collect()
    }

    // Transport errors can echo the request URL, which carries the key
    fn failure(&self, message: String) -> ToolCallResult {
        let message = redact(&message, &self.api_key);
        tracing::debug!(error = %message, "web search failed");
        ToolCallResult::error(format!("Error performing web search: {message}"))
    }
}

fn organic_results(body: &Value) -> Vec<OrganicResult> {
    body.get("organic_results")
        .cloned()
        .and_then(|results| serde_json::from_value(results).ok())
        .unwrap_or_default()
}

async fn fetch_preview(client: &PaymentClient, link: &str) -> Option<String> {
    let request = HttpRequest::get(link);
    let response = tokio::time::timeout(PAGE_TIMEOUT, client.request(&request))
        .await
        .ok()?
        .ok()?;
    if !response.is_success() {
        return None;
    }
    let text = match &response.body {
        Value::String(html) => page_text(html),
        Value::Null => String::new(),
        other => other.to_string(),
    };
    Some(text.chars().take(PREVIEW_CHARS).collect())
}

fn redact(message: &str, secret: &str) -> String {
    if secret.is_empty() {
        message.to_string()
    } else {
        message.replace(secret, "***")
    }
}

/// Visible text of an HTML page: the body without tags, scripts or styles,
/// whitespace collapsed
fn page_text(html: &str) -> String {
    // ASCII lowercasing keeps byte offsets, so indices carry over to `html`
    let lower = html.to_ascii_lowercase();
    let start = lower
        .find("<body")
        .and_then(|i| lower[i..].find('>').map(|j| i + j + 1))
        .unwrap_or(0);
    let end = lower[start..]
        .find("</body")
        .map_or(html.len(), |i| start + i);

    let mut text = String::new();
    let mut pos = start;
    while pos < end {
        let Some(offset) = lower[pos..end].find('<') else {
            text.push_str(&html[pos..end]);
            break;
        };
        text.push_str(&html[pos..pos + offset]);

        let tag = &lower[pos + offset..end];
        let skipped = match ["script", "style"].into_iter().find(|name| tag[1..].starts_with(name)) {
            Some(name) => tag
                .find(&format!("</{name}"))
                .and_then(|i| tag[i..].find('>').map(|j| i + j + 1)),
            None => tag.find('>').map(|i| i + 1),
        };
        let Some(skipped) = skipped else { break };
        text.push(' ');
        pos += offset + skipped;
    }

    decode_entities(&text)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}
