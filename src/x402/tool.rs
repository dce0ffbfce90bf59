//! The `x402-request` tool
//!
//! Exposes [`PaymentClient`] to an agent as a [`CallableTool`]. Every
//! outcome, including HTTP and payment failures, comes back as pretty JSON
//! text so the agent can read it.

use std::sync::Arc;

use async_trait::async_trait;
use http::Method;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use url::Url;

use crate::mcp::protocol::ToolCallResult;
use crate::mcp::schema::SchemaError;
use crate::mcp::tool::{CallableTool, ToolError, ToolInvoker};
use crate::x402::client::{HttpRequest, NormalizedResponse, PaymentClient, RequestError};
use crate::x402::types::PaymentReceipt;

pub const TOOL_NAME: &str = "x402-request";

const TOOL_DESCRIPTION: &str = "Make a paid API request to an x402-enabled service. \
Automatically handles payment via x402 protocol.";

fn input_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "url": {
                "type": "string",
                "description": "Full URL of the x402-enabled API endpoint (e.g., https://api.example.com/data)"
            },
            "method": {
                "type": "string",
                "enum": ["GET", "POST", "PUT", "DELETE", "PATCH"],
                "default": "GET",
                "description": "HTTP method to use for the request"
            },
            "body": {
                "type": "object",
                "description": "Request body (for POST, PUT, PATCH requests). Sent as JSON."
            },
            "headers": {
                "type": "object",
                "additionalProperties": {"type": "string"},
                "description": "Additional HTTP headers to include in the request"
            },
            "params": {
                "type": "object",
                "additionalProperties": {"type": "string"},
                "description": "URL query parameters"
            }
        },
        "required": ["url"]
    })
}

/// Build the tool around a client
pub fn x402_request_tool(client: PaymentClient) -> Result<CallableTool, SchemaError> {
    CallableTool::new(
        TOOL_NAME,
        TOOL_DESCRIPTION,
        Some(input_schema()),
        Arc::new(X402RequestInvoker { client }),
    )
}

#[derive(Debug, Deserialize)]
struct RequestArgs {
    url: String,
    #[serde(default = "default_method")]
    method: String,
    #[serde(default)]
    body: Option<Value>,
    #[serde(default)]
    headers: IndexMap<String, String>,
    #[serde(default)]
    params: IndexMap<String, String>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl RequestArgs {
    /// Split the URL into origin and path. Query parameters already in the
    /// URL come first; `params` override them.
    fn into_request(self) -> Result<HttpRequest, String> {
        let url = Url::parse(&self.url).map_err(|e| format!("invalid url {:?}: {e}", self.url))?;
        let method = Method::from_bytes(self.method.as_bytes())
            .map_err(|_| format!("invalid method {:?}", self.method))?;

        let mut query: IndexMap<String, String> = url.query_pairs().into_owned().collect();
        query.extend(self.params);

        let mut headers = IndexMap::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        for (name, value) in self.headers {
            headers.retain(|existing: &String, _| !existing.eq_ignore_ascii_case(&name));
            headers.insert(name, value);
        }

        Ok(HttpRequest {
            base_url: url.origin().ascii_serialization(),
            method,
            path: url.path().to_string(),
            headers,
            query,
            body: self.body,
        })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SuccessReport<'a> {
    status: u16,
    status_text: &'a str,
    data: &'a Value,
    headers: &'a IndexMap<String, String>,
    payment: &'a Option<PaymentReceipt>,
}

#[derive(Serialize, Default)]
#[serde(rename_all = "camelCase")]
struct FailureReport<'a> {
    error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    status_text: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a Value>,
    message: String,
}

struct X402RequestInvoker {
    client: PaymentClient,
}

#[async_trait]
impl ToolInvoker for X402RequestInvoker {
    async fn invoke(&self, _name: &str, arguments: Value) -> Result<ToolCallResult, ToolError> {
        let args: RequestArgs = serde_json::from_value(arguments)
            .map_err(|e| ToolError::Failed(format!("invalid arguments: {e}")))?;
        let request = args.into_request().map_err(ToolError::Failed)?;

        let result = match self.client.request(&request).await {
            Ok(response) if response.is_success() => success(&response),
            Ok(response) => http_failure(&response),
            Err(e) => request_failure(&e),
        };
        Ok(result)
    }
}

fn success(response: &NormalizedResponse) -> ToolCallResult {
    render(
        &SuccessReport {
            status: response.status,
            status_text: &response.status_text,
            data: &response.body,
            headers: &response.headers,
            payment: &response.payment,
        },
        false,
    )
}

fn http_failure(response: &NormalizedResponse) -> ToolCallResult {
    render(
        &FailureReport {
            error: "Request failed",
            status: Some(response.status),
            status_text: Some(&response.status_text),
            data: Some(&response.body),
            message: format!("Request failed with status code {}", response.status),
        },
        true,
    )
}

fn request_failure(error: &RequestError) -> ToolCallResult {
    tracing::debug!(%error, "x402 request failed");
    render(
        &FailureReport {
            error: "Request failed",
            message: error.to_string(),
            ..Default::default()
        },
        true,
    )
}

fn render<T: Serialize>(report: &T, is_error: bool) -> ToolCallResult {
    let text = serde_json::to_string_pretty(report).unwrap_or_default();
    if is_error {
        ToolCallResult::error(text)
    } else {
        ToolCallResult::text(text)
    }
}

#[cfg(test)]
mod tests {
    use reqwest_middleware as rqm;

    use super::*;
    use crate::eth::EvmSigner;
    use crate::x402::middleware::X402Payments;
    use crate::x402::middleware::stub::{StubHandle, StubServer, challenge_body, json_response};
    use crate::x402::types::{X_PAYMENT, X_PAYMENT_RESPONSE};

    fn tool_with(
        respond: impl Fn(usize, &reqwest::Request) -> http::Response<Vec<u8>> + Send + Sync + 'static,
    ) -> (CallableTool, StubHandle) {
        let signer = EvmSigner::from_hex(&"3c".repeat(32)).unwrap();
        let (stub, handle) = StubServer::new(respond);
        let http = rqm::ClientBuilder::new(reqwest::Client::new())
            .with(X402Payments::new(Arc::new(signer)))
            .with(stub)
            .build();
        let tool = x402_request_tool(PaymentClient::from_client(http)).unwrap();
        (tool, handle)
    }

    fn parse(text: &str) -> Value {
        serde_json::from_str(text).unwrap()
    }

    #[test]
    fn test_url_split_and_params_merge() {
        let args: RequestArgs = serde_json::from_value(json!({
            "url": "https://api.example.com/v1/data?city=Porto&units=metric",
            "params": {"city": "Lisbon"},
            "headers": {"content-type": "text/plain", "X-Trace": "1"}
        }))
        .unwrap();
        let req = args.into_request().unwrap();
        assert_eq!(req.base_url, "https://api.example.com");
        assert_eq!(req.path, "/v1/data");
        assert_eq!(req.method, Method::GET);
        assert_eq!(req.query["city"], "Lisbon");
        assert_eq!(req.query["units"], "metric");
        assert_eq!(req.headers.len(), 2);
        assert_eq!(req.headers["content-type"], "text/plain");
        assert_eq!(
            req.url().unwrap().as_str(),
            "https://api.example.com/v1/data?city=Lisbon&units=metric"
        );
    }

    #[tokio::test]
    async fn test_paid_success_report() {
        let receipt = json!({"success": true, "transaction": "0xabc", "network": "base-sepolia"});
        let header = base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            receipt.to_string(),
        );
        let (tool, handle) = tool_with(move |_, req| {
            if req.headers().get(X_PAYMENT).is_none() {
                return json_response(402, &challenge_body("500"));
            }
            let mut res = json_response(200, &json!({"temp": 21}));
            res.headers_mut()
                .insert(X_PAYMENT_RESPONSE, header.parse().unwrap());
            res
        });

        let text = tool
            .invoke(Some(json!({"url": "http://paywalled.test/weather"})))
            .await
            .unwrap();
        let report = parse(&text);
        assert_eq!(report["status"], 200);
        assert_eq!(report["statusText"], "OK");
        assert_eq!(report["data"], json!({"temp": 21}));
        assert_eq!(report["payment"]["transaction"], "0xabc");
        assert!(text.contains('\n'));
        assert_eq!(handle.calls(), 2);
        assert_eq!(
            handle.header(0, "content-type").as_deref(),
            Some("application/json")
        );
    }

    #[tokio::test]
    async fn test_http_error_is_error_result() {
        let (tool, _) = tool_with(|_, _| json_response(404, &json!({"detail": "gone"})));
        let result = tool
            .call(Some(json!({"url": "http://paywalled.test/missing", "method": "DELETE"})))
            .await;
        assert!(result.is_error);
        let report = parse(&result.joined_text().unwrap());
        assert_eq!(report["error"], "Request failed");
        assert_eq!(report["status"], 404);
        assert_eq!(report["statusText"], "Not Found");
        assert_eq!(report["data"]["detail"], "gone");
        assert_eq!(report["message"], "Request failed with status code 404");
    }

    #[tokio::test]
    async fn test_payment_failure_is_error_result() {
        let (tool, handle) = tool_with(|_, _| json_response(402, &challenge_body("500")));
        let result = tool
            .call(Some(json!({"url": "http://paywalled.test/weather", "method": "POST", "body": {"q": 1}})))
            .await;
        assert!(result.is_error);
        let report = parse(&result.joined_text().unwrap());
        assert_eq!(report["error"], "Request failed");
        assert!(report.get("status").is_none());
        assert!(report["message"].as_str().unwrap().contains("payment"));
        assert_eq!(handle.calls(), 2);
    }

    #[tokio::test]
    async fn test_argument_checks() {
        let (tool, handle) = tool_with(|_, _| json_response(200, &json!({})));

        let missing_url = tool.call(Some(json!({}))).await;
        assert!(missing_url.is_error);
        let bad_method = tool
            .call(Some(json!({"url": "http://paywalled.test/", "method": "TRACE"})))
            .await;
        assert!(bad_method.is_error);
        let get_with_body = tool
            .call(Some(json!({"url": "http://paywalled.test/", "body": {"a": 1}})))
            .await;
        assert!(get_with_body.is_error);

        assert_eq!(handle.calls(), 0);
    }
}
