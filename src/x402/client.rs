//! Payment-aware HTTP client
//!
//! [`x402_client`] builds the reqwest stack (plain when no key is configured),
//! and [`PaymentClient`] turns an [`HttpRequest`] into a [`NormalizedResponse`]
//! with the payment receipt attached.

use std::sync::Arc;
use std::time::Duration;

use http::{HeaderMap, Method};
use indexmap::IndexMap;
use reqwest_middleware::{self as rqm, ClientWithMiddleware};
use serde::Serialize;
use serde_json::Value;
use url::Url;

use crate::eth::{Network, Signer};
use crate::x402::challenge::decode_receipt;
use crate::x402::middleware::{ReqwestWithPayments, ReqwestWithPaymentsBuild, X402PaymentsError};
use crate::x402::types::{PaymentReceipt, TokenAmount};

/// Optional HTTP client configuration
#[derive(Default, Clone, Debug)]
pub struct ClientConfig {
    /// Follow redirects
    pub follow_redirects: bool,
    /// Connection timeout in seconds
    pub connect_timeout: Option<u64>,
    /// Total request timeout in seconds
    pub timeout: Option<u64>,
    /// Per-request payment ceiling in token base units
    pub max_amount: Option<TokenAmount>,
    /// Networks to pay on, most preferred first
    pub prefer: Vec<Network>,
}

/// Create an HTTP client with optional x402 payment support.
///
/// With a signer the client answers 402 challenges; without one it is a
/// plain client and a 402 comes back like any other response.
pub fn x402_client(
    signer: Option<Arc<dyn Signer>>,
    config: &ClientConfig,
) -> Result<ClientWithMiddleware, reqwest::Error> {
    let mut reqwest_builder = reqwest::Client::builder();

    if config.follow_redirects {
        reqwest_builder = reqwest_builder.redirect(reqwest::redirect::Policy::limited(10));
    } else {
        reqwest_builder = reqwest_builder.redirect(reqwest::redirect::Policy::none());
    }
    if let Some(connect_timeout) = config.connect_timeout {
        reqwest_builder = reqwest_builder.connect_timeout(Duration::from_secs(connect_timeout));
    }
    if let Some(timeout) = config.timeout {
        reqwest_builder = reqwest_builder.timeout(Duration::from_secs(timeout));
    }

    let base_client = reqwest_builder.build()?;

    let Some(signer) = signer else {
        return Ok(rqm::ClientBuilder::new(base_client).build());
    };

    tracing::debug!(address = %signer.address(), "x402 signer configured");
    let mut builder = base_client.with_payments(signer);
    if !config.prefer.is_empty() {
        tracing::debug!(prefer = ?config.prefer, "x402 network preferences");
        builder = builder.prefer(config.prefer.clone());
    }
    if let Some(max) = config.max_amount {
        tracing::debug!(%max, "x402 spending limit");
        builder = builder.max(max);
    }
    Ok(builder.build())
}

// ============================================================================
// Request / response
// ============================================================================

/// One outgoing request, before URL assembly
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub base_url: String,
    pub method: Method,
    pub path: String,
    pub headers: IndexMap<String, String>,
    pub query: IndexMap<String, String>,
    pub body: Option<Value>,
}

impl HttpRequest {
    pub fn get(url: &str) -> Self {
        Self {
            base_url: url.to_string(),
            method: Method::GET,
            path: String::new(),
            headers: IndexMap::new(),
            query: IndexMap::new(),
            body: None,
        }
    }

    /// Base URL with the path appended to its path, plus the query
    /// parameters. A query already on the base URL is kept.
    pub fn url(&self) -> Result<Url, url::ParseError> {
        let mut url = Url::parse(&self.base_url)?;
        let path = self.path.trim_start_matches('/');
        if !path.is_empty() {
            let joined = format!("{}/{}", url.path().trim_end_matches('/'), path);
            url.set_path(&joined);
        }
        if !self.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &self.query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }
}

/// Methods that must not carry a request body
fn forbids_body(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::DELETE | Method::OPTIONS
    )
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: IndexMap<String, String>,
    /// Parsed JSON when the body is JSON, otherwise the text
    pub body: Value,
    pub payment: Option<PaymentReceipt>,
}

impl NormalizedResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("invalid request: {0}")]
    Usage(String),
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("HTTP request failed: {0}")]
    Http(#[source] rqm::Error),
    #[error(transparent)]
    Payment(#[from] X402PaymentsError),
}

impl From<rqm::Error> for RequestError {
    fn from(err: rqm::Error) -> Self {
        match err {
            rqm::Error::Middleware(e) => match e.downcast::<X402PaymentsError>() {
                Ok(payment) => RequestError::Payment(payment),
                Err(other) => RequestError::Http(rqm::Error::Middleware(other)),
            },
            other => RequestError::Http(other),
        }
    }
}

impl From<reqwest::Error> for RequestError {
    fn from(err: reqwest::Error) -> Self {
        RequestError::Http(rqm::Error::Reqwest(err))
    }
}

/// Issues [`HttpRequest`]s through the (optionally paying) middleware stack
#[derive(Clone)]
pub struct PaymentClient {
    http: ClientWithMiddleware,
}

impl PaymentClient {
    pub fn new(signer: Option<Arc<dyn Signer>>, config: &ClientConfig) -> Result<Self, RequestError> {
        Ok(Self {
            http: x402_client(signer, config)?,
        })
    }

    pub fn from_client(http: ClientWithMiddleware) -> Self {
        Self { http }
    }

    pub async fn request(&self, request: &HttpRequest) -> Result<NormalizedResponse, RequestError> {
        if request.body.is_some() && forbids_body(&request.method) {
            return Err(RequestError::Usage(format!(
                "{} requests cannot have a body",
                request.method
            )));
        }
        let url = request.url()?;

        let mut builder = self.http.request(request.method.clone(), url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            let bytes = serde_json::to_vec(body)
                .map_err(|e| RequestError::Usage(format!("body is not serializable: {e}")))?;
            let has_content_type = request
                .headers
                .keys()
                .any(|name| name.eq_ignore_ascii_case("content-type"));
            if !has_content_type {
                builder = builder.header(http::header::CONTENT_TYPE, "application/json");
            }
            builder = builder.body(bytes);
        }

        tracing::debug!(method = %request.method, %url, "sending request");
        let response = builder.send().await?;
        normalize(response).await
    }
}

async fn normalize(response: reqwest::Response) -> Result<NormalizedResponse, RequestError> {
    let status = response.status();
    let payment = receipt_or_warn(response.headers());
    let headers = flatten_headers(response.headers());
    let bytes = response.bytes().await?;

    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };

    Ok(NormalizedResponse {
        status: status.as_u16(),
        status_text: status.canonical_reason().unwrap_or_default().to_string(),
        headers,
        body,
        payment,
    })
}

// A garbled receipt does not void a response the server already delivered.
fn receipt_or_warn(headers: &HeaderMap) -> Option<PaymentReceipt> {
    match decode_receipt(headers) {
        Ok(receipt) => {
            if let Some(r) = &receipt {
                tracing::info!(
                    success = r.success,
                    transaction = r.transaction.as_deref().unwrap_or(""),
                    network = %r.network,
                    "payment settled"
                );
            }
            receipt
        }
        Err(e) => {
            tracing::warn!(error = %e, "ignoring malformed payment receipt");
            None
        }
    }
}

fn flatten_headers(headers: &HeaderMap) -> IndexMap<String, String> {
    let mut out = IndexMap::new();
    for (name, value) in headers {
        let Ok(value) = value.to_str() else { continue };
        out.entry(name.as_str().to_string())
            .and_modify(|existing: &mut String| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    out
}
