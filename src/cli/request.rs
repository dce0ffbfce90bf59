//! `request`: one x402-aware HTTP request from the command line

use anyhow::{Context, Result};
use clap::Args;
use http::Method;
use indexmap::IndexMap;
use serde_json::Value;
use std::sync::Arc;

use crate::config::GlobalConfig;
use crate::eth::Signer;
use crate::x402::{HttpRequest, NormalizedResponse, PaymentClient};

#[derive(Args, Clone, Debug)]
pub struct RequestArgs {
    /// URL to request
    url: String,

    /// HTTP method (GET, POST, PUT, DELETE, PATCH)
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,

    /// JSON request body (inline JSON or @file)
    #[arg(short = 'D', long = "data", value_name = "JSON")]
    data: Option<String>,

    /// Headers (format: "Key: Value")
    #[arg(short = 'H', long)]
    header: Vec<String>,

    /// Query parameters (format: key=value)
    #[arg(short = 'P', long = "param", value_name = "KEY=VALUE")]
    param: Vec<String>,

    /// Print only the response body
    #[arg(short = 'b', long)]
    body_only: bool,

    /// Follow redirects
    #[arg(long)]
    location: bool,

    /// Exit with an error on HTTP errors (4xx, 5xx)
    #[arg(short = 'f', long)]
    fail: bool,
}

pub async fn run(args: RequestArgs, config: &GlobalConfig) -> Result<()> {
    let request = build_request(&args)?;

    let signer = config.load_signer()?.map(|s| Arc::new(s) as Arc<dyn Signer>);
    if signer.is_none() {
        tracing::warn!("no key configured, 402 responses will not be paid");
    }
    let mut client_config = config.client_config();
    client_config.follow_redirects |= args.location;
    let client = PaymentClient::new(signer, &client_config)?;

    let response = client.request(&request).await?;
    print_response(&response, args.body_only)?;

    if args.fail && !response.is_success() {
        anyhow::bail!("HTTP {} {}", response.status, response.status_text);
    }
    Ok(())
}

fn build_request(args: &RequestArgs) -> Result<HttpRequest> {
    let mut request = HttpRequest::get(&args.url);
    request.method = Method::from_bytes(args.method.to_uppercase().as_bytes())
        .map_err(|_| anyhow::anyhow!("Invalid HTTP method: {}", args.method))?;

    for header in &args.header {
        let (name, value) = header
            .split_once(':')
            .ok_or_else(|| anyhow::anyhow!("Invalid header '{}'. Expected 'Key: Value'", header))?;
        request
            .headers
            .insert(name.trim().to_string(), value.trim().to_string());
    }

    let mut query = IndexMap::new();
    for pair in &args.param {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("Invalid --param '{}'. Expected KEY=VALUE", pair))?;
        query.insert(key.to_string(), value.to_string());
    }
    request.query = query;

    if let Some(data) = &args.data {
        request.body = Some(load_body(data)?);
    }
    Ok(request)
}

fn load_body(data: &str) -> Result<Value> {
    let raw = match data.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read body from '{}'", path))?,
        None => data.to_string(),
    };
    serde_json::from_str(&raw).context("Request body must be JSON")
}

fn print_response(response: &NormalizedResponse, body_only: bool) -> Result<()> {
    if body_only {
        match &response.body {
            Value::String(text) => println!("{text}"),
            Value::Null => {}
            other => println!("{}", serde_json::to_string_pretty(other)?),
        }
    } else {
        println!("{}", serde_json::to_string_pretty(response)?);
    }

    if let Some(receipt) = &response.payment {
        eprintln!(
            "payment: {} on {}{}",
            if receipt.success { "settled" } else { "failed" },
            receipt.network,
            receipt
                .transaction
                .as_deref()
                .map(|tx| format!(" (tx {tx})"))
                .unwrap_or_default()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use serde_json::json;

    use super::*;

    #[derive(Parser)]
    struct Cli {
        #[command(flatten)]
        request: RequestArgs,
    }

    fn parse(args: &[&str]) -> RequestArgs {
        Cli::try_parse_from(std::iter::once("request").chain(args.iter().copied()))
            .unwrap()
            .request
    }

    #[test]
    fn test_build_request() {
        let args = parse(&[
            "https://api.example.com/v1/data",
            "-X",
            "post",
            "-H",
            "X-Trace: abc",
            "-P",
            "city=Porto",
            "-D",
            r#"{"q": 1}"#,
        ]);
        let request = build_request(&args).unwrap();
        assert_eq!(request.method, Method::POST);
        assert_eq!(request.headers["X-Trace"], "abc");
        assert_eq!(request.body, Some(json!({"q": 1})));
        assert_eq!(
            request.url().unwrap().as_str(),
            "https://api.example.com/v1/data?city=Porto"
        );
    }

    #[test]
    fn test_bad_inputs() {
        assert!(build_request(&parse(&["http://x.test/", "-H", "no colon"])).is_err());
        assert!(build_request(&parse(&["http://x.test/", "-D", "not json"])).is_err());
        assert!(build_request(&parse(&["http://x.test/", "-P", "novalue"])).is_err());
    }
}
