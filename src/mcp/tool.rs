//! Locally callable tools
//!
//! A [`CallableTool`] pairs a name, description and [`ParamSchema`] with
//! something that can run it. Remote tools run through an [`RpcSession`];
//! built-in tools such as the x402 request tool implement [`ToolInvoker`]
//! directly.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::protocol::{ToolCallResult, ToolInfo};
use super::schema::{ParamSchema, SchemaError, ValidationError};
use super::session::{McpError, RpcSession};

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error(transparent)]
    InvalidArguments(#[from] ValidationError),
    #[error("tool-server call failed: {0}")]
    Rpc(#[from] McpError),
    /// The tool ran and reported failure; carries its own message
    #[error("{0}")]
    Failed(String),
}

/// Runs a tool whose arguments have already been validated
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn invoke(&self, name: &str, arguments: Value) -> Result<ToolCallResult, ToolError>;
}

/// Forwards invocations to a tool-server as `tools/call`
pub struct RemoteInvoker {
    session: Arc<RpcSession>,
}

impl RemoteInvoker {
    pub fn new(session: Arc<RpcSession>) -> Self {
        Self { session }
    }
}

#[async_trait]
impl ToolInvoker for RemoteInvoker {
    async fn invoke(&self, name: &str, arguments: Value) -> Result<ToolCallResult, ToolError> {
        let params = json!({
            "name": name,
            "arguments": arguments,
        });
        let raw = self.session.call("tools/call", Some(params)).await?;
        serde_json::from_value(raw).map_err(|e| {
            ToolError::Rpc(McpError::InvalidResponse(format!(
                "malformed tools/call result: {e}"
            )))
        })
    }
}

#[derive(Clone)]
pub struct CallableTool {
    name: String,
    description: String,
    schema: ParamSchema,
    raw_schema: Value,
    invoker: Arc<dyn ToolInvoker>,
}

impl CallableTool {
    /// Build a tool from its advertised input schema
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        raw_schema: Option<Value>,
        invoker: Arc<dyn ToolInvoker>,
    ) -> Result<Self, SchemaError> {
        let schema = ParamSchema::for_tool_input(raw_schema.as_ref())?;
        Ok(Self {
            name: name.into(),
            description: description.into(),
            schema,
            raw_schema: raw_schema.unwrap_or_else(|| json!({"type": "object", "properties": {}})),
            invoker,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn schema(&self) -> &ParamSchema {
        &self.schema
    }

    /// The schema exactly as the tool advertised it
    pub fn raw_schema(&self) -> &Value {
        &self.raw_schema
    }

    /// Descriptor for re-advertising this tool
    pub fn info(&self) -> ToolInfo {
        ToolInfo {
            name: self.name.clone(),
            description: Some(self.description.clone()),
            input_schema: Some(self.raw_schema.clone()),
        }
    }

    /// Validate, run, and reduce the result to text.
    ///
    /// Text content is joined and returned as-is; a result with no text is
    /// returned as its JSON. A result flagged `isError` becomes
    /// [`ToolError::Failed`] with the tool's message.
    pub async fn invoke(&self, arguments: Option<Value>) -> Result<String, ToolError> {
        let result = self.run(arguments).await?;
        let text = result_text(&result);
        if result.is_error {
            Err(ToolError::Failed(text))
        } else {
            Ok(text)
        }
    }

    /// Like [`invoke`](Self::invoke) but failures come back as an `isError`
    /// result instead of `Err`
    pub async fn call(&self, arguments: Option<Value>) -> ToolCallResult {
        match self.run(arguments).await {
            Ok(result) => result,
            Err(e) => {
                tracing::debug!(tool = %self.name, error = %e, "tool call failed");
                ToolCallResult::error(e.to_string())
            }
        }
    }

    async fn run(&self, arguments: Option<Value>) -> Result<ToolCallResult, ToolError> {
        let arguments = self.schema.validate_arguments(arguments.as_ref())?;
        tracing::debug!(tool = %self.name, "invoking tool");
        self.invoker.invoke(&self.name, arguments).await
    }
}

impl fmt::Debug for CallableTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallableTool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("schema", &self.raw_schema)
            .finish_non_exhaustive()
    }
}

fn result_text(result: &ToolCallResult) -> String {
    result
        .joined_text()
        .unwrap_or_else(|| serde_json::to_string(result).unwrap_or_default())
}
