//! JSON-RPC session over a [`Transport`]
//!
//! Requests are correlated to responses by id, so any number of calls may be
//! in flight at once and answered in any order. A single demultiplexer task
//! owns the transport's event stream and resolves pending calls; when the
//! transport closes, every pending call fails with
//! [`TransportError::Closed`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};

use super::protocol::{
    IncomingMessage, InitializeResult, JsonRpcError, JsonRpcId, JsonRpcRequest, PROTOCOL_VERSION,
    ServerInfo,
};
use super::transport::{Transport, TransportError, TransportEvent};

pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("protocol order violation: {0}")]
    ProtocolOrder(&'static str),
    #[error("`{method}` timed out after {timeout:?}")]
    Timeout { method: String, timeout: Duration },
    #[error("RPC error {0}")]
    Rpc(JsonRpcError),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),
}

impl McpError {
    pub fn is_closed(&self) -> bool {
        matches!(self, McpError::Transport(TransportError::Closed))
    }
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Per-call response deadline
    pub rpc_timeout: Duration,
    /// Reported to the server as `clientInfo`
    pub client_name: String,
    pub client_version: String,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
            client_name: env!("CARGO_PKG_NAME").to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

type Reply = Result<Value, McpError>;

/// Outstanding calls. The closed flag shares the lock so nothing can register
/// after the session has failed its pending calls.
#[derive(Default)]
struct Pending {
    slots: HashMap<i64, oneshot::Sender<Reply>>,
    closed: bool,
}

impl Pending {
    fn fail_all(&mut self) -> usize {
        self.closed = true;
        let drained = self.slots.len();
        for (_, slot) in self.slots.drain() {
            let _ = slot.send(Err(McpError::Transport(TransportError::Closed)));
        }
        drained
    }
}

const STATE_NEW: u8 = 0;
const STATE_INITIALIZING: u8 = 1;
const STATE_READY: u8 = 2;

pub struct RpcSession {
    transport: Arc<dyn Transport>,
    pending: Arc<Mutex<Pending>>,
    next_id: AtomicI64,
    state: AtomicU8,
    server_info: OnceLock<ServerInfo>,
    options: SessionOptions,
}

impl RpcSession {
    /// Wrap a started transport and spawn the demultiplexer on the current
    /// runtime. `events` must be the receiver the transport was started with.
    pub fn new(
        transport: Arc<dyn Transport>,
        events: mpsc::UnboundedReceiver<TransportEvent>,
        options: SessionOptions,
    ) -> Self {
        let pending = Arc::new(Mutex::new(Pending::default()));
        tokio::spawn(demultiplex(events, pending.clone()));
        Self {
            transport,
            pending,
            next_id: AtomicI64::new(1),
            state: AtomicU8::new(STATE_NEW),
            server_info: OnceLock::new(),
            options,
        }
    }

    /// Run the `initialize` handshake. Allowed exactly once.
    pub async fn initialize(&self) -> Result<InitializeResult, McpError> {
        if self
            .state
            .compare_exchange(STATE_NEW, STATE_INITIALIZING, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(McpError::ProtocolOrder("initialize may only be called once"));
        }

        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": self.options.client_name,
                "version": self.options.client_version,
            }
        });

        let raw = self
            .request("initialize", Some(params))
            .await
            .map_err(|e| McpError::Handshake(e.to_string()))?;

        let result: InitializeResult = serde_json::from_value(raw)
            .map_err(|e| McpError::Handshake(format!("malformed initialize result: {e}")))?;
        if result.server_info.name.trim().is_empty() {
            return Err(McpError::Handshake("server did not report a name".to_string()));
        }
        if result.protocol_version != PROTOCOL_VERSION {
            tracing::debug!(
                target: "mcp",
                server = %result.protocol_version,
                client = PROTOCOL_VERSION,
                "protocol version differs"
            );
        }

        // Not ready until the server has been told; a failed notification
        // leaves the session unusable
        self.send_notification("notifications/initialized", None)
            .await
            .map_err(|e| McpError::Handshake(e.to_string()))?;
        let _ = self.server_info.set(result.server_info.clone());
        self.state.store(STATE_READY, Ordering::SeqCst);

        tracing::debug!(
            target: "mcp",
            server = %result.server_info.name,
            version = %result.server_info.version,
            "session initialized"
        );
        Ok(result)
    }

    /// Call `method` and wait for its result
    pub async fn call(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        self.ensure_ready()?;
        self.request(method, params).await
    }

    /// Send a notification; no response is expected
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        self.ensure_ready()?;
        self.send_notification(method, params).await
    }

    async fn send_notification(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        let line = serde_json::to_string(&JsonRpcRequest::notification(method, params))?;
        tracing::debug!(target: "mcp", "-> {} (notification)", method);
        self.transport.send(line).await?;
        Ok(())
    }

    /// Fail whatever is still pending and close the transport. Idempotent.
    pub async fn close(&self) {
        let failed = self.lock_pending().fail_all();
        if failed > 0 {
            tracing::debug!(target: "mcp", failed, "closed session with calls pending");
        }
        self.transport.close().await;
    }

    pub fn is_closed(&self) -> bool {
        self.transport.is_closed() || self.lock_pending().closed
    }

    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.server_info.get()
    }

    pub fn pending_count(&self) -> usize {
        self.lock_pending().slots.len()
    }

    fn ensure_ready(&self) -> Result<(), McpError> {
        if self.state.load(Ordering::SeqCst) == STATE_READY {
            Ok(())
        } else {
            Err(McpError::ProtocolOrder("session is not initialized"))
        }
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, Pending> {
        // A panic while holding this lock leaves the table itself consistent
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let line = serde_json::to_string(&JsonRpcRequest::new(
            JsonRpcId::Number(id),
            method,
            params,
        ))?;

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.lock_pending();
            if pending.closed {
                return Err(McpError::Transport(TransportError::Closed));
            }
            pending.slots.insert(id, tx);
        }

        tracing::debug!(target: "mcp", "-> {} (id={})", method, id);
        // The deadline covers the write as well as the wait
        let exchange = async {
            if let Err(e) = self.transport.send(line).await {
                self.lock_pending().slots.remove(&id);
                return Err(McpError::from(e));
            }
            match rx.await {
                Ok(reply) => reply,
                // Slot dropped without an answer: the table was torn down
                Err(_) => Err(McpError::Transport(TransportError::Closed)),
            }
        };

        match tokio::time::timeout(self.options.rpc_timeout, exchange).await {
            Ok(reply) => reply,
            Err(_) => {
                self.lock_pending().slots.remove(&id);
                tracing::debug!(target: "mcp", "{} (id={}) timed out", method, id);
                Err(McpError::Timeout {
                    method: method.to_string(),
                    timeout: self.options.rpc_timeout,
                })
            }
        }
    }
}

async fn demultiplex(
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    pending: Arc<Mutex<Pending>>,
) {
    while let Some(event) = events.recv().await {
        let line = match event {
            TransportEvent::Message(line) => line,
            TransportEvent::Closed => break,
        };

        let response = match IncomingMessage::parse(&line) {
            Ok(IncomingMessage::Response(response)) => response,
            Ok(IncomingMessage::Request(request)) => {
                tracing::debug!(target: "mcp", method = %request.method, "ignoring server-initiated message");
                continue;
            }
            Err(e) => {
                tracing::debug!(target: "mcp", error = %e, "ignoring unparseable line");
                continue;
            }
        };

        let Some(JsonRpcId::Number(id)) = response.id else {
            tracing::debug!(target: "mcp", id = ?response.id, "dropping response with foreign id");
            continue;
        };

        let slot = pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .slots
            .remove(&id);
        let Some(slot) = slot else {
            tracing::debug!(target: "mcp", id, "dropping response for unknown or expired call");
            continue;
        };

        tracing::debug!(target: "mcp", "<- id={}", id);
        // `"result": null` and a missing result both arrive as `None`
        let reply = match response.error {
            Some(error) => Err(McpError::Rpc(error)),
            None => Ok(response.result.unwrap_or(Value::Null)),
        };
        let _ = slot.send(reply);
    }

    let failed = pending
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .fail_all();
    tracing::debug!(target: "mcp", failed, "transport closed");
}
