//! Tool-server bridge: launch, handshake, discover
//!
//! [`create_tool_server_tools`] is the one entry point collaborators need to
//! turn a launch command into callable tools. Whatever fails along the way,
//! the child process does not outlive the error.

use std::fmt;
use std::sync::Arc;

use super::discovery::{DiscoveryError, discover_tools};
use super::protocol::ServerInfo;
use super::session::{McpError, RpcSession, SessionOptions};
use super::tool::CallableTool;
use super::transport::{LaunchSpec, ProcessTransport, TransportError};

/// Where bringing up a tool-server failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeStage {
    Launch,
    Handshake,
    Discovery,
}

impl fmt::Display for BridgeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeStage::Launch => write!(f, "launch"),
            BridgeStage::Handshake => write!(f, "handshake"),
            BridgeStage::Discovery => write!(f, "discovery"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("failed to launch tool-server `{command}`: {source}")]
    Launch {
        command: String,
        #[source]
        source: TransportError,
    },
    #[error("tool-server `{command}` handshake failed: {source}")]
    Handshake {
        command: String,
        #[source]
        source: McpError,
    },
    #[error("tool-server `{command}` discovery failed: {source}")]
    Discovery {
        command: String,
        #[source]
        source: DiscoveryError,
    },
}

impl BridgeError {
    pub fn stage(&self) -> BridgeStage {
        match self {
            BridgeError::Launch { .. } => BridgeStage::Launch,
            BridgeError::Handshake { .. } => BridgeStage::Handshake,
            BridgeError::Discovery { .. } => BridgeStage::Discovery,
        }
    }
}

/// A live connection to a tool-server
pub struct ToolServerHandle {
    server_info: ServerInfo,
    session: Arc<RpcSession>,
}

impl ToolServerHandle {
    pub fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }

    pub fn session(&self) -> &Arc<RpcSession> {
        &self.session
    }

    pub fn is_closed(&self) -> bool {
        self.session.is_closed()
    }

    /// Stop the tool-server. Tools built from it fail afterwards. Idempotent.
    pub async fn close(&self) {
        self.session.close().await;
    }
}

/// A started tool-server and the tools it contributed
pub struct ToolServer {
    pub handle: ToolServerHandle,
    pub tools: Vec<CallableTool>,
    /// Descriptors the server advertised that could not be used
    pub rejected: Vec<DiscoveryError>,
}

/// Launch a tool-server, negotiate, and adapt its tools.
///
/// A server that offers no usable tools is not an error. Any failure closes
/// the transport before returning.
pub async fn create_tool_server_tools(
    spec: &LaunchSpec,
    options: &SessionOptions,
) -> Result<ToolServer, BridgeError> {
    let command = spec.display();

    let (transport, events) = ProcessTransport::start(spec).map_err(|source| BridgeError::Launch {
        command: command.clone(),
        source,
    })?;
    let session = Arc::new(RpcSession::new(Arc::new(transport), events, options.clone()));

    let init = match session.initialize().await {
        Ok(init) => init,
        Err(source) => {
            session.close().await;
            return Err(BridgeError::Handshake { command, source });
        }
    };

    let discovery = match discover_tools(session.clone()).await {
        Ok(discovery) => discovery,
        Err(source) => {
            session.close().await;
            return Err(BridgeError::Discovery { command, source });
        }
    };

    tracing::info!(
        server = %init.server_info.name,
        version = %init.server_info.version,
        tools = discovery.tools.len(),
        rejected = discovery.rejected.len(),
        "tool-server ready"
    );

    Ok(ToolServer {
        handle: ToolServerHandle {
            server_info: init.server_info,
            session,
        },
        tools: discovery.tools,
        rejected: discovery.rejected,
    })
}
