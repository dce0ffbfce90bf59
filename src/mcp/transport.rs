//! Newline-delimited message transport over a child process's stdio

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex as StdMutex};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("child process has no {0} pipe")]
    MissingPipe(&'static str),
    #[error("transport is closed")]
    Closed,
}

/// What the reader side of a transport reports
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One complete line from the peer, without the trailing newline
    Message(String),
    /// The peer is gone; sent once, always last
    Closed,
}

/// Outbound half of a message transport
#[async_trait]
pub trait Transport: Send + Sync {
    /// Write one message. Fails with [`TransportError::Closed`] once closed.
    async fn send(&self, message: String) -> Result<(), TransportError>;

    /// Stop the transport. Idempotent.
    async fn close(&self);

    fn is_closed(&self) -> bool;
}

/// How to start a tool-server process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchSpec {
    pub command: String,
    pub args: Vec<String>,
    /// Extra environment. Secrets belong here, never in `args`.
    pub env: HashMap<String, String>,
    /// Start from the parent's environment; otherwise from an empty one
    pub inherit_env: bool,
    pub cwd: Option<PathBuf>,
}

impl LaunchSpec {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            inherit_env: true,
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Command line for logs. Environment values are never included.
    pub fn display(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A spawned tool-server, spoken to over stdin/stdout.
///
/// Writes go through a queue drained by a writer task, so `send` never waits
/// on a full pipe.
pub struct ProcessTransport {
    outbound: StdMutex<Option<mpsc::UnboundedSender<String>>>,
    writer: StdMutex<Option<JoinHandle<()>>>,
    child: Mutex<Option<Child>>,
    closed: Arc<AtomicBool>,
    label: String,
}

impl ProcessTransport {
    /// Spawn the process and start reading. Messages arrive on the returned
    /// receiver, which ends with [`TransportEvent::Closed`].
    pub fn start(
        spec: &LaunchSpec,
    ) -> Result<(Self, mpsc::UnboundedReceiver<TransportEvent>), TransportError> {
        let mut cmd = Command::new(&spec.command);
        cmd.args(&spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if !spec.inherit_env {
            cmd.env_clear();
        }
        cmd.envs(&spec.env);
        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }

        let label = spec.display();
        tracing::debug!(target: "mcp", command = %label, "spawning tool-server");

        let mut child = cmd.spawn().map_err(|source| TransportError::Spawn {
            command: spec.command.clone(),
            source,
        })?;

        let stdin = child.stdin.take().ok_or(TransportError::MissingPipe("stdin"))?;
        let stdout = child.stdout.take().ok_or(TransportError::MissingPipe("stdout"))?;
        let stderr = child.stderr.take().ok_or(TransportError::MissingPipe("stderr"))?;

        let closed = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::unbounded_channel();

        let reader_closed = closed.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        if tx.send(TransportEvent::Message(line)).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::debug!(target: "mcp", error = %e, "tool-server stdout read failed");
                        break;
                    }
                }
            }
            reader_closed.store(true, Ordering::SeqCst);
            let _ = tx.send(TransportEvent::Closed);
        });

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_lines(stdin, out_rx, closed.clone()));

        // stderr is diagnostics only
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(target: "tool_server", "{}", line);
            }
        });

        Ok((
            Self {
                outbound: StdMutex::new(Some(out_tx)),
                writer: StdMutex::new(Some(writer)),
                child: Mutex::new(Some(child)),
                closed,
                label,
            },
            rx,
        ))
    }
}

/// Drain queued messages into the child's stdin, one line each. Ends when the
/// queue is dropped or a write fails; stdin is dropped with it.
async fn write_lines(
    mut stdin: ChildStdin,
    mut queue: mpsc::UnboundedReceiver<String>,
    closed: Arc<AtomicBool>,
) {
    while let Some(message) = queue.recv().await {
        let mut line = message.into_bytes();
        line.push(b'\n');
        let written = match stdin.write_all(&line).await {
            Ok(()) => stdin.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            tracing::debug!(target: "mcp", error = %e, "tool-server stdin write failed");
            break;
        }
    }
    closed.store(true, Ordering::SeqCst);
}

fn lock<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl Transport for ProcessTransport {
    async fn send(&self, message: String) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let outbound = lock(&self.outbound);
        let queue = outbound.as_ref().ok_or(TransportError::Closed)?;
        queue.send(message).map_err(|_| TransportError::Closed)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        // Kill before touching stdin: a write stuck on a full pipe only
        // returns once the reading end is gone
        let child = self.child.lock().await.take();
        if let Some(mut child) = child {
            if let Err(e) = child.kill().await {
                tracing::debug!(target: "mcp", error = %e, "tool-server already exited");
            }
            tracing::debug!(target: "mcp", command = %self.label, "tool-server stopped");
        }
        lock(&self.outbound).take();
        if let Some(writer) = lock(&self.writer).take() {
            writer.abort();
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// In-memory peer for session tests: records what is sent and lets the test
/// inject incoming events.
#[cfg(test)]
pub(crate) mod memory {
    use super::*;

    pub struct MemoryTransport {
        pub sent: Arc<StdMutex<Vec<String>>>,
        outbound: mpsc::UnboundedSender<String>,
        inbound: mpsc::UnboundedSender<TransportEvent>,
        closed: AtomicBool,
    }

    /// The test's side of a [`MemoryTransport`]
    pub struct Peer {
        pub sent: Arc<StdMutex<Vec<String>>>,
        pub outbound: mpsc::UnboundedReceiver<String>,
        pub inbound: mpsc::UnboundedSender<TransportEvent>,
    }

    impl Peer {
        pub fn reply(&self, line: impl Into<String>) {
            let _ = self.inbound.send(TransportEvent::Message(line.into()));
        }

        pub fn hang_up(&self) {
            let _ = self.inbound.send(TransportEvent::Closed);
        }

        pub fn sent_count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    pub fn pair() -> (MemoryTransport, mpsc::UnboundedReceiver<TransportEvent>, Peer) {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let transport = MemoryTransport {
            sent: sent.clone(),
            outbound: out_tx,
            inbound: in_tx.clone(),
            closed: AtomicBool::new(false),
        };
        let peer = Peer {
            sent,
            outbound: out_rx,
            inbound: in_tx,
        };
        (transport, in_rx, peer)
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        async fn send(&self, message: String) -> Result<(), TransportError> {
            if self.is_closed() {
                return Err(TransportError::Closed);
            }
            self.sent.lock().unwrap().push(message.clone());
            self.outbound.send(message).map_err(|_| TransportError::Closed)
        }

        async fn close(&self) {
            if !self.closed.swap(true, Ordering::SeqCst) {
                let _ = self.inbound.send(TransportEvent::Closed);
            }
        }

        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }
}
