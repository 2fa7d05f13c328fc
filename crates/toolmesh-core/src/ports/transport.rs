//! Transport parameters handed to a [`ClientConnector`](super::ClientConnector).

use crate::domain::TransportMode;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, ChildStdout};
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::debug;

/// How a protocol client reaches its server.
#[derive(Debug, Clone)]
pub enum TransportParams {
    /// Newline-delimited JSON-RPC over process pipes.
    Pipe {
        command: String,
        args: Vec<String>,
        env: BTreeMap<String, String>,
        cwd: Option<String>,
        /// Pipes of an already supervised process. When absent the client
        /// spawns its own process from `command`.
        attached: Option<PipeChannel>,
    },
    /// JSON-RPC over HTTP POST.
    Http {
        url: String,
        headers: BTreeMap<String, String>,
    },
    /// Server-sent event stream plus POST endpoint.
    EventStream {
        url: String,
        headers: BTreeMap<String, String>,
    },
}

impl TransportParams {
    #[must_use]
    pub const fn mode(&self) -> TransportMode {
        match self {
            Self::Pipe { .. } => TransportMode::Pipe,
            Self::Http { .. } => TransportMode::LocalPort,
            Self::EventStream { .. } => TransportMode::EventStream,
        }
    }
}

/// Shared handle to a child process's stdin/stdout carrying JSON-RPC lines.
///
/// A background task reads stdout and hands each response to the request
/// waiting on its `id`, so several clients and concurrent requests can share
/// one pipe. Lines that are not JSON-RPC responses are forwarded to the
/// optional sink (or dropped).
#[derive(Clone)]
pub struct PipeChannel {
    shared: Arc<PipeShared>,
}

struct PipeShared {
    server: String,
    writer: Mutex<ChildStdin>,
    pending: Mutex<HashMap<u64, oneshot::Sender<Value>>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl PipeChannel {
    /// Take ownership of the pipes and start routing responses.
    pub fn spawn(
        server: impl Into<String>,
        stdin: ChildStdin,
        stdout: ChildStdout,
        unrouted: Option<mpsc::Sender<String>>,
    ) -> Self {
        let shared = Arc::new(PipeShared {
            server: server.into(),
            writer: Mutex::new(stdin),
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        });

        let reader = Arc::clone(&shared);
        tokio::spawn(async move { reader.read_loop(stdout, unrouted).await });

        Self { shared }
    }

    #[must_use]
    pub fn server(&self) -> &str {
        &self.shared.server
    }

    /// Allocate a request id unique on this pipe.
    #[must_use]
    pub fn next_id(&self) -> u64 {
        self.shared.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Whether stdout has reached EOF.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Write a message that expects no response.
    pub async fn notify(&self, message: &Value) -> io::Result<()> {
        self.write_line(message).await
    }

    /// Write a request and return the receiver for its response.
    ///
    /// The receiver errors if the pipe closes before the response arrives.
    pub async fn request(&self, id: u64, message: &Value) -> io::Result<oneshot::Receiver<Value>> {
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().await.insert(id, tx);

        // Re-check after registering so a concurrent EOF cannot strand us
        if self.is_closed() {
            self.cancel(id).await;
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed"));
        }

        if let Err(e) = self.write_line(message).await {
            self.cancel(id).await;
            return Err(e);
        }

        Ok(rx)
    }

    /// Forget a pending request (e.g. after a timeout).
    pub async fn cancel(&self, id: u64) {
        self.shared.pending.lock().await.remove(&id);
    }

    async fn write_line(&self, message: &Value) -> io::Result<()> {
        let mut line = serde_json::to_string(message).map_err(io::Error::other)?;
        line.push('\n');

        let mut writer = self.shared.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await
    }
}

impl fmt::Debug for PipeChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipeChannel")
            .field("server", &self.shared.server)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl PipeShared {
    async fn read_loop(&self, stdout: ChildStdout, unrouted: Option<mpsc::Sender<String>>) {
        let mut lines = BufReader::new(stdout).lines();

        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if let Some(line) = self.route(line).await {
                        if let Some(ref sink) = unrouted {
                            // Sink is best-effort; a full buffer drops the line
                            let _ = sink.try_send(line);
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    debug!(server = %self.server, error = %e, "Pipe read failed");
                    break;
                }
            }
        }

        self.closed.store(true, Ordering::SeqCst);
        // Dropping the senders wakes every waiter with a closed-channel error
        self.pending.lock().await.clear();
        debug!(server = %self.server, "Pipe closed");
    }

    /// Deliver a response to its waiter. Returns the line back if it was not
    /// a response to a pending request.
    async fn route(&self, line: String) -> Option<String> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }

        let Ok(message) = serde_json::from_str::<Value>(trimmed) else {
            debug!(server = %self.server, line = trimmed, "Non-JSON line on stdout");
            return Some(line);
        };

        let is_response = message.get("result").is_some() || message.get("error").is_some();
        let id = message.get("id").and_then(Value::as_u64);

        match id {
            Some(id) if is_response => {
                if let Some(waiter) = self.pending.lock().await.remove(&id) {
                    let _ = waiter.send(message);
                    None
                } else {
                    debug!(server = %self.server, id, "Response with no pending request");
                    Some(line)
                }
            }
            _ => {
                debug!(server = %self.server, "Unsolicited message on stdout");
                Some(line)
            }
        }
    }
}
