//! Newline-delimited JSON-RPC over process pipes.

use std::collections::BTreeMap;
use std::io;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::debug;

use toolmesh_core::{ClientError, PipeChannel};
use toolmesh_runtime::process::{SHUTDOWN_GRACE, shutdown_child, validate_working_dir};

use super::RpcTransport;
use super::jsonrpc::{JsonRpcRequest, into_result};

/// Pipe transport, either borrowing a supervised process's pipes or owning
/// a process of its own.
pub struct StdioTransport {
    channel: PipeChannel,
    /// Only set when this transport spawned the process
    child: Mutex<Option<Child>>,
}

impl StdioTransport {
    /// Use the pipes of a process the supervisor already owns.
    pub fn attached(channel: PipeChannel) -> Self {
        Self {
            channel,
            child: Mutex::new(None),
        }
    }

    /// Spawn `command` and speak over its pipes.
    pub fn spawn(
        server: &str,
        command: &str,
        args: &[String],
        env: &BTreeMap<String, String>,
        cwd: Option<&str>,
    ) -> Result<Self, ClientError> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .env_clear()
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = cwd.filter(|d| !d.is_empty()) {
            validate_working_dir(dir).map_err(ClientError::SpawnFailed)?;
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| spawn_error(command, &e))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ClientError::SpawnFailed("Failed to get stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ClientError::SpawnFailed("Failed to get stdout".to_string()))?;

        if let Some(stderr) = child.stderr.take() {
            let server = server.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(server = %server, stream = "stderr", "{}", line);
                }
            });
        }

        debug!(server = %server, command = %command, pid = ?child.id(), "Spawned client-owned process");

        Ok(Self {
            channel: PipeChannel::spawn(server, stdin, stdout, None),
            child: Mutex::new(Some(child)),
        })
    }
}

fn spawn_error(command: &str, error: &io::Error) -> ClientError {
    if error.kind() == io::ErrorKind::NotFound {
        ClientError::LauncherNotFound {
            command: command.to_string(),
        }
    } else {
        ClientError::SpawnFailed(format!("Failed to spawn '{command}': {error}"))
    }
}

#[async_trait]
impl RpcTransport for StdioTransport {
    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, ClientError> {
        if self.channel.is_closed() {
            return Err(ClientError::NotConnected);
        }

        let id = self.channel.next_id();
        let message = JsonRpcRequest::call(id, method, params).to_value()?;

        let exchange = async {
            let response = self
                .channel
                .request(id, &message)
                .await
                .map_err(|e| ClientError::Transport(e.to_string()))?;
            response.await.map_err(|_| {
                ClientError::Transport(format!(
                    "Pipe to '{}' closed before '{method}' was answered",
                    self.channel.server()
                ))
            })
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(Ok(message)) => into_result(message),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                self.channel.cancel(id).await;
                Err(ClientError::timeout(method, timeout))
            }
        }
    }

    async fn notify(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<(), ClientError> {
        let message = JsonRpcRequest::notification(method, params).to_value()?;
        tokio::time::timeout(timeout, self.channel.notify(&message))
            .await
            .map_err(|_| ClientError::timeout(method, timeout))?
            .map_err(|e| ClientError::Transport(e.to_string()))
    }

    async fn close(&self) -> Result<(), ClientError> {
        // Attached pipes belong to the supervisor, which stops the process
        let child = self.child.lock().await.take();
        if let Some(child) = child {
            shutdown_child(child, SHUTDOWN_GRACE)
                .await
                .map_err(|e| ClientError::Transport(e.to_string()))?;
        }
        Ok(())
    }
}
