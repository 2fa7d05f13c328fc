//! Protocol client port.
//!
//! A protocol client speaks to one upstream server over one transport. The
//! registry only sees this trait; concrete clients live in the adapter crate.

use super::transport::TransportParams;
use crate::domain::{FailureKind, ToolCallResult, ToolDescriptor};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by protocol clients.
///
/// Payloads are strings so the error can be cloned into shared outcomes.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    /// The launch command could not be resolved on PATH.
    #[error("Launcher not found: {command}")]
    LauncherNotFound { command: String },

    #[error("Failed to spawn upstream process: {0}")]
    SpawnFailed(String),

    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Timed out after {timeout_ms}ms waiting for '{method}'")]
    Timeout { method: String, timeout_ms: u64 },

    /// JSON-RPC error object returned by the upstream server.
    #[error("Upstream error {code}: {message}")]
    Server { code: i64, message: String },

    #[error("Client is not connected")]
    NotConnected,
}

impl ClientError {
    pub fn timeout(method: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            method: method.into(),
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }

    #[must_use]
    pub const fn is_launcher_not_found(&self) -> bool {
        matches!(self, Self::LauncherNotFound { .. })
    }

    /// Failure taxonomy bucket.
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::LauncherNotFound { .. } | Self::SpawnFailed(_) => FailureKind::Launch,
            Self::Transport(_)
            | Self::Protocol(_)
            | Self::Timeout { .. }
            | Self::Server { .. }
            | Self::NotConnected => FailureKind::Transport,
        }
    }
}

/// A live protocol session with one upstream server.
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    /// Fetch the tool catalogue. `timeout` bounds this single request.
    async fn list_tools(&self, timeout: Duration) -> Result<Vec<ToolDescriptor>, ClientError>;

    /// Invoke a tool. Upstream tool failures come back as `Ok` with
    /// `is_error` set; `Err` means the request itself failed.
    async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<ToolCallResult, ClientError>;

    /// Close the session and release its resources.
    async fn close(&self) -> Result<(), ClientError>;
}

/// Opens protocol sessions.
#[async_trait]
pub trait ClientConnector: Send + Sync {
    /// Connect to `server` and complete the protocol handshake.
    async fn connect(
        &self,
        server: &str,
        params: &TransportParams,
    ) -> Result<Arc<dyn ProtocolClient>, ClientError>;
}
