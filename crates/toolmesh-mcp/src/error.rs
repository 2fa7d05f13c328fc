//! Error types for the registry and the aggregation service.

use thiserror::Error;
use toolmesh_core::{ClientError, ConfigError, FailureKind, ServerFailure};

/// Errors from the protocol client registry.
///
/// Cloneable so a memoized connect can hand the same outcome to every
/// concurrent caller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Failed to connect to '{server}': {source}")]
    Connect { server: String, source: ClientError },

    #[error("Failed to fetch tool catalogue from '{server}': {source}")]
    Catalogue { server: String, source: ClientError },

    #[error("Server '{server}' cannot be reached: {reason}")]
    Misconfigured { server: String, reason: String },
}

impl RegistryError {
    /// Failure taxonomy bucket.
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::Connect { source, .. } => source.kind(),
            Self::Catalogue { .. } => FailureKind::Catalogue,
            Self::Misconfigured { .. } => FailureKind::Config,
        }
    }

    #[must_use]
    pub fn server(&self) -> &str {
        match self {
            Self::Connect { server, .. }
            | Self::Catalogue { server, .. }
            | Self::Misconfigured { server, .. } => server,
        }
    }
}

/// Errors surfaced by [`ToolService`](crate::ToolService).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// No server reached the ready state.
    #[error("Tool service initialization failed: {summary}")]
    InitializationFailed {
        summary: String,
        failures: Vec<ServerFailure>,
    },

    #[error("Server '{0}' not found in configuration")]
    ServerNotFound(String),

    #[error("Server '{0}' is disabled")]
    ServerDisabled(String),

    #[error("Server '{0}' is not running")]
    ServerNotRunning(String),

    #[error("Tool '{tool}' is provided by both '{first}' and '{second}'")]
    DuplicateTool {
        tool: String,
        first: String,
        second: String,
    },

    #[error("Tool service is shutting down")]
    ShuttingDown,
}

impl ServiceError {
    /// Per-server failures behind an initialization failure.
    #[must_use]
    pub fn failures(&self) -> &[ServerFailure] {
        match self {
            Self::InitializationFailed { failures, .. } => failures,
            _ => &[],
        }
    }
}
