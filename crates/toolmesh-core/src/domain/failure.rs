//! Failure classification shared across layers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which stage of a server's life a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Malformed or missing descriptor fields
    Config,
    /// Process failed to spawn, or its port was unavailable
    Launch,
    /// Spawned but never became ready
    HealthCheckTimeout,
    /// Post-connect failure (stream drop, broken pipe, protocol error)
    Transport,
    /// Tool catalogue could not be fetched
    Catalogue,
    /// A single tool call failed
    Invocation,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Config => "config",
            Self::Launch => "launch",
            Self::HealthCheckTimeout => "health check timeout",
            Self::Transport => "transport",
            Self::Catalogue => "catalogue",
            Self::Invocation => "invocation",
        };
        f.write_str(label)
    }
}

/// A failure recorded against one server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerFailure {
    pub server: String,
    pub kind: FailureKind,
    pub reason: String,
}

impl ServerFailure {
    pub fn new(server: impl Into<String>, kind: FailureKind, reason: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            kind,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ServerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.server, self.kind, self.reason)
    }
}

/// Join failures into one human-readable line.
#[must_use]
pub fn summarize(failures: &[ServerFailure]) -> String {
    if failures.is_empty() {
        return "no servers configured".to_string();
    }
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
