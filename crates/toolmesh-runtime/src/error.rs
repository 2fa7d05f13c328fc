//! Supervisor errors.

use thiserror::Error;
use toolmesh_core::FailureKind;

/// Maximum characters of captured output carried in an error message.
const OUTPUT_SUFFIX_LIMIT: usize = 2000;

/// Errors from starting or stopping upstream servers.
///
/// Cloneable so one in-flight start outcome can be handed to every caller
/// waiting on it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SupervisorError {
    #[error("Launcher not found: {command}")]
    LauncherNotFound { command: String },

    #[error("Failed to launch '{command}': {reason}")]
    LaunchFailed { command: String, reason: String },

    #[error("Port {0} is already in use")]
    PortInUse(u16),

    #[error("Server not healthy after {attempts} attempts: {reason}{output}")]
    HealthCheckTimeout {
        attempts: u32,
        reason: String,
        output: String,
    },

    #[error("Process exited during startup{output}")]
    ExitedDuringStartup { output: String },

    #[error("Timed out after {timeout_ms}ms connecting to {url}")]
    ConnectTimeout { url: String, timeout_ms: u64 },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Server '{0}' not found in configuration")]
    UnknownServer(String),

    #[error("Failed to stop server: {0}")]
    StopFailed(String),
}

impl SupervisorError {
    /// Failure taxonomy bucket.
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::LauncherNotFound { .. } | Self::LaunchFailed { .. } | Self::PortInUse(_) => {
                FailureKind::Launch
            }
            Self::HealthCheckTimeout { .. }
            | Self::ExitedDuringStartup { .. }
            | Self::ConnectTimeout { .. } => FailureKind::HealthCheckTimeout,
            Self::Transport(_) | Self::StopFailed(_) => FailureKind::Transport,
            Self::UnknownServer(_) => FailureKind::Config,
        }
    }
}

/// Render captured output lines as an error-message suffix.
///
/// Empty when nothing was captured; keeps the tail when the text is long.
pub(crate) fn format_output_suffix(lines: &[String]) -> String {
    if lines.is_empty() {
        return String::new();
    }

    let joined = lines.join("\n");
    let count = joined.chars().count();
    let text = if count > OUTPUT_SUFFIX_LIMIT {
        let tail: String = joined.chars().skip(count - OUTPUT_SUFFIX_LIMIT).collect();
        format!("(truncated)...{tail}")
    } else {
        joined
    };

    format!("\n--- recent output ---\n{text}")
}
