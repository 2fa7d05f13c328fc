//! Service lifecycle state.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of the tool service.
///
/// `Uninitialized → Initializing → {Ready | Error}`, and
/// `Ready → ShuttingDown → Uninitialized` on cleanup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    #[default]
    Uninitialized,
    Initializing,
    Ready,
    Error,
    ShuttingDown,
}

impl ServiceState {
    /// Whether a call to `initialize` would start servers from this state.
    #[must_use]
    pub const fn needs_initialization(self) -> bool {
        matches!(self, Self::Uninitialized | Self::Error)
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Error => "error",
            Self::ShuttingDown => "shutting_down",
        };
        f.write_str(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_needs_initialization() {
        assert!(ServiceState::Uninitialized.needs_initialization());
        assert!(ServiceState::Error.needs_initialization());
        assert!(!ServiceState::Initializing.needs_initialization());
        assert!(!ServiceState::Ready.needs_initialization());
        assert!(!ServiceState::ShuttingDown.needs_initialization());
    }
}
