//! Upstream server domain types.
//!
//! A `ServerDescriptor` is immutable for the lifetime of a loaded
//! configuration snapshot. Runtime state (process handles, sessions) lives in
//! the supervisor, never here.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Default interval between event-stream reconnect attempts.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(2);

/// How an upstream server is reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportMode {
    /// Child process speaking newline-delimited JSON-RPC on stdin/stdout
    #[default]
    #[serde(alias = "stdio")]
    Pipe,
    /// Child process listening on a local HTTP port
    #[serde(alias = "http")]
    LocalPort,
    /// Externally running server pushing over a server-sent event stream
    #[serde(alias = "sse")]
    EventStream,
}

impl TransportMode {
    /// Whether the supervisor owns an OS process for this mode.
    #[must_use]
    pub const fn is_process_backed(self) -> bool {
        matches!(self, Self::Pipe | Self::LocalPort)
    }
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pipe => write!(f, "pipe"),
            Self::LocalPort => write!(f, "local-port"),
            Self::EventStream => write!(f, "event-stream"),
        }
    }
}

/// Connection options for event-stream servers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EventStreamOptions {
    /// Endpoint URL (e.g., `http://localhost:3001/sse`)
    pub url: String,

    /// Extra request headers sent when opening the stream
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,

    /// Delay between reconnect attempts after the stream drops
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconnect_interval_ms: Option<u64>,
}

impl EventStreamOptions {
    /// Create options for the given endpoint.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: BTreeMap::new(),
            reconnect_interval_ms: None,
        }
    }

    /// Effective reconnect interval.
    #[must_use]
    pub fn reconnect_interval(&self) -> Duration {
        self.reconnect_interval_ms
            .map_or(DEFAULT_RECONNECT_INTERVAL, Duration::from_millis)
    }
}

/// Definition of one upstream server, keyed by `name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ServerDescriptor {
    /// Unique name. Taken from the configuration map key.
    #[serde(skip)]
    pub name: String,

    /// Launch command (e.g., "npx" or "/usr/local/bin/weather-server").
    pub command: String,

    /// Arguments passed to the launch command.
    pub args: Vec<String>,

    /// Environment overrides, layered last over the inherited environment.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    /// Transport mode.
    #[serde(default)]
    pub mode: TransportMode,

    /// Port for `local-port` servers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Options for `event-stream` servers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_stream: Option<EventStreamOptions>,

    /// Disabled servers are never started.
    #[serde(default)]
    pub disabled: bool,

    /// Tool names that may run without caller confirmation.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub auto_approve: Vec<String>,

    /// Working directory for the process (must be absolute if specified)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,

    /// Additional PATH entries for the child process.
    /// Useful for nvm/asdf shims or custom tool locations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_extra: Option<String>,
}

impl ServerDescriptor {
    fn base(name: impl Into<String>, mode: TransportMode) -> Self {
        Self {
            name: name.into(),
            command: String::new(),
            args: Vec::new(),
            env: BTreeMap::new(),
            mode,
            port: None,
            event_stream: None,
            disabled: false,
            auto_approve: Vec::new(),
            cwd: None,
            path_extra: None,
        }
    }

    /// Create a pipe-mode server.
    #[must_use]
    pub fn pipe(name: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            ..Self::base(name, TransportMode::Pipe)
        }
    }

    /// Create a local-port server.
    #[must_use]
    pub fn local_port(
        name: impl Into<String>,
        command: impl Into<String>,
        args: Vec<String>,
        port: u16,
    ) -> Self {
        Self {
            command: command.into(),
            args,
            port: Some(port),
            ..Self::base(name, TransportMode::LocalPort)
        }
    }

    /// Create an event-stream server.
    #[must_use]
    pub fn event_stream(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            event_stream: Some(EventStreamOptions::new(url)),
            ..Self::base(name, TransportMode::EventStream)
        }
    }

    /// Add an environment override.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the disabled flag.
    #[must_use]
    pub const fn with_disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    /// Set the auto-approve list.
    #[must_use]
    pub fn with_auto_approve(mut self, tools: Vec<String>) -> Self {
        self.auto_approve = tools;
        self
    }

    /// Set the working directory.
    #[must_use]
    pub fn with_cwd(mut self, dir: impl Into<String>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Set extra PATH entries.
    #[must_use]
    pub fn with_path_extra(mut self, path_extra: impl Into<String>) -> Self {
        self.path_extra = Some(path_extra.into());
        self
    }

    /// Set the event-stream reconnect interval.
    #[must_use]
    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        if let Some(options) = self.event_stream.as_mut() {
            options.reconnect_interval_ms = u64::try_from(interval.as_millis()).ok();
        }
        self
    }

    /// Whether calls to `tool` skip caller confirmation.
    #[must_use]
    pub fn is_auto_approved(&self, tool: &str) -> bool {
        self.auto_approve.iter().any(|t| t == tool)
    }

    /// Validate mode-specific fields.
    ///
    /// Returns an error if a field required by the transport mode is missing
    /// or malformed.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("Server name cannot be empty".to_string());
        }

        if self.mode.is_process_backed() {
            if self.command.is_empty() {
                return Err(format!("{} server requires a command", self.mode));
            }

            // Flags and arguments belong in `args`
            if self.command.contains(char::is_whitespace) {
                return Err(
                    "Command must be an executable name/path only (e.g., 'npx'). \
                     Put flags and arguments in the 'args' field."
                        .to_string(),
                );
            }

            if let Some(ref cwd) = self.cwd {
                if !cwd.is_empty() && !std::path::Path::new(cwd).is_absolute() {
                    return Err(format!("Working directory must be absolute: {cwd}"));
                }
            }
        }

        match self.mode {
            TransportMode::Pipe => Ok(()),
            TransportMode::LocalPort => match self.port {
                Some(0) => Err("local-port server port cannot be 0".to_string()),
                Some(_) => Ok(()),
                None => Err("local-port server requires a port".to_string()),
            },
            TransportMode::EventStream => {
                let options = self
                    .event_stream
                    .as_ref()
                    .ok_or_else(|| "event-stream server requires eventStream options".to_string())?;

                if options.url.is_empty() {
                    return Err("event-stream server url cannot be empty".to_string());
                }

                Ok(())
            }
        }
    }
}

/// Health of a running server, as tracked by the supervisor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Launched, readiness not yet confirmed
    Starting,
    /// Ready to accept protocol sessions
    Ready,
    /// Connection lost; reconnecting
    Degraded,
    /// Not running
    #[default]
    Stopped,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Starting => write!(f, "starting"),
            Self::Ready => write!(f, "ready"),
            Self::Degraded => write!(f, "degraded"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}
