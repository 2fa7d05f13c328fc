//! Server configuration document.
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "weather": { "command": "npx", "args": ["-y", "@acme/weather"] },
//!     "remote":  { "command": "", "args": [], "mode": "sse",
//!                  "eventStream": { "url": "http://localhost:3001/sse" } }
//!   }
//! }
//! ```

use crate::domain::ServerDescriptor;
use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Errors raised while loading or validating configuration.
///
/// All of these are fatal: they abort initialization before any server starts.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Invalid config document: {0}")]
    Parse(String),

    #[error("Invalid server '{name}': {reason}")]
    InvalidServer { name: String, reason: String },

    #[error("Duplicate server name: {0}")]
    DuplicateServer(String),
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigDocument {
    #[serde(rename = "mcpServers", deserialize_with = "unique_servers")]
    mcp_servers: BTreeMap<String, ServerDescriptor>,
}

/// Deserialize the server map, rejecting repeated keys instead of letting the
/// last one silently win.
fn unique_servers<'de, D>(deserializer: D) -> Result<BTreeMap<String, ServerDescriptor>, D::Error>
where
    D: Deserializer<'de>,
{
    struct UniqueServers;

    impl<'de> Visitor<'de> for UniqueServers {
        type Value = BTreeMap<String, ServerDescriptor>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a map of server name to server definition")
        }

        fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut servers = BTreeMap::new();
            while let Some(name) = access.next_key::<String>()? {
                if servers.contains_key(&name) {
                    return Err(de::Error::custom(format!("duplicate server name '{name}'")));
                }
                let mut descriptor: ServerDescriptor = access.next_value()?;
                descriptor.name.clone_from(&name);
                servers.insert(name, descriptor);
            }
            Ok(servers)
        }
    }

    deserializer.deserialize_map(UniqueServers)
}

/// Validated, in-memory table of server descriptors.
///
/// Names are unique and every descriptor has passed mode-specific validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServersConfig {
    servers: BTreeMap<String, ServerDescriptor>,
}

impl ServersConfig {
    /// Build from already-constructed descriptors.
    pub fn from_descriptors(
        descriptors: impl IntoIterator<Item = ServerDescriptor>,
    ) -> Result<Self, ConfigError> {
        let mut servers = BTreeMap::new();
        for descriptor in descriptors {
            if servers.contains_key(&descriptor.name) {
                return Err(ConfigError::DuplicateServer(descriptor.name));
            }
            servers.insert(descriptor.name.clone(), descriptor);
        }

        let config = Self { servers };
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let document: ConfigDocument =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;

        let config = Self {
            servers: document.mcp_servers,
        };
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        Self::from_json_str(&contents)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for descriptor in self.servers.values() {
            descriptor
                .validate()
                .map_err(|reason| ConfigError::InvalidServer {
                    name: descriptor.name.clone(),
                    reason,
                })?;
        }
        Ok(())
    }

    /// Look up a descriptor by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ServerDescriptor> {
        self.servers.get(name)
    }

    /// All descriptors, ordered by name.
    pub fn iter(&self) -> impl Iterator<Item = &ServerDescriptor> {
        self.servers.values()
    }

    /// Descriptors that are not disabled.
    pub fn enabled(&self) -> impl Iterator<Item = &ServerDescriptor> {
        self.servers.values().filter(|d| !d.disabled)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.servers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TransportMode;
    use std::io::Write;

    #[test]
    fn test_parse_minimal_document() {
        let config = ServersConfig::from_json_str(
            r#"{ "mcpServers": { "echo": { "command": "cat", "args": [] } } }"#,
        )
        .unwrap();

        let echo = config.get("echo").unwrap();
        assert_eq!(echo.name, "echo");
        assert_eq!(echo.mode, TransportMode::Pipe);
        assert!(!echo.disabled);
    }

    #[test]
    fn test_parse_all_modes() {
        let config = ServersConfig::from_json_str(
            r#"{
                "mcpServers": {
                    "local": {
                        "command": "node", "args": ["server.js"],
                        "mode": "local-port", "port": 8931,
                        "env": { "API_KEY": "k" },
                        "autoApprove": ["ping"]
                    },
                    "remote": {
                        "command": "", "args": [], "mode": "sse",
                        "eventStream": {
                            "url": "http://localhost:3001/sse",
                            "headers": { "Authorization": "Bearer t" },
                            "reconnectIntervalMs": 500
                        }
                    },
                    "off": { "command": "nope", "args": [], "disabled": true }
                }
            }"#,
        )
        .unwrap();

        assert_eq!(config.len(), 3);
        assert_eq!(config.enabled().count(), 2);

        let local = config.get("local").unwrap();
        assert_eq!(local.port, Some(8931));
        assert!(local.is_auto_approved("ping"));

        let remote = config.get("remote").unwrap();
        let options = remote.event_stream.as_ref().unwrap();
        assert_eq!(options.reconnect_interval_ms, Some(500));
        assert_eq!(options.headers.get("Authorization").unwrap(), "Bearer t");
    }

    #[test]
    fn test_unknown_top_level_key_rejected() {
        let err = ServersConfig::from_json_str(r#"{ "mcpServers": {}, "extra": 1 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_unknown_server_key_rejected() {
        let err = ServersConfig::from_json_str(
            r#"{ "mcpServers": { "a": { "command": "cat", "args": [], "colour": "red" } } }"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_missing_args_rejected() {
        let err = ServersConfig::from_json_str(r#"{ "mcpServers": { "a": { "command": "cat" } } }"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(ref msg) if msg.contains("args")));
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let err = ServersConfig::from_json_str(
            r#"{ "mcpServers": {
                "a": { "command": "cat", "args": [] },
                "a": { "command": "tee", "args": [] }
            } }"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(ref msg) if msg.contains("duplicate")));
    }

    #[test]
    fn test_mode_specific_field_required() {
        let err = ServersConfig::from_json_str(
            r#"{ "mcpServers": { "web": { "command": "node", "args": [], "mode": "http" } } }"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidServer { ref name, .. } if name == "web"));
    }

    #[test]
    fn test_from_descriptors_rejects_duplicates() {
        let err = ServersConfig::from_descriptors([
            ServerDescriptor::pipe("a", "cat", vec![]),
            ServerDescriptor::pipe("a", "tee", vec![]),
        ])
        .unwrap_err();
        assert_eq!(err, ConfigError::DuplicateServer("a".to_string()));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "mcpServers": {{ "echo": {{ "command": "cat", "args": [] }} }} }}"#
        )
        .unwrap();

        let config = ServersConfig::load(file.path()).unwrap();
        assert!(config.get("echo").is_some());
    }

    #[test]
    fn test_load_missing_file() {
        let err = ServersConfig::load("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
