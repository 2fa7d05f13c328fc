//! A realistic configuration document, read the way the binary reads it.

use std::collections::BTreeSet;
use std::time::Duration;

use toolmesh_core::env::{StaticEnv, launch_environment};
use toolmesh_core::{ConfigError, ServersConfig, TransportMode};

const DOCUMENT: &str = r#"{
  "mcpServers": {
    "filesystem": {
      "command": "npx",
      "args": ["-y", "@modelcontextprotocol/server-filesystem", "/srv/data"],
      "env": { "NODE_ENV": "production" },
      "pathExtra": "/opt/node/bin",
      "autoApprove": ["read_file", "list_directory"]
    },
    "browser": {
      "command": "node",
      "args": ["dist/server.js"],
      "mode": "http",
      "port": 8931,
      "cwd": "/opt/browser-server"
    },
    "weather": {
      "command": "",
      "args": [],
      "mode": "sse",
      "eventStream": {
        "url": "https://weather.example.com/sse",
        "headers": { "Authorization": "Bearer token" },
        "reconnectIntervalMs": 500
      }
    },
    "scratch": {
      "command": "uvx",
      "args": ["scratch-server"],
      "disabled": true
    }
  }
}"#;

#[test]
fn document_loads_with_aliases_and_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("toolmesh.json");
    std::fs::write(&path, DOCUMENT).unwrap();

    let config = ServersConfig::load(&path).unwrap();
    assert_eq!(config.len(), 4);

    let enabled: BTreeSet<&str> = config.enabled().map(|d| d.name.as_str()).collect();
    assert_eq!(enabled, BTreeSet::from(["browser", "filesystem", "weather"]));

    let filesystem = config.get("filesystem").unwrap();
    assert_eq!(filesystem.mode, TransportMode::Pipe);
    assert!(filesystem.is_auto_approved("read_file"));
    assert!(!filesystem.is_auto_approved("write_file"));

    let browser = config.get("browser").unwrap();
    assert_eq!(browser.mode, TransportMode::LocalPort);
    assert_eq!(browser.port, Some(8931));

    let weather = config.get("weather").unwrap();
    assert_eq!(weather.mode, TransportMode::EventStream);
    let stream = weather.event_stream.as_ref().unwrap();
    assert_eq!(stream.reconnect_interval(), Duration::from_millis(500));
    assert_eq!(
        stream.headers.get("Authorization").map(String::as_str),
        Some("Bearer token")
    );
}

#[cfg(unix)]
#[test]
fn launch_environment_layers_in_order() {
    let config = ServersConfig::from_json_str(DOCUMENT).unwrap();
    let filesystem = config.get("filesystem").unwrap();

    let inherited = StaticEnv::new()
        .with_var("PATH", "/usr/bin")
        .with_var("HOME", "/home/dev")
        .with_var("NODE_ENV", "development");
    let env = launch_environment(&inherited, filesystem);

    assert_eq!(env.get("HOME").map(String::as_str), Some("/home/dev"));
    assert_eq!(env.get("NODE_ENV").map(String::as_str), Some("production"));

    let path = env.get("PATH").unwrap();
    let entries: Vec<&str> = path.split(':').collect();
    assert_eq!(entries.first(), Some(&"/usr/bin"));
    assert_eq!(entries.last(), Some(&"/opt/node/bin"));
}

#[test]
fn relative_cwd_is_a_config_error() {
    let document = DOCUMENT.replace("/opt/browser-server", "opt/browser-server");
    let err = ServersConfig::from_json_str(&document).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidServer { ref name, .. } if name == "browser"));
}
