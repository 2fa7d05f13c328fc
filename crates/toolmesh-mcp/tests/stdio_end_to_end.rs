//! Full path over a real pipe: supervisor spawn, MCP handshake on the
//! supervised pipes, catalogue, validation and tool calls.

#![cfg(unix)]

use std::time::Duration;

use serde_json::json;

use toolmesh_core::{ServerDescriptor, ServersConfig, ServiceState};
use toolmesh_mcp::{GetToolsOptions, ServiceOptions, ToolService};

/// A line-oriented MCP server in POSIX sh. Request ids are echoed back.
const ECHO_SERVER: &str = r#"
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9][0-9]*\).*/\1/p')
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"echo"}}}\n' "$id"
      ;;
    *'"method":"tools/list"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"ping","description":"Replies pong","inputSchema":{"type":"object","properties":{"topic":{"type":"string"}},"required":["topic"]}}]}}\n' "$id"
      ;;
    *'"method":"tools/call"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"pong"}]}}\n' "$id"
      ;;
  esac
done
"#;

fn options() -> ServiceOptions {
    let mut options = ServiceOptions::default();
    options.supervisor.settle_interval = Duration::from_millis(200);
    options.supervisor.shutdown_grace = Duration::from_secs(1);
    options.call_timeout = Duration::from_secs(5);
    options
}

#[tokio::test]
async fn pipe_server_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("echo-server.sh");
    std::fs::write(&script, ECHO_SERVER).unwrap();

    let descriptor = ServerDescriptor::pipe(
        "echo",
        "sh",
        vec![script.display().to_string()],
    );
    let config = ServersConfig::from_descriptors([descriptor]).unwrap();
    let service = ToolService::with_default_connector(config, options());

    let tools = service
        .get_tools(GetToolsOptions::for_server("echo"))
        .await
        .unwrap();
    assert_eq!(service.state().await, ServiceState::Ready);

    let ping = &tools["ping"];
    assert_eq!(ping.descriptor().description.as_deref(), Some("Replies pong"));

    let reply = ping.invoke(json!({"topic": "x"})).await;
    assert!(!reply.is_error());
    assert_eq!(reply.text_content(), "pong");

    let rejected = ping.invoke(json!({})).await;
    assert!(rejected.is_error());

    let direct = service.execute_function("echo", "ping", json!({})).await;
    assert_eq!(direct.text_content(), "pong");

    let statuses = service.server_statuses().await;
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].tool_count, 1);

    service.cleanup().await;
    assert!(service.supervisor().running_names().await.is_empty());
}
