//! Tool service behavior with real supervised processes and a fake protocol
//! connector.

#![cfg(unix)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use toolmesh_core::{
    ClientConnector, ClientError, FailureKind, ProtocolClient, RetryPolicy, ServerDescriptor,
    ServersConfig, ServiceState, ToolCallResult, ToolDescriptor, TransportParams,
};
use toolmesh_mcp::{
    CollisionPolicy, GetToolsOptions, RegistryOptions, ServiceError, ServiceOptions, ToolService,
};
use toolmesh_runtime::SupervisorOptions;

struct FakeClient {
    server: String,
    tools: Vec<ToolDescriptor>,
    broken_catalogue: bool,
    stalled_catalogue: bool,
}

#[async_trait]
impl ProtocolClient for FakeClient {
    async fn list_tools(&self, _timeout: Duration) -> Result<Vec<ToolDescriptor>, ClientError> {
        if self.broken_catalogue {
            return Err(ClientError::Protocol("catalogue unavailable".to_string()));
        }
        if self.stalled_catalogue {
            // Never answers and ignores its timeout
            std::future::pending::<()>().await;
        }
        Ok(self.tools.clone())
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
        _timeout: Duration,
    ) -> Result<ToolCallResult, ClientError> {
        Ok(ToolCallResult::text(format!(
            "{}/{name} {arguments}",
            self.server
        )))
    }

    async fn close(&self) -> Result<(), ClientError> {
        Ok(())
    }
}

/// Hands out fake clients whose catalogue is looked up by server name.
#[derive(Default)]
struct FakeConnector {
    catalogues: BTreeMap<String, Vec<ToolDescriptor>>,
    broken_catalogue: Vec<String>,
    stalled_catalogue: Vec<String>,
    connects: AtomicU32,
}

impl FakeConnector {
    fn with_tools(mut self, server: &str, tools: &[&str]) -> Self {
        let tools = tools
            .iter()
            .map(|name| {
                ToolDescriptor::new(*name).with_input_schema(json!({
                    "type": "object",
                    "properties": {"topic": {"type": "string"}},
                    "required": ["topic"]
                }))
            })
            .collect();
        self.catalogues.insert(server.to_string(), tools);
        self
    }

    fn with_broken_catalogue(mut self, server: &str) -> Self {
        self.broken_catalogue.push(server.to_string());
        self
    }

    fn with_stalled_catalogue(mut self, server: &str) -> Self {
        self.stalled_catalogue.push(server.to_string());
        self
    }
}

#[async_trait]
impl ClientConnector for FakeConnector {
    async fn connect(
        &self,
        server: &str,
        _params: &TransportParams,
    ) -> Result<Arc<dyn ProtocolClient>, ClientError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeClient {
            server: server.to_string(),
            tools: self.catalogues.get(server).cloned().unwrap_or_default(),
            broken_catalogue: self.broken_catalogue.iter().any(|s| s == server),
            stalled_catalogue: self.stalled_catalogue.iter().any(|s| s == server),
        }))
    }
}

fn fast_options() -> ServiceOptions {
    ServiceOptions {
        supervisor: SupervisorOptions {
            settle_interval: Duration::from_millis(100),
            health_poll_interval: Duration::from_millis(50),
            health_attempts: 3,
            health_request_timeout: Duration::from_millis(200),
            connect_timeout: Duration::from_secs(1),
            reconnect_attempts: 3,
            shutdown_grace: Duration::from_secs(1),
            output_buffer_lines: 50,
        },
        registry: RegistryOptions {
            connect_policy: RetryPolicy::new(3, Duration::from_millis(10)),
            connect_timeout: Duration::from_secs(1),
            catalogue_policy: RetryPolicy::new(3, Duration::from_millis(10)),
            catalogue_timeout: Duration::from_secs(1),
        },
        call_timeout: Duration::from_secs(1),
        collision_policy: CollisionPolicy::Shadow,
    }
}

fn cat(name: &str) -> ServerDescriptor {
    ServerDescriptor::pipe(name, "cat", vec![])
}

fn service(descriptors: Vec<ServerDescriptor>, connector: FakeConnector) -> ToolService {
    service_with(descriptors, connector, fast_options())
}

fn service_with(
    descriptors: Vec<ServerDescriptor>,
    connector: FakeConnector,
    options: ServiceOptions,
) -> ToolService {
    let config = ServersConfig::from_descriptors(descriptors).unwrap();
    ToolService::new(config, options, Arc::new(connector))
}

#[tokio::test]
async fn partial_failure_still_initializes_with_union_of_tools() {
    let connector = FakeConnector::default()
        .with_tools("alpha", &["read"])
        .with_tools("beta", &["write", "delete"]);
    let service = service(
        vec![
            cat("alpha"),
            cat("beta"),
            ServerDescriptor::pipe("broken", "no-such-launcher-for-toolmesh", vec![]),
        ],
        connector,
    );

    service.initialize().await.unwrap();
    assert_eq!(service.state().await, ServiceState::Ready);

    let tools = service.get_tools(GetToolsOptions::default()).await.unwrap();
    let names: Vec<&str> = tools.keys().map(String::as_str).collect();
    assert_eq!(names, vec!["delete", "read", "write"]);
    assert_eq!(tools["read"].server(), "alpha");

    let failures = service.last_failures().await;
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].server, "broken");
    assert_eq!(failures[0].kind, FailureKind::Launch);

    service.cleanup().await;
}

#[tokio::test]
async fn missing_server_is_not_found_rather_than_not_running() {
    let connector = FakeConnector::default().with_tools("alpha", &["read"]);
    let service = service(
        vec![cat("alpha"), cat("off").with_disabled(true)],
        connector,
    );

    let ghost = service
        .get_tools(GetToolsOptions::for_server("ghost"))
        .await
        .unwrap_err();
    assert_eq!(ghost, ServiceError::ServerNotFound("ghost".to_string()));
    assert_eq!(ghost.to_string(), "Server 'ghost' not found in configuration");

    let off = service
        .get_tools(GetToolsOptions::for_server("off"))
        .await
        .unwrap_err();
    assert_eq!(off, ServiceError::ServerDisabled("off".to_string()));

    let alpha = service
        .get_tools(GetToolsOptions::for_server("alpha"))
        .await
        .unwrap();
    assert!(alpha.contains_key("read"));

    service.supervisor().stop("alpha").await;
    let stopped = service
        .get_tools(GetToolsOptions::for_server("alpha"))
        .await
        .unwrap_err();
    assert_eq!(stopped, ServiceError::ServerNotRunning("alpha".to_string()));

    service.cleanup().await;
}

#[tokio::test]
async fn concurrent_initialize_starts_servers_once() {
    let dir = tempfile::tempdir().unwrap();
    let counter = dir.path().join("count");
    let script = format!("echo started >> {}; exec cat", counter.display());
    let descriptor = ServerDescriptor::pipe("once", "sh", vec!["-c".to_string(), script]);

    let service = service(
        vec![descriptor],
        FakeConnector::default().with_tools("once", &["ping"]),
    );

    let (a, b, c) = tokio::join!(
        service.initialize(),
        service.initialize(),
        service.get_tools(GetToolsOptions::default()),
    );
    assert!(a.is_ok() && b.is_ok());
    assert!(c.unwrap().contains_key("ping"));

    let spawns = std::fs::read_to_string(&counter).unwrap();
    assert_eq!(spawns.lines().count(), 1);

    service.cleanup().await;
}

#[tokio::test]
async fn cleanup_twice_resets_to_uninitialized() {
    let service = service(
        vec![cat("alpha")],
        FakeConnector::default().with_tools("alpha", &["read"]),
    );
    service.initialize().await.unwrap();

    service.cleanup().await;
    assert_eq!(service.state().await, ServiceState::Uninitialized);
    assert!(service.supervisor().running_names().await.is_empty());

    service.cleanup().await;
    assert_eq!(service.state().await, ServiceState::Uninitialized);

    // The same instance can be initialized again
    service.initialize().await.unwrap();
    assert_eq!(service.state().await, ServiceState::Ready);
    service.cleanup().await;
}

/// Answer every request with 200 once `delay` has passed.
async fn serve_health_after(port: u16, delay: Duration) {
    tokio::time::sleep(delay).await;
    let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
    while let Ok((mut socket, _)) = listener.accept().await {
        tokio::spawn(async move {
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let _ = socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok")
                .await;
        });
    }
}

#[tokio::test]
async fn cleanup_during_slow_start_releases_late_server() {
    let port = toolmesh_runtime::process::find_free_port().unwrap();
    let health = tokio::spawn(serve_health_after(port, Duration::from_millis(500)));

    let mut options = fast_options();
    options.supervisor.health_attempts = 60;
    let service = service_with(
        vec![ServerDescriptor::local_port(
            "web",
            "sleep",
            vec!["30".to_string()],
            port,
        )],
        FakeConnector::default().with_tools("web", &["fetch"]),
        options,
    );

    let init = tokio::spawn({
        let service = service.clone();
        async move { service.initialize().await }
    });

    // The health poll is still failing: nothing is registered yet
    tokio::time::sleep(Duration::from_millis(200)).await;
    service.cleanup().await;
    assert_eq!(service.state().await, ServiceState::Uninitialized);

    let outcome = tokio::time::timeout(Duration::from_secs(10), init)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome, Err(ServiceError::ShuttingDown));

    assert!(service.supervisor().running_names().await.is_empty());
    assert!(service.execute_function("web", "fetch", json!({})).await.is_error());
    assert_eq!(service.state().await, ServiceState::Uninitialized);

    health.abort();
}

#[tokio::test]
async fn stalled_catalogue_does_not_hang_initialization() {
    let service = service(
        vec![cat("alpha"), cat("stuck")],
        FakeConnector::default()
            .with_tools("alpha", &["read"])
            .with_stalled_catalogue("stuck"),
    );

    let outcome = tokio::time::timeout(Duration::from_secs(15), service.initialize()).await;
    assert!(outcome.expect("initialization hung").is_ok());

    let failures = service.last_failures().await;
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].server, "stuck");
    assert_eq!(failures[0].kind, FailureKind::Catalogue);
    assert!(!service.supervisor().is_running("stuck").await);

    service.cleanup().await;
}

#[tokio::test]
async fn all_servers_failing_reports_every_reason() {
    let service = service(
        vec![
            ServerDescriptor::pipe("one", "no-such-launcher-a", vec![]),
            ServerDescriptor::pipe("two", "no-such-launcher-b", vec![]),
        ],
        FakeConnector::default(),
    );

    let err = service.initialize().await.unwrap_err();
    let ServiceError::InitializationFailed { summary, failures } = &err else {
        panic!("expected initialization failure");
    };
    assert_eq!(failures.len(), 2);
    assert!(summary.contains("one (launch)"));
    assert!(summary.contains("two (launch)"));
    assert_eq!(service.state().await, ServiceState::Error);
}

#[tokio::test]
async fn catalogue_failure_stops_that_server_only() {
    let connector = FakeConnector::default()
        .with_tools("alpha", &["read"])
        .with_broken_catalogue("flaky");
    let service = service(vec![cat("alpha"), cat("flaky")], connector);

    service.initialize().await.unwrap();

    let failures = service.last_failures().await;
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].server, "flaky");
    assert_eq!(failures[0].kind, FailureKind::Catalogue);

    let running = service.supervisor().running_names().await;
    assert!(running.contains("alpha"));
    assert!(!running.contains("flaky"));

    service.cleanup().await;
}

#[tokio::test]
async fn collisions_shadow_or_fail_by_policy() {
    let connector = || {
        FakeConnector::default()
            .with_tools("alpha", &["search"])
            .with_tools("beta", &["search"])
    };

    let shadowing = service(vec![cat("alpha"), cat("beta")], connector());
    let tools = shadowing
        .get_tools(GetToolsOptions::default())
        .await
        .unwrap();
    assert_eq!(tools["search"].server(), "beta");
    shadowing.cleanup().await;

    let mut options = fast_options();
    options.collision_policy = CollisionPolicy::Error;
    let strict = service_with(vec![cat("alpha"), cat("beta")], connector(), options);
    let err = strict
        .get_tools(GetToolsOptions::default())
        .await
        .unwrap_err();
    assert_eq!(
        err,
        ServiceError::DuplicateTool {
            tool: "search".to_string(),
            first: "alpha".to_string(),
            second: "beta".to_string(),
        }
    );
    strict.cleanup().await;
}

#[tokio::test]
async fn proxies_validate_before_calling_upstream() {
    let service = service(
        vec![cat("alpha").with_auto_approve(vec!["read".to_string()])],
        FakeConnector::default().with_tools("alpha", &["read", "write"]),
    );
    let tools = service.get_tools(GetToolsOptions::default()).await.unwrap();

    assert!(tools["read"].is_auto_approved());
    assert!(!tools["write"].is_auto_approved());

    let ok = tools["read"].invoke(json!({"topic": "x"})).await;
    assert!(!ok.is_error());
    assert_eq!(ok.text_content(), r#"alpha/read {"topic":"x"}"#);

    let rejected = tools["read"].invoke(json!({})).await;
    assert!(rejected.is_error());
    assert!(rejected.text_content().contains("$.topic"));

    let direct = service
        .execute_function("alpha", "write", json!({"anything": 1}))
        .await;
    assert!(!direct.is_error());

    let missing = service.execute_function("ghost", "write", json!({})).await;
    assert!(missing.is_error());

    service.cleanup().await;
}

#[tokio::test]
async fn dropped_event_stream_tools_disappear() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/sse", listener.local_addr().unwrap());
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 1024];
        let _ = socket.read(&mut buf).await;
        socket
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\n\r\n")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        // Socket and listener drop: the stream ends and reconnects are refused
    });

    let remote = ServerDescriptor::event_stream("remote", url)
        .with_reconnect_interval(Duration::from_millis(50));
    let service = service(
        vec![cat("local"), remote],
        FakeConnector::default()
            .with_tools("local", &["read"])
            .with_tools("remote", &["forecast"]),
    );

    let tools = service.get_tools(GetToolsOptions::default()).await.unwrap();
    assert!(tools.contains_key("forecast"));

    let mut gone = false;
    for _ in 0..100 {
        let tools = service.get_tools(GetToolsOptions::default()).await.unwrap();
        if !tools.contains_key("forecast") {
            assert!(tools.contains_key("read"));
            gone = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(gone);

    let err = service
        .get_tools(GetToolsOptions::for_server("remote"))
        .await
        .unwrap_err();
    assert_eq!(err, ServiceError::ServerNotRunning("remote".to_string()));

    service.cleanup().await;
}
