//! Server supervisor: turns descriptors into running, health-verified servers.
//!
//! The supervisor is the sole owner of every transport handle. Presence in
//! its running table is the single source of truth for "is this server
//! running". Failures are isolated per server: one server failing to start
//! or stop never affects its siblings.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::{RwLock, mpsc, watch};
use tracing::{debug, error, info, warn};

use toolmesh_core::env::{SystemEnv, launch_environment};
use toolmesh_core::{
    HealthStatus, PipeChannel, RetryPolicy, ServerDescriptor, ServerFailure, ServersConfig,
    TransportMode,
};

use crate::error::{SupervisorError, format_output_suffix};
use crate::health::health_client;
use crate::inflight::Inflight;
use crate::process::{SHUTDOWN_GRACE, SessionEvent};
use crate::session::{
    SessionContext, StreamSettings, TransportHandle, event_stream, local_port, pipe,
};

/// Timing and capacity knobs for the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorOptions {
    /// Wait after spawning a pipe server before calling it ready
    pub settle_interval: Duration,
    /// Delay between health polls of local-port servers
    pub health_poll_interval: Duration,
    /// Health polls before a local-port server is given up on
    pub health_attempts: u32,
    /// Timeout of one health request
    pub health_request_timeout: Duration,
    /// Bound on opening an event stream
    pub connect_timeout: Duration,
    /// Reconnect attempts after an event stream drops
    pub reconnect_attempts: u32,
    /// Grace between SIGTERM and SIGKILL
    pub shutdown_grace: Duration,
    /// Output lines kept per server for diagnostics
    pub output_buffer_lines: usize,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            settle_interval: Duration::from_secs(2),
            health_poll_interval: Duration::from_secs(1),
            health_attempts: 20,
            health_request_timeout: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(10),
            reconnect_attempts: 3,
            shutdown_grace: SHUTDOWN_GRACE,
            output_buffer_lines: 200,
        }
    }
}

/// Result of one start attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// Running and ready
    Ready,
    /// Disabled in configuration; never spawned
    Disabled,
    Failed(SupervisorError),
}

impl StartOutcome {
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

/// Per-server outcomes of [`ServerSupervisor::start_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartReport {
    outcomes: BTreeMap<String, StartOutcome>,
}

impl StartReport {
    #[must_use]
    pub fn outcome(&self, name: &str) -> Option<&StartOutcome> {
        self.outcomes.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &StartOutcome)> {
        self.outcomes.iter()
    }

    /// Names of servers that reached `Ready`.
    #[must_use]
    pub fn ready_names(&self) -> Vec<String> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| outcome.is_ready())
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Failures, one per failed server.
    #[must_use]
    pub fn failures(&self) -> Vec<ServerFailure> {
        self.outcomes
            .iter()
            .filter_map(|(name, outcome)| match outcome {
                StartOutcome::Failed(e) => Some(ServerFailure::new(name, e.kind(), e.to_string())),
                _ => None,
            })
            .collect()
    }

    /// True when no server reached `Ready`.
    #[must_use]
    pub fn is_total_failure(&self) -> bool {
        !self.outcomes.values().any(StartOutcome::is_ready)
    }
}

/// Snapshot of one running server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerInfo {
    pub name: String,
    pub mode: TransportMode,
    pub status: HealthStatus,
    pub started_at: DateTime<Utc>,
    pub pid: Option<u32>,
}

struct RunningServer {
    session_id: u64,
    descriptor: ServerDescriptor,
    handle: TransportHandle,
    started_at: DateTime<Utc>,
    status: watch::Receiver<HealthStatus>,
    events: Option<mpsc::Receiver<SessionEvent>>,
    pipe: Option<PipeChannel>,
    ctx: SessionContext,
}

/// Supervisor for the configured upstream servers.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ServerSupervisor {
    inner: Arc<SupervisorInner>,
}

struct SupervisorInner {
    config: ServersConfig,
    options: SupervisorOptions,
    running: RwLock<HashMap<String, RunningServer>>,
    starts: Inflight<String, StartOutcome>,
    health_client: reqwest::Client,
    // No total timeout: event streams stay open indefinitely
    stream_client: reqwest::Client,
    next_session: AtomicU64,
}

impl ServerSupervisor {
    pub fn new(config: ServersConfig, options: SupervisorOptions) -> Self {
        Self {
            inner: Arc::new(SupervisorInner {
                config,
                health_client: health_client(options.health_request_timeout),
                stream_client: reqwest::Client::new(),
                options,
                running: RwLock::new(HashMap::new()),
                starts: Inflight::new(),
                next_session: AtomicU64::new(1),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ServersConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn options(&self) -> &SupervisorOptions {
        &self.inner.options
    }

    /// Start every configured server concurrently.
    ///
    /// Disabled servers are recorded as [`StartOutcome::Disabled`] and never
    /// spawned. One server's failure never aborts the others.
    pub async fn start_all(&self) -> StartReport {
        let names: Vec<String> = self
            .inner
            .config
            .iter()
            .map(|descriptor| descriptor.name.clone())
            .collect();

        let outcomes = join_all(names.iter().map(|name| self.start(name))).await;
        let report = StartReport {
            outcomes: names.into_iter().zip(outcomes).collect(),
        };

        info!(
            ready = report.ready_names().len(),
            failed = report.failures().len(),
            total = report.outcomes.len(),
            "Start-all complete"
        );
        report
    }

    /// Start one server.
    ///
    /// A concurrent call for the same name joins the attempt already in
    /// flight. Starting a running server is a no-op that reports `Ready`.
    pub async fn start(&self, name: &str) -> StartOutcome {
        let Some(descriptor) = self.inner.config.get(name).cloned() else {
            return StartOutcome::Failed(SupervisorError::UnknownServer(name.to_string()));
        };

        if descriptor.disabled {
            debug!(server = %name, "Server disabled, not starting");
            return StartOutcome::Disabled;
        }

        let inner = Arc::clone(&self.inner);
        self.inner
            .starts
            .run(name.to_string(), move || async move {
                inner.start_server(descriptor).await
            })
            .await
    }

    /// Stop one server. Returns whether it was running.
    ///
    /// Stop failures are logged, never returned.
    pub async fn stop(&self, name: &str) -> bool {
        let removed = self.inner.running.write().await.remove(name);
        let Some(server) = removed else {
            debug!(server = %name, "Stop requested for server that is not running");
            return false;
        };

        stop_running(name, server).await;
        true
    }

    /// Stop every running server concurrently. Returns how many were stopped.
    pub async fn stop_all(&self) -> usize {
        let servers: Vec<(String, RunningServer)> =
            self.inner.running.write().await.drain().collect();
        let count = servers.len();

        join_all(
            servers
                .into_iter()
                .map(|(name, server)| async move { stop_running(&name, server).await }),
        )
        .await;

        if count > 0 {
            info!(count, "Stopped all servers");
        }
        count
    }

    pub async fn is_running(&self, name: &str) -> bool {
        self.inner.running.read().await.contains_key(name)
    }

    pub async fn running_names(&self) -> BTreeSet<String> {
        self.inner.running.read().await.keys().cloned().collect()
    }

    /// Health of `name`; `Stopped` when it is not running.
    pub async fn status(&self, name: &str) -> HealthStatus {
        self.inner
            .running
            .read()
            .await
            .get(name)
            .map_or(HealthStatus::Stopped, |server| *server.status.borrow())
    }

    /// Snapshot of every running server, ordered by name.
    pub async fn servers(&self) -> Vec<ServerInfo> {
        let running = self.inner.running.read().await;
        let mut servers: Vec<ServerInfo> = running
            .iter()
            .map(|(name, server)| ServerInfo {
                name: name.clone(),
                mode: server.descriptor.mode,
                status: *server.status.borrow(),
                started_at: server.started_at,
                pid: server.handle.pid(),
            })
            .collect();
        servers.sort_by(|a, b| a.name.cmp(&b.name));
        servers
    }

    /// Pipe channel of a running pipe server.
    pub async fn pipe(&self, name: &str) -> Option<PipeChannel> {
        self.inner
            .running
            .read()
            .await
            .get(name)
            .and_then(|server| server.pipe.clone())
    }

    /// Take the event receiver of a running server. Only the first call
    /// gets it.
    pub async fn take_events(&self, name: &str) -> Option<mpsc::Receiver<SessionEvent>> {
        self.inner
            .running
            .write()
            .await
            .get_mut(name)
            .and_then(|server| server.events.take())
    }

    /// Recent output lines of a running server.
    pub async fn recent_output(&self, name: &str) -> Vec<String> {
        self.inner
            .running
            .read()
            .await
            .get(name)
            .map(|server| server.ctx.capture.recent())
            .unwrap_or_default()
    }
}

async fn stop_running(name: &str, server: RunningServer) {
    info!(server = %name, mode = %server.descriptor.mode, "Stopping server");
    match server.handle.stop().await {
        Ok(()) => info!(server = %name, "Server stopped"),
        Err(e) => error!(server = %name, error = %e, "Failed to stop server cleanly"),
    }
}

impl SupervisorInner {
    async fn start_server(self: Arc<Self>, descriptor: ServerDescriptor) -> StartOutcome {
        if self.running.read().await.contains_key(&descriptor.name) {
            debug!(server = %descriptor.name, "Server already running");
            return StartOutcome::Ready;
        }

        info!(server = %descriptor.name, mode = %descriptor.mode, "Starting server");
        let result = match descriptor.mode {
            TransportMode::Pipe => self.start_pipe(&descriptor).await,
            TransportMode::LocalPort => self.start_local_port(&descriptor).await,
            TransportMode::EventStream => self.start_event_stream(&descriptor).await,
        };

        match result {
            Ok(()) => {
                info!(server = %descriptor.name, "Server ready");
                StartOutcome::Ready
            }
            Err(e) => {
                error!(
                    server = %descriptor.name,
                    kind = %e.kind(),
                    error = %e,
                    "Server failed to start"
                );
                StartOutcome::Failed(e)
            }
        }
    }

    async fn start_pipe(self: &Arc<Self>, descriptor: &ServerDescriptor) -> Result<(), SupervisorError> {
        let (ctx, status, events) =
            SessionContext::new(&descriptor.name, self.options.output_buffer_lines);
        let env = launch_environment(&SystemEnv, descriptor);
        let (session, channel) = pipe::launch(&ctx, descriptor, &env, self.options.shutdown_grace)?;

        // Registered immediately; readiness follows the settle interval
        let session_id = self
            .register(descriptor, TransportHandle::Process(session), &ctx, status, events, Some(channel))
            .await;

        tokio::time::sleep(self.options.settle_interval).await;

        if ctx.promote_to_ready() {
            return Ok(());
        }

        if let Some(server) = self.remove_if_current(&descriptor.name, session_id).await {
            if let Err(e) = server.handle.stop().await {
                debug!(server = %descriptor.name, error = %e, "Stop after early exit failed");
            }
        }
        Err(SupervisorError::ExitedDuringStartup {
            output: format_output_suffix(&ctx.capture.recent()),
        })
    }

    async fn start_local_port(
        self: &Arc<Self>,
        descriptor: &ServerDescriptor,
    ) -> Result<(), SupervisorError> {
        let port = descriptor.port.ok_or_else(|| SupervisorError::LaunchFailed {
            command: descriptor.command.clone(),
            reason: "local-port server has no port".to_string(),
        })?;

        let (ctx, status, events) =
            SessionContext::new(&descriptor.name, self.options.output_buffer_lines);
        let env = launch_environment(&SystemEnv, descriptor);
        let session = local_port::launch(&ctx, descriptor, &env, port, self.options.shutdown_grace)?;

        let policy = RetryPolicy::new(self.options.health_attempts, self.options.health_poll_interval);
        let session = local_port::wait_ready(&ctx, session, &self.health_client, port, policy).await?;

        if !ctx.promote_to_ready() {
            if let Err(e) = session.stop().await {
                debug!(server = %descriptor.name, error = %e, "Stop after early exit failed");
            }
            return Err(SupervisorError::ExitedDuringStartup {
                output: format_output_suffix(&ctx.capture.recent()),
            });
        }

        self.register(descriptor, TransportHandle::Process(session), &ctx, status, events, None)
            .await;
        Ok(())
    }

    async fn start_event_stream(
        self: &Arc<Self>,
        descriptor: &ServerDescriptor,
    ) -> Result<(), SupervisorError> {
        let options = descriptor
            .event_stream
            .as_ref()
            .ok_or_else(|| SupervisorError::Transport("missing eventStream options".to_string()))?;

        let (ctx, status, events) =
            SessionContext::new(&descriptor.name, self.options.output_buffer_lines);
        let settings = StreamSettings {
            connect_timeout: self.options.connect_timeout,
            reconnect_attempts: self.options.reconnect_attempts,
            reconnect_interval: options.reconnect_interval(),
        };

        let session =
            event_stream::open(&ctx, self.stream_client.clone(), options, settings).await?;

        self.register(descriptor, TransportHandle::Stream(session), &ctx, status, events, None)
            .await;
        Ok(())
    }

    async fn register(
        self: &Arc<Self>,
        descriptor: &ServerDescriptor,
        handle: TransportHandle,
        ctx: &SessionContext,
        status: watch::Receiver<HealthStatus>,
        events: mpsc::Receiver<SessionEvent>,
        pipe: Option<PipeChannel>,
    ) -> u64 {
        let session_id = self.next_session.fetch_add(1, Ordering::SeqCst);
        let name = descriptor.name.clone();

        let server = RunningServer {
            session_id,
            descriptor: descriptor.clone(),
            handle,
            started_at: Utc::now(),
            status: status.clone(),
            events: Some(events),
            pipe,
            ctx: ctx.clone(),
        };

        let previous = self.running.write().await.insert(name.clone(), server);
        if let Some(previous) = previous {
            warn!(server = %name, "Replaced a running server handle");
            stop_running(&name, previous).await;
        }

        watch_for_exit(Arc::downgrade(self), name, session_id, status);
        session_id
    }

    /// Remove `name` only if it still belongs to `session_id`.
    async fn remove_if_current(&self, name: &str, session_id: u64) -> Option<RunningServer> {
        let mut running = self.running.write().await;
        if running
            .get(name)
            .is_some_and(|server| server.session_id == session_id)
        {
            running.remove(name)
        } else {
            None
        }
    }
}

/// Drop a server from the running table once its session ends on its own
/// (process exit, event stream given up).
fn watch_for_exit(
    inner: Weak<SupervisorInner>,
    name: String,
    session_id: u64,
    mut status: watch::Receiver<HealthStatus>,
) {
    tokio::spawn(async move {
        // A closed channel means the session is gone as well
        let _ = status.wait_for(|s| *s == HealthStatus::Stopped).await;

        let Some(inner) = inner.upgrade() else {
            return;
        };

        if let Some(server) = inner.remove_if_current(&name, session_id).await {
            warn!(server = %name, "Server stopped unexpectedly, removed from running set");
            if let Err(e) = server.handle.stop().await {
                debug!(server = %name, error = %e, "Cleanup of stopped server failed");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_options() -> SupervisorOptions {
        SupervisorOptions {
            settle_interval: Duration::from_millis(50),
            health_poll_interval: Duration::from_millis(50),
            health_attempts: 3,
            health_request_timeout: Duration::from_millis(200),
            connect_timeout: Duration::from_secs(1),
            reconnect_attempts: 3,
            shutdown_grace: Duration::from_secs(1),
            output_buffer_lines: 20,
        }
    }

    #[test]
    fn test_report_total_failure() {
        let mut report = StartReport::default();
        assert!(report.is_total_failure());

        report.outcomes.insert("off".to_string(), StartOutcome::Disabled);
        report.outcomes.insert(
            "bad".to_string(),
            StartOutcome::Failed(SupervisorError::PortInUse(80)),
        );
        assert!(report.is_total_failure());
        assert_eq!(report.failures().len(), 1);

        report.outcomes.insert("good".to_string(), StartOutcome::Ready);
        assert!(!report.is_total_failure());
        assert_eq!(report.ready_names(), vec!["good".to_string()]);
    }

    #[tokio::test]
    async fn test_unknown_server() {
        let supervisor = ServerSupervisor::new(ServersConfig::default(), fast_options());
        let outcome = supervisor.start("ghost").await;
        assert_eq!(
            outcome,
            StartOutcome::Failed(SupervisorError::UnknownServer("ghost".to_string()))
        );
    }

    #[tokio::test]
    async fn test_stop_unknown_is_noop() {
        let supervisor = ServerSupervisor::new(ServersConfig::default(), fast_options());
        assert!(!supervisor.stop("ghost").await);
        assert_eq!(supervisor.stop_all().await, 0);
        assert_eq!(supervisor.status("ghost").await, HealthStatus::Stopped);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_pipe_server_lifecycle() {
        let config =
            ServersConfig::from_descriptors([ServerDescriptor::pipe("echo", "cat", vec![])]).unwrap();
        let supervisor = ServerSupervisor::new(config, fast_options());

        assert_eq!(supervisor.start("echo").await, StartOutcome::Ready);
        assert!(supervisor.is_running("echo").await);
        assert_eq!(supervisor.status("echo").await, HealthStatus::Ready);
        assert!(supervisor.pipe("echo").await.is_some());

        let servers = supervisor.servers().await;
        assert_eq!(servers.len(), 1);
        assert!(servers[0].pid.is_some());

        // Second start is a no-op
        assert_eq!(supervisor.start("echo").await, StartOutcome::Ready);
        assert_eq!(supervisor.running_names().await.len(), 1);

        assert!(supervisor.stop("echo").await);
        assert!(!supervisor.is_running("echo").await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_pipe_exit_during_settle_fails() {
        let config = ServersConfig::from_descriptors([ServerDescriptor::pipe(
            "quitter",
            "sh",
            vec!["-c".to_string(), "echo 'missing API key' >&2; exit 1".to_string()],
        )])
        .unwrap();
        let mut options = fast_options();
        options.settle_interval = Duration::from_millis(300);
        let supervisor = ServerSupervisor::new(config, options);

        let outcome = supervisor.start("quitter").await;
        let StartOutcome::Failed(SupervisorError::ExitedDuringStartup { output }) = outcome else {
            panic!("expected early exit failure");
        };
        assert!(output.contains("missing API key"));
        assert!(!supervisor.is_running("quitter").await);
    }
}
