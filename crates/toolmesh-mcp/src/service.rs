//! Tool aggregation service.
//!
//! [`ToolService`] owns the supervisor, the client registry and the merged
//! tool namespace. It is an explicit state machine:
//!
//! ```text
//! Uninitialized -> Initializing -> Ready | Error
//! Ready -> ShuttingDown -> Uninitialized
//! ```
//!
//! Construct one per process (or per test) and share it by cloning.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use toolmesh_core::domain::summarize;
use toolmesh_core::{
    ClientConnector, HealthStatus, ServerFailure, ServersConfig, ServiceState, ToolCallResult,
    TransportMode,
};
use toolmesh_runtime::{Inflight, ServerSupervisor, SupervisorOptions};

use crate::bridge::ToolProxy;
use crate::client::McpConnector;
use crate::error::{RegistryError, ServiceError};
use crate::registry::{ClientRegistry, RegistryOptions};

/// What to do when two servers expose a tool with the same name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CollisionPolicy {
    /// The server registered last wins; collisions are logged
    #[default]
    Shadow,
    /// Merged lookups fail with [`ServiceError::DuplicateTool`]
    Error,
}

/// Service tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceOptions {
    pub supervisor: SupervisorOptions,
    pub registry: RegistryOptions,
    /// Timeout of one tool call
    pub call_timeout: Duration,
    pub collision_policy: CollisionPolicy,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            supervisor: SupervisorOptions::default(),
            registry: RegistryOptions::default(),
            call_timeout: Duration::from_secs(60),
            collision_policy: CollisionPolicy::Shadow,
        }
    }
}

/// Filter for [`ToolService::get_tools`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetToolsOptions {
    /// Only this server's tools
    pub server_name: Option<String>,
}

impl GetToolsOptions {
    pub fn for_server(name: impl Into<String>) -> Self {
        Self {
            server_name: Some(name.into()),
        }
    }
}

/// Status line for one configured server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerSummary {
    pub name: String,
    pub mode: TransportMode,
    pub disabled: bool,
    pub status: HealthStatus,
    pub tool_count: usize,
}

type Catalogue = BTreeMap<String, ToolProxy>;

/// The aggregator. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ToolService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    config: ServersConfig,
    options: ServiceOptions,
    supervisor: ServerSupervisor,
    registry: ClientRegistry,
    state: RwLock<ServiceState>,
    /// Per-server catalogues in registration order
    catalogues: RwLock<Vec<(String, Catalogue)>>,
    failures: RwLock<Vec<ServerFailure>>,
    init: Inflight<(), Result<(), ServiceError>>,
}

impl ToolService {
    /// Create a service using `connector` for protocol sessions.
    pub fn new(
        config: ServersConfig,
        options: ServiceOptions,
        connector: Arc<dyn ClientConnector>,
    ) -> Self {
        let supervisor = ServerSupervisor::new(config.clone(), options.supervisor);
        let registry = ClientRegistry::new(connector, supervisor.clone(), options.registry);

        Self {
            inner: Arc::new(ServiceInner {
                config,
                options,
                supervisor,
                registry,
                state: RwLock::new(ServiceState::Uninitialized),
                catalogues: RwLock::new(Vec::new()),
                failures: RwLock::new(Vec::new()),
                init: Inflight::new(),
            }),
        }
    }

    /// Create a service speaking MCP with the built-in clients.
    pub fn with_default_connector(config: ServersConfig, options: ServiceOptions) -> Self {
        let connector = McpConnector::new(options.supervisor.connect_timeout);
        Self::new(config, options, Arc::new(connector))
    }

    pub async fn state(&self) -> ServiceState {
        *self.inner.state.read().await
    }

    pub fn config(&self) -> &ServersConfig {
        &self.inner.config
    }

    pub fn supervisor(&self) -> &ServerSupervisor {
        &self.inner.supervisor
    }

    /// Failures recorded by the most recent initialization.
    pub async fn last_failures(&self) -> Vec<ServerFailure> {
        self.inner.failures.read().await.clone()
    }

    /// Start every enabled server and register its tools.
    ///
    /// Succeeds when at least one server is ready. Calls made while an
    /// initialization is running join it; calls after success are no-ops.
    pub async fn initialize(&self) -> Result<(), ServiceError> {
        match self.state().await {
            ServiceState::Ready => return Ok(()),
            ServiceState::ShuttingDown => return Err(ServiceError::ShuttingDown),
            _ => {}
        }

        let inner = Arc::clone(&self.inner);
        self.inner
            .init
            .run((), move || async move { inner.run_initialize().await })
            .await
    }

    /// Tools by name, initializing first if needed.
    ///
    /// With a server name only that server's tools are returned. Servers
    /// that stopped since initialization are dropped before the lookup.
    pub async fn get_tools(
        &self,
        options: GetToolsOptions,
    ) -> Result<BTreeMap<String, ToolProxy>, ServiceError> {
        match self.state().await {
            ServiceState::Ready => {}
            ServiceState::ShuttingDown => return Err(ServiceError::ShuttingDown),
            _ => self.initialize().await?,
        }

        self.inner.prune_stopped().await;

        match options.server_name {
            Some(name) => self.inner.server_tools(&name).await,
            None => self.inner.merged_tools().await,
        }
    }

    /// Call `tool` on `server` directly, without local validation.
    ///
    /// Failures, including an unknown server, come back in-band.
    pub async fn execute_function(&self, server: &str, tool: &str, args: Value) -> ToolCallResult {
        let Some(client) = self.inner.registry.client(server).await else {
            warn!(server = %server, tool = %tool, "No live client for server");
            return ToolCallResult::error(format!("Server '{server}' is not connected"));
        };

        match client
            .call_tool(tool, args, self.inner.options.call_timeout)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                warn!(server = %server, tool = %tool, error = %e, "Tool call failed");
                ToolCallResult::error(format!(
                    "Tool '{tool}' on server '{server}' failed: {e}"
                ))
            }
        }
    }

    /// Stop every server, close every client and forget every tool.
    ///
    /// Safe to call repeatedly, and before `initialize` ever finished.
    pub async fn cleanup(&self) {
        *self.inner.state.write().await = ServiceState::ShuttingDown;

        let stopped = self.inner.supervisor.stop_all().await;
        let close_errors = self.inner.registry.close_all().await;
        self.inner.catalogues.write().await.clear();
        self.inner.failures.write().await.clear();

        *self.inner.state.write().await = ServiceState::Uninitialized;
        info!(
            stopped,
            close_errors = close_errors.len(),
            "Tool service cleaned up"
        );
    }

    /// One line per configured server, ordered by name.
    pub async fn server_statuses(&self) -> Vec<ServerSummary> {
        let catalogues = self.inner.catalogues.read().await;
        let mut summaries = Vec::with_capacity(self.inner.config.len());

        for descriptor in self.inner.config.iter() {
            let tool_count = catalogues
                .iter()
                .find(|(name, _)| *name == descriptor.name)
                .map_or(0, |(_, tools)| tools.len());
            summaries.push(ServerSummary {
                name: descriptor.name.clone(),
                mode: descriptor.mode,
                disabled: descriptor.disabled,
                status: self.inner.supervisor.status(&descriptor.name).await,
                tool_count,
            });
        }

        summaries
    }
}

impl ServiceInner {
    async fn run_initialize(&self) -> Result<(), ServiceError> {
        {
            let mut state = self.state.write().await;
            match *state {
                ServiceState::Ready => return Ok(()),
                ServiceState::ShuttingDown => return Err(ServiceError::ShuttingDown),
                _ => *state = ServiceState::Initializing,
            }
        }
        info!(servers = self.config.len(), "Initializing tool service");

        let report = self.supervisor.start_all().await;
        let mut failures = report.failures();

        let ready = report.ready_names();
        let registrations = join_all(ready.iter().map(|name| self.register_server(name))).await;

        let mut catalogues = Vec::new();
        for (name, registration) in ready.iter().zip(registrations) {
            match registration {
                Ok(tools) => catalogues.push((name.clone(), tools)),
                Err(e) => {
                    failures.push(ServerFailure::new(name, e.kind(), e.to_string()));
                    self.supervisor.stop(name).await;
                    self.registry.remove(name).await;
                }
            }
        }

        for failure in &failures {
            error!(
                server = %failure.server,
                kind = %failure.kind,
                reason = %failure.reason,
                "Server failed to initialize"
            );
        }

        let mut state = self.state.write().await;
        if *state != ServiceState::Initializing {
            // cleanup() ran while servers were starting; anything that came
            // up after its sweep is still ours to release
            drop(state);
            self.release(&ready).await;
            return Err(ServiceError::ShuttingDown);
        }
        *self.failures.write().await = failures.clone();

        if catalogues.is_empty() {
            *state = ServiceState::Error;
            return Err(ServiceError::InitializationFailed {
                summary: summarize(&failures),
                failures,
            });
        }

        if self.options.collision_policy == CollisionPolicy::Shadow {
            warn_collisions(&catalogues);
        }

        let tool_count: usize = catalogues.iter().map(|(_, tools)| tools.len()).sum();
        info!(
            ready = catalogues.len(),
            failed = failures.len(),
            tool_count,
            "Tool service ready"
        );
        *self.catalogues.write().await = catalogues;
        *state = ServiceState::Ready;
        Ok(())
    }

    async fn register_server(&self, name: &str) -> Result<Catalogue, RegistryError> {
        let descriptor =
            self.config
                .get(name)
                .ok_or_else(|| RegistryError::Misconfigured {
                    server: name.to_string(),
                    reason: "not in configuration".to_string(),
                })?;

        let client = self.registry.ensure_client(descriptor).await?;
        let tools = self.registry.list_tools(name, &client).await?;

        let catalogue: Catalogue = tools
            .into_iter()
            .map(|tool| {
                let auto_approved = descriptor.is_auto_approved(&tool.name);
                let proxy = ToolProxy::new(
                    name,
                    tool,
                    Arc::clone(&client),
                    auto_approved,
                    self.options.call_timeout,
                );
                (proxy.name().to_string(), proxy)
            })
            .collect();

        info!(server = %name, tool_count = catalogue.len(), "Registered tools");
        Ok(catalogue)
    }

    /// Stop `names` and close their clients.
    async fn release(&self, names: &[String]) {
        for name in names {
            let stopped = self.supervisor.stop(name).await;
            let closed = self.registry.remove(name).await;
            if stopped || closed {
                info!(server = %name, "Released server started during cleanup");
            }
        }
    }

    /// Drop catalogues and clients of servers the supervisor no longer runs.
    async fn prune_stopped(&self) {
        let running = self.supervisor.running_names().await;
        let stale: Vec<String> = {
            let mut catalogues = self.catalogues.write().await;
            let stale = catalogues
                .iter()
                .filter(|(name, _)| !running.contains(name))
                .map(|(name, _)| name.clone())
                .collect();
            catalogues.retain(|(name, _)| running.contains(name));
            stale
        };

        for name in stale {
            info!(server = %name, "Server no longer running, dropping its tools");
            self.registry.remove(&name).await;
        }
    }

    async fn server_tools(&self, name: &str) -> Result<Catalogue, ServiceError> {
        let descriptor = self
            .config
            .get(name)
            .ok_or_else(|| ServiceError::ServerNotFound(name.to_string()))?;
        if descriptor.disabled {
            return Err(ServiceError::ServerDisabled(name.to_string()));
        }

        self.catalogues
            .read()
            .await
            .iter()
            .find(|(server, _)| server == name)
            .map(|(_, tools)| tools.clone())
            .ok_or_else(|| ServiceError::ServerNotRunning(name.to_string()))
    }

    async fn merged_tools(&self) -> Result<Catalogue, ServiceError> {
        let catalogues = self.catalogues.read().await;
        let mut merged: Catalogue = BTreeMap::new();

        for (server, tools) in catalogues.iter() {
            for (tool, proxy) in tools {
                if let Some(previous) = merged.get(tool) {
                    if self.options.collision_policy == CollisionPolicy::Error {
                        return Err(ServiceError::DuplicateTool {
                            tool: tool.clone(),
                            first: previous.server().to_string(),
                            second: server.clone(),
                        });
                    }
                }
                merged.insert(tool.clone(), proxy.clone());
            }
        }

        Ok(merged)
    }
}

/// Log every tool name that a later server shadows.
fn warn_collisions(catalogues: &[(String, Catalogue)]) {
    let mut owners: BTreeMap<&str, &str> = BTreeMap::new();
    for (server, tools) in catalogues {
        for tool in tools.keys() {
            if let Some(previous) = owners.insert(tool, server) {
                warn!(
                    tool = %tool,
                    shadowed = %previous,
                    winner = %server,
                    "Tool name collision, later server wins"
                );
            }
        }
    }
}
