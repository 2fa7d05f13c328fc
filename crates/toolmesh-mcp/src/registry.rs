//! Protocol client registry: one live client per running server.
//!
//! Connecting is memoized per server name, so concurrent callers share a
//! single handshake. Connect and catalogue requests are retried with a
//! fixed delay.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use toolmesh_core::env::{SystemEnv, launch_environment};
use toolmesh_core::{
    ClientConnector, ClientError, ProtocolClient, RetryPolicy, ServerDescriptor, ToolDescriptor,
    TransportMode, TransportParams, retry_with_backoff,
};
use toolmesh_runtime::{Inflight, ServerSupervisor};

use crate::error::RegistryError;

/// Path of the MCP endpoint on local-port servers.
pub const LOCAL_MCP_PATH: &str = "/mcp";

/// Retry budgets for the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryOptions {
    pub connect_policy: RetryPolicy,
    /// Timeout of one connect attempt, handshake included
    pub connect_timeout: Duration,
    pub catalogue_policy: RetryPolicy,
    /// Timeout of one `tools/list` attempt
    pub catalogue_timeout: Duration,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            connect_policy: RetryPolicy::new(3, Duration::from_secs(2)),
            connect_timeout: Duration::from_secs(15),
            catalogue_policy: RetryPolicy::new(3, Duration::from_secs(2)),
            catalogue_timeout: Duration::from_secs(10),
        }
    }
}

type ClientResult = Result<Arc<dyn ProtocolClient>, RegistryError>;

/// Owns the live protocol clients.
#[derive(Clone)]
pub struct ClientRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    connector: Arc<dyn ClientConnector>,
    supervisor: ServerSupervisor,
    options: RegistryOptions,
    clients: RwLock<HashMap<String, Arc<dyn ProtocolClient>>>,
    connecting: Inflight<String, ClientResult>,
}

impl ClientRegistry {
    pub fn new(
        connector: Arc<dyn ClientConnector>,
        supervisor: ServerSupervisor,
        options: RegistryOptions,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                connector,
                supervisor,
                options,
                clients: RwLock::new(HashMap::new()),
                connecting: Inflight::new(),
            }),
        }
    }

    /// Return the live client for `descriptor`, connecting if needed.
    pub async fn ensure_client(&self, descriptor: &ServerDescriptor) -> ClientResult {
        if let Some(client) = self.client(&descriptor.name).await {
            return Ok(client);
        }

        let inner = Arc::clone(&self.inner);
        let descriptor = descriptor.clone();
        self.inner
            .connecting
            .run(descriptor.name.clone(), move || async move {
                inner.connect(&descriptor).await
            })
            .await
    }

    /// The live client for `name`, if any.
    pub async fn client(&self, name: &str) -> Option<Arc<dyn ProtocolClient>> {
        self.inner.clients.read().await.get(name).cloned()
    }

    /// Fetch `name`'s tool catalogue with the catalogue retry budget.
    pub async fn list_tools(
        &self,
        name: &str,
        client: &Arc<dyn ProtocolClient>,
    ) -> Result<Vec<ToolDescriptor>, RegistryError> {
        let timeout = self.inner.options.catalogue_timeout;
        let tools = retry_with_backoff(
            self.inner.options.catalogue_policy,
            "tools/list",
            |_| async move {
                // Bounded here as well so a client ignoring its timeout
                // cannot stall initialization
                tokio::time::timeout(timeout, client.list_tools(timeout))
                    .await
                    .map_err(|_| ClientError::timeout("tools/list", timeout))?
            },
            |_| true,
        )
        .await
        .map_err(|source| RegistryError::Catalogue {
            server: name.to_string(),
            source,
        })?;

        debug!(server = %name, tool_count = tools.len(), "Fetched tool catalogue");
        Ok(tools)
    }

    /// Drop and close the client for `name`. Errors are logged.
    pub async fn remove(&self, name: &str) -> bool {
        let client = self.inner.clients.write().await.remove(name);
        let Some(client) = client else {
            return false;
        };

        if let Err(e) = client.close().await {
            warn!(server = %name, error = %e, "Failed to close MCP client");
        }
        true
    }

    /// Close every client. A failure closing one does not stop the others;
    /// every failure is returned.
    pub async fn close_all(&self) -> Vec<(String, ClientError)> {
        let clients: Vec<(String, Arc<dyn ProtocolClient>)> =
            self.inner.clients.write().await.drain().collect();

        let results = join_all(clients.into_iter().map(|(name, client)| async move {
            let result = client.close().await;
            (name, result)
        }))
        .await;

        let mut errors = Vec::new();
        for (name, result) in results {
            if let Err(e) = result {
                warn!(server = %name, error = %e, "Failed to close MCP client");
                errors.push((name, e));
            }
        }
        errors
    }

    pub async fn connected_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.clients.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}

impl RegistryInner {
    async fn connect(&self, descriptor: &ServerDescriptor) -> ClientResult {
        let name = descriptor.name.as_str();
        let params = self.transport_params(descriptor).await?;
        let timeout = self.options.connect_timeout;

        let client = retry_with_backoff(
            self.options.connect_policy,
            "client connect",
            |attempt| {
                let connector = Arc::clone(&self.connector);
                let params = params.clone();
                async move {
                    let result = tokio::time::timeout(timeout, connector.connect(name, &params))
                        .await
                        .unwrap_or_else(|_| Err(ClientError::timeout("connect", timeout)));
                    match &result {
                        // Some launchers only resolve when they run; not alarming on its own
                        Err(e) if e.is_launcher_not_found() => {
                            debug!(server = %name, attempt, error = %e, "Launcher not found");
                        }
                        Err(e) => warn!(server = %name, attempt, error = %e, "Connect attempt failed"),
                        Ok(_) => {}
                    }
                    result
                }
            },
            |_| true,
        )
        .await
        .map_err(|source| RegistryError::Connect {
            server: name.to_string(),
            source,
        })?;

        self.clients
            .write()
            .await
            .insert(name.to_string(), Arc::clone(&client));
        info!(server = %name, mode = %descriptor.mode, "MCP client connected");
        Ok(client)
    }

    async fn transport_params(
        &self,
        descriptor: &ServerDescriptor,
    ) -> Result<TransportParams, RegistryError> {
        let misconfigured = |reason: &str| RegistryError::Misconfigured {
            server: descriptor.name.clone(),
            reason: reason.to_string(),
        };

        match descriptor.mode {
            TransportMode::Pipe => Ok(TransportParams::Pipe {
                command: descriptor.command.clone(),
                args: descriptor.args.clone(),
                env: launch_environment(&SystemEnv, descriptor),
                cwd: descriptor.cwd.clone(),
                attached: self.supervisor.pipe(&descriptor.name).await,
            }),
            TransportMode::LocalPort => {
                let port = descriptor
                    .port
                    .ok_or_else(|| misconfigured("no port configured"))?;
                Ok(TransportParams::Http {
                    url: format!("http://127.0.0.1:{port}{LOCAL_MCP_PATH}"),
                    headers: BTreeMap::new(),
                })
            }
            TransportMode::EventStream => {
                let options = descriptor
                    .event_stream
                    .as_ref()
                    .ok_or_else(|| misconfigured("no event stream configured"))?;
                Ok(TransportParams::EventStream {
                    url: options.url.clone(),
                    headers: options.headers.clone(),
                })
            }
        }
    }
}
