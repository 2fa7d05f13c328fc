//! MCP protocol clients.
//!
//! Each transport only knows how to move one JSON-RPC request and its
//! response ([`RpcTransport`]). The handshake, catalogue paging and tool
//! calls are shared by [`McpClient`].

pub mod http;
pub mod jsonrpc;
pub mod sse;
pub mod stdio;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, info};

use toolmesh_core::{
    ClientConnector, ClientError, ProtocolClient, ToolCallResult, ToolDescriptor, TransportParams,
};

use self::jsonrpc::{InitializeResult, initialize_params, parse_call_result, parse_initialize};

/// Name reported in `clientInfo`.
pub const CLIENT_NAME: &str = "toolmesh";

/// Upper bound on `tools/list` pages followed for one catalogue.
const MAX_CATALOGUE_PAGES: usize = 32;

/// Moves JSON-RPC messages to and from one server.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    /// Send a request and return its `result`.
    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, ClientError>;

    /// Send a notification, giving up after `timeout`.
    async fn notify(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<(), ClientError>;

    /// Release the transport.
    async fn close(&self) -> Result<(), ClientError>;
}

/// A connected, initialized MCP session over transport `T`.
pub struct McpClient<T> {
    server: String,
    transport: T,
    init: InitializeResult,
}

impl<T: RpcTransport> McpClient<T> {
    /// Run the `initialize` handshake over `transport`.
    pub async fn connect(
        server: &str,
        transport: T,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let result = match transport
            .request("initialize", Some(initialize_params(CLIENT_NAME)), timeout)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                let _ = transport.close().await;
                return Err(e);
            }
        };
        let init = parse_initialize(result)?;
        if let Err(e) = transport
            .notify("notifications/initialized", None, timeout)
            .await
        {
            let _ = transport.close().await;
            return Err(e);
        }

        info!(
            server = %server,
            upstream = init.server_info.as_ref().map_or("unknown", |s| s.name.as_str()),
            protocol = init.protocol_version.as_deref().unwrap_or("unknown"),
            "MCP session initialized"
        );

        Ok(Self {
            server: server.to_string(),
            transport,
            init,
        })
    }

    /// Whether the server advertised the tools capability.
    pub const fn supports_tools(&self) -> bool {
        self.init.capabilities.tools.is_some()
    }
}

#[async_trait]
impl<T: RpcTransport> ProtocolClient for McpClient<T> {
    async fn list_tools(&self, timeout: Duration) -> Result<Vec<ToolDescriptor>, ClientError> {
        if !self.supports_tools() {
            debug!(server = %self.server, "Server does not advertise tools");
            return Ok(Vec::new());
        }

        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_CATALOGUE_PAGES {
            let params = cursor.take().map(|c| json!({ "cursor": c }));
            let result = self.transport.request("tools/list", params, timeout).await?;
            let page = jsonrpc::parse_tools_page(result)?;
            tools.extend(page.tools);

            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        Ok(tools)
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<ToolCallResult, ClientError> {
        let params = json!({
            "name": name,
            "arguments": arguments
        });
        let result = self
            .transport
            .request("tools/call", Some(params), timeout)
            .await?;
        parse_call_result(result)
    }

    async fn close(&self) -> Result<(), ClientError> {
        debug!(server = %self.server, "Closing MCP session");
        self.transport.close().await
    }
}

/// Default connector: picks the client matching the transport parameters.
#[derive(Debug, Clone)]
pub struct McpConnector {
    http: reqwest::Client,
    handshake_timeout: Duration,
}

impl Default for McpConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl McpConnector {
    /// `handshake_timeout` bounds opening the transport and `initialize`.
    pub fn new(handshake_timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            handshake_timeout,
        }
    }
}

#[async_trait]
impl ClientConnector for McpConnector {
    async fn connect(
        &self,
        server: &str,
        params: &TransportParams,
    ) -> Result<Arc<dyn ProtocolClient>, ClientError> {
        let timeout = self.handshake_timeout;
        let client: Arc<dyn ProtocolClient> = match params {
            TransportParams::Pipe {
                command,
                args,
                env,
                cwd,
                attached,
            } => {
                let transport = match attached {
                    Some(channel) => stdio::StdioTransport::attached(channel.clone()),
                    None => stdio::StdioTransport::spawn(
                        server,
                        command,
                        args,
                        env,
                        cwd.as_deref(),
                    )?,
                };
                Arc::new(McpClient::connect(server, transport, timeout).await?)
            }
            TransportParams::Http { url, headers } => {
                let transport = http::HttpTransport::new(self.http.clone(), url, headers.clone());
                Arc::new(McpClient::connect(server, transport, timeout).await?)
            }
            TransportParams::EventStream { url, headers } => {
                let transport =
                    sse::SseTransport::open(self.http.clone(), server, url, headers, timeout)
                        .await?;
                Arc::new(McpClient::connect(server, transport, timeout).await?)
            }
        };

        Ok(client)
    }
}
