//! MCP (Model Context Protocol) layer for toolmesh.
//!
//! - [`client`]: JSON-RPC clients for the pipe, local-port and event-stream
//!   transports, behind the core [`ClientConnector`](toolmesh_core::ClientConnector) port
//! - [`registry`]: one live protocol client per running server, with
//!   bounded connect and catalogue retries
//! - [`bridge`]: compiles tool input schemas into validators and wraps each
//!   upstream tool in a [`ToolProxy`]
//! - [`service`]: the aggregator that owns the supervisor, the registry and
//!   the merged tool namespace

pub mod bridge;
pub mod client;
pub mod error;
pub mod registry;
pub mod service;

pub use bridge::{ToolProxy, ValidationError, Validator, compile};
pub use client::McpConnector;
pub use error::{RegistryError, ServiceError};
pub use registry::{ClientRegistry, RegistryOptions};
pub use service::{CollisionPolicy, GetToolsOptions, ServerSummary, ServiceOptions, ToolService};
