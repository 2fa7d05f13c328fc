//! Core domain types and ports for toolmesh.
//!
//! This crate holds everything the other layers agree on: server
//! descriptors and the configuration document, tool catalogue and result
//! types, the input-schema grammar, the failure taxonomy, the bounded retry
//! combinator, launch-environment construction, and the protocol client
//! ports. It spawns no processes and opens no sockets of its own.

pub mod config;
pub mod domain;
pub mod env;
pub mod ports;
pub mod retry;

pub use config::{ConfigError, ServersConfig};
pub use domain::{
    ContentItem, EventStreamOptions, FailureKind, HealthStatus, SchemaNode, ServerDescriptor,
    ServerFailure, ServiceState, ToolCallResult, ToolDescriptor, TransportMode,
};
pub use ports::{ClientConnector, ClientError, PipeChannel, ProtocolClient, TransportParams};
pub use retry::{RetryPolicy, retry_with_backoff};
