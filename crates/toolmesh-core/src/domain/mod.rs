//! Domain types.

mod failure;
mod schema;
mod server;
mod state;
mod tool;

pub use failure::{FailureKind, ServerFailure, summarize};
pub use schema::SchemaNode;
pub use server::{
    DEFAULT_RECONNECT_INTERVAL, EventStreamOptions, HealthStatus, ServerDescriptor, TransportMode,
};
pub use state::ServiceState;
pub use tool::{ContentItem, ToolCallResult, ToolDescriptor};
