//! Port definitions (trait abstractions) for toolmesh.
//!
//! Ports define the seams between the service and the outside world. They
//! use only domain types and carry no transport-specific behavior beyond the
//! shared pipe channel.

mod protocol;
mod transport;

pub use protocol::{ClientConnector, ClientError, ProtocolClient};
pub use transport::{PipeChannel, TransportParams};
