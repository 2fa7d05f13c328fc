//! Process and transport supervision for toolmesh.
//!
//! This crate owns every OS-level and network-level resource behind an
//! upstream server:
//!
//! - [`session`]: one transport session per mode (pipe, local-port,
//!   event-stream), each reporting health through a watch channel and
//!   producing a consumable [`SessionEvent`] stream
//! - [`process`]: spawning with a merged environment, output capture, port
//!   probing, graceful SIGTERM/SIGKILL shutdown
//! - [`health`]: HTTP health polling on top of the core retry combinator
//! - [`sse`]: server-sent event decoding shared with the protocol clients
//! - [`supervisor`]: the fleet owner with memoized per-server starts

pub mod error;
pub mod health;
pub mod inflight;
pub mod process;
pub mod session;
pub mod sse;
pub mod supervisor;

pub use error::SupervisorError;
pub use inflight::Inflight;
pub use process::{OutputCapture, OutputStream, SessionEvent};
pub use sse::{SseDecoder, SseEvent, sse_events};
pub use supervisor::{ServerInfo, ServerSupervisor, StartOutcome, StartReport, SupervisorOptions};
