//! Transport sessions: one implementation per transport mode.
//!
//! A session owns whatever keeps an upstream server alive (a child process
//! or an open event stream) and reports its health through a watch channel.
//! When a session ends for any reason its status becomes `Stopped` and a
//! final [`SessionEvent::Closed`] is emitted.

pub mod event_stream;
pub mod local_port;
pub mod pipe;
mod process;

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use toolmesh_core::HealthStatus;

use crate::error::SupervisorError;
use crate::process::{OutputCapture, SessionEvent};

pub use event_stream::{StreamSession, StreamSettings};
pub use process::ProcessSession;

/// State shared between a session's background tasks and its owner.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub server: String,
    pub status: Arc<watch::Sender<HealthStatus>>,
    pub capture: OutputCapture,
}

impl SessionContext {
    /// Create a context in `Starting` state.
    pub fn new(
        server: &str,
        buffer_lines: usize,
    ) -> (
        Self,
        watch::Receiver<HealthStatus>,
        mpsc::Receiver<SessionEvent>,
    ) {
        let (status_tx, status_rx) = watch::channel(HealthStatus::Starting);
        let (capture, events) = OutputCapture::new(server, buffer_lines);
        let ctx = Self {
            server: server.to_string(),
            status: Arc::new(status_tx),
            capture,
        };
        (ctx, status_rx, events)
    }

    pub fn set_status(&self, status: HealthStatus) {
        self.status.send_replace(status);
    }

    /// Move `Starting` to `Ready`. Returns false if the session already
    /// left `Starting` (e.g. the process exited).
    pub fn promote_to_ready(&self) -> bool {
        self.status.send_if_modified(|status| {
            if *status == HealthStatus::Starting {
                *status = HealthStatus::Ready;
                true
            } else {
                false
            }
        })
    }
}

/// The resource behind a running server.
#[derive(Debug)]
pub enum TransportHandle {
    Process(ProcessSession),
    Stream(StreamSession),
}

impl TransportHandle {
    /// OS process id, for process-backed servers.
    #[must_use]
    pub const fn pid(&self) -> Option<u32> {
        match self {
            Self::Process(session) => session.pid(),
            Self::Stream(_) => None,
        }
    }

    /// Terminate the process (awaiting its exit) or close the stream.
    pub async fn stop(self) -> Result<(), SupervisorError> {
        match self {
            Self::Process(session) => session.stop().await.map(|_| ()),
            Self::Stream(session) => session.stop().await,
        }
    }
}
