use std::io;
use std::process::ExitStatus;
use std::time::Duration;

use tokio::process::Child;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::warn;

use toolmesh_core::HealthStatus;

use super::SessionContext;
use crate::error::SupervisorError;
use crate::process::{SessionEvent, shutdown_child};

/// A supervised child process.
///
/// A monitor task owns the `Child`. It either observes the process exiting
/// on its own, or shuts it down when the session is stopped or dropped.
#[derive(Debug)]
pub struct ProcessSession {
    pid: Option<u32>,
    monitor: JoinHandle<io::Result<ExitStatus>>,
    guard: DropGuard,
}

impl ProcessSession {
    /// Start monitoring `child`. Its stdio must already be taken.
    pub fn start(ctx: &SessionContext, mut child: Child, grace: Duration) -> Self {
        let pid = child.id();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let ctx = ctx.clone();

        let monitor = tokio::spawn(async move {
            let exited = tokio::select! {
                status = child.wait() => Some(status),
                () = token.cancelled() => None,
            };

            let result = match exited {
                Some(result) => {
                    match &result {
                        Ok(status) => {
                            warn!(server = %ctx.server, status = %status, "Upstream process exited");
                        }
                        Err(e) => {
                            warn!(server = %ctx.server, error = %e, "Failed to wait on upstream process");
                        }
                    }
                    result
                }
                None => shutdown_child(child, grace).await,
            };

            ctx.set_status(HealthStatus::Stopped);
            ctx.capture.emit(SessionEvent::Closed);
            result
        });

        Self {
            pid,
            monitor,
            guard: cancel.drop_guard(),
        }
    }

    #[must_use]
    pub const fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Terminate the process and wait for it to exit.
    pub async fn stop(self) -> Result<ExitStatus, SupervisorError> {
        let Self { guard, monitor, .. } = self;
        drop(guard);

        match monitor.await {
            Ok(Ok(status)) => Ok(status),
            Ok(Err(e)) => Err(SupervisorError::StopFailed(e.to_string())),
            Err(e) => Err(SupervisorError::StopFailed(e.to_string())),
        }
    }
}
