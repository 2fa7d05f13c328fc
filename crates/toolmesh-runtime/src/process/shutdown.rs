//! Graceful shutdown for upstream server processes: SIGTERM, grace period, SIGKILL.

use std::io;
use std::process::ExitStatus;
use std::time::Duration;

use tokio::process::Child;

#[cfg(unix)]
use nix::sys::signal::{self, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

/// How long a process gets to exit after SIGTERM.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Shut down a child process and reap it.
///
/// Unix: SIGTERM, wait up to `grace`, then SIGKILL and wait.
/// Elsewhere: kill immediately.
pub async fn shutdown_child(mut child: Child, grace: Duration) -> io::Result<ExitStatus> {
    #[cfg(unix)]
    {
        let Some(pid) = child.id() else {
            // Already reaped
            return child.wait().await;
        };
        let pid = i32::try_from(pid).map_err(io::Error::other)?;

        if let Err(e) = signal::kill(Pid::from_raw(pid), Signal::SIGTERM) {
            if e == nix::errno::Errno::ESRCH {
                return child.wait().await;
            }
            return Err(io::Error::other(e));
        }

        if let Ok(result) = tokio::time::timeout(grace, child.wait()).await {
            return result;
        }

        child.kill().await?;
        child.wait().await
    }

    #[cfg(not(unix))]
    {
        let _ = grace;
        child.kill().await?;
        child.wait().await
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tokio::process::Command;

    #[tokio::test]
    async fn test_sigterm_stops_sleep() {
        let child = Command::new("sleep").arg("30").spawn().unwrap();

        let status = shutdown_child(child, SHUTDOWN_GRACE).await.unwrap();
        assert!(!status.success());
    }

    #[tokio::test]
    async fn test_escalates_when_sigterm_ignored() {
        let child = Command::new("sh")
            .arg("-c")
            .arg("trap '' TERM; sleep 30")
            .spawn()
            .unwrap();

        // Let the shell install its trap
        tokio::time::sleep(Duration::from_millis(100)).await;

        let status = shutdown_child(child, Duration::from_millis(200)).await.unwrap();
        assert!(!status.success());
    }

    #[tokio::test]
    async fn test_already_exited() {
        let mut child = Command::new("true").spawn().unwrap();
        child.wait().await.unwrap();

        assert!(shutdown_child(child, SHUTDOWN_GRACE).await.is_ok());
    }
}
