//! Pipe sessions: a child process speaking JSON-RPC on stdin/stdout.
//!
//! Pipe servers have no health endpoint. The supervisor registers them as
//! soon as they spawn and waits a settle interval before calling them ready.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::sync::mpsc;

use toolmesh_core::{PipeChannel, ServerDescriptor};

use super::{ProcessSession, SessionContext};
use crate::error::SupervisorError;
use crate::process::{OutputStream, spawn_server_process};

/// Lines of non-protocol stdout buffered before the forwarder drains them.
const UNROUTED_BUFFER: usize = 64;

/// Spawn a pipe server and attach a [`PipeChannel`] to its stdio.
pub fn launch(
    ctx: &SessionContext,
    descriptor: &ServerDescriptor,
    env: &BTreeMap<String, String>,
    grace: Duration,
) -> Result<(ProcessSession, PipeChannel), SupervisorError> {
    let mut child = spawn_server_process(descriptor, env, true)?;

    let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
        return Err(SupervisorError::LaunchFailed {
            command: descriptor.command.clone(),
            reason: "stdio pipes unavailable".to_string(),
        });
    };

    if let Some(stderr) = child.stderr.take() {
        ctx.capture.spawn_reader(OutputStream::Stderr, stderr);
    }

    let (unrouted_tx, unrouted_rx) = mpsc::channel(UNROUTED_BUFFER);
    ctx.capture.spawn_forwarder(OutputStream::Stdout, unrouted_rx);

    let channel = PipeChannel::spawn(&descriptor.name, stdin, stdout, Some(unrouted_tx));
    let session = ProcessSession::start(ctx, child, grace);

    Ok((session, channel))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::process::SessionEvent;
    use serde_json::json;
    use toolmesh_core::env::{SystemEnv, launch_environment};

    #[tokio::test]
    async fn test_stderr_and_stray_stdout_are_captured() {
        let descriptor = ServerDescriptor::pipe(
            "noisy",
            "sh",
            vec![
                "-c".to_string(),
                "echo 'booting' >&2; echo 'not json'; cat".to_string(),
            ],
        );
        let env = launch_environment(&SystemEnv, &descriptor);
        let (ctx, _status, mut events) = SessionContext::new("noisy", 10);

        let (session, channel) = launch(&ctx, &descriptor, &env, Duration::from_secs(1)).unwrap();

        let mut seen = Vec::new();
        while seen.len() < 2 {
            let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
                .await
                .unwrap()
                .unwrap();
            seen.push(event);
        }
        assert!(seen.contains(&SessionEvent::Stderr("booting".to_string())));
        assert!(seen.contains(&SessionEvent::Stdout("not json".to_string())));

        // `cat` echoes a response-shaped line straight back
        let id = channel.next_id();
        let rx = channel
            .request(id, &json!({"jsonrpc": "2.0", "id": id, "result": {}}))
            .await
            .unwrap();
        assert!(tokio::time::timeout(Duration::from_secs(5), rx).await.is_ok());

        session.stop().await.unwrap();
    }
}
