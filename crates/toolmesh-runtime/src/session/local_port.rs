//! Local-port sessions: a child process serving HTTP on a local port.

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::warn;

use toolmesh_core::{HealthStatus, RetryPolicy, ServerDescriptor};

use super::{ProcessSession, SessionContext};
use crate::error::{SupervisorError, format_output_suffix};
use crate::health::{ProbeFailure, wait_for_http_health};
use crate::process::{OutputStream, is_port_available, spawn_server_process};

/// Environment variable carrying the port to the child.
pub const PORT_ENV: &str = "PORT";

/// Spawn a local-port server after checking that its port is free.
///
/// The port is injected as `PORT` unless the descriptor sets it explicitly.
pub fn launch(
    ctx: &SessionContext,
    descriptor: &ServerDescriptor,
    env: &BTreeMap<String, String>,
    port: u16,
    grace: Duration,
) -> Result<ProcessSession, SupervisorError> {
    if !is_port_available(port) {
        return Err(SupervisorError::PortInUse(port));
    }

    let mut env = env.clone();
    if !descriptor.env.contains_key(PORT_ENV) {
        env.insert(PORT_ENV.to_string(), port.to_string());
    }

    let mut child = spawn_server_process(descriptor, &env, false)?;
    if let Some(stdout) = child.stdout.take() {
        ctx.capture.spawn_reader(OutputStream::Stdout, stdout);
    }
    if let Some(stderr) = child.stderr.take() {
        ctx.capture.spawn_reader(OutputStream::Stderr, stderr);
    }

    Ok(ProcessSession::start(ctx, child, grace))
}

/// Poll the health endpoint. On failure the process is stopped and the
/// error carries its recent output.
pub async fn wait_ready(
    ctx: &SessionContext,
    session: ProcessSession,
    client: &reqwest::Client,
    port: u16,
    policy: RetryPolicy,
) -> Result<ProcessSession, SupervisorError> {
    let status = ctx.status.subscribe();
    let probe = wait_for_http_health(client, port, policy, || {
        *status.borrow() != HealthStatus::Stopped
    })
    .await;

    let failure = match probe {
        Ok(()) => return Ok(session),
        Err(failure) => failure,
    };

    if let Err(e) = session.stop().await {
        warn!(server = %ctx.server, error = %e, "Failed to stop unhealthy server");
    }

    let output = format_output_suffix(&ctx.capture.recent());
    Err(match failure {
        ProbeFailure::ProcessExited => SupervisorError::ExitedDuringStartup { output },
        ProbeFailure::Unhealthy(reason) => SupervisorError::HealthCheckTimeout {
            attempts: policy.max_attempts,
            reason,
            output,
        },
    })
}
