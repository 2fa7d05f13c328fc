//! HTTP health polling for local-port servers.

use std::fmt;
use std::time::Duration;

use tracing::{debug, info};

use toolmesh_core::{RetryPolicy, retry_with_backoff};

/// Path polled on local-port servers.
pub const HEALTH_PATH: &str = "/health";

/// Health URL for a server on `port`.
#[must_use]
pub fn health_url(port: u16) -> String {
    format!("http://127.0.0.1:{port}{HEALTH_PATH}")
}

/// Build the client used for health requests.
pub fn health_client(request_timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(request_timeout)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// Why a single health probe failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeFailure {
    /// No usable response yet
    Unhealthy(String),
    /// The process is gone; polling further is pointless
    ProcessExited,
}

impl fmt::Display for ProbeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unhealthy(reason) => f.write_str(reason),
            Self::ProcessExited => f.write_str("process exited"),
        }
    }
}

/// Single-shot health check. Only a 2xx response counts as healthy.
pub async fn check_http_health(client: &reqwest::Client, url: &str) -> Result<(), String> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| format!("health request failed: {e}"))?;

    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(format!("health endpoint returned {status}"))
    }
}

/// Poll `port`'s health endpoint until it answers 2xx or the attempt budget
/// runs out. `is_alive` short-circuits polling once the process has exited.
pub async fn wait_for_http_health<F>(
    client: &reqwest::Client,
    port: u16,
    policy: RetryPolicy,
    is_alive: F,
) -> Result<(), ProbeFailure>
where
    F: Fn() -> bool,
{
    let url = health_url(port);
    let url = url.as_str();
    debug!(url, max_attempts = policy.max_attempts, "Waiting for health endpoint");

    retry_with_backoff(
        policy,
        "health check",
        |_| {
            let alive = is_alive();
            async move {
                if !alive {
                    return Err(ProbeFailure::ProcessExited);
                }
                check_http_health(client, url)
                    .await
                    .map_err(ProbeFailure::Unhealthy)
            }
        },
        |failure| matches!(failure, ProbeFailure::Unhealthy(_)),
    )
    .await?;

    info!(port, "Health endpoint ready");
    Ok(())
}
