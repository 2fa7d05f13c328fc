//! Event-stream sessions: a push connection to an externally running server.
//!
//! Readiness is the stream opening within the connect timeout. When an open
//! stream drops, the session goes `Degraded` and reconnects a bounded number
//! of times at a fixed interval. If every attempt fails it ends `Stopped`.

use std::collections::BTreeMap;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::ACCEPT;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info, warn};

use toolmesh_core::{EventStreamOptions, HealthStatus, RetryPolicy, retry_with_backoff};

use super::SessionContext;
use crate::error::SupervisorError;
use crate::process::SessionEvent;
use crate::sse::sse_events;

/// Connection and reconnect limits for an event-stream session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSettings {
    pub connect_timeout: Duration,
    pub reconnect_attempts: u32,
    pub reconnect_interval: Duration,
}

/// An open event stream and the task pumping it.
#[derive(Debug)]
pub struct StreamSession {
    task: JoinHandle<()>,
    guard: DropGuard,
}

impl StreamSession {
    /// Close the stream and wait for the pump task to finish.
    pub async fn stop(self) -> Result<(), SupervisorError> {
        let Self { guard, task } = self;
        drop(guard);
        task.await
            .map_err(|e| SupervisorError::StopFailed(e.to_string()))
    }
}

/// Open the stream. Returns once it is ready, with status set to `Ready`.
///
/// `client` must not carry a total request timeout, or the stream would be
/// cut off after it.
pub async fn open(
    ctx: &SessionContext,
    client: reqwest::Client,
    options: &EventStreamOptions,
    settings: StreamSettings,
) -> Result<StreamSession, SupervisorError> {
    let response = connect(&client, &options.url, &options.headers, settings.connect_timeout).await?;
    ctx.set_status(HealthStatus::Ready);

    let cancel = CancellationToken::new();
    let task = tokio::spawn(run(
        ctx.clone(),
        client,
        options.url.clone(),
        options.headers.clone(),
        settings,
        response,
        cancel.clone(),
    ));

    Ok(StreamSession {
        task,
        guard: cancel.drop_guard(),
    })
}

async fn connect(
    client: &reqwest::Client,
    url: &str,
    headers: &BTreeMap<String, String>,
    timeout: Duration,
) -> Result<reqwest::Response, SupervisorError> {
    let mut request = client.get(url).header(ACCEPT, "text/event-stream");
    for (name, value) in headers {
        request = request.header(name, value);
    }

    let response = tokio::time::timeout(timeout, request.send())
        .await
        .map_err(|_| SupervisorError::ConnectTimeout {
            url: url.to_string(),
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        })?
        .map_err(|e| SupervisorError::Transport(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(SupervisorError::Transport(format!(
            "{url} returned {status}"
        )));
    }

    Ok(response)
}

async fn run(
    ctx: SessionContext,
    client: reqwest::Client,
    url: String,
    headers: BTreeMap<String, String>,
    settings: StreamSettings,
    mut response: reqwest::Response,
    cancel: CancellationToken,
) {
    loop {
        let dropped = tokio::select! {
            () = cancel.cancelled() => None,
            reason = pump(&ctx, response) => Some(reason),
        };
        let Some(reason) = dropped else {
            break;
        };

        ctx.set_status(HealthStatus::Degraded);
        warn!(server = %ctx.server, reason = %reason, "Event stream dropped, reconnecting");

        let policy = RetryPolicy::new(settings.reconnect_attempts, settings.reconnect_interval);
        let reconnect = async {
            tokio::time::sleep(settings.reconnect_interval).await;
            retry_with_backoff(
                policy,
                "event-stream reconnect",
                |attempt| {
                    debug!(server = %ctx.server, attempt, "Reconnecting event stream");
                    connect(&client, &url, &headers, settings.connect_timeout)
                },
                |_| true,
            )
            .await
        };

        let outcome = tokio::select! {
            () = cancel.cancelled() => None,
            result = reconnect => Some(result),
        };

        match outcome {
            None => break,
            Some(Ok(reopened)) => {
                info!(server = %ctx.server, "Event stream reconnected");
                ctx.set_status(HealthStatus::Ready);
                response = reopened;
            }
            Some(Err(e)) => {
                error!(
                    server = %ctx.server,
                    attempts = settings.reconnect_attempts,
                    error = %e,
                    "Event stream reconnect attempts exhausted"
                );
                break;
            }
        }
    }

    ctx.set_status(HealthStatus::Stopped);
    ctx.capture.emit(SessionEvent::Closed);
}

/// Forward events until the stream ends. Returns why it ended.
async fn pump(ctx: &SessionContext, response: reqwest::Response) -> String {
    let events = sse_events(response);
    futures_util::pin_mut!(events);

    while let Some(item) = events.next().await {
        match item {
            Ok(event) => {
                debug!(server = %ctx.server, event = %event.event, "Stream event");
                ctx.capture.emit(SessionEvent::Message {
                    event: event.event,
                    data: event.data,
                });
            }
            Err(e) => return e,
        }
    }

    "stream closed by server".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const SSE_HEAD: &str = "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nCache-Control: no-cache\r\n\r\n";

    fn settings() -> StreamSettings {
        StreamSettings {
            connect_timeout: Duration::from_secs(2),
            reconnect_attempts: 3,
            reconnect_interval: Duration::from_millis(50),
        }
    }

    #[tokio::test]
    async fn test_events_forwarded_then_stop() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/sse", listener.local_addr().unwrap());
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            socket.write_all(SSE_HEAD.as_bytes()).await.unwrap();
            socket
                .write_all(b"event: endpoint\ndata: /messages\n\n")
                .await
                .unwrap();
            // Hold the connection open
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let (ctx, status, mut events) = SessionContext::new("remote", 10);
        let session = open(&ctx, reqwest::Client::new(), &EventStreamOptions::new(url), settings())
            .await
            .unwrap();
        assert_eq!(*status.borrow(), HealthStatus::Ready);

        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            SessionEvent::Message {
                event: "endpoint".to_string(),
                data: "/messages".to_string(),
            }
        );

        session.stop().await.unwrap();
        assert_eq!(*status.borrow(), HealthStatus::Stopped);
    }

    #[tokio::test]
    async fn test_connect_refused_fails_open() {
        let port = crate::process::find_free_port().unwrap();
        let (ctx, _status, _events) = SessionContext::new("nobody", 10);
        let options = EventStreamOptions::new(format!("http://127.0.0.1:{port}/sse"));

        let err = open(&ctx, reqwest::Client::new(), &options, settings())
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::Transport(_)));
    }

    #[tokio::test]
    async fn test_gives_up_after_reconnect_budget() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/sse", listener.local_addr().unwrap());
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            socket.write_all(SSE_HEAD.as_bytes()).await.unwrap();
            // Dropping both the socket and the listener refuses every reconnect
        });

        let (ctx, mut status, _events) = SessionContext::new("flaky", 10);
        let _session = open(&ctx, reqwest::Client::new(), &EventStreamOptions::new(url), settings())
            .await
            .unwrap();

        tokio::time::timeout(
            Duration::from_secs(5),
            status.wait_for(|s| *s == HealthStatus::Stopped),
        )
        .await
        .unwrap()
        .unwrap();
    }
}
