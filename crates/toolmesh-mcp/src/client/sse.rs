//! JSON-RPC over a server-sent event stream.
//!
//! The client holds a GET stream open. The server's first `endpoint` event
//! names the URL requests are POSTed to; responses come back as `message`
//! events and are matched to their request by id.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Url;
use reqwest::header::ACCEPT;
use serde_json::Value;
use tokio::sync::{Mutex, oneshot};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, warn};

use toolmesh_core::ClientError;
use toolmesh_runtime::sse_events;

use super::RpcTransport;
use super::jsonrpc::{JsonRpcRequest, into_result, response_id};

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>;

pub struct SseTransport {
    client: reqwest::Client,
    post_url: Url,
    headers: BTreeMap<String, String>,
    pending: Pending,
    next_id: AtomicU64,
    guard: std::sync::Mutex<Option<DropGuard>>,
}

impl SseTransport {
    /// Open the stream and wait for the `endpoint` event.
    pub async fn open(
        client: reqwest::Client,
        server: &str,
        url: &str,
        headers: &BTreeMap<String, String>,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let base = Url::parse(url).map_err(|e| ClientError::Transport(format!("{url}: {e}")))?;

        let mut request = client.get(base.clone()).header(ACCEPT, "text/event-stream");
        for (name, value) in headers {
            request = request.header(name, value);
        }

        let response = tokio::time::timeout(timeout, request.send())
            .await
            .map_err(|_| ClientError::timeout("connect", timeout))?
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ClientError::Transport(format!(
                "{url} returned {}",
                response.status()
            )));
        }

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let cancel = CancellationToken::new();
        let (endpoint_tx, endpoint_rx) = oneshot::channel();

        tokio::spawn(read_stream(
            server.to_string(),
            response,
            base.clone(),
            Arc::clone(&pending),
            endpoint_tx,
            cancel.clone(),
        ));

        let post_url = match tokio::time::timeout(timeout, endpoint_rx).await {
            Ok(Ok(endpoint)) => endpoint,
            Ok(Err(_)) => {
                return Err(ClientError::Protocol(
                    "Stream closed before announcing its endpoint".to_string(),
                ));
            }
            Err(_) => {
                cancel.cancel();
                return Err(ClientError::timeout("endpoint", timeout));
            }
        };
        debug!(server = %server, endpoint = %post_url, "Event stream endpoint announced");

        Ok(Self {
            client,
            post_url,
            headers: headers.clone(),
            pending,
            next_id: AtomicU64::new(1),
            guard: std::sync::Mutex::new(Some(cancel.drop_guard())),
        })
    }

    async fn post(&self, message: &Value) -> Result<(), ClientError> {
        let mut request = self.client.post(self.post_url.clone()).json(message);
        for (name, value) in &self.headers {
            request = request.header(name, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ClientError::Transport(format!(
                "{} returned {}",
                self.post_url,
                response.status()
            )));
        }
        Ok(())
    }
}

async fn read_stream(
    server: String,
    response: reqwest::Response,
    base: Url,
    pending: Pending,
    endpoint: oneshot::Sender<Url>,
    cancel: CancellationToken,
) {
    let events = sse_events(response);
    futures_util::pin_mut!(events);
    let mut endpoint = Some(endpoint);

    loop {
        let next = tokio::select! {
            () = cancel.cancelled() => break,
            next = events.next() => next,
        };

        let event = match next {
            Some(Ok(event)) => event,
            Some(Err(e)) => {
                warn!(server = %server, error = %e, "Event stream failed");
                break;
            }
            None => break,
        };

        match event.event.as_str() {
            "endpoint" => match base.join(event.data.trim()) {
                Ok(url) => {
                    if let Some(tx) = endpoint.take() {
                        let _ = tx.send(url);
                    }
                }
                Err(e) => warn!(server = %server, error = %e, "Unusable endpoint event"),
            },
            "message" => {
                let Ok(message) = serde_json::from_str::<Value>(&event.data) else {
                    debug!(server = %server, "Ignoring non-JSON stream message");
                    continue;
                };
                if let Some(id) = response_id(&message) {
                    if let Some(waiter) = pending.lock().await.remove(&id) {
                        let _ = waiter.send(message);
                    }
                }
            }
            other => debug!(server = %server, event = other, "Ignoring stream event"),
        }
    }

    // Wake every waiter with a closed-channel error
    pending.lock().await.clear();
    debug!(server = %server, "Event stream closed");
}

#[async_trait]
impl RpcTransport for SseTransport {
    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, ClientError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let message = JsonRpcRequest::call(id, method, params).to_value()?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        // The POST and the routed reply share one bound
        let exchange = async {
            self.post(&message).await?;
            rx.await.map_err(|_| {
                ClientError::Transport(format!(
                    "Event stream closed before '{method}' was answered"
                ))
            })
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(Ok(response)) => into_result(response),
            Ok(Err(e)) => {
                self.pending.lock().await.remove(&id);
                Err(e)
            }
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(ClientError::timeout(method, timeout))
            }
        }
    }

    async fn notify(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<(), ClientError> {
        let message = JsonRpcRequest::notification(method, params).to_value()?;
        tokio::time::timeout(timeout, self.post(&message))
            .await
            .map_err(|_| ClientError::timeout(method, timeout))?
    }

    async fn close(&self) -> Result<(), ClientError> {
        let guard = self
            .guard
            .lock()
            .map_err(|_| ClientError::Transport("close lock poisoned".to_string()))?
            .take();
        drop(guard);
        Ok(())
    }
}
