//! JSON-RPC over HTTP POST (streamable HTTP transport).
//!
//! Each request is one POST. The server may answer with a JSON body or with
//! an event stream carrying the response; both are accepted. A session id
//! handed out by the server is echoed on every later request.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use toolmesh_core::ClientError;
use toolmesh_runtime::sse_events;

use super::RpcTransport;
use super::jsonrpc::{JsonRpcRequest, into_result, response_id};

pub const SESSION_HEADER: &str = "mcp-session-id";

pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    headers: BTreeMap<String, String>,
    session_id: Mutex<Option<String>>,
    next_id: AtomicU64,
}

impl HttpTransport {
    pub fn new(client: reqwest::Client, url: &str, headers: BTreeMap<String, String>) -> Self {
        Self {
            client,
            url: url.to_string(),
            headers,
            session_id: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    async fn post(&self, message: &Value) -> Result<reqwest::Response, ClientError> {
        let mut request = self
            .client
            .post(&self.url)
            .header(ACCEPT, "application/json, text/event-stream")
            .json(message);
        for (name, value) in &self.headers {
            request = request.header(name, value);
        }
        if let Some(session) = self.session_id.lock().await.as_deref() {
            request = request.header(SESSION_HEADER, session);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        if let Some(session) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            *self.session_id.lock().await = Some(session.to_string());
        }

        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Transport(format!(
                "{} returned {status}",
                self.url
            )));
        }

        Ok(response)
    }

    async fn exchange(&self, id: u64, message: &Value) -> Result<Value, ClientError> {
        let response = self.post(message).await?;

        let is_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));

        if !is_stream {
            let body: Value = response
                .json()
                .await
                .map_err(|e| ClientError::Protocol(e.to_string()))?;
            return into_result(body);
        }

        let events = sse_events(response);
        futures_util::pin_mut!(events);
        while let Some(event) = events.next().await {
            let event = event.map_err(ClientError::Transport)?;
            if event.event != "message" {
                continue;
            }
            let Ok(body) = serde_json::from_str::<Value>(&event.data) else {
                debug!(url = %self.url, "Ignoring non-JSON stream message");
                continue;
            };
            if response_id(&body) == Some(id) {
                return into_result(body);
            }
        }

        Err(ClientError::Transport(
            "Response stream ended without a reply".to_string(),
        ))
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, ClientError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let message = JsonRpcRequest::call(id, method, params).to_value()?;

        tokio::time::timeout(timeout, self.exchange(id, &message))
            .await
            .map_err(|_| ClientError::timeout(method, timeout))?
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
            .map(|_| ())
    }

    async fn close(&self) -> Result<(), ClientError> {
        let Some(session) = self.session_id.lock().await.take() else {
            return Ok(());
        };

        // Ending the session is a courtesy; servers may not support DELETE
        let result = self
            .client
            .delete(&self.url)
            .header(SESSION_HEADER, &session)
            .send()
            .await;
        if let Err(e) = result {
            debug!(url = %self.url, error = %e, "Session teardown request failed");
        }
        Ok(())
    }
}
