//! JSON-RPC 2.0 message shapes and MCP payload decoding.
//!
//! Reference: <https://modelcontextprotocol.io/>

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use toolmesh_core::{ClientError, ToolCallResult, ToolDescriptor};

/// Protocol revision sent in `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// JSON-RPC 2.0 request. A notification is a request without an id.
#[derive(Debug, Serialize)]
pub struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

impl<'a> JsonRpcRequest<'a> {
    pub const fn call(id: u64, method: &'a str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id: Some(id),
            method,
            params,
        }
    }

    pub const fn notification(method: &'a str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id: None,
            method,
            params,
        }
    }

    pub fn to_value(&self) -> Result<Value, ClientError> {
        serde_json::to_value(self).map_err(|e| ClientError::Protocol(e.to_string()))
    }
}

/// JSON-RPC 2.0 response.
#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// Unwrap a response message into its `result`, or the server's error.
pub fn into_result(message: Value) -> Result<Value, ClientError> {
    let response: JsonRpcResponse = serde_json::from_value(message)
        .map_err(|e| ClientError::Protocol(format!("Malformed response: {e}")))?;

    if let Some(error) = response.error {
        return Err(ClientError::Server {
            code: error.code,
            message: error.message,
        });
    }

    Ok(response.result.unwrap_or(Value::Null))
}

/// Response id, if the message is a response.
pub fn response_id(message: &Value) -> Option<u64> {
    if message.get("result").is_none() && message.get("error").is_none() {
        return None;
    }
    message.get("id").and_then(Value::as_u64)
}

/// Parameters of the `initialize` request.
pub fn initialize_params(client_name: &str) -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "clientInfo": {
            "name": client_name,
            "version": env!("CARGO_PKG_VERSION")
        },
        "capabilities": {}
    })
}

/// MCP initialize result.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    #[serde(default)]
    pub protocol_version: Option<String>,
    #[serde(default)]
    pub server_info: Option<ServerIdentity>,
    #[serde(default)]
    pub capabilities: ServerCapabilities,
}

/// Server information from initialize.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerIdentity {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

/// Server capabilities. Only `tools` matters here.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerCapabilities {
    #[serde(default)]
    pub tools: Option<Value>,
}

/// One page of `tools/list`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsPage {
    #[serde(default)]
    pub tools: Vec<ToolDescriptor>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

pub fn parse_initialize(result: Value) -> Result<InitializeResult, ClientError> {
    serde_json::from_value(result)
        .map_err(|e| ClientError::Protocol(format!("Malformed initialize result: {e}")))
}

pub fn parse_tools_page(result: Value) -> Result<ToolsPage, ClientError> {
    serde_json::from_value(result)
        .map_err(|e| ClientError::Protocol(format!("Malformed tools/list result: {e}")))
}

pub fn parse_call_result(result: Value) -> Result<ToolCallResult, ClientError> {
    serde_json::from_value(result)
        .map_err(|e| ClientError::Protocol(format!("Malformed tools/call result: {e}")))
}
