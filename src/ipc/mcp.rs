//! Model Context Protocol flavor of the line transport.
//!
//! JSON-RPC 2.0 envelopes around the same dispatcher: `initialize`, `ping`,
//! `tools/list` and `tools/call`. Messages without an `id` are notifications
//! and never get a response.

use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::dispatch::{Dispatcher, ToolRequest, ToolResult};
use crate::types::CorrelationId;

pub const JSONRPC_VERSION: &str = "2.0";
/// Protocol revision advertised when the client does not name one.
pub const DEFAULT_PROTOCOL_VERSION: &str = "2024-11-05";

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;

/// Identity reported in the `initialize` result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

impl ServerInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RpcResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
            }),
        }
    }
}

/// Handle one JSON-RPC message. `None` for notifications.
pub async fn handle(dispatcher: &Dispatcher, server: &ServerInfo, message: Value) -> Option<RpcResponse> {
    let Value::Object(mut fields) = message else {
        return Some(RpcResponse::failure(Value::Null, INVALID_REQUEST, "request must be an object"));
    };

    let id = fields.remove("id");
    let method = match fields.remove("method") {
        Some(Value::String(method)) => method,
        _ => {
            return id.map(|id| RpcResponse::failure(id, INVALID_REQUEST, "missing method"));
        }
    };
    let params = fields.remove("params").unwrap_or(Value::Null);

    let Some(id) = id else {
        tracing::debug!(method = %method, "notification");
        return None;
    };

    let response = match method.as_str() {
        "initialize" => RpcResponse::success(id, initialize(server, &params)),
        "ping" => RpcResponse::success(id, json!({})),
        "tools/list" => RpcResponse::success(id, list_tools(dispatcher)),
        "tools/call" => match call_tool(dispatcher, &id, params).await {
            Ok(result) => RpcResponse::success(id, result),
            Err(message) => RpcResponse::failure(id, INVALID_PARAMS, message),
        },
        other => RpcResponse::failure(id, METHOD_NOT_FOUND, format!("Method not found: {}", other)),
    };
    Some(response)
}

fn initialize(server: &ServerInfo, params: &Value) -> Value {
    let version = params
        .get("protocolVersion")
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_PROTOCOL_VERSION);
    json!({
        "protocolVersion": version,
        "capabilities": {"tools": {"listChanged": false}},
        "serverInfo": server,
    })
}

fn list_tools(dispatcher: &Dispatcher) -> Value {
    let tools: Vec<Value> = dispatcher
        .catalog()
        .into_iter()
        .map(|descriptor| {
            json!({
                "name": descriptor.name,
                "description": descriptor.description,
                "inputSchema": descriptor.input_schema(),
            })
        })
        .collect();
    json!({ "tools": tools })
}

async fn call_tool(dispatcher: &Dispatcher, id: &Value, params: Value) -> Result<Value, String> {
    let mut params = match params {
        Value::Object(params) => params,
        Value::Null => Map::new(),
        _ => return Err("params must be an object".to_string()),
    };
    let name = match params.remove("name") {
        Some(Value::String(name)) => name,
        _ => return Err("missing tool name".to_string()),
    };
    let arguments = params.remove("arguments").unwrap_or(Value::Null);
    let correlation = CorrelationId::from_value(id.clone()).unwrap_or_else(|_| CorrelationId::null());

    let response = dispatcher
        .dispatch(ToolRequest {
            id: correlation,
            tool: name,
            arguments,
        })
        .await;

    let (text, is_error) = match response.result {
        ToolResult::Ok(Value::String(text)) => (text, false),
        ToolResult::Ok(value) => (
            serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string()),
            false,
        ),
        ToolResult::Err(error) => (format!("{}: {}", error.kind, error.message), true),
    };
    Ok(json!({
        "content": [{"type": "text", "text": text}],
        "isError": is_error,
    }))
}
