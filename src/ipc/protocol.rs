//! Native wire messages, shared by the framed (TCP) and line (stdio)
//! transports.
//!
//! Inbound:
//! ```json
//! {"id": 1, "tool": "echo", "arguments": {"text": "hi"}}
//! {"id": 2, "type": "discover"}
//! ```
//! Outbound:
//! ```json
//! {"id": 1, "result": {"text": "hi"}}
//! {"id": 3, "error": {"kind": "client-fault", "message": "...", "retryable": false}}
//! {"id": 2, "tools": [ ... ]}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dispatch::{Dispatcher, ToolError, ToolRequest, ToolResponse, ToolResult};
use crate::tools::ToolDescriptor;
use crate::types::CorrelationId;

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Call(ToolRequest),
    Discover { id: CorrelationId },
}

/// An inbound message that could not be turned into a request.
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    /// Best-effort id; `null` when none could be read.
    pub id: CorrelationId,
    pub message: String,
}

impl Rejection {
    pub fn new(id: CorrelationId, message: impl Into<String>) -> Self {
        Self {
            id,
            message: message.into(),
        }
    }
}

/// An outbound message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Outbound {
    Result { id: CorrelationId, result: Value },
    Error { id: CorrelationId, error: ToolError },
    Catalog { id: CorrelationId, tools: Vec<ToolDescriptor> },
}

impl Outbound {
    pub fn id(&self) -> &CorrelationId {
        match self {
            Outbound::Result { id, .. } | Outbound::Error { id, .. } | Outbound::Catalog { id, .. } => id,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Outbound::Error { .. })
    }
}

impl From<ToolResponse> for Outbound {
    fn from(response: ToolResponse) -> Self {
        match response.result {
            ToolResult::Ok(result) => Outbound::Result {
                id: response.id,
                result,
            },
            ToolResult::Err(error) => Outbound::Error {
                id: response.id,
                error,
            },
        }
    }
}

impl From<Rejection> for Outbound {
    fn from(rejection: Rejection) -> Self {
        Outbound::Error {
            id: rejection.id,
            error: ToolError::client_fault(rejection.message),
        }
    }
}

/// Decode a structured message into a request.
pub fn decode(message: Value) -> Result<Inbound, Rejection> {
    let Value::Object(mut fields) = message else {
        return Err(Rejection::new(
            CorrelationId::null(),
            "message must be an object",
        ));
    };

    let id = match fields.remove("id") {
        None | Some(Value::Null) => {
            return Err(Rejection::new(CorrelationId::null(), "missing field: id"))
        }
        Some(raw) => CorrelationId::from_value(raw)
            .map_err(|e| Rejection::new(CorrelationId::null(), e))?,
    };

    let kind = match fields.remove("type") {
        None => "call".to_string(),
        Some(Value::String(kind)) => kind,
        Some(_) => return Err(Rejection::new(id, "field 'type' must be a string")),
    };

    match kind.as_str() {
        "call" => {
            let tool = match fields.remove("tool") {
                Some(Value::String(tool)) => tool,
                Some(_) => return Err(Rejection::new(id, "field 'tool' must be a string")),
                None => return Err(Rejection::new(id, "missing field: tool")),
            };
            let arguments = fields.remove("arguments").unwrap_or(Value::Null);
            Ok(Inbound::Call(ToolRequest {
                id,
                tool,
                arguments,
            }))
        }
        "discover" => Ok(Inbound::Discover { id }),
        other => Err(Rejection::new(
            id,
            format!("unknown message type: {}", other),
        )),
    }
}

/// Decode, dispatch and build the single response for one message.
pub async fn respond(dispatcher: &Dispatcher, message: Value) -> Outbound {
    match decode(message) {
        Ok(Inbound::Call(request)) => dispatcher.dispatch(request).await.into(),
        Ok(Inbound::Discover { id }) => Outbound::Catalog {
            id,
            tools: dispatcher.catalog().into_iter().cloned().collect(),
        },
        Err(rejection) => {
            tracing::debug!(id = %rejection.id, "rejected message: {}", rejection.message);
            rejection.into()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::ErrorKind;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_decode_call() {
        let inbound = decode(json!({"id": 1, "tool": "echo", "arguments": {"text": "hi"}})).unwrap();
        assert_eq!(
            inbound,
            Inbound::Call(ToolRequest::new(1, "echo", json!({"text": "hi"})))
        );
    }

    #[test]
    fn test_decode_call_without_arguments() {
        let Inbound::Call(request) = decode(json!({"id": "a", "type": "call", "tool": "t"})).unwrap()
        else {
            panic!("expected a call");
        };
        assert_eq!(request.arguments, Value::Null);
        assert_eq!(request.id, CorrelationId::from("a"));
    }

    #[test]
    fn test_decode_discover() {
        assert_eq!(
            decode(json!({"id": 9, "type": "discover"})).unwrap(),
            Inbound::Discover { id: CorrelationId::from(9) }
        );
    }

    #[test]
    fn test_decode_rejections_keep_id_when_known() {
        let missing_tool = decode(json!({"id": 4})).unwrap_err();
        assert_eq!(missing_tool.id, CorrelationId::from(4));

        let bad_type = decode(json!({"id": 5, "type": "subscribe"})).unwrap_err();
        assert_eq!(bad_type.id, CorrelationId::from(5));
        assert!(bad_type.message.contains("subscribe"));

        let no_id = decode(json!({"tool": "echo"})).unwrap_err();
        assert_eq!(no_id.id, CorrelationId::null());

        let not_object = decode(json!([1, 2])).unwrap_err();
        assert_eq!(not_object.id, CorrelationId::null());
    }

    #[test]
    fn test_outbound_shapes() {
        let ok = Outbound::from(ToolResponse {
            id: CorrelationId::from(1),
            result: ToolResult::Ok(json!({"text": "hi"})),
        });
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            json!({"id": 1, "result": {"text": "hi"}})
        );

        let err = Outbound::from(Rejection::new(CorrelationId::from(2), "Unknown tool: missing"));
        assert_eq!(
            serde_json::to_value(&err).unwrap(),
            json!({
                "id": 2,
                "error": {"kind": "client-fault", "message": "Unknown tool: missing", "retryable": false}
            })
        );
    }

    #[test]
    fn test_outbound_parses_back() {
        let value = json!({"id": 3, "error": {"kind": "timeout", "message": "slow", "retryable": true}});
        let outbound: Outbound = serde_json::from_value(value).unwrap();
        match outbound {
            Outbound::Error { error, .. } => assert_eq!(error.kind, ErrorKind::Timeout),
            other => panic!("unexpected {:?}", other),
        }
    }
}
