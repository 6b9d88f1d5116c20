//! JSON-RPC 2.0 message model.
//!
//! Only what is needed to route and answer a request: the tool and resource
//! payloads inside `params`/`result` stay opaque JSON.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol version marker carried by every message.
pub const JSONRPC_VERSION: &str = "2.0";

/// Method name of the session handshake.
pub const INITIALIZE_METHOD: &str = "initialize";

/// Request identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::String(s) => f.write_str(s),
        }
    }
}

/// JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorObject {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INTERNAL_ERROR: i64 = -32603;
    pub const SESSION_NOT_FOUND: i64 = -32001;

    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn parse_error(detail: impl Into<String>) -> Self {
        Self::new(Self::PARSE_ERROR, "Parse error").with_data(Value::String(detail.into()))
    }

    pub fn invalid_request(detail: impl Into<String>) -> Self {
        Self::new(Self::INVALID_REQUEST, "Invalid Request").with_data(Value::String(detail.into()))
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(Self::METHOD_NOT_FOUND, format!("Method not found: {}", method))
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(Self::INTERNAL_ERROR, message)
    }

    pub fn session_not_found() -> Self {
        Self::new(Self::SESSION_NOT_FOUND, "Session not found")
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: RequestId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }

    pub fn is_initialize(&self) -> bool {
        self.method == INITIALIZE_METHOD
    }
}

/// A message without an `id`. Anything carrying an `id` key that did not
/// parse as a request is rejected instead of being read as one of these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: RequestId,
    pub result: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcErrorResponse {
    pub jsonrpc: String,
    pub id: Option<RequestId>,
    pub error: ErrorObject,
}

/// Any JSON-RPC message.
///
/// Variant order matters for untagged deserialization: a request is the
/// only shape with both `id` and `method`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    Request(JsonRpcRequest),
    Notification(JsonRpcNotification),
    Response(JsonRpcResponse),
    Error(JsonRpcErrorResponse),
}

impl JsonRpcMessage {
    pub fn response(id: RequestId, result: Value) -> Self {
        Self::Response(JsonRpcResponse {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result,
        })
    }

    pub fn error(id: Option<RequestId>, error: ErrorObject) -> Self {
        Self::Error(JsonRpcErrorResponse {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            error,
        })
    }

    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self::Notification(JsonRpcNotification::new(method, params))
    }

    /// Id this message answers, if it is a response or error.
    pub fn reply_id(&self) -> Option<&RequestId> {
        match self {
            Self::Response(r) => Some(&r.id),
            Self::Error(e) => e.id.as_ref(),
            _ => None,
        }
    }

    /// Whether this message is a final answer rather than a notification.
    pub fn is_reply(&self) -> bool {
        matches!(self, Self::Response(_) | Self::Error(_))
    }

    fn jsonrpc(&self) -> &str {
        match self {
            Self::Request(m) => &m.jsonrpc,
            Self::Notification(m) => &m.jsonrpc,
            Self::Response(m) => &m.jsonrpc,
            Self::Error(m) => &m.jsonrpc,
        }
    }
}

/// A request body: one message or a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageBatch {
    pub messages: Vec<JsonRpcMessage>,
    pub is_batch: bool,
}

impl MessageBatch {
    /// Requests in the body, in order.
    pub fn requests(&self) -> impl Iterator<Item = &JsonRpcRequest> {
        self.messages.iter().filter_map(|m| match m {
            JsonRpcMessage::Request(r) => Some(r),
            _ => None,
        })
    }
}

/// Parse a raw request body.
///
/// Returns the JSON-RPC error to send back when the body is not valid JSON
/// or not a well-formed message/batch.
pub fn parse_body(body: &[u8]) -> Result<MessageBatch, ErrorObject> {
    let value: Value =
        serde_json::from_slice(body).map_err(|e| ErrorObject::parse_error(e.to_string()))?;

    let (values, is_batch) = match value {
        Value::Array(items) if items.is_empty() => {
            return Err(ErrorObject::invalid_request("empty batch"));
        }
        Value::Array(items) => (items, true),
        other => (vec![other], false),
    };

    let messages = values
        .into_iter()
        .map(|v| {
            let message: JsonRpcMessage = serde_json::from_value(v)
                .map_err(|e| ErrorObject::invalid_request(e.to_string()))?;
            if message.jsonrpc() != JSONRPC_VERSION {
                return Err(ErrorObject::invalid_request("jsonrpc must be \"2.0\""));
            }
            Ok(message)
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(MessageBatch { messages, is_batch })
}

/// Whether a body is an initialize-equivalent request.
///
/// True for a single `initialize` request or a batch containing one.
/// Anything unparsable is not an initialize request.
pub fn is_initialize_request(body: &[u8]) -> bool {
    parse_body(body)
        .map(|batch| batch.requests().any(JsonRpcRequest::is_initialize))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bytes(v: Value) -> Vec<u8> {
        serde_json::to_vec(&v).unwrap()
    }

    #[test]
    fn test_parse_single_request() {
        let batch =
            parse_body(&bytes(json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}))).unwrap();
        assert!(!batch.is_batch);
        assert_eq!(batch.messages.len(), 1);
        assert!(matches!(
            &batch.messages[0],
            JsonRpcMessage::Request(r) if r.method == "ping" && r.id == RequestId::Number(1)
        ));
    }

    #[test]
    fn test_parse_distinguishes_shapes() {
        let batch = parse_body(&bytes(json!([
            {"jsonrpc": "2.0", "id": "a", "method": "tools/list"},
            {"jsonrpc": "2.0", "method": "notifications/initialized"},
            {"jsonrpc": "2.0", "id": 7, "result": {}},
            {"jsonrpc": "2.0", "id": 8, "error": {"code": -1, "message": "no"}}
        ])))
        .unwrap();

        assert!(batch.is_batch);
        assert!(matches!(batch.messages[0], JsonRpcMessage::Request(_)));
        assert!(matches!(batch.messages[1], JsonRpcMessage::Notification(_)));
        assert!(matches!(batch.messages[2], JsonRpcMessage::Response(_)));
        assert!(matches!(batch.messages[3], JsonRpcMessage::Error(_)));
        assert_eq!(batch.requests().count(), 1);
    }

    #[test]
    fn test_parse_errors() {
        let err = parse_body(b"{ not json").unwrap_err();
        assert_eq!(err.code, ErrorObject::PARSE_ERROR);

        let err = parse_body(b"[]").unwrap_err();
        assert_eq!(err.code, ErrorObject::INVALID_REQUEST);

        let err = parse_body(&bytes(json!({"hello": "world"}))).unwrap_err();
        assert_eq!(err.code, ErrorObject::INVALID_REQUEST);

        let err = parse_body(&bytes(json!({"jsonrpc": "1.0", "id": 1, "method": "ping"})))
            .unwrap_err();
        assert_eq!(err.code, ErrorObject::INVALID_REQUEST);
    }

    #[test]
    fn test_unusable_request_id_is_rejected() {
        for id in [json!(null), json!(1.5), json!(true), json!({"n": 1})] {
            let body = bytes(json!({"jsonrpc": "2.0", "id": id, "method": "ping"}));
            let err = parse_body(&body).unwrap_err();
            assert_eq!(err.code, ErrorObject::INVALID_REQUEST, "id {}", id);
        }

        // A batch is rejected as a whole.
        let body = bytes(json!([
            {"jsonrpc": "2.0", "id": 1, "method": "ping"},
            {"jsonrpc": "2.0", "id": null, "method": "ping"}
        ]));
        assert!(parse_body(&body).is_err());

        // Error replies may still carry a null id.
        let body = bytes(json!({"jsonrpc": "2.0", "id": null, "error": {"code": -1, "message": "x"}}));
        assert!(matches!(
            parse_body(&body).unwrap().messages[0],
            JsonRpcMessage::Error(_)
        ));
    }

    #[test]
    fn test_is_initialize_request() {
        let init = json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}});
        assert!(is_initialize_request(&bytes(init.clone())));
        assert!(is_initialize_request(&bytes(json!([init]))));

        let ping = json!({"jsonrpc": "2.0", "id": 1, "method": "ping"});
        assert!(!is_initialize_request(&bytes(ping)));

        let as_notification = json!({"jsonrpc": "2.0", "method": "initialize"});
        assert!(!is_initialize_request(&bytes(as_notification)));

        assert!(!is_initialize_request(b"garbage"));
    }

    #[test]
    fn test_error_message_serialization() {
        let msg = JsonRpcMessage::error(None, ErrorObject::session_not_found());
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["jsonrpc"], "2.0");
        assert_eq!(json["id"], Value::Null);
        assert_eq!(json["error"]["code"], -32001);
        assert!(json["error"].get("data").is_none());
    }

    #[test]
    fn test_reply_id() {
        let response = JsonRpcMessage::response(RequestId::String("x".into()), json!({}));
        assert_eq!(response.reply_id(), Some(&RequestId::String("x".into())));
        assert!(response.is_reply());

        let note = JsonRpcMessage::notification("progress", None);
        assert!(note.reply_id().is_none());
        assert!(!note.is_reply());
    }
}
