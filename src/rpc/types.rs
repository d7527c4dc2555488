//! JSON-RPC 2.0 envelope types.

use crate::error::InvokeError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

pub const JSONRPC_VERSION: &str = "2.0";

// Standard JSON-RPC 2.0 error codes
pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

// Server-defined codes (-32000 to -32099)
pub const SERVER_BUSY: i64 = -32000;
pub const EXECUTION_TIMEOUT: i64 = -32001;

/// Request identifier. `Null` is a valid (if discouraged) id distinct from an
/// absent one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(serde_json::Number),
    String(String),
    Null,
}

/// A parsed request or notification.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonRpcRequest {
    /// `None` marks a notification.
    pub id: Option<RequestId>,
    pub method: String,
    /// Object or array; an absent `params` becomes an empty object.
    pub params: Value,
}

impl JsonRpcRequest {
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    /// Validate the envelope of one request object.
    ///
    /// On failure the returned id is whatever could be salvaged so the error
    /// response can still be correlated.
    pub fn from_value(value: Value) -> Result<Self, (RequestId, RpcError)> {
        let Value::Object(mut obj) = value else {
            return Err((
                RequestId::Null,
                RpcError::invalid_request("request must be a JSON object"),
            ));
        };

        let id = match obj.remove("id") {
            None => None,
            Some(Value::Null) => Some(RequestId::Null),
            Some(Value::Number(n)) => Some(RequestId::Number(n)),
            Some(Value::String(s)) => Some(RequestId::String(s)),
            Some(_) => {
                return Err((
                    RequestId::Null,
                    RpcError::invalid_request("id must be a string, number or null"),
                ))
            }
        };
        let reply_id = id.clone().unwrap_or(RequestId::Null);

        if obj.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
            return Err((
                reply_id,
                RpcError::invalid_request("jsonrpc must be exactly \"2.0\""),
            ));
        }

        let method = match obj.remove("method") {
            Some(Value::String(method)) => method,
            _ => {
                return Err((reply_id, RpcError::invalid_request("method must be a string")));
            }
        };

        let params = match obj.remove("params") {
            None | Some(Value::Null) => Value::Object(Map::new()),
            Some(params @ (Value::Object(_) | Value::Array(_))) => params,
            Some(_) => {
                return Err((
                    reply_id,
                    RpcError::invalid_request("params must be an object or array"),
                ))
            }
        };

        Ok(Self { id, method, params })
    }
}

/// Exactly one of `result` or `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponsePayload {
    Result(Value),
    Error(RpcError),
}

/// A response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: RequestId,
    #[serde(flatten)]
    pub payload: ResponsePayload,
}

impl JsonRpcResponse {
    pub fn result(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            payload: ResponsePayload::Result(result),
        }
    }

    pub fn error(id: RequestId, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            payload: ResponsePayload::Error(error),
        }
    }

    pub fn error_code(&self) -> Option<i64> {
        match &self.payload {
            ResponsePayload::Error(e) => Some(e.code),
            ResponsePayload::Result(_) => None,
        }
    }
}

/// JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn parse_error(detail: impl std::fmt::Display) -> Self {
        Self::new(PARSE_ERROR, format!("Parse error: {detail}"))
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(INVALID_REQUEST, message)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, format!("Method not found: {method}"))
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(INTERNAL_ERROR, message)
    }

    pub fn server_busy(message: impl Into<String>) -> Self {
        Self {
            data: Some(json!({ "retryable": true })),
            ..Self::new(SERVER_BUSY, message)
        }
    }

    pub fn execution_timeout(message: impl Into<String>) -> Self {
        Self::new(EXECUTION_TIMEOUT, message)
    }
}

impl From<InvokeError> for RpcError {
    fn from(e: InvokeError) -> Self {
        let message = e.to_string();
        match e {
            InvokeError::Busy(_) => Self::server_busy(message),
            InvokeError::Timeout(_) => Self::execution_timeout(message),
            InvokeError::Internal(_) => Self::internal(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GateBusy;
    use std::time::Duration;

    #[test]
    fn parses_request_with_numeric_id() {
        let req = JsonRpcRequest::from_value(json!({
            "jsonrpc": "2.0", "id": 7, "method": "ping"
        }))
        .unwrap();
        assert_eq!(req.id, Some(RequestId::Number(serde_json::Number::from(7u64))));
        assert_eq!(req.method, "ping");
        assert_eq!(req.params, json!({}));
        assert!(!req.is_notification());
    }

    #[test]
    fn missing_id_is_notification_null_id_is_not() {
        let note = JsonRpcRequest::from_value(json!({
            "jsonrpc": "2.0", "method": "notifications/initialized"
        }))
        .unwrap();
        assert!(note.is_notification());

        let null_id = JsonRpcRequest::from_value(json!({
            "jsonrpc": "2.0", "id": null, "method": "ping"
        }))
        .unwrap();
        assert_eq!(null_id.id, Some(RequestId::Null));
    }

    #[test]
    fn rejects_wrong_version_keeping_id() {
        let (id, err) = JsonRpcRequest::from_value(json!({
            "jsonrpc": "1.0", "id": "a", "method": "ping"
        }))
        .unwrap_err();
        assert_eq!(id, RequestId::String("a".into()));
        assert_eq!(err.code, INVALID_REQUEST);
    }

    #[test]
    fn rejects_non_string_method_and_scalar_params() {
        let (_, err) =
            JsonRpcRequest::from_value(json!({"jsonrpc": "2.0", "id": 1, "method": 5})).unwrap_err();
        assert_eq!(err.code, INVALID_REQUEST);

        let (_, err) = JsonRpcRequest::from_value(json!({
            "jsonrpc": "2.0", "id": 1, "method": "ping", "params": 3
        }))
        .unwrap_err();
        assert_eq!(err.code, INVALID_REQUEST);

        let (id, err) = JsonRpcRequest::from_value(json!(42)).unwrap_err();
        assert_eq!(id, RequestId::Null);
        assert_eq!(err.code, INVALID_REQUEST);
    }

    #[test]
    fn response_serializes_result_xor_error() {
        let ok = serde_json::to_value(JsonRpcResponse::result(
            RequestId::String("x".into()),
            json!({"a": 1}),
        ))
        .unwrap();
        assert_eq!(ok, json!({"jsonrpc": "2.0", "id": "x", "result": {"a": 1}}));

        let err = serde_json::to_value(JsonRpcResponse::error(
            RequestId::Null,
            RpcError::method_not_found("nope"),
        ))
        .unwrap();
        assert_eq!(err["id"], Value::Null);
        assert_eq!(err["error"]["code"], METHOD_NOT_FOUND);
        assert!(err.get("result").is_none());
        assert!(err["error"].get("data").is_none());
    }

    #[test]
    fn invoke_errors_map_to_distinct_codes() {
        let busy = RpcError::from(InvokeError::Busy(GateBusy {
            waited: Duration::from_secs(2),
        }));
        assert_eq!(busy.code, SERVER_BUSY);
        assert_eq!(busy.data, Some(json!({"retryable": true})));

        let timeout = RpcError::from(InvokeError::Timeout(Duration::from_secs(60)));
        assert_eq!(timeout.code, EXECUTION_TIMEOUT);

        let internal = RpcError::from(InvokeError::Internal("boom".into()));
        assert_eq!(internal.code, INTERNAL_ERROR);
    }
}
