//! Method table and per-method request/response shaping.

use super::session::SessionTracker;
use super::types::RpcError;
use crate::bridge::ToolResult;
use serde_json::{json, Value};
use tracing::{debug, warn};

/// Newest first.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2025-06-18", "2025-03-26", "2024-11-05"];

pub const SERVER_NAME: &str = "docbridge";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Initialize,
    Initialized,
    Ping,
    ToolsList,
    ToolsCall,
    ResourcesList,
    PromptsList,
}

const METHODS: &[(&str, Method)] = &[
    ("initialize", Method::Initialize),
    ("notifications/initialized", Method::Initialized),
    ("ping", Method::Ping),
    ("tools/list", Method::ToolsList),
    ("tools/call", Method::ToolsCall),
    ("resources/list", Method::ResourcesList),
    ("prompts/list", Method::PromptsList),
];

impl Method {
    pub fn lookup(name: &str) -> Result<Self, RpcError> {
        METHODS
            .iter()
            .find(|(candidate, _)| *candidate == name)
            .map(|(_, method)| *method)
            .ok_or_else(|| RpcError::method_not_found(name))
    }

    pub fn name(self) -> &'static str {
        METHODS
            .iter()
            .find(|(_, method)| *method == self)
            .map_or("unknown", |(name, _)| name)
    }
}

/// Echo the client's version when supported, otherwise offer our newest.
pub fn negotiate_version(requested: &str) -> &'static str {
    match SUPPORTED_PROTOCOL_VERSIONS
        .iter()
        .find(|supported| **supported == requested)
    {
        Some(version) => version,
        None => {
            let fallback = SUPPORTED_PROTOCOL_VERSIONS[0];
            warn!(requested, fallback, "unsupported protocol version requested");
            fallback
        }
    }
}

/// Handle `initialize`: negotiate the version and register the session.
pub fn initialize(
    params: &Value,
    sessions: &SessionTracker,
    instructions: &str,
) -> Result<Value, RpcError> {
    let requested = params
        .get("protocolVersion")
        .and_then(Value::as_str)
        .ok_or_else(|| RpcError::invalid_params("Missing protocolVersion parameter"))?;
    let version = negotiate_version(requested);
    let client_name = params
        .pointer("/clientInfo/name")
        .and_then(Value::as_str)
        .map(str::to_string);
    let handle = sessions.initialize(version, client_name);
    debug!(session = %handle, version, "initialize handled");

    Ok(json!({
        "protocolVersion": version,
        "serverInfo": {
            "name": SERVER_NAME,
            "version": env!("CARGO_PKG_VERSION"),
        },
        "capabilities": {
            "tools": { "listChanged": false },
            "resources": {},
            "prompts": {},
        },
        "instructions": instructions,
    }))
}

/// Extract `{name, arguments?}` from `tools/call` params.
pub fn parse_call_params(params: &Value) -> Result<(String, Value), RpcError> {
    let name = params
        .get("name")
        .and_then(Value::as_str)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| RpcError::invalid_params("tools/call requires a string `name`"))?;
    let arguments = match params.get("arguments") {
        None | Some(Value::Null) => json!({}),
        Some(arguments @ Value::Object(_)) => arguments.clone(),
        Some(_) => {
            return Err(RpcError::invalid_params(
                "tools/call `arguments` must be an object",
            ))
        }
    };
    Ok((name.to_string(), arguments))
}

/// Shape a tool result as a `tools/call` response body.
pub fn call_result(result: &ToolResult) -> Value {
    let structured = json!(result);
    json!({
        "content": [{ "type": "text", "text": structured.to_string() }],
        "structuredContent": structured,
        "isError": result.is_error(),
    })
}
