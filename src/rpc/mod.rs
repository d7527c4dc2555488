//! JSON-RPC 2.0 protocol session.
//!
//! [`ProtocolSession`] turns raw request bodies into responses: envelope
//! validation, batches, notifications, the method table, and the session
//! state machine. The HTTP layer in [`crate::server`] only maps the returned
//! [`RpcReply`] onto status codes and headers.

pub mod events;
pub mod methods;
pub mod session;
pub mod types;

use crate::bridge::dispatch::panic_message;
use crate::bridge::{ToolInvocation, ToolInvoker};
use crate::tools::CallerIdentity;
use events::{BridgeEvent, EventBus};
use futures_util::FutureExt;
use methods::Method;
use serde_json::{json, Value};
use session::{SessionHandle, SessionState, SessionTracker};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, instrument, warn};
use types::{JsonRpcRequest, JsonRpcResponse, RequestId, RpcError};

pub const DEFAULT_INSTRUCTIONS: &str = "Tools operate on the document that is active in the host \
application. Call tools/list after switching documents; tools that do not apply to the active \
document type are hidden. A -32000 error means another tool call is still running: retry \
with backoff.";

/// What the transport should send back for one request body.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcReply {
    Single(JsonRpcResponse),
    Batch(Vec<JsonRpcResponse>),
    /// Only notifications were received; there is no body.
    Accepted,
}

/// The protocol endpoint shared by all HTTP connections.
pub struct ProtocolSession {
    invoker: Arc<ToolInvoker>,
    sessions: SessionTracker,
    events: EventBus,
    instructions: String,
}

impl ProtocolSession {
    pub fn new(invoker: Arc<ToolInvoker>) -> Self {
        Self {
            invoker,
            sessions: SessionTracker::new(),
            events: EventBus::new(),
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn session_handle(&self) -> Option<SessionHandle> {
        self.sessions.handle()
    }

    pub fn state(&self) -> SessionState {
        self.sessions.state()
    }

    pub fn gate_busy(&self) -> bool {
        self.invoker.gate_busy()
    }

    /// End the session (HTTP `DELETE`).
    pub fn terminate(&self) -> Option<SessionHandle> {
        self.sessions.terminate()
    }

    /// Process one HTTP request body: a single request or a batch.
    pub async fn handle_payload(&self, body: &[u8]) -> RpcReply {
        let value: Value = match serde_json::from_slice(body) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "request body is not valid JSON");
                return RpcReply::Single(JsonRpcResponse::error(
                    RequestId::Null,
                    RpcError::parse_error(e),
                ));
            }
        };

        match value {
            Value::Array(items) if items.is_empty() => RpcReply::Single(JsonRpcResponse::error(
                RequestId::Null,
                RpcError::invalid_request("batch must not be empty"),
            )),
            Value::Array(items) => {
                debug!(size = items.len(), "processing batch");
                let mut responses = Vec::with_capacity(items.len());
                for item in items {
                    if let Some(response) = self.handle_value(item).await {
                        responses.push(response);
                    }
                }
                if responses.is_empty() {
                    RpcReply::Accepted
                } else {
                    RpcReply::Batch(responses)
                }
            }
            single => match self.handle_value(single).await {
                Some(response) => RpcReply::Single(response),
                None => RpcReply::Accepted,
            },
        }
    }

    /// Process one request object. Notifications yield `None`.
    async fn handle_value(&self, value: Value) -> Option<JsonRpcResponse> {
        let request = match JsonRpcRequest::from_value(value) {
            Ok(request) => request,
            Err((id, err)) => {
                warn!(code = err.code, message = %err.message, "invalid request envelope");
                return Some(JsonRpcResponse::error(id, err));
            }
        };
        let notification = request.is_notification();
        let id = request.id.clone().unwrap_or(RequestId::Null);
        let method = request.method.clone();

        let outcome = match AssertUnwindSafe(self.call(request)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(payload) => Err(internal_from_panic(&method, payload.as_ref())),
        };

        if notification {
            if let Err(err) = outcome {
                debug!(%method, code = err.code, "notification failed; no response sent");
            }
            return None;
        }
        Some(match outcome {
            Ok(result) => JsonRpcResponse::result(id, result),
            Err(err) => JsonRpcResponse::error(id, err),
        })
    }

    /// Run one validated request through the method table.
    #[instrument(skip_all, fields(method = %request.method))]
    pub async fn call(&self, request: JsonRpcRequest) -> Result<Value, RpcError> {
        let method = Method::lookup(&request.method)?;
        debug!(method = method.name(), state = self.sessions.state().as_str(), "dispatching");
        match method {
            Method::Initialize => {
                methods::initialize(&request.params, &self.sessions, &self.instructions)
            }
            Method::Initialized | Method::Ping => Ok(json!({})),
            Method::ToolsList => {
                let tools = self.invoker.list_tools().await?;
                Ok(json!({ "tools": tools }))
            }
            Method::ToolsCall => self.call_tool(&request.params).await,
            Method::ResourcesList => Ok(json!({ "resources": [] })),
            Method::PromptsList => Ok(json!({ "prompts": [] })),
        }
    }

    async fn call_tool(&self, params: &Value) -> Result<Value, RpcError> {
        let (name, arguments) = methods::parse_call_params(params)?;
        self.events
            .publish(BridgeEvent::request(&name, arguments.clone()));

        let invocation = ToolInvocation {
            tool_name: name.clone(),
            arguments,
            caller: CallerIdentity::Protocol {
                session: self.sessions.handle().map(|h| h.to_string()),
            },
        };
        match self.invoker.invoke(invocation).await {
            Ok(result) => {
                self.events.publish(BridgeEvent::result(
                    &name,
                    result.payload.clone(),
                    Some(result.elapsed_ms),
                ));
                Ok(methods::call_result(&result))
            }
            Err(err) => {
                let err = RpcError::from(err);
                self.events.publish(BridgeEvent::result(
                    &name,
                    json!({ "error": err.message, "code": err.code }),
                    None,
                ));
                Err(err)
            }
        }
    }
}

/// Log a handler panic with its payload and turn it into an Internal Error.
fn internal_from_panic(method: &str, payload: &(dyn Any + Send)) -> RpcError {
    let detail = panic_message(payload);
    error!(%method, %detail, "handler panicked");
    RpcError::internal(format!("internal error while handling {method}: {detail}"))
}
