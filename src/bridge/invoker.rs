//! Tool invocation through the gate and onto the controller thread.

use super::dispatch::ControllerDispatch;
use super::gate::ExecutionGate;
use crate::error::InvokeError;
use crate::tools::{CallerIdentity, DocumentHost, InvocationContext, ToolDescriptor, ToolRegistry};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Outcome of a tool body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Ok,
    Error,
}

/// A tool result as returned to protocol clients and the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub status: ToolStatus,
    pub payload: Value,
    pub elapsed_ms: u64,
}

impl ToolResult {
    pub fn is_error(&self) -> bool {
        self.status == ToolStatus::Error
    }
}

/// A request to run one tool.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub tool_name: String,
    pub arguments: Value,
    pub caller: CallerIdentity,
}

/// Time budgets for one invocation.
#[derive(Debug, Clone, Copy)]
pub struct InvokerSettings {
    /// How long to wait for the execution gate before reporting busy.
    pub gate_wait: Duration,
    /// How long the controller thread may take to run the tool.
    pub process_timeout: Duration,
}

/// Runs tools one at a time on the controller thread.
pub struct ToolInvoker {
    dispatch: Arc<ControllerDispatch>,
    gate: Arc<ExecutionGate>,
    registry: Arc<ToolRegistry>,
    host: Arc<dyn DocumentHost>,
    settings: InvokerSettings,
}

impl ToolInvoker {
    pub fn new(
        dispatch: Arc<ControllerDispatch>,
        gate: Arc<ExecutionGate>,
        registry: Arc<ToolRegistry>,
        host: Arc<dyn DocumentHost>,
        settings: InvokerSettings,
    ) -> Self {
        Self {
            dispatch,
            gate,
            registry,
            host,
            settings,
        }
    }

    pub fn settings(&self) -> InvokerSettings {
        self.settings
    }

    pub fn gate_busy(&self) -> bool {
        self.gate.is_busy()
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Run one tool call.
    ///
    /// Missing documents, unknown tools and tool failures come back as a
    /// `ToolResult` with error status. `Err` is reserved for busy, timeout and
    /// internal failures.
    pub async fn invoke(&self, invocation: ToolInvocation) -> Result<ToolResult, InvokeError> {
        let started = Instant::now();
        let tool_name = invocation.tool_name.clone();
        let caller = invocation.caller.to_string();

        let permit = self.gate.acquire(self.settings.gate_wait).await?;
        debug!(tool = %tool_name, %caller, "execution gate acquired");

        let registry = Arc::clone(&self.registry);
        let host = Arc::clone(&self.host);
        let outcome = self
            .dispatch
            .dispatch_async(
                move || execute_on_controller(&registry, host.as_ref(), &invocation),
                self.settings.process_timeout,
            )
            .await;
        drop(permit);

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let (status, payload) = match outcome {
            Ok(result) => result,
            Err(err) => {
                warn!(tool = %tool_name, %caller, elapsed_ms, error = %err, "tool invocation failed");
                return Err(err.into());
            }
        };
        info!(tool = %tool_name, %caller, ?status, elapsed_ms, "tool invocation finished");
        Ok(ToolResult {
            status,
            payload,
            elapsed_ms,
        })
    }

    /// Tools usable on the active document. Empty when nothing is open.
    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, InvokeError> {
        let registry = Arc::clone(&self.registry);
        let host = Arc::clone(&self.host);
        let descriptors = self
            .dispatch
            .dispatch_async(
                move || match host.active_document() {
                    Some(document) => registry.descriptors_for(&document.kind),
                    None => Vec::new(),
                },
                self.settings.process_timeout,
            )
            .await?;
        Ok(descriptors)
    }
}

fn execute_on_controller(
    registry: &ToolRegistry,
    host: &dyn DocumentHost,
    invocation: &ToolInvocation,
) -> (ToolStatus, Value) {
    let Some(document) = host.active_document() else {
        return error_payload("no active document");
    };
    let Some(tool) = registry.get(&invocation.tool_name) else {
        return error_payload(&format!("unknown tool: {}", invocation.tool_name));
    };
    if !tool.supports(&document.kind) {
        return error_payload(&format!(
            "tool {} is not available for {} documents",
            invocation.tool_name, document.kind
        ));
    }

    let ctx = InvocationContext {
        document: &document,
        host,
        caller: &invocation.caller,
    };
    match tool.execute(&ctx, &invocation.arguments) {
        Ok(payload) => (ToolStatus::Ok, payload),
        Err(err) => error_payload(&err.to_string()),
    }
}

fn error_payload(message: &str) -> (ToolStatus, Value) {
    (ToolStatus::Error, json!({ "error": message }))
}
