//! Broadcast bus for tool-call observability.

use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

const BUS_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeEventKind {
    Request,
    Result,
}

/// One observable step of a `tools/call`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BridgeEvent {
    pub kind: BridgeEventKind,
    pub tool: String,
    /// Arguments for `request`, the result or error for `result`.
    pub payload: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
}

impl BridgeEvent {
    pub fn request(tool: &str, arguments: Value) -> Self {
        Self {
            kind: BridgeEventKind::Request,
            tool: tool.to_string(),
            payload: arguments,
            elapsed_ms: None,
        }
    }

    pub fn result(tool: &str, payload: Value, elapsed_ms: Option<u64>) -> Self {
        Self {
            kind: BridgeEventKind::Result,
            tool: tool.to_string(),
            payload,
            elapsed_ms,
        }
    }
}

/// Fan-out of [`BridgeEvent`]s. Publishing with no subscribers is a no-op.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<BridgeEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, event: BridgeEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.tx.subscribe()
    }
}
