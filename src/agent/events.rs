//! Chat event plumbing.
//!
//! The engine reports progress to an optional unbounded sink so a UI (or the
//! CLI printer) can render streamed text without blocking the loop.

use super::ConversationEngine;
use crate::bridge::ToolStatus;
use tokio::sync::mpsc;

/// Live events emitted while a turn runs.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    TextDelta {
        text: String,
    },
    ReasoningDelta {
        text: String,
    },
    ToolCallStarted {
        name: String,
        arguments: String,
    },
    ToolCallFinished {
        name: String,
        /// `None` when the call never produced a tool result (busy, timeout).
        status: Option<ToolStatus>,
        result: String,
    },
    Compacted {
        removed_messages: usize,
    },
    Done {
        content: String,
    },
    /// The turn was cancelled by the caller.
    Stopped,
    Error {
        message: String,
    },
}

impl ConversationEngine {
    /// Route live events to `sink`. Pass `None` to stop forwarding.
    pub fn set_event_sink(&mut self, sink: Option<mpsc::UnboundedSender<ChatEvent>>) {
        self.event_sink = sink;
    }

    pub(super) fn emit(&self, event: ChatEvent) {
        if let Some(sink) = &self.event_sink {
            // Receiver gone means nobody is watching; keep running.
            let _ = sink.send(event);
        }
    }
}
