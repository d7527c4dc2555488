//! Streaming conversation loop.
//!
//! The [`ConversationEngine`] drives one chat turn: it streams the model
//! response, reassembles tool calls with the [`DeltaAccumulator`], runs those
//! calls through the shared [`ToolInvoker`], and loops until the model answers
//! without tools, the caller cancels, or the round cap is reached.

pub mod accumulator;
pub mod events;
pub mod history;

use crate::api::ModelClient;
use crate::bridge::{ToolInvocation, ToolInvoker, ToolStatus};
use crate::config::Config;
use crate::error::EngineError;
use crate::tools::CallerIdentity;
use crate::types::{ChatRequest, Message, ToolCall, ToolDefinition};
use accumulator::DeltaAccumulator;
use events::ChatEvent;
use futures_util::StreamExt;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Tool-result placeholder for calls skipped because the turn was cancelled.
const CANCELLED_TOOL_RESULT: &str = "operation cancelled by user";

/// Loop limits and request parameters for one engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub model: String,
    pub temperature: Option<f64>,
    pub max_rounds: usize,
    pub keep_recent: usize,
    pub loop_repeat_limit: usize,
    /// `0` disables compaction.
    pub compact_threshold_chars: usize,
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            model: config.model.model.clone(),
            temperature: config.model.temperature,
            max_rounds: config.chat.max_rounds,
            keep_recent: config.chat.keep_recent,
            loop_repeat_limit: config.chat.loop_repeat_limit,
            compact_threshold_chars: config.chat.compact_threshold_chars,
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// How a turn ended when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The model answered without requesting tools.
    Done { content: String },
    /// The caller cancelled the turn.
    Stopped,
}

enum RoundOutcome {
    Completed(Message),
    Cancelled,
}

/// Stateful chat session over a model client and the tool bridge.
pub struct ConversationEngine {
    client: Arc<dyn ModelClient>,
    invoker: Arc<ToolInvoker>,
    settings: EngineSettings,
    system_prompt: Option<String>,
    messages: Vec<Message>,
    /// Optional live event sink for UIs.
    event_sink: Option<mpsc::UnboundedSender<ChatEvent>>,
    /// Optional cancellation signal for the in-flight turn.
    cancellation_rx: Option<watch::Receiver<bool>>,
}

impl ConversationEngine {
    pub fn new(
        client: Arc<dyn ModelClient>,
        invoker: Arc<ToolInvoker>,
        settings: EngineSettings,
        system_prompt: Option<&str>,
    ) -> Self {
        let system_prompt = system_prompt
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string);
        let mut engine = Self {
            client,
            invoker,
            settings,
            system_prompt,
            messages: Vec::new(),
            event_sink: None,
            cancellation_rx: None,
        };
        engine.reset();
        engine
    }

    /// Register a cancellation signal for subsequent turns.
    pub fn set_cancellation_receiver(&mut self, rx: Option<watch::Receiver<bool>>) {
        self.cancellation_rx = rx;
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Conversation history, oldest first.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Drop everything except the system prompt.
    pub fn reset(&mut self) {
        self.messages.clear();
        if let Some(prompt) = &self.system_prompt {
            self.messages.push(Message::system(prompt.clone()));
        }
    }

    /// Send `user_input` and run rounds until the model produces a final
    /// answer. Every terminal state is also reported on the event sink.
    pub async fn run_turn(&mut self, user_input: &str) -> Result<TurnOutcome, EngineError> {
        let outcome = self.drive_turn(user_input).await;
        match &outcome {
            Ok(TurnOutcome::Done { content }) => self.emit(ChatEvent::Done {
                content: content.clone(),
            }),
            Ok(TurnOutcome::Stopped) => {
                info!("turn cancelled by caller");
                self.emit(ChatEvent::Stopped);
            }
            Err(err) => {
                warn!(error = %err, "turn failed");
                self.emit(ChatEvent::Error {
                    message: err.to_string(),
                });
            }
        }
        outcome
    }

    async fn drive_turn(&mut self, user_input: &str) -> Result<TurnOutcome, EngineError> {
        self.messages.push(Message::user(user_input));
        if self.cancellation_requested() {
            return Ok(TurnOutcome::Stopped);
        }

        for round in 1..=self.settings.max_rounds {
            self.compact_if_needed();
            let request = self.build_request().await;
            debug!(round, messages = request.messages.len(), "starting model round");

            let assistant = match self.stream_round(&request).await? {
                RoundOutcome::Completed(message) => message,
                RoundOutcome::Cancelled => return Ok(TurnOutcome::Stopped),
            };

            let Some(tool_calls) = assistant.tool_calls.clone().filter(|c| !c.is_empty()) else {
                let content = assistant.content.clone().unwrap_or_default();
                self.messages.push(assistant);
                return Ok(TurnOutcome::Done { content });
            };
            self.messages.push(assistant);

            if !self.run_tool_calls(&tool_calls).await {
                return Ok(TurnOutcome::Stopped);
            }
        }

        Err(EngineError::MaxRoundsReached(self.settings.max_rounds))
    }

    fn compact_if_needed(&mut self) {
        let report = history::compact_history(
            &mut self.messages,
            self.settings.compact_threshold_chars,
            self.settings.keep_recent,
        );
        if let Some(report) = report {
            info!(
                removed = report.removed_messages,
                size_before = report.size_before,
                size_after = report.size_after,
                "compacted conversation history"
            );
            self.emit(ChatEvent::Compacted {
                removed_messages: report.removed_messages,
            });
        }
    }

    async fn build_request(&self) -> ChatRequest {
        let definitions: Vec<ToolDefinition> = match self.invoker.list_tools().await {
            Ok(descriptors) => descriptors.into_iter().map(ToolDefinition::from).collect(),
            Err(err) => {
                warn!(error = %err, "listing tools failed, offering the full catalog");
                self.invoker.registry().definitions()
            }
        };
        ChatRequest {
            model: self.settings.model.clone(),
            messages: self.messages.clone(),
            tools: (!definitions.is_empty()).then_some(definitions),
            temperature: self.settings.temperature,
            stream: true,
        }
    }

    /// Stream one model response into an assistant message.
    async fn stream_round(&self, request: &ChatRequest) -> Result<RoundOutcome, EngineError> {
        let mut cancel_rx = self.cancellation_rx.clone();

        let opened = match cancel_rx.as_mut() {
            Some(rx) => tokio::select! {
                _ = wait_for_cancellation(rx) => return Ok(RoundOutcome::Cancelled),
                opened = self.client.stream_chat(request) => opened,
            },
            None => self.client.stream_chat(request).await,
        };
        let mut stream = opened?;

        let mut accumulator = DeltaAccumulator::new();
        let mut guard = RepetitionGuard::new(self.settings.loop_repeat_limit);
        loop {
            let next = match cancel_rx.as_mut() {
                Some(rx) => tokio::select! {
                    _ = wait_for_cancellation(rx) => return Ok(RoundOutcome::Cancelled),
                    next = stream.next() => next,
                },
                None => stream.next().await,
            };
            let Some(chunk) = next else {
                break;
            };
            let chunk = chunk?;

            if let Some(text) = &chunk.text_delta {
                guard.observe(text)?;
                self.emit(ChatEvent::TextDelta { text: text.clone() });
            }
            if let Some(text) = &chunk.reasoning_delta {
                self.emit(ChatEvent::ReasoningDelta { text: text.clone() });
            }
            accumulator.push(&chunk)?;
        }

        debug!(
            finish_reason = accumulator.finish_reason().unwrap_or("none"),
            tool_calls = accumulator.tool_call_count(),
            reasoning_chars = accumulator.reasoning().map_or(0, str::len),
            "model stream finished"
        );
        Ok(RoundOutcome::Completed(accumulator.into_message()))
    }

    /// Run every requested call in order. Returns `false` when cancelled; the
    /// skipped calls still get a placeholder result so the history stays
    /// well-formed for the next request.
    async fn run_tool_calls(&mut self, tool_calls: &[ToolCall]) -> bool {
        for (idx, call) in tool_calls.iter().enumerate() {
            if self.cancellation_requested() {
                for remaining in &tool_calls[idx..] {
                    self.messages
                        .push(Message::tool_result(&remaining.id, CANCELLED_TOOL_RESULT));
                }
                return false;
            }

            self.emit(ChatEvent::ToolCallStarted {
                name: call.function.name.clone(),
                arguments: call.function.arguments.clone(),
            });
            let (status, result) = self.execute_tool_call(call).await;
            self.emit(ChatEvent::ToolCallFinished {
                name: call.function.name.clone(),
                status,
                result: result.clone(),
            });
            self.messages.push(Message::tool_result(&call.id, result));
        }
        true
    }

    async fn execute_tool_call(&self, call: &ToolCall) -> (Option<ToolStatus>, String) {
        let arguments = match parse_arguments(&call.function.arguments) {
            Ok(arguments) => arguments,
            Err(message) => return (None, format!("Tool error: {message}")),
        };
        let invocation = ToolInvocation {
            tool_name: call.function.name.clone(),
            arguments,
            caller: CallerIdentity::Chat,
        };
        match self.invoker.invoke(invocation).await {
            Ok(result) => {
                let text = serde_json::to_string(&result)
                    .unwrap_or_else(|err| format!("Tool error: unserializable result: {err}"));
                (Some(result.status), text)
            }
            Err(err) => (None, format!("Tool error: {err}")),
        }
    }

    fn cancellation_requested(&self) -> bool {
        self.cancellation_rx.as_ref().is_some_and(|rx| *rx.borrow())
    }
}

/// Decode streamed tool arguments. Blank means no arguments.
fn parse_arguments(raw: &str) -> Result<Value, String> {
    if raw.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(value @ Value::Object(_)) => Ok(value),
        Ok(_) => Err("arguments must be a JSON object".to_string()),
        Err(err) => Err(format!("invalid JSON arguments: {err}")),
    }
}

/// Trips when the same text fragment streams too many times in a row.
struct RepetitionGuard {
    limit: usize,
    last: String,
    count: usize,
}

impl RepetitionGuard {
    fn new(limit: usize) -> Self {
        Self {
            limit,
            last: String::new(),
            count: 0,
        }
    }

    fn observe(&mut self, fragment: &str) -> Result<(), EngineError> {
        if self.limit == 0 || fragment.is_empty() {
            return Ok(());
        }
        if fragment == self.last {
            self.count += 1;
        } else {
            self.last.clear();
            self.last.push_str(fragment);
            self.count = 1;
        }
        if self.count > self.limit {
            return Err(EngineError::RepetitionLoop {
                fragment: self.last.clone(),
                count: self.count,
            });
        }
        Ok(())
    }
}

/// Resolve once the flag is set. A dropped sender can no longer cancel, so
/// that case waits forever instead of reporting a cancellation.
async fn wait_for_cancellation(cancel_rx: &mut watch::Receiver<bool>) {
    loop {
        if *cancel_rx.borrow_and_update() {
            return;
        }
        if cancel_rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
