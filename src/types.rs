//! Data model for OpenAI-compatible streaming chat.
//!
//! These types serialize directly to the JSON payloads of
//! `POST /chat/completions` with `stream: true`, plus the per-chunk shape the
//! conversation engine consumes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Message roles
// ---------------------------------------------------------------------------

/// Conversation participant role.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// A single message in the conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,

    /// Text content. Null when the assistant message is purely tool calls.
    pub content: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,

    /// When role == Tool, the id of the tool call this result answers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

}

impl Message {
    fn with_role(role: Role, content: Option<String>) -> Self {
        Self {
            role,
            content,
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, Some(content.into()))
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, Some(content.into()))
    }

    /// Assistant turn with optional text and tool calls.
    pub fn assistant(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        let mut message = Self::with_role(Role::Assistant, content);
        if !tool_calls.is_empty() {
            message.tool_calls = Some(tool_calls);
        }
        message
    }

    /// Tool result message, sent back after executing a tool call.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let mut message = Self::with_role(Role::Tool, Some(content.into()));
        message.tool_call_id = Some(tool_call_id.into());
        message
    }

    /// True when the assistant requested at least one tool call.
    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls.as_ref().is_some_and(|calls| !calls.is_empty())
    }

    /// Rough size used for history budgeting: content plus tool arguments.
    pub fn size_hint(&self) -> usize {
        let content = self.content.as_deref().map_or(0, str::len);
        let calls = self.tool_calls.as_ref().map_or(0, |calls| {
            calls
                .iter()
                .map(|call| call.function.name.len() + call.function.arguments.len())
                .sum()
        });
        content + calls
    }
}

// ---------------------------------------------------------------------------
// Tool calls (in assistant responses)
// ---------------------------------------------------------------------------

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String, // "function"
    pub function: FunctionCall,
}

/// The function name and JSON-encoded arguments within a tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded arguments object, reassembled from streamed shards.
    pub arguments: String,
}

// ---------------------------------------------------------------------------
// Tool definitions (sent in requests)
// ---------------------------------------------------------------------------

/// Tool definition included in the model request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub tool_type: String, // "function"
    pub function: FunctionDefinition,
}

/// The schema of a callable function.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema object describing the parameters.
    pub parameters: Value,
}

// ---------------------------------------------------------------------------
// Streaming request / chunk
// ---------------------------------------------------------------------------

/// Request body for streaming `POST /chat/completions`.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    pub stream: bool,
}

/// One unit of a model stream, already parsed from the wire.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamChunk {
    /// Visible text carried by this chunk, for live display.
    pub text_delta: Option<String>,
    /// Reasoning/thinking text carried by this chunk.
    pub reasoning_delta: Option<String>,
    /// The provider's raw `delta` object, merged by the accumulator.
    pub raw_delta: Value,
    pub finish_reason: Option<String>,
}

impl StreamChunk {
    /// Build a chunk from a provider `delta` object, extracting display text.
    pub fn from_delta(raw_delta: Value, finish_reason: Option<String>) -> Self {
        let text_delta = raw_delta
            .get("content")
            .and_then(Value::as_str)
            .filter(|text| !text.is_empty())
            .map(str::to_string);
        let reasoning_delta = ["reasoning_content", "reasoning"]
            .iter()
            .find_map(|key| raw_delta.get(*key).and_then(Value::as_str))
            .filter(|text| !text.is_empty())
            .map(str::to_string);
        Self {
            text_delta,
            reasoning_delta,
            raw_delta,
            finish_reason,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
