//! Shared test fixtures for bridge, protocol, and engine test modules.
//!
//! Keeping the controller-thread wiring and the scripted model client here
//! prevents each test module from rebuilding them ad hoc.

use crate::api::{ChunkStream, ModelClient};
use crate::bridge::{
    ControllerDispatch, ControllerThread, ExecutionGate, InvokerSettings, ToolInvoker,
};
use crate::error::ApiError;
use crate::tools::headless::{self, MemoryDocumentHost};
use crate::tools::{DocumentHost, ToolRegistry};
use crate::types::{ChatRequest, StreamChunk};
use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

static TEST_DIR_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Temporary directory fixture with best-effort cleanup.
#[derive(Debug)]
pub struct TestTempDir {
    path: PathBuf,
}

impl TestTempDir {
    pub fn new(prefix: &str) -> Self {
        let suffix = TEST_DIR_COUNTER.fetch_add(1, Ordering::Relaxed);
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let dir = std::env::temp_dir().join(format!("docbridge-{prefix}-{millis}-{suffix}"));
        fs::create_dir_all(&dir).expect("failed to create temporary fixture directory");
        Self { path: dir }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write UTF-8 text to a child path, creating parent directories as needed.
    pub fn write_text(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.path.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("failed to create parent directories for fixture");
        }
        fs::write(&path, content).expect("failed to write fixture file");
        path
    }
}

impl Drop for TestTempDir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}

/// One SSE `data:` block.
pub fn sse_data_block(data: &str) -> String {
    format!("data: {data}\n\n")
}

/// SSE stream terminator block used by OpenAI-compatible streams.
pub fn sse_done_block() -> &'static str {
    "data: [DONE]\n\n"
}

// ---------------------------------------------------------------------------
// Bridge fixture
// ---------------------------------------------------------------------------

/// A headless invoker running on its own controller thread.
pub struct TestBridge {
    pub invoker: Arc<ToolInvoker>,
    pub host: Arc<MemoryDocumentHost>,
    pub gate: Arc<ExecutionGate>,
    _controller: ControllerThread,
}

impl TestBridge {
    pub fn new() -> Self {
        Self::with_settings(InvokerSettings {
            gate_wait: Duration::from_secs(2),
            process_timeout: Duration::from_secs(5),
        })
    }

    pub fn with_settings(settings: InvokerSettings) -> Self {
        let dispatch = Arc::new(ControllerDispatch::new());
        let controller = ControllerThread::spawn(Arc::clone(&dispatch))
            .expect("failed to spawn controller thread");
        let host = Arc::new(MemoryDocumentHost::with_document(
            "Notes",
            vec!["first paragraph".into(), "second paragraph".into()],
        ));
        let mut registry = ToolRegistry::new();
        headless::register_tools(&mut registry, &host);
        let host_dyn: Arc<dyn DocumentHost> = host.clone();
        let gate = Arc::new(ExecutionGate::new());
        let invoker = Arc::new(ToolInvoker::new(
            dispatch,
            Arc::clone(&gate),
            Arc::new(registry),
            host_dyn,
            settings,
        ));
        Self {
            invoker,
            host,
            gate,
            _controller: controller,
        }
    }
}

// ---------------------------------------------------------------------------
// Scripted model client
// ---------------------------------------------------------------------------

/// One scripted model response.
pub enum ScriptedTurn {
    /// Emit the chunks then end the stream.
    Chunks(Vec<StreamChunk>),
    /// Emit the chunks then never end.
    Stalled(Vec<StreamChunk>),
    /// Fail before the stream opens.
    Fail(u16),
}

/// Model client that replays queued turns and records every request.
#[derive(Default)]
pub struct ScriptedModelClient {
    turns: Mutex<VecDeque<ScriptedTurn>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedModelClient {
    pub fn new(turns: Vec<ScriptedTurn>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelClient for ScriptedModelClient {
    async fn stream_chat(&self, request: &ChatRequest) -> Result<ChunkStream, ApiError> {
        self.requests.lock().unwrap().push(request.clone());
        let turn = self
            .turns
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ApiError::InvalidResponse("scripted client exhausted".into()))?;
        match turn {
            ScriptedTurn::Chunks(chunks) => Ok(stream::iter(chunks.into_iter().map(Ok)).boxed()),
            ScriptedTurn::Stalled(chunks) => Ok(stream::iter(chunks.into_iter().map(Ok))
                .chain(stream::pending())
                .boxed()),
            ScriptedTurn::Fail(code) => Err(ApiError::status(code, "scripted failure", None)),
        }
    }
}

/// A chunk carrying visible text.
pub fn text_chunk(text: &str) -> StreamChunk {
    StreamChunk::from_delta(json!({ "content": text }), None)
}

/// A chunk carrying one tool-call shard.
pub fn tool_call_chunk(index: u64, id: Option<&str>, name: Option<&str>, arguments: &str) -> StreamChunk {
    let mut entry = json!({
        "index": index,
        "function": { "arguments": arguments },
    });
    if let Some(id) = id {
        entry["id"] = Value::from(id);
        entry["type"] = Value::from("function");
    }
    if let Some(name) = name {
        entry["function"]["name"] = Value::from(name);
    }
    StreamChunk::from_delta(json!({ "tool_calls": [entry] }), None)
}

/// A chunk that only carries a finish reason.
pub fn finish_chunk(reason: &str) -> StreamChunk {
    StreamChunk::from_delta(json!({}), Some(reason.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_dir_fixture_writes_files() {
        let fixture = TestTempDir::new("fixture");
        let file = fixture.write_text("nested/file.toml", "x = 1");
        assert_eq!(fs::read_to_string(file).unwrap(), "x = 1");
        assert!(fixture.path().exists());
    }

    #[test]
    fn sse_helpers_emit_expected_wire_format() {
        assert_eq!(sse_data_block("{}"), "data: {}\n\n");
        assert_eq!(sse_done_block(), "data: [DONE]\n\n");
    }

    #[test]
    fn tool_call_chunk_shape() {
        let chunk = tool_call_chunk(1, Some("call_1"), Some("read_text"), "{\"st");
        let entry = &chunk.raw_delta["tool_calls"][0];
        assert_eq!(entry["index"], 1);
        assert_eq!(entry["id"], "call_1");
        assert_eq!(entry["function"]["name"], "read_text");
        assert_eq!(entry["function"]["arguments"], "{\"st");
        assert!(chunk.text_delta.is_none());
    }

    #[tokio::test]
    async fn scripted_client_replays_and_records() {
        let client = ScriptedModelClient::new(vec![ScriptedTurn::Chunks(vec![text_chunk("hi")])]);
        let request = ChatRequest {
            model: "m".into(),
            messages: Vec::new(),
            tools: None,
            temperature: None,
            stream: true,
        };
        let chunks: Vec<_> = client.stream_chat(&request).await.unwrap().collect().await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(client.requests().len(), 1);
        assert!(client.stream_chat(&request).await.is_err());
    }
}
