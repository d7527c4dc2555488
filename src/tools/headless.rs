//! In-memory document host and its tool set.
//!
//! Used when no GUI host is attached: the binary serves a single plain-text
//! document made of paragraphs, and integration tests get a real catalog.

use super::{DocumentHost, DocumentInfo, InvocationContext, Tool, ToolRegistry};
use crate::error::ToolError;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex, MutexGuard};

pub const TEXT_KIND: &str = "text";

struct MemoryDocument {
    info: DocumentInfo,
    paragraphs: Vec<String>,
}

/// A host holding at most one open text document.
#[derive(Default)]
pub struct MemoryDocumentHost {
    document: Mutex<Option<MemoryDocument>>,
}

impl MemoryDocumentHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Host with one open text document.
    pub fn with_document(title: &str, paragraphs: Vec<String>) -> Self {
        let host = Self::new();
        host.open(title, TEXT_KIND, paragraphs);
        host
    }

    /// Replace the active document.
    pub fn open(&self, title: &str, kind: &str, paragraphs: Vec<String>) {
        let info = DocumentInfo {
            id: format!("mem-{}", slug(title)),
            title: title.to_string(),
            kind: kind.to_string(),
        };
        *self.lock() = Some(MemoryDocument { info, paragraphs });
    }

    pub fn close(&self) {
        self.lock().take();
    }

    pub fn paragraphs(&self) -> Vec<String> {
        self.lock()
            .as_ref()
            .map(|doc| doc.paragraphs.clone())
            .unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<MemoryDocument>> {
        self.document.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn with_open<T>(
        &self,
        f: impl FnOnce(&mut MemoryDocument) -> Result<T, ToolError>,
    ) -> Result<T, ToolError> {
        let mut guard = self.lock();
        let doc = guard
            .as_mut()
            .ok_or_else(|| ToolError::ExecutionFailed("document was closed".into()))?;
        f(doc)
    }
}

impl DocumentHost for MemoryDocumentHost {
    fn active_document(&self) -> Option<DocumentInfo> {
        self.lock().as_ref().map(|doc| doc.info.clone())
    }
}

fn slug(title: &str) -> String {
    title
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect()
}

fn parse_args<T: for<'de> Deserialize<'de>>(arguments: &Value) -> Result<T, ToolError> {
    let arguments = if arguments.is_null() {
        json!({})
    } else {
        arguments.clone()
    };
    serde_json::from_value(arguments).map_err(|e| ToolError::InvalidArguments(e.to_string()))
}

/// Register the three headless tools against `host`.
pub fn register_tools(registry: &mut ToolRegistry, host: &Arc<MemoryDocumentHost>) {
    registry.register(DocumentInfoTool {
        host: Arc::clone(host),
    });
    registry.register(ReadTextTool {
        host: Arc::clone(host),
    });
    registry.register(AppendParagraphTool {
        host: Arc::clone(host),
    });
}

// ---------------------------------------------------------------------------
// document_info
// ---------------------------------------------------------------------------

pub struct DocumentInfoTool {
    host: Arc<MemoryDocumentHost>,
}

impl Tool for DocumentInfoTool {
    fn name(&self) -> &'static str {
        "document_info"
    }

    fn description(&self) -> &'static str {
        "Describe the active document: id, title, kind and paragraph count."
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    fn execute(&self, ctx: &InvocationContext<'_>, _arguments: &Value) -> Result<Value, ToolError> {
        let paragraphs = self.host.with_open(|doc| Ok(doc.paragraphs.len()))?;
        Ok(json!({
            "id": ctx.document.id,
            "title": ctx.document.title,
            "kind": ctx.document.kind,
            "paragraphs": paragraphs,
            "caller": ctx.caller.to_string(),
        }))
    }
}

// ---------------------------------------------------------------------------
// read_text
// ---------------------------------------------------------------------------

pub struct ReadTextTool {
    host: Arc<MemoryDocumentHost>,
}

#[derive(Deserialize)]
struct ReadTextArgs {
    #[serde(default)]
    start: usize,
    count: Option<usize>,
}

impl Tool for ReadTextTool {
    fn name(&self) -> &'static str {
        "read_text"
    }

    fn description(&self) -> &'static str {
        "Read paragraphs from the active text document."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "start": {"type": "integer", "minimum": 0, "description": "First paragraph index (default 0)."},
                "count": {"type": "integer", "minimum": 1, "description": "Maximum paragraphs to return."}
            }
        })
    }

    fn document_kinds(&self) -> &'static [&'static str] {
        &[TEXT_KIND]
    }

    fn execute(&self, _ctx: &InvocationContext<'_>, arguments: &Value) -> Result<Value, ToolError> {
        let args: ReadTextArgs = parse_args(arguments)?;
        self.host.with_open(|doc| {
            let total = doc.paragraphs.len();
            let end = args
                .count
                .map_or(total, |count| args.start.saturating_add(count).min(total));
            let paragraphs: Vec<Value> = doc
                .paragraphs
                .iter()
                .enumerate()
                .take(end)
                .skip(args.start)
                .map(|(index, text)| json!({"index": index, "text": text}))
                .collect();
            Ok(json!({"paragraphs": paragraphs, "total": total}))
        })
    }
}

// ---------------------------------------------------------------------------
// append_paragraph
// ---------------------------------------------------------------------------

pub struct AppendParagraphTool {
    host: Arc<MemoryDocumentHost>,
}

#[derive(Deserialize)]
struct AppendArgs {
    text: String,
}

impl Tool for AppendParagraphTool {
    fn name(&self) -> &'static str {
        "append_paragraph"
    }

    fn description(&self) -> &'static str {
        "Append a paragraph to the end of the active text document."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "text": {"type": "string", "description": "Paragraph text to append."}
            },
            "required": ["text"]
        })
    }

    fn document_kinds(&self) -> &'static [&'static str] {
        &[TEXT_KIND]
    }

    fn execute(&self, _ctx: &InvocationContext<'_>, arguments: &Value) -> Result<Value, ToolError> {
        let args: AppendArgs = parse_args(arguments)?;
        if args.text.trim().is_empty() {
            return Err(ToolError::InvalidArguments("text must not be empty".into()));
        }
        self.host.with_open(|doc| {
            doc.paragraphs.push(args.text);
            let total = doc.paragraphs.len();
            Ok(json!({"index": total - 1, "total": total}))
        })
    }
}
