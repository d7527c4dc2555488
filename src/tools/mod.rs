//! Tool catalog and document host seam.
//!
//! Tools are synchronous trait objects executed on the controller thread by
//! [`crate::bridge::ToolInvoker`]. Each tool describes itself once (name,
//! description, JSON schema) and is exposed both to protocol clients via
//! `tools/list` and to the model via OpenAI function definitions.

pub mod headless;

use crate::error::ToolError;
use crate::types::{FunctionDefinition, ToolDefinition};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Document host
// ---------------------------------------------------------------------------

/// Summary of the document a tool call targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentInfo {
    pub id: String,
    pub title: String,
    /// Document type, e.g. `text` or `spreadsheet`. Tools filter on it.
    pub kind: String,
}

/// The host application's document object model.
///
/// Every method is called on the controller thread only.
pub trait DocumentHost: Send + Sync {
    /// The document that is currently active, if any.
    fn active_document(&self) -> Option<DocumentInfo>;
}

// ---------------------------------------------------------------------------
// Invocation context
// ---------------------------------------------------------------------------

/// Who asked for a tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum CallerIdentity {
    /// An external agent over JSON-RPC.
    Protocol { session: Option<String> },
    /// The in-process chat surface.
    Chat,
}

impl fmt::Display for CallerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Protocol {
                session: Some(session),
            } => write!(f, "protocol:{session}"),
            Self::Protocol { session: None } => f.write_str("protocol"),
            Self::Chat => f.write_str("chat"),
        }
    }
}

/// Everything a tool body may look at while running.
pub struct InvocationContext<'a> {
    pub document: &'a DocumentInfo,
    pub host: &'a dyn DocumentHost,
    pub caller: &'a CallerIdentity,
}

// ---------------------------------------------------------------------------
// Tool trait
// ---------------------------------------------------------------------------

/// A capability exposed to agents.
pub trait Tool: Send + Sync {
    /// Unique name clients call.
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// JSON Schema of the arguments object.
    fn input_schema(&self) -> Value;

    /// Document kinds this tool works on. Empty means any kind.
    fn document_kinds(&self) -> &'static [&'static str] {
        &[]
    }

    /// Run the tool. Called on the controller thread only.
    fn execute(&self, ctx: &InvocationContext<'_>, arguments: &Value) -> Result<Value, ToolError>;

    fn supports(&self, kind: &str) -> bool {
        let kinds = self.document_kinds();
        kinds.is_empty() || kinds.contains(&kind)
    }

    /// Protocol-facing descriptor for `tools/list`.
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }

    /// OpenAI-format definition for model requests.
    fn definition(&self) -> ToolDefinition {
        self.descriptor().into()
    }
}

/// `{name, description, inputSchema}` as listed to protocol clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

impl From<ToolDescriptor> for ToolDefinition {
    fn from(d: ToolDescriptor) -> Self {
        ToolDefinition {
            tool_type: "function".into(),
            function: FunctionDefinition {
                name: d.name,
                description: d.description,
                parameters: d.input_schema,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Tool registry
// ---------------------------------------------------------------------------

/// Registry of available tools, keyed by name.
///
/// Built once at startup and shared read-only afterwards.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<&'static str, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. A later registration with the same name replaces the
    /// earlier one.
    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name(), Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Descriptors of every tool usable on documents of `kind`.
    pub fn descriptors_for(&self, kind: &str) -> Vec<ToolDescriptor> {
        self.tools
            .values()
            .filter(|tool| tool.supports(kind))
            .map(|tool| tool.descriptor())
            .collect()
    }

    /// Definitions of every registered tool.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|tool| tool.definition()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoTool;

    impl Tool for EchoTool {
        fn name(&self) -> &'static str {
            "echo"
        }
        fn description(&self) -> &'static str {
            "echoes arguments back"
        }
        fn input_schema(&self) -> Value {
            json!({"type": "object"})
        }
        fn execute(&self, _ctx: &InvocationContext<'_>, arguments: &Value) -> Result<Value, ToolError> {
            Ok(arguments.clone())
        }
    }

    struct SheetOnlyTool;

    impl Tool for SheetOnlyTool {
        fn name(&self) -> &'static str {
            "sum_column"
        }
        fn description(&self) -> &'static str {
            "sums a column"
        }
        fn input_schema(&self) -> Value {
            json!({"type": "object"})
        }
        fn document_kinds(&self) -> &'static [&'static str] {
            &["spreadsheet"]
        }
        fn execute(&self, _ctx: &InvocationContext<'_>, _arguments: &Value) -> Result<Value, ToolError> {
            Ok(json!(0))
        }
    }

    #[test]
    fn new_registry_is_empty() {
        assert!(ToolRegistry::new().is_empty());
    }

    #[test]
    fn register_and_lookup() {
        let mut r = ToolRegistry::new();
        r.register(EchoTool);
        assert_eq!(r.len(), 1);
        assert!(r.get("echo").is_some());
        assert!(r.get("missing").is_none());
    }

    #[test]
    fn descriptors_filter_by_document_kind() {
        let mut r = ToolRegistry::new();
        r.register(EchoTool);
        r.register(SheetOnlyTool);

        let text: Vec<_> = r.descriptors_for("text").into_iter().map(|d| d.name).collect();
        assert_eq!(text, vec!["echo"]);

        let sheet = r.descriptors_for("spreadsheet");
        assert_eq!(sheet.len(), 2);
    }

    #[test]
    fn descriptor_serializes_input_schema_camel_case() {
        let out = serde_json::to_value(EchoTool.descriptor()).unwrap();
        assert_eq!(out["name"], "echo");
        assert_eq!(out["inputSchema"]["type"], "object");
    }

    #[test]
    fn definition_wraps_descriptor_as_function() {
        let def = EchoTool.definition();
        assert_eq!(def.tool_type, "function");
        assert_eq!(def.function.name, "echo");
        assert_eq!(def.function.parameters, json!({"type": "object"}));
    }

    #[test]
    fn caller_identity_display() {
        assert_eq!(CallerIdentity::Chat.to_string(), "chat");
        let caller = CallerIdentity::Protocol {
            session: Some("abc".into()),
        };
        assert_eq!(caller.to_string(), "protocol:abc");
    }
}
