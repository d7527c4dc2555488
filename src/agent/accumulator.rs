//! Incremental merging of streamed model deltas.
//!
//! A streaming chat completion delivers the assistant message as a sequence
//! of partial JSON objects. Merging them key by key reconstructs the final
//! message, including tool calls whose `arguments` arrive in arbitrary shards.

use crate::error::AccumulateError;
use crate::types::{FunctionCall, Message, StreamChunk, ToolCall};
use serde_json::{Map, Number, Value};

/// Merge one delta object into the accumulated object.
///
/// - absent keys are copied in, null delta values are skipped;
/// - `index` and `type` are identity fields and are overwritten;
/// - strings concatenate, numbers add, objects recurse;
/// - lists of scalars extend, lists of objects merge entries by `index`.
pub fn merge(acc: &mut Map<String, Value>, delta: &Map<String, Value>) -> Result<(), AccumulateError> {
    for (key, incoming) in delta {
        if incoming.is_null() {
            continue;
        }
        match acc.get_mut(key) {
            None => {
                acc.insert(key.clone(), incoming.clone());
            }
            Some(existing) => merge_value(key, existing, incoming)?,
        }
    }
    Ok(())
}

fn merge_value(key: &str, existing: &mut Value, incoming: &Value) -> Result<(), AccumulateError> {
    if key == "index" || key == "type" || existing.is_null() {
        *existing = incoming.clone();
        return Ok(());
    }
    match (existing, incoming) {
        (Value::String(acc), Value::String(more)) => acc.push_str(more),
        (Value::Number(acc), Value::Number(more)) => *acc = add_numbers(acc, more),
        (Value::Object(acc), Value::Object(more)) => merge(acc, more)?,
        (Value::Array(acc), Value::Array(more)) => merge_list(key, acc, more)?,
        (existing, incoming) => {
            return Err(AccumulateError::TypeMismatch {
                key: key.to_string(),
                existing: kind_name(existing),
                delta: kind_name(incoming),
            })
        }
    }
    Ok(())
}

fn merge_list(key: &str, acc: &mut Vec<Value>, delta: &[Value]) -> Result<(), AccumulateError> {
    for entry in delta {
        match entry {
            Value::Null => {}
            Value::Object(fields) => {
                let index = fields
                    .get("index")
                    .and_then(Value::as_i64)
                    .ok_or_else(|| AccumulateError::MissingIndex {
                        key: key.to_string(),
                    })?;
                let slot = acc
                    .iter_mut()
                    .find(|existing| existing.get("index").and_then(Value::as_i64) == Some(index));
                match slot {
                    Some(Value::Object(target)) => merge(target, fields)?,
                    _ => acc.push(entry.clone()),
                }
            }
            scalar => acc.push(scalar.clone()),
        }
    }
    Ok(())
}

fn add_numbers(a: &Number, b: &Number) -> Number {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        if let Some(sum) = x.checked_add(y) {
            return sum.into();
        }
    }
    if let (Some(x), Some(y)) = (a.as_u64(), b.as_u64()) {
        if let Some(sum) = x.checked_add(y) {
            return sum.into();
        }
    }
    let sum = a.as_f64().unwrap_or(0.0) + b.as_f64().unwrap_or(0.0);
    Number::from_f64(sum).unwrap_or_else(|| a.clone())
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// The assistant message being assembled from one model stream.
#[derive(Debug, Default)]
pub struct DeltaAccumulator {
    message: Map<String, Value>,
    finish_reason: Option<String>,
}

impl DeltaAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one chunk in. Chunks without an object delta only update the
    /// finish reason.
    pub fn push(&mut self, chunk: &StreamChunk) -> Result<(), AccumulateError> {
        if let Value::Object(delta) = &chunk.raw_delta {
            merge(&mut self.message, delta)?;
        }
        if let Some(reason) = &chunk.finish_reason {
            self.finish_reason = Some(reason.clone());
        }
        Ok(())
    }

    pub fn text(&self) -> &str {
        self.message
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or("")
    }

    pub fn reasoning(&self) -> Option<&str> {
        ["reasoning_content", "reasoning"]
            .iter()
            .find_map(|key| self.message.get(*key).and_then(Value::as_str))
    }

    pub fn tool_call_count(&self) -> usize {
        self.message
            .get("tool_calls")
            .and_then(Value::as_array)
            .map_or(0, Vec::len)
    }

    pub fn finish_reason(&self) -> Option<&str> {
        self.finish_reason.as_deref()
    }

    /// Convert into a typed assistant message. Tool calls come out ordered by
    /// their stream `index`.
    pub fn into_message(self) -> Message {
        let mut entries: Vec<&Value> = self
            .message
            .get("tool_calls")
            .and_then(Value::as_array)
            .map(|list| list.iter().collect())
            .unwrap_or_default();
        entries.sort_by_key(|entry| entry.get("index").and_then(Value::as_i64).unwrap_or(0));

        let tool_calls: Vec<ToolCall> = entries.into_iter().map(tool_call_from_entry).collect();
        let text = self.text().to_string();
        let content = if text.is_empty() && !tool_calls.is_empty() {
            None
        } else {
            Some(text)
        };
        Message::assistant(content, tool_calls)
    }
}

fn tool_call_from_entry(entry: &Value) -> ToolCall {
    let str_at = |pointer: &str| entry.pointer(pointer).and_then(Value::as_str);
    let index = entry.get("index").and_then(Value::as_i64).unwrap_or(0);
    ToolCall {
        id: str_at("/id")
            .map(str::to_string)
            .unwrap_or_else(|| format!("call_{index}")),
        call_type: "function".into(),
        function: FunctionCall {
            name: str_at("/function/name").unwrap_or_default().to_string(),
            arguments: str_at("/function/arguments").unwrap_or_default().to_string(),
        },
    }
}
