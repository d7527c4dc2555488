//! Conversation history compaction.
//!
//! When the history grows past the configured size, everything except system
//! turns and the most recent messages is collapsed into one system summary
//! built from short previews.

use crate::types::{Message, Role};

const MAX_COMPACT_SUMMARY_LINES: usize = 24;
pub(super) const COMPACT_SUMMARY_PREFIX: &str = "[docbridge compact summary]";

/// Details about one history-compaction operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryCompactionReport {
    pub size_before: usize,
    pub size_after: usize,
    pub removed_messages: usize,
}

/// Characters of content plus tool-call names and arguments.
pub fn history_size(messages: &[Message]) -> usize {
    messages.iter().map(Message::size_hint).sum()
}

/// Compact `messages` in place when their size exceeds `threshold`.
///
/// The result is: every older system turn, one summary, then the recent
/// window. The window holds the last `keep_recent` messages, widened backward
/// so it never starts with a tool result cut off from its assistant call.
pub fn compact_history(
    messages: &mut Vec<Message>,
    threshold: usize,
    keep_recent: usize,
) -> Option<HistoryCompactionReport> {
    let size_before = history_size(messages);
    if threshold == 0 || size_before <= threshold {
        return None;
    }

    let mut split = messages.len().saturating_sub(keep_recent);
    while split > 0 && messages[split..].first().is_some_and(|m| m.role == Role::Tool) {
        split -= 1;
    }

    let mut previous_summary = None;
    let mut removed = 0usize;
    let mut lines = Vec::new();
    for message in &messages[..split] {
        if is_compact_summary_message(message) {
            previous_summary = message.content.clone();
        } else if message.role != Role::System {
            removed += 1;
            if lines.len() < MAX_COMPACT_SUMMARY_LINES {
                lines.extend(compact_message_line(message));
            }
        }
    }
    if removed == 0 {
        return None;
    }

    let summary = build_compact_summary(previous_summary.as_deref(), &lines, removed);
    let recent = messages.split_off(split);
    let older = std::mem::take(messages);
    messages.extend(
        older
            .into_iter()
            .filter(|m| m.role == Role::System && !is_compact_summary_message(m)),
    );
    messages.push(Message::system(summary));
    messages.extend(recent);

    Some(HistoryCompactionReport {
        size_before,
        size_after: history_size(messages),
        removed_messages: removed,
    })
}

pub(super) fn is_compact_summary_message(message: &Message) -> bool {
    message.role == Role::System
        && message
            .content
            .as_deref()
            .is_some_and(|text| text.starts_with(COMPACT_SUMMARY_PREFIX))
}

fn build_compact_summary(previous_summary: Option<&str>, lines: &[String], removed: usize) -> String {
    let mut out = vec![
        COMPACT_SUMMARY_PREFIX.to_string(),
        "Older turns were compacted to preserve room for newer context.".to_string(),
    ];

    if let Some(previous) = previous_summary.and_then(compact_summary_body) {
        out.push(format!("Previously compacted summary: {previous}"));
    }
    out.extend(lines.iter().cloned());
    if removed > lines.len() {
        out.push(format!(
            "... {} additional compacted message(s) omitted",
            removed - lines.len()
        ));
    }
    out.join("\n")
}

fn compact_summary_body(summary: &str) -> Option<String> {
    let mut lines = summary.lines();
    if lines.next()?.trim() != COMPACT_SUMMARY_PREFIX {
        return None;
    }
    let body = lines.collect::<Vec<_>>().join(" ");
    let body = body.trim();
    (!body.is_empty()).then(|| truncate_summary_preview(body))
}

fn compact_message_line(message: &Message) -> Option<String> {
    match message.role {
        Role::System => None,
        Role::User => message
            .content
            .as_deref()
            .map(|text| format!("user: {}", truncate_summary_preview(text))),
        Role::Assistant => {
            let mut parts = Vec::new();
            if let Some(content) = message.content.as_deref().map(str::trim) {
                if !content.is_empty() {
                    parts.push(format!("assistant: {}", truncate_summary_preview(content)));
                }
            }
            if let Some(tool_calls) = &message.tool_calls {
                let names = tool_calls
                    .iter()
                    .map(|call| call.function.name.as_str())
                    .collect::<Vec<_>>();
                if !names.is_empty() {
                    parts.push(format!(
                        "assistant tools: {}",
                        truncate_summary_preview(&names.join(", "))
                    ));
                }
            }
            (!parts.is_empty()).then(|| parts.join(" | "))
        }
        Role::Tool => {
            let id = message.tool_call_id.as_deref().unwrap_or("<unknown>");
            let content = message.content.as_deref().unwrap_or("");
            Some(format!("tool ({id}): {}", truncate_summary_preview(content)))
        }
    }
}

fn truncate_summary_preview(text: &str) -> String {
    const MAX_PREVIEW_CHARS: usize = 180;
    let trimmed = text.trim();
    if trimmed.chars().count() <= MAX_PREVIEW_CHARS {
        return trimmed.to_string();
    }
    let prefix = trimmed
        .chars()
        .take(MAX_PREVIEW_CHARS.saturating_sub(3))
        .collect::<String>();
    format!("{prefix}...")
}
