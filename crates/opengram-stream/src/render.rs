// SPDX-FileCopyrightText: 2026 Opengram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Rendering of non-text parts and auxiliary payloads.
//!
//! Reasoning elision, tool summary lines, todo lists, diff construction
//! with inline previews, and the YAML-ish dump used for events the bridge
//! does not recognize.

use serde_json::Value;

use opengram_agent::events::{TodoItem, TodoStatus};

/// Reasoning at or below this length is rendered in full.
const REASONING_FULL_MAX: usize = 60;
/// Each side of an elided reasoning line.
const REASONING_SEGMENT: usize = 30;

/// Maximum diff lines shown inline under an edit/write summary.
pub const DIFF_PREVIEW_LINES: usize = 8;

/// Cap on dumped payloads for unknown events and errors.
const DUMP_MAX: usize = 1000;

/// Formats a reasoning part: short reasoning in full, longer reasoning
/// elided to disjoint beginning and end segments around an ellipsis.
pub fn format_reasoning(text: &str) -> String {
    let trimmed = text.trim();
    let count = trimmed.chars().count();
    if count <= REASONING_FULL_MAX {
        return format!("> thinking: {trimmed}");
    }
    let begin: String = trimmed.chars().take(REASONING_SEGMENT).collect();
    let end: String = {
        let skip = count - REASONING_SEGMENT;
        trimmed.chars().skip(skip).collect()
    };
    format!("> thinking: {begin}…{end}")
}

/// One-line summary of a running tool invocation.
pub fn tool_summary(tool: &str, input: &Value) -> String {
    let detail = match tool {
        "bash" => input.get("command").and_then(Value::as_str).map(str::to_owned),
        "read" | "edit" | "write" => input
            .get("filePath")
            .and_then(Value::as_str)
            .map(str::to_owned),
        "glob" | "grep" => input.get("pattern").and_then(Value::as_str).map(str::to_owned),
        "webfetch" => input.get("url").and_then(Value::as_str).map(str::to_owned),
        _ => None,
    };

    match detail {
        Some(detail) => {
            let mut detail = detail.replace('\n', " ");
            if detail.chars().count() > 120 {
                detail = detail.chars().take(119).collect::<String>() + "…";
            }
            format!("⚙ {tool}: {detail}")
        }
        None => format!("⚙ {tool}"),
    }
}

/// Renders the whole todo list with circled per-status icons.
pub fn render_todos(todos: &[TodoItem]) -> String {
    let mut out = String::from("Todo:");
    for todo in todos {
        let icon = match todo.status {
            TodoStatus::Pending => '○',
            TodoStatus::InProgress => '◐',
            TodoStatus::Completed => '●',
            TodoStatus::Cancelled => '⊘',
        };
        out.push('\n');
        out.push(icon);
        out.push(' ');
        out.push_str(&todo.content);
    }
    out
}

/// Builds a unified-style diff from an `edit` or `write` tool input.
/// Returns `None` when the input carries nothing diffable.
pub fn diff_from_tool_input(tool: &str, input: &Value) -> Option<(String, String)> {
    let path = input.get("filePath").and_then(Value::as_str)?;
    let mut diff = format!("--- a/{path}\n+++ b/{path}\n");

    match tool {
        "edit" => {
            let old = input.get("oldString").and_then(Value::as_str)?;
            let new = input.get("newString").and_then(Value::as_str)?;
            for line in old.lines() {
                diff.push_str("- ");
                diff.push_str(line);
                diff.push('\n');
            }
            for line in new.lines() {
                diff.push_str("+ ");
                diff.push_str(line);
                diff.push('\n');
            }
        }
        "write" => {
            let content = input.get("content").and_then(Value::as_str)?;
            for line in content.lines() {
                diff.push_str("+ ");
                diff.push_str(line);
                diff.push('\n');
            }
        }
        _ => return None,
    }

    Some((path.to_string(), diff))
}

/// The first [`DIFF_PREVIEW_LINES`] changed lines of a diff, with a
/// trailing marker when lines were omitted.
pub fn diff_preview(diff: &str) -> String {
    let changed: Vec<&str> = diff
        .lines()
        .filter(|l| l.starts_with('+') || l.starts_with('-'))
        .filter(|l| !l.starts_with("+++") && !l.starts_with("---"))
        .collect();

    let mut preview: Vec<&str> = changed.iter().take(DIFF_PREVIEW_LINES).copied().collect();
    let omitted = changed.len().saturating_sub(DIFF_PREVIEW_LINES);
    let marker;
    if omitted > 0 {
        marker = format!("… {omitted} more lines");
        preview.push(&marker);
        return preview.join("\n");
    }
    preview.join("\n")
}

/// Formats a `session.error` payload: explicit aborts collapse to a
/// one-liner, everything else surfaces as a truncated dump.
pub fn format_session_error(error: &Value) -> String {
    let text = match error {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if text.to_ascii_lowercase().contains("aborted") {
        return "Interrupted.".to_string();
    }
    format!("Error: {}", cap(text))
}

/// Truncates at [`DUMP_MAX`], backing off to a character boundary.
fn cap(mut text: String) -> String {
    if text.len() <= DUMP_MAX {
        return text;
    }
    let mut cut = DUMP_MAX;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
    text.push('…');
    text
}

/// Debug dump of an unrecognized event in indented key/value form.
pub fn format_unknown_event(event_type: &str, raw: &Value) -> String {
    let mut out = format!("Unhandled event {event_type}:\n");
    yamlish(raw, 1, &mut out);
    cap(out)
}

/// Dump of a part type the projector has no renderer for.
pub fn format_other_part(part_type: &str, raw: &Value) -> String {
    let mut out = format!("{part_type}:\n");
    yamlish(raw, 1, &mut out);
    cap(out)
}

fn yamlish(value: &Value, depth: usize, out: &mut String) {
    let pad = "  ".repeat(depth);
    match value {
        Value::Object(map) => {
            for (key, inner) in map {
                match inner {
                    Value::Object(_) | Value::Array(_) => {
                        out.push_str(&format!("{pad}{key}:\n"));
                        yamlish(inner, depth + 1, out);
                    }
                    scalar => out.push_str(&format!("{pad}{key}: {scalar}\n")),
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                match item {
                    Value::Object(_) | Value::Array(_) => {
                        out.push_str(&format!("{pad}-\n"));
                        yamlish(item, depth + 1, out);
                    }
                    scalar => out.push_str(&format!("{pad}- {scalar}\n")),
                }
            }
        }
        scalar => out.push_str(&format!("{pad}{scalar}\n")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn short_reasoning_renders_in_full() {
        let text = "a".repeat(60);
        let rendered = format_reasoning(&text);
        assert_eq!(rendered, format!("> thinking: {text}"));
        assert!(!rendered.contains('…'));
    }

    #[test]
    fn long_reasoning_elides_with_disjoint_segments() {
        // 61 chars: 30-char head, 30-char tail, one char elided.
        let text: String = ('a'..='z').cycle().take(61).collect();
        let rendered = format_reasoning(&text);
        assert!(rendered.contains('…'));

        let body = rendered.strip_prefix("> thinking: ").unwrap();
        let (begin, end) = body.split_once('…').unwrap();
        assert_eq!(begin.chars().count(), 30);
        assert_eq!(end.chars().count(), 30);
        assert_eq!(begin, &text.chars().take(30).collect::<String>());
        assert_eq!(end, &text.chars().skip(31).collect::<String>());
    }

    #[test]
    fn tool_summary_picks_salient_field() {
        assert_eq!(
            tool_summary("bash", &json!({ "command": "cargo test" })),
            "⚙ bash: cargo test"
        );
        assert_eq!(
            tool_summary("read", &json!({ "filePath": "src/lib.rs" })),
            "⚙ read: src/lib.rs"
        );
        assert_eq!(tool_summary("mystery", &json!({})), "⚙ mystery");
    }

    #[test]
    fn tool_summary_flattens_and_caps_long_commands() {
        let command = format!("echo {}\necho more", "x".repeat(200));
        let summary = tool_summary("bash", &json!({ "command": command }));
        assert!(!summary.contains('\n'));
        assert!(summary.chars().count() < 140);
        assert!(summary.ends_with('…'));
    }

    #[test]
    fn todos_render_with_status_icons() {
        let todos = vec![
            TodoItem {
                content: "first".into(),
                status: TodoStatus::Completed,
            },
            TodoItem {
                content: "second".into(),
                status: TodoStatus::InProgress,
            },
            TodoItem {
                content: "third".into(),
                status: TodoStatus::Pending,
            },
        ];
        let rendered = render_todos(&todos);
        assert_eq!(rendered, "Todo:\n● first\n◐ second\n○ third");
    }

    #[test]
    fn edit_input_becomes_diff() {
        let (path, diff) = diff_from_tool_input(
            "edit",
            &json!({
                "filePath": "src/main.rs",
                "oldString": "let a = 1;",
                "newString": "let a = 2;\nlet b = 3;",
            }),
        )
        .unwrap();
        assert_eq!(path, "src/main.rs");
        assert!(diff.contains("- let a = 1;"));
        assert!(diff.contains("+ let b = 3;"));
    }

    #[test]
    fn write_input_becomes_additions_only() {
        let (_, diff) =
            diff_from_tool_input("write", &json!({ "filePath": "a.txt", "content": "x\ny" }))
                .unwrap();
        assert!(diff.contains("+ x"));
        assert!(diff.contains("+ y"));
        assert!(!diff.lines().any(|l| l.starts_with("- ")));
    }

    #[test]
    fn non_diffable_input_is_none() {
        assert!(diff_from_tool_input("edit", &json!({})).is_none());
        assert!(diff_from_tool_input("bash", &json!({ "filePath": "x" })).is_none());
    }

    #[test]
    fn diff_preview_caps_at_eight_lines() {
        let mut diff = String::from("--- a/f\n+++ b/f\n");
        for i in 0..12 {
            diff.push_str(&format!("+ line {i}\n"));
        }
        let preview = diff_preview(&diff);
        assert_eq!(preview.lines().count(), DIFF_PREVIEW_LINES + 1);
        assert!(preview.ends_with("… 4 more lines"));
        assert!(!preview.contains("+++"));
    }

    #[test]
    fn aborted_errors_collapse_to_interrupted() {
        assert_eq!(
            format_session_error(&json!("request aborted by user")),
            "Interrupted."
        );
        assert_eq!(
            format_session_error(&json!({ "name": "MessageAbortedError" })),
            "Interrupted."
        );
    }

    #[test]
    fn other_errors_dump_truncated() {
        let rendered = format_session_error(&json!({ "message": "boom" }));
        assert!(rendered.starts_with("Error: "));
        assert!(rendered.contains("boom"));
    }

    #[test]
    fn unknown_event_dump_is_indented_and_capped() {
        let rendered = format_unknown_event(
            "thing.changed",
            &json!({ "a": 1, "nested": { "b": "two" }, "list": [1, 2] }),
        );
        assert!(rendered.starts_with("Unhandled event thing.changed:\n"));
        assert!(rendered.contains("  a: 1"));
        assert!(rendered.contains("    b: \"two\""));
        assert!(rendered.len() <= DUMP_MAX + 4);
    }
}
