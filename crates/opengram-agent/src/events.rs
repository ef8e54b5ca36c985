// SPDX-FileCopyrightText: 2026 Opengram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Typed model of the agent's event stream.
//!
//! The agent emits JSON events of the form `{"type": "...", "properties":
//! {...}}`. Parsing is deliberately tolerant: anything the bridge does not
//! recognize is preserved verbatim as [`AgentEvent::Unknown`] so the
//! projector can surface it as a debug dump instead of dropping it.

use serde_json::Value;

use opengram_core::pending::QuestionSpec;

/// The agent session's reported activity state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    Busy,
    Idle,
    Retry(Option<String>),
    Error(Option<String>),
    Other(String),
}

/// A to-do entry from a `todowrite` part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TodoItem {
    pub content: String,
    pub status: TodoStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

impl TodoStatus {
    fn parse(s: &str) -> Self {
        match s {
            "in_progress" => Self::InProgress,
            "completed" => Self::Completed,
            "cancelled" => Self::Cancelled,
            _ => Self::Pending,
        }
    }
}

/// Lifecycle state of a tool invocation part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolState {
    Pending,
    Running,
    Completed,
    Error,
}

impl ToolState {
    fn parse(s: &str) -> Self {
        match s {
            "running" => Self::Running,
            "completed" => Self::Completed,
            "error" => Self::Error,
            _ => Self::Pending,
        }
    }
}

/// The payload of one incremental message part.
#[derive(Debug, Clone)]
pub enum PartKind {
    Text { text: String },
    Reasoning { text: String },
    Tool {
        tool: String,
        state: ToolState,
        input: Value,
    },
    StepStart,
    StepFinish,
    Patch,
    Todo { todos: Vec<TodoItem> },
    Other { part_type: String, raw: Value },
}

/// One incremental fragment of an assistant message.
#[derive(Debug, Clone)]
pub struct Part {
    pub id: String,
    pub session_id: String,
    pub message_id: String,
    pub kind: PartKind,
}

/// A `question.asked` request.
#[derive(Debug, Clone)]
pub struct QuestionRequest {
    pub request_id: String,
    pub session_id: String,
    pub questions: Vec<QuestionSpec>,
}

/// A `permission.asked` request.
#[derive(Debug, Clone)]
pub struct PermissionRequest {
    pub request_id: String,
    pub session_id: String,
    pub permission: String,
    pub patterns: Vec<String>,
}

/// One event from the agent's stream, in the order the projector handles
/// them.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    SessionStatus {
        session_id: String,
        status: SessionStatus,
    },
    SessionCreated {
        session_id: String,
        title: Option<String>,
    },
    SessionIdle {
        session_id: String,
    },
    SessionError {
        session_id: Option<String>,
        error: Value,
    },
    /// Rendered nowhere (too verbose), but parsed so it never hits the
    /// unknown-event dump.
    SessionDiff {
        session_id: String,
    },
    MessageUpdated {
        session_id: String,
        message_id: String,
        role: String,
    },
    PartUpdated(Part),
    QuestionAsked(QuestionRequest),
    PermissionAsked(PermissionRequest),
    Unknown {
        event_type: String,
        raw: Value,
    },
}

impl AgentEvent {
    /// Parses one raw event. Never fails: unrecognized or malformed events
    /// become [`AgentEvent::Unknown`].
    pub fn parse(raw: &Value) -> AgentEvent {
        let event_type = raw.get("type").and_then(Value::as_str).unwrap_or("");
        let props = raw.get("properties").unwrap_or(raw);

        match event_type {
            "session.status" => {
                let Some(session_id) = str_field(props, "sessionID") else {
                    return unknown(event_type, raw);
                };
                let status = match props.get("status").and_then(Value::as_str) {
                    Some("busy") => SessionStatus::Busy,
                    Some("idle") => SessionStatus::Idle,
                    Some("retry") => SessionStatus::Retry(str_field(props, "message")),
                    Some("error") => SessionStatus::Error(str_field(props, "message")),
                    Some(other) => SessionStatus::Other(other.to_string()),
                    None => return unknown(event_type, raw),
                };
                AgentEvent::SessionStatus { session_id, status }
            }
            "session.created" => {
                let Some(session_id) = str_field(props, "sessionID") else {
                    return unknown(event_type, raw);
                };
                AgentEvent::SessionCreated {
                    session_id,
                    title: str_field(props, "title"),
                }
            }
            "session.idle" => match str_field(props, "sessionID") {
                Some(session_id) => AgentEvent::SessionIdle { session_id },
                None => unknown(event_type, raw),
            },
            "session.error" => AgentEvent::SessionError {
                session_id: str_field(props, "sessionID"),
                error: props.get("error").cloned().unwrap_or(Value::Null),
            },
            "session.diff" => match str_field(props, "sessionID") {
                Some(session_id) => AgentEvent::SessionDiff { session_id },
                None => unknown(event_type, raw),
            },
            "message.updated" => {
                let info = props.get("info").unwrap_or(props);
                match (str_field(info, "id"), str_field(info, "sessionID")) {
                    (Some(message_id), Some(session_id)) => AgentEvent::MessageUpdated {
                        session_id,
                        message_id,
                        role: str_field(info, "role").unwrap_or_default(),
                    },
                    _ => unknown(event_type, raw),
                }
            }
            "message.part.updated" => match parse_part(props) {
                Some(part) => AgentEvent::PartUpdated(part),
                None => unknown(event_type, raw),
            },
            "question.asked" => match parse_question(props) {
                Some(request) => AgentEvent::QuestionAsked(request),
                None => unknown(event_type, raw),
            },
            "permission.asked" => match parse_permission(props) {
                Some(request) => AgentEvent::PermissionAsked(request),
                None => unknown(event_type, raw),
            },
            _ => unknown(event_type, raw),
        }
    }
}

fn unknown(event_type: &str, raw: &Value) -> AgentEvent {
    AgentEvent::Unknown {
        event_type: if event_type.is_empty() {
            "<untyped>".to_string()
        } else {
            event_type.to_string()
        },
        raw: raw.clone(),
    }
}

fn str_field(value: &Value, field: &str) -> Option<String> {
    value.get(field).and_then(Value::as_str).map(str::to_owned)
}

fn parse_part(props: &Value) -> Option<Part> {
    let part = props.get("part")?;
    let id = str_field(part, "id")?;
    let session_id = str_field(part, "sessionID")?;
    let message_id = str_field(part, "messageID")?;
    let part_type = part.get("type").and_then(Value::as_str)?;

    let kind = match part_type {
        "text" => PartKind::Text {
            text: str_field(part, "text").unwrap_or_default(),
        },
        "reasoning" => PartKind::Reasoning {
            text: str_field(part, "text").unwrap_or_default(),
        },
        "tool" => {
            let state = part.get("state").unwrap_or(&Value::Null);
            PartKind::Tool {
                tool: str_field(part, "tool").unwrap_or_else(|| "tool".to_string()),
                state: ToolState::parse(
                    state.get("status").and_then(Value::as_str).unwrap_or(""),
                ),
                input: state.get("input").cloned().unwrap_or(Value::Null),
            }
        }
        "step-start" => PartKind::StepStart,
        "step-finish" => PartKind::StepFinish,
        "patch" => PartKind::Patch,
        "todowrite" => {
            let todos = part
                .get("todos")
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|t| {
                            Some(TodoItem {
                                content: str_field(t, "content")?,
                                status: TodoStatus::parse(
                                    t.get("status").and_then(Value::as_str).unwrap_or(""),
                                ),
                            })
                        })
                        .collect()
                })
                .unwrap_or_default();
            PartKind::Todo { todos }
        }
        other => PartKind::Other {
            part_type: other.to_string(),
            raw: part.clone(),
        },
    };

    Some(Part {
        id,
        session_id,
        message_id,
        kind,
    })
}

fn parse_question(props: &Value) -> Option<QuestionRequest> {
    let request_id = str_field(props, "id")?;
    let session_id = str_field(props, "sessionID")?;
    let questions = props
        .get("questions")
        .and_then(Value::as_array)?
        .iter()
        .filter_map(|q| {
            let text = str_field(q, "question").or_else(|| str_field(q, "text"))?;
            let options = q
                .get("options")
                .and_then(Value::as_array)
                .map(|opts| {
                    opts.iter()
                        .filter_map(|o| {
                            o.as_str()
                                .map(str::to_owned)
                                .or_else(|| str_field(o, "label"))
                        })
                        .collect()
                })
                .unwrap_or_default();
            Some(QuestionSpec { text, options })
        })
        .collect::<Vec<_>>();

    if questions.is_empty() {
        return None;
    }
    Some(QuestionRequest {
        request_id,
        session_id,
        questions,
    })
}

fn parse_permission(props: &Value) -> Option<PermissionRequest> {
    let request_id = str_field(props, "id")?;
    let session_id = str_field(props, "sessionID")?;
    let permission = str_field(props, "permission")
        .or_else(|| str_field(props, "title"))
        .unwrap_or_else(|| "permission".to_string());
    let patterns = props
        .get("patterns")
        .and_then(Value::as_array)
        .map(|p| p.iter().filter_map(|v| v.as_str().map(str::to_owned)).collect())
        .unwrap_or_default();
    Some(PermissionRequest {
        request_id,
        session_id,
        permission,
        patterns,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_session_status_variants() {
        let busy = AgentEvent::parse(&json!({
            "type": "session.status",
            "properties": { "sessionID": "s1", "status": "busy" }
        }));
        assert!(matches!(
            busy,
            AgentEvent::SessionStatus { status: SessionStatus::Busy, .. }
        ));

        let retry = AgentEvent::parse(&json!({
            "type": "session.status",
            "properties": { "sessionID": "s1", "status": "retry", "message": "overloaded" }
        }));
        match retry {
            AgentEvent::SessionStatus {
                status: SessionStatus::Retry(msg),
                ..
            } => assert_eq!(msg.as_deref(), Some("overloaded")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parses_text_part() {
        let event = AgentEvent::parse(&json!({
            "type": "message.part.updated",
            "properties": {
                "part": {
                    "id": "p1", "sessionID": "s1", "messageID": "m1",
                    "type": "text", "text": "hello"
                }
            }
        }));
        match event {
            AgentEvent::PartUpdated(part) => {
                assert_eq!(part.id, "p1");
                assert_eq!(part.message_id, "m1");
                assert!(matches!(part.kind, PartKind::Text { ref text } if text == "hello"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parses_tool_part_with_state() {
        let event = AgentEvent::parse(&json!({
            "type": "message.part.updated",
            "properties": {
                "part": {
                    "id": "p2", "sessionID": "s1", "messageID": "m1",
                    "type": "tool", "tool": "edit",
                    "state": {
                        "status": "completed",
                        "input": { "filePath": "src/main.rs", "oldString": "a", "newString": "b" }
                    }
                }
            }
        }));
        match event {
            AgentEvent::PartUpdated(part) => match part.kind {
                PartKind::Tool { tool, state, input } => {
                    assert_eq!(tool, "edit");
                    assert_eq!(state, ToolState::Completed);
                    assert_eq!(input["filePath"], "src/main.rs");
                }
                other => panic!("unexpected kind {other:?}"),
            },
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parses_todo_part() {
        let event = AgentEvent::parse(&json!({
            "type": "message.part.updated",
            "properties": {
                "part": {
                    "id": "p3", "sessionID": "s1", "messageID": "m1",
                    "type": "todowrite",
                    "todos": [
                        { "content": "write tests", "status": "in_progress" },
                        { "content": "ship it", "status": "pending" },
                    ]
                }
            }
        }));
        match event {
            AgentEvent::PartUpdated(Part {
                kind: PartKind::Todo { todos },
                ..
            }) => {
                assert_eq!(todos.len(), 2);
                assert_eq!(todos[0].status, TodoStatus::InProgress);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parses_question_with_string_and_object_options() {
        let event = AgentEvent::parse(&json!({
            "type": "question.asked",
            "properties": {
                "id": "req-1", "sessionID": "s1",
                "questions": [
                    { "question": "Color?", "options": ["Red", "Blue"] },
                    { "question": "Size?", "options": [{ "label": "S" }, { "label": "L" }] },
                ]
            }
        }));
        match event {
            AgentEvent::QuestionAsked(req) => {
                assert_eq!(req.request_id, "req-1");
                assert_eq!(req.questions[0].options, vec!["Red", "Blue"]);
                assert_eq!(req.questions[1].options, vec!["S", "L"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parses_permission() {
        let event = AgentEvent::parse(&json!({
            "type": "permission.asked",
            "properties": {
                "id": "perm-1", "sessionID": "s1",
                "permission": "bash", "patterns": ["cargo *"]
            }
        }));
        match event {
            AgentEvent::PermissionAsked(req) => {
                assert_eq!(req.permission, "bash");
                assert_eq!(req.patterns, vec!["cargo *"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_events_preserve_raw_payload() {
        let raw = json!({ "type": "installation.updated", "properties": { "version": "9" } });
        match AgentEvent::parse(&raw) {
            AgentEvent::Unknown { event_type, raw: kept } => {
                assert_eq!(event_type, "installation.updated");
                assert_eq!(kept, raw);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn malformed_known_event_degrades_to_unknown() {
        let event = AgentEvent::parse(&json!({
            "type": "message.part.updated",
            "properties": { "part": { "type": "text" } }
        }));
        assert!(matches!(event, AgentEvent::Unknown { .. }));
    }
}
