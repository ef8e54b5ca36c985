// SPDX-FileCopyrightText: 2026 Opengram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The streaming projector: agent events in, Telegram messages out.
//!
//! A per-(session, message, part-type) state machine, not a pure
//! transform: debouncing, markdown degradation, and step-finish flushing
//! all require memory. Parts arriving before their assistant message is
//! registered are buffered; `sent_part_ids` guarantees each one-shot part
//! is emitted at most once.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, warn};

use opengram_agent::client::AgentClient;
use opengram_agent::diffview::DiffViewerClient;
use opengram_agent::events::{
    AgentEvent, Part, PartKind, PermissionRequest, QuestionRequest, SessionStatus, ToolState,
};
use opengram_core::messenger::Messenger;
use opengram_core::pending::{
    question_data, permission_data, OptionChoice, PendingPermission, PendingQuestion,
    PendingRegistry, PermissionChoice,
};
use opengram_core::types::{Button, Keyboard, SendOptions, ThreadKey};

use crate::render;
use crate::text::{StreamTiming, StreamingMessage};
use crate::typing::{TypingHandle, TypingMode};

/// Question prompts show at most this many option buttons before `Other`.
const MAX_OPTION_BUTTONS: usize = 7;

#[derive(Default)]
struct SessionProjection {
    thread_id: Option<i64>,
    /// Assistant message ids announced via `message.updated`.
    registered: HashSet<String>,
    /// Parts that arrived before their message was registered.
    buffered: HashMap<String, Vec<Part>>,
    /// One-shot parts already emitted.
    sent_part_ids: HashSet<String>,
    texts: HashMap<String, StreamingMessage>,
    reasonings: HashMap<String, StreamingMessage>,
    /// Todo lists edit in place, keyed by part id.
    todo_messages: HashMap<String, i32>,
    typing: Option<TypingHandle>,
}

/// Projects the agent's event stream onto Telegram.
pub struct Projector {
    messenger: Arc<dyn Messenger>,
    agent: Arc<AgentClient>,
    pending: Arc<PendingRegistry>,
    diff_viewer: Option<DiffViewerClient>,
    chat_id: i64,
    configured_thread: Option<i64>,
    sessions: HashMap<String, SessionProjection>,
}

impl Projector {
    pub fn new(
        messenger: Arc<dyn Messenger>,
        agent: Arc<AgentClient>,
        pending: Arc<PendingRegistry>,
        diff_viewer: Option<DiffViewerClient>,
        chat_id: i64,
        configured_thread: Option<i64>,
    ) -> Self {
        Self {
            messenger,
            agent,
            pending,
            diff_viewer,
            chat_id,
            configured_thread,
            sessions: HashMap::new(),
        }
    }

    /// The thread a session's output goes to.
    pub fn dest(&self, session_id: &str) -> ThreadKey {
        let thread = self
            .sessions
            .get(session_id)
            .and_then(|s| s.thread_id)
            .or(self.configured_thread);
        ThreadKey::new(self.chat_id, thread)
    }

    /// Binds a session to a forum topic (used by `/rename` and startup).
    pub fn bind_session_thread(&mut self, session_id: &str, thread_id: Option<i64>) {
        self.ensure_session(session_id).thread_id = thread_id;
    }

    /// Applies one agent event.
    pub async fn handle_event(&mut self, event: AgentEvent) {
        match event {
            AgentEvent::SessionStatus { session_id, status } => {
                self.handle_status(&session_id, status).await;
            }
            AgentEvent::SessionCreated { session_id, title } => {
                self.ensure_topic(&session_id, title.as_deref()).await;
            }
            AgentEvent::SessionIdle { session_id } => {
                self.finish_session_turn(&session_id).await;
            }
            AgentEvent::SessionError { session_id, error } => {
                let session_id = session_id.unwrap_or_default();
                let text = render::format_session_error(&error);
                self.send_line(&session_id, &text).await;
                self.finish_session_turn(&session_id).await;
            }
            AgentEvent::SessionDiff { .. } => {
                // Too verbose to render.
            }
            AgentEvent::MessageUpdated {
                session_id,
                message_id,
                role,
            } => {
                if role != "assistant" {
                    return;
                }
                let projection = self.ensure_session(&session_id);
                projection.registered.insert(message_id.clone());
                let backlog = projection.buffered.remove(&message_id).unwrap_or_default();
                for part in backlog {
                    self.handle_part(&session_id, part).await;
                }
            }
            AgentEvent::PartUpdated(part) => {
                let session_id = part.session_id.clone();
                let projection = self.ensure_session(&session_id);
                if projection.registered.contains(&part.message_id) {
                    self.handle_part(&session_id, part).await;
                } else {
                    debug!(message_id = %part.message_id, "buffering part before registration");
                    projection
                        .buffered
                        .entry(part.message_id.clone())
                        .or_default()
                        .push(part);
                }
            }
            AgentEvent::QuestionAsked(request) => self.open_question(request).await,
            AgentEvent::PermissionAsked(request) => self.open_permission(request).await,
            AgentEvent::Unknown { event_type, raw } => {
                warn!(event_type, "unrecognized agent event");
                let dump = render::format_unknown_event(&event_type, &raw);
                let dest = ThreadKey::new(self.chat_id, self.configured_thread);
                let _ = self.messenger.send(dest, &dump, SendOptions::default()).await;
            }
        }
    }

    async fn handle_status(&mut self, session_id: &str, status: SessionStatus) {
        match status {
            SessionStatus::Busy => {
                let dest = self.dest(session_id);
                let messenger = Arc::clone(&self.messenger);
                let projection = self.ensure_session(session_id);
                if projection.typing.is_none() {
                    projection.typing =
                        Some(TypingHandle::start(messenger, dest, TypingMode::Idle));
                }
            }
            SessionStatus::Retry(message) => {
                let text = match message {
                    Some(m) => format!("Retrying: {m}"),
                    None => "Retrying…".to_string(),
                };
                self.send_line(session_id, &text).await;
            }
            SessionStatus::Error(message) => {
                let text = match message {
                    Some(m) => format!("Error: {m}"),
                    None => "Error.".to_string(),
                };
                self.send_line(session_id, &text).await;
            }
            SessionStatus::Idle | SessionStatus::Other(_) => {
                if let Some(projection) = self.sessions.get_mut(session_id) {
                    if let Some(typing) = projection.typing.take() {
                        typing.release();
                    }
                }
            }
        }
    }

    /// Ensures a forum topic exists for the session and stores the mapping.
    async fn ensure_topic(&mut self, session_id: &str, title: Option<&str>) {
        if self.configured_thread.is_some()
            || self
                .sessions
                .get(session_id)
                .is_some_and(|s| s.thread_id.is_some())
        {
            return;
        }
        let name = title.unwrap_or("New session");
        match self.messenger.create_topic(self.chat_id, name).await {
            Ok(thread_id) => {
                debug!(session_id, thread_id, "forum topic created");
                self.ensure_session(session_id).thread_id = Some(thread_id);
            }
            Err(e) => warn!(error = %e, session_id, "failed to create forum topic"),
        }
    }

    /// Session turn ended: stop typing, flush remaining text, drop
    /// per-message stream state.
    async fn finish_session_turn(&mut self, session_id: &str) {
        let Some(projection) = self.sessions.get_mut(session_id) else {
            return;
        };
        if let Some(typing) = projection.typing.take() {
            typing.release();
        }
        let texts = std::mem::take(&mut projection.texts);
        let reasonings = std::mem::take(&mut projection.reasonings);
        projection.buffered.clear();
        projection.todo_messages.clear();

        for stream in texts.values().chain(reasonings.values()) {
            stream.flush().await;
            stream.discard().await;
        }
    }

    async fn handle_part(&mut self, session_id: &str, part: Part) {
        let dest = self.dest(session_id);
        match part.kind {
            PartKind::Text { ref text } => {
                let messenger = Arc::clone(&self.messenger);
                let projection = self.ensure_session(session_id);
                let stream = projection
                    .texts
                    .entry(part.message_id.clone())
                    .or_insert_with(|| {
                        StreamingMessage::new(messenger, dest, StreamTiming::text())
                    });
                stream.update(text).await;
            }
            PartKind::Reasoning { ref text } => {
                let messenger = Arc::clone(&self.messenger);
                let projection = self.ensure_session(session_id);
                let stream = projection
                    .reasonings
                    .entry(part.message_id.clone())
                    .or_insert_with(|| {
                        StreamingMessage::new(messenger, dest, StreamTiming::reasoning())
                    });
                stream.update(&render::format_reasoning(text)).await;
            }
            PartKind::Tool {
                ref tool,
                state,
                ref input,
            } => {
                self.handle_tool_part(session_id, &part.id, tool, state, input)
                    .await;
            }
            PartKind::StepStart => {}
            PartKind::StepFinish => {
                let projection = self.ensure_session(session_id);
                if let Some(typing) = projection.typing.take() {
                    typing.release();
                }
                let text = projection.texts.get(&part.message_id);
                let reasoning = projection.reasonings.get(&part.message_id);
                if let Some(stream) = reasoning {
                    stream.flush().await;
                }
                if let Some(stream) = text {
                    stream.flush().await;
                }
            }
            PartKind::Patch => {}
            PartKind::Todo { ref todos } => {
                let rendered = render::render_todos(todos);
                let existing = self
                    .ensure_session(session_id)
                    .todo_messages
                    .get(&part.id)
                    .copied();
                match existing {
                    Some(message_id) => {
                        let _ = self
                            .messenger
                            .edit(dest.chat_id, message_id, &rendered, None)
                            .await;
                    }
                    None => {
                        if let Ok(outcome) = self
                            .messenger
                            .send(dest, &rendered, SendOptions::default())
                            .await
                        {
                            self.ensure_session(session_id)
                                .todo_messages
                                .insert(part.id.clone(), outcome.message_id);
                        }
                    }
                }
            }
            PartKind::Other {
                ref part_type,
                ref raw,
            } => {
                if self
                    .ensure_session(session_id)
                    .sent_part_ids
                    .insert(part.id.clone())
                {
                    let dump = render::format_other_part(part_type, raw);
                    let _ = self.messenger.send(dest, &dump, SendOptions::default()).await;
                }
            }
        }
    }

    async fn handle_tool_part(
        &mut self,
        session_id: &str,
        part_id: &str,
        tool: &str,
        state: ToolState,
        input: &serde_json::Value,
    ) {
        let dest = self.dest(session_id);
        let in_place_edit = matches!(tool, "edit" | "write");

        match state {
            ToolState::Running if !in_place_edit => {
                let projection = self.ensure_session(session_id);
                if let Some(typing) = projection.typing.as_ref() {
                    typing.bump(TypingMode::Tool);
                }
                if projection.sent_part_ids.insert(part_id.to_string()) {
                    let summary = render::tool_summary(tool, input);
                    let _ = self
                        .messenger
                        .send(dest, &summary, SendOptions::default())
                        .await;
                }
            }
            ToolState::Completed if in_place_edit => {
                let done_key = format!("{part_id}:done");
                if !self
                    .ensure_session(session_id)
                    .sent_part_ids
                    .insert(done_key)
                {
                    return;
                }
                let Some((path, diff)) = render::diff_from_tool_input(tool, input) else {
                    return;
                };
                let preview = render::diff_preview(&diff);
                let text = format!("✏ {path}\n```\n{preview}\n```");

                // A failed upload just means no button.
                let keyboard = match &self.diff_viewer {
                    Some(viewer) => match viewer.upload(&path, &diff).await {
                        Ok(url) => Some(Keyboard::single_row(vec![Button::url("View Diff", url)])),
                        Err(e) => {
                            debug!(error = %e, "diff upload failed, sending without button");
                            None
                        }
                    },
                    None => None,
                };

                let _ = self
                    .messenger
                    .send(
                        dest,
                        &text,
                        SendOptions {
                            keyboard,
                            reply_to: None,
                        },
                    )
                    .await;
            }
            _ => {}
        }
    }

    async fn open_question(&mut self, request: QuestionRequest) {
        let key = self.dest(&request.session_id);
        let mut message_ids = Vec::with_capacity(request.questions.len());

        for (idx, question) in request.questions.iter().enumerate() {
            let mut buttons: Vec<Button> = question
                .options
                .iter()
                .take(MAX_OPTION_BUTTONS)
                .enumerate()
                .map(|(opt_idx, label)| {
                    Button::callback(label, question_data(key, idx, OptionChoice::Index(opt_idx)))
                })
                .collect();
            buttons.push(Button::callback(
                "Other",
                question_data(key, idx, OptionChoice::Other),
            ));

            let options = SendOptions {
                keyboard: Some(Keyboard::in_columns(buttons, 2)),
                reply_to: None,
            };
            match self.messenger.send(key, &question.text, options).await {
                Ok(outcome) => message_ids.push(outcome.message_id),
                Err(e) => {
                    warn!(error = %e, "failed to post question prompt");
                    message_ids.push(0);
                }
            }
        }

        let record = PendingQuestion {
            request_id: request.request_id,
            key,
            questions: request.questions,
            answers: BTreeMap::new(),
            message_ids,
            awaiting_freetext: None,
        };
        if let Some(replaced) = self.pending.put_question(record).await {
            debug!(request_id = %replaced.request_id, "rejecting superseded question");
            if let Err(e) = self.agent.reject_question(&replaced.request_id).await {
                warn!(error = %e, "failed to reject superseded question");
            }
        }
    }

    async fn open_permission(&mut self, request: PermissionRequest) {
        let key = self.dest(&request.session_id);
        let text =
            opengram_core::pending::permission_prompt_text(&request.permission, &request.patterns);

        let keyboard = Keyboard::single_row(vec![
            Button::callback("Accept", permission_data(key, PermissionChoice::Once)),
            Button::callback(
                "Accept Always",
                permission_data(key, PermissionChoice::Always),
            ),
            Button::callback("Deny", permission_data(key, PermissionChoice::Reject)),
        ]);

        let message_id = match self
            .messenger
            .send(
                key,
                &text,
                SendOptions {
                    keyboard: Some(keyboard),
                    reply_to: None,
                },
            )
            .await
        {
            Ok(outcome) => outcome.message_id,
            Err(e) => {
                warn!(error = %e, "failed to post permission prompt");
                0
            }
        };

        let record = PendingPermission {
            request_id: request.request_id,
            key,
            permission: request.permission,
            patterns: request.patterns,
            message_id,
        };
        if let Some(replaced) = self.pending.put_permission(record).await {
            debug!(request_id = %replaced.request_id, "rejecting superseded permission");
            if let Err(e) = self
                .agent
                .reply_permission(&replaced.request_id, PermissionChoice::Reject)
                .await
            {
                warn!(error = %e, "failed to reject superseded permission");
            }
        }
    }

    async fn send_line(&self, session_id: &str, text: &str) {
        let dest = self.dest(session_id);
        if let Err(e) = self.messenger.send(dest, text, SendOptions::default()).await {
            warn!(error = %e, "failed to send status line");
        }
    }

    fn ensure_session(&mut self, session_id: &str) -> &mut SessionProjection {
        self.sessions.entry(session_id.to_string()).or_default()
    }
}
