// SPDX-FileCopyrightText: 2026 Opengram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Channel-agnostic types shared across the bridge.
//!
//! The router, projector, and pending registry never see teloxide types;
//! the Telegram transport normalizes raw updates into [`Incoming`] values
//! and renders [`Keyboard`]s back into inline markup.

use serde::{Deserialize, Serialize};

/// Identifies one conversation surface: a chat plus an optional forum topic.
///
/// All pending interactions and streaming state are keyed by this pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThreadKey {
    pub chat_id: i64,
    pub thread_id: Option<i64>,
}

impl ThreadKey {
    pub fn new(chat_id: i64, thread_id: Option<i64>) -> Self {
        Self { chat_id, thread_id }
    }

    /// Renders the key for embedding in callback data: `<chat>:<thread>`,
    /// with `-` standing in for "no topic".
    pub fn encode(&self) -> String {
        match self.thread_id {
            Some(t) => format!("{}:{}", self.chat_id, t),
            None => format!("{}:-", self.chat_id),
        }
    }

    /// Parses the `<chat>:<thread>` form produced by [`encode`](Self::encode).
    pub fn decode(chat: &str, thread: &str) -> Option<Self> {
        let chat_id = chat.parse::<i64>().ok()?;
        let thread_id = if thread == "-" {
            None
        } else {
            Some(thread.parse::<i64>().ok()?)
        };
        Some(Self { chat_id, thread_id })
    }
}

impl std::fmt::Display for ThreadKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.thread_id {
            Some(t) => write!(f, "{}/{}", self.chat_id, t),
            None => write!(f, "{}", self.chat_id),
        }
    }
}

/// A `provider/model` pair as the agent reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRef {
    pub provider: String,
    pub model: String,
}

impl ModelRef {
    /// Parses `provider/model`. The model part may itself contain slashes.
    pub fn parse(s: &str) -> Option<Self> {
        let (provider, model) = s.split_once('/')?;
        if provider.is_empty() || model.is_empty() {
            return None;
        }
        Some(Self {
            provider: provider.to_string(),
            model: model.to_string(),
        })
    }
}

impl std::fmt::Display for ModelRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}

/// The bridge's view of the active agent session.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub id: String,
    /// False until a title has been generated or set via `/rename`.
    pub title_known: bool,
    /// Per-session model override from `/model <provider>/<model>`.
    pub selected_model: Option<ModelRef>,
}

impl SessionInfo {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title_known: false,
            selected_model: None,
        }
    }
}

/// What pressing an inline keyboard button does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ButtonAction {
    /// Sends a callback query carrying this data.
    Callback(String),
    /// Opens a URL.
    Url(String),
}

/// One inline keyboard button.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub label: String,
    pub action: ButtonAction,
}

impl Button {
    pub fn callback(label: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            action: ButtonAction::Callback(data.into()),
        }
    }

    pub fn url(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            action: ButtonAction::Url(url.into()),
        }
    }
}

/// Rows of inline keyboard buttons.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Keyboard {
    pub rows: Vec<Vec<Button>>,
}

impl Keyboard {
    /// Lays `buttons` out in rows of `columns`.
    pub fn in_columns(buttons: Vec<Button>, columns: usize) -> Self {
        let mut rows = Vec::new();
        let mut row = Vec::new();
        for b in buttons {
            row.push(b);
            if row.len() == columns {
                rows.push(std::mem::take(&mut row));
            }
        }
        if !row.is_empty() {
            rows.push(row);
        }
        Self { rows }
    }

    pub fn single_row(buttons: Vec<Button>) -> Self {
        Self {
            rows: vec![buttons],
        }
    }
}

/// Options for an outbound send.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub keyboard: Option<Keyboard>,
    pub reply_to: Option<i32>,
}

/// Result of a send: the id of the last chunk delivered, and whether
/// markdown survived (false means the plain-text fallback was used).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendOutcome {
    pub message_id: i32,
    pub used_markdown: bool,
}

/// Result of an edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EditOutcome {
    pub ok: bool,
    pub used_markdown: bool,
}

/// Reference to a Telegram-hosted file in an incoming message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRef {
    pub file_id: String,
    pub mime: Option<String>,
}

/// A normalized incoming text/media message.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub update_id: i64,
    pub chat_id: i64,
    pub thread_id: Option<i64>,
    pub message_id: i32,
    /// Message date in epoch seconds, as Telegram reports it.
    pub date: i64,
    pub from_is_bot: bool,
    pub text: Option<String>,
    pub caption: Option<String>,
    /// Largest available photo size, if the message carries a photo.
    pub photo: Option<MediaRef>,
    pub voice: Option<MediaRef>,
    pub has_video: bool,
}

impl IncomingMessage {
    pub fn key(&self) -> ThreadKey {
        ThreadKey::new(self.chat_id, self.thread_id)
    }

    /// The text the router classifies on: message text, falling back to the
    /// media caption.
    pub fn effective_text(&self) -> Option<&str> {
        self.text.as_deref().or(self.caption.as_deref())
    }
}

/// A normalized callback-query (inline button press).
#[derive(Debug, Clone)]
pub struct IncomingCallback {
    pub update_id: i64,
    pub callback_id: String,
    pub chat_id: i64,
    pub thread_id: Option<i64>,
    /// Epoch seconds of the message the callback is attached to, when known.
    pub date: Option<i64>,
    pub data: String,
    pub message_id: Option<i32>,
}

/// A normalized Telegram update.
#[derive(Debug, Clone)]
pub enum Incoming {
    Message(IncomingMessage),
    Callback(IncomingCallback),
}

impl Incoming {
    pub fn update_id(&self) -> i64 {
        match self {
            Incoming::Message(m) => m.update_id,
            Incoming::Callback(c) => c.update_id,
        }
    }

    pub fn chat_id(&self) -> i64 {
        match self {
            Incoming::Message(m) => m.chat_id,
            Incoming::Callback(c) => c.chat_id,
        }
    }

    pub fn thread_id(&self) -> Option<i64> {
        match self {
            Incoming::Message(m) => m.thread_id,
            Incoming::Callback(c) => c.thread_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_key_encode_decode_round_trip() {
        let with_thread = ThreadKey::new(-1001234, Some(42));
        let parts: Vec<&str> = ["-1001234", "42"].to_vec();
        assert_eq!(with_thread.encode(), "-1001234:42");
        assert_eq!(ThreadKey::decode(parts[0], parts[1]), Some(with_thread));

        let no_thread = ThreadKey::new(555, None);
        assert_eq!(no_thread.encode(), "555:-");
        assert_eq!(ThreadKey::decode("555", "-"), Some(no_thread));
    }

    #[test]
    fn thread_key_decode_rejects_garbage() {
        assert_eq!(ThreadKey::decode("abc", "1"), None);
        assert_eq!(ThreadKey::decode("1", "xyz"), None);
    }

    #[test]
    fn model_ref_parse() {
        let m = ModelRef::parse("anthropic/claude-sonnet-4").unwrap();
        assert_eq!(m.provider, "anthropic");
        assert_eq!(m.model, "claude-sonnet-4");
        assert_eq!(m.to_string(), "anthropic/claude-sonnet-4");

        assert!(ModelRef::parse("noslash").is_none());
        assert!(ModelRef::parse("/model").is_none());
        assert!(ModelRef::parse("provider/").is_none());
    }

    #[test]
    fn keyboard_in_columns_of_two() {
        let buttons = (0..5)
            .map(|i| Button::callback(format!("opt{i}"), format!("d{i}")))
            .collect();
        let kb = Keyboard::in_columns(buttons, 2);
        assert_eq!(kb.rows.len(), 3);
        assert_eq!(kb.rows[0].len(), 2);
        assert_eq!(kb.rows[2].len(), 1);
    }

    #[test]
    fn effective_text_prefers_text_over_caption() {
        let mut msg = IncomingMessage {
            update_id: 1,
            chat_id: 1,
            thread_id: None,
            message_id: 1,
            date: 0,
            from_is_bot: false,
            text: Some("hello".into()),
            caption: Some("caption".into()),
            photo: None,
            voice: None,
            has_video: false,
        };
        assert_eq!(msg.effective_text(), Some("hello"));
        msg.text = None;
        assert_eq!(msg.effective_text(), Some("caption"));
    }
}
