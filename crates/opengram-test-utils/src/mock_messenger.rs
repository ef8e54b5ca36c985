// SPDX-FileCopyrightText: 2026 Opengram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock [`Messenger`] for deterministic testing.
//!
//! Captures every outbound operation and lets tests script markdown
//! failures and broken edits, mirroring how the real transport degrades.

use async_trait::async_trait;
use tokio::sync::Mutex;

use opengram_core::error::BridgeError;
use opengram_core::messenger::Messenger;
use opengram_core::types::{EditOutcome, Keyboard, SendOptions, SendOutcome, ThreadKey};

/// A captured `send` call.
#[derive(Debug, Clone)]
pub struct SentRecord {
    pub dest: ThreadKey,
    pub text: String,
    pub keyboard: Option<Keyboard>,
    pub reply_to: Option<i32>,
    pub message_id: i32,
}

/// A captured `edit` call.
#[derive(Debug, Clone)]
pub struct EditRecord {
    pub chat_id: i64,
    pub message_id: i32,
    pub text: String,
    pub keyboard: Option<Keyboard>,
}

#[derive(Debug)]
struct Inner {
    next_message_id: i32,
    next_thread_id: i64,
    sends: Vec<SentRecord>,
    edits: Vec<EditRecord>,
    callbacks: Vec<(String, Option<String>, bool)>,
    typing_count: usize,
    topics: Vec<(i64, String)>,
    renames: Vec<(i64, String)>,
    markdown_ok: bool,
    fail_edits: bool,
}

/// A messaging channel double with injectable failure modes.
pub struct MockMessenger {
    inner: Mutex<Inner>,
}

impl Default for MockMessenger {
    fn default() -> Self {
        Self::new()
    }
}

impl MockMessenger {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_message_id: 100,
                next_thread_id: 500,
                sends: Vec::new(),
                edits: Vec::new(),
                callbacks: Vec::new(),
                typing_count: 0,
                topics: Vec::new(),
                renames: Vec::new(),
                markdown_ok: true,
                fail_edits: false,
            }),
        }
    }

    /// Makes subsequent sends and edits report the plain-text fallback.
    pub async fn break_markdown(&self) {
        self.inner.lock().await.markdown_ok = false;
    }

    /// Makes subsequent edits fail (transient, `ok = false`).
    pub async fn break_edits(&self) {
        self.inner.lock().await.fail_edits = true;
    }

    pub async fn sends(&self) -> Vec<SentRecord> {
        self.inner.lock().await.sends.clone()
    }

    pub async fn edits(&self) -> Vec<EditRecord> {
        self.inner.lock().await.edits.clone()
    }

    pub async fn callbacks(&self) -> Vec<(String, Option<String>, bool)> {
        self.inner.lock().await.callbacks.clone()
    }

    pub async fn typing_count(&self) -> usize {
        self.inner.lock().await.typing_count
    }

    pub async fn topics(&self) -> Vec<(i64, String)> {
        self.inner.lock().await.topics.clone()
    }

    pub async fn renames(&self) -> Vec<(i64, String)> {
        self.inner.lock().await.renames.clone()
    }

    pub async fn send_count(&self) -> usize {
        self.inner.lock().await.sends.len()
    }

    pub async fn edit_count(&self) -> usize {
        self.inner.lock().await.edits.len()
    }

    pub async fn last_send(&self) -> Option<SentRecord> {
        self.inner.lock().await.sends.last().cloned()
    }

    pub async fn last_edit(&self) -> Option<EditRecord> {
        self.inner.lock().await.edits.last().cloned()
    }
}

#[async_trait]
impl Messenger for MockMessenger {
    async fn send(
        &self,
        dest: ThreadKey,
        text: &str,
        opts: SendOptions,
    ) -> Result<SendOutcome, BridgeError> {
        let mut inner = self.inner.lock().await;
        inner.next_message_id += 1;
        let message_id = inner.next_message_id;
        let used_markdown = inner.markdown_ok;
        inner.sends.push(SentRecord {
            dest,
            text: text.to_string(),
            keyboard: opts.keyboard,
            reply_to: opts.reply_to,
            message_id,
        });
        Ok(SendOutcome {
            message_id,
            used_markdown,
        })
    }

    async fn edit(
        &self,
        chat_id: i64,
        message_id: i32,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> Result<EditOutcome, BridgeError> {
        let mut inner = self.inner.lock().await;
        if inner.fail_edits {
            return Ok(EditOutcome {
                ok: false,
                used_markdown: false,
            });
        }
        let used_markdown = inner.markdown_ok;
        inner.edits.push(EditRecord {
            chat_id,
            message_id,
            text: text.to_string(),
            keyboard,
        });
        Ok(EditOutcome {
            ok: true,
            used_markdown,
        })
    }

    async fn answer_callback(&self, callback_id: &str, text: Option<&str>, show_alert: bool) {
        self.inner.lock().await.callbacks.push((
            callback_id.to_string(),
            text.map(str::to_owned),
            show_alert,
        ));
    }

    async fn typing_once(&self, _dest: ThreadKey) -> Result<(), BridgeError> {
        self.inner.lock().await.typing_count += 1;
        Ok(())
    }

    async fn create_topic(&self, _chat_id: i64, name: &str) -> Result<i64, BridgeError> {
        let mut inner = self.inner.lock().await;
        inner.next_thread_id += 1;
        let thread_id = inner.next_thread_id;
        inner.topics.push((thread_id, name.to_string()));
        Ok(thread_id)
    }

    async fn rename_topic(
        &self,
        _chat_id: i64,
        thread_id: i64,
        name: &str,
    ) -> Result<(), BridgeError> {
        self.inner
            .lock()
            .await
            .renames
            .push((thread_id, name.to_string()));
        Ok(())
    }

    async fn download_bytes(&self, file_id: &str) -> Result<Vec<u8>, BridgeError> {
        Ok(format!("BYTES-{file_id}").into_bytes())
    }

    async fn download_data_url(&self, file_id: &str, mime: &str) -> Result<String, BridgeError> {
        Ok(format!("data:{mime};base64,TEST-{file_id}"))
    }
}
