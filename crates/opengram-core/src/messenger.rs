// SPDX-FileCopyrightText: 2026 Opengram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The seam between message producers and the Telegram transport.
//!
//! The streaming projector, command router, and pending registry talk to
//! Telegram exclusively through [`Messenger`], so they can be exercised in
//! tests against `opengram_test_utils::MockMessenger`.

use async_trait::async_trait;

use crate::error::BridgeError;
use crate::types::{EditOutcome, Keyboard, SendOptions, SendOutcome, ThreadKey};

/// Outbound operations against the chat surface.
///
/// Implementations own chunking, markdown fallback, and rate limiting;
/// callers hand over logical text and get back delivery outcomes.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Sends `text` to the destination, splitting at message-size limits.
    /// Returns the id of the last delivered chunk.
    async fn send(
        &self,
        dest: ThreadKey,
        text: &str,
        opts: SendOptions,
    ) -> Result<SendOutcome, BridgeError>;

    /// Edits a previously sent message in place.
    async fn edit(
        &self,
        chat_id: i64,
        message_id: i32,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> Result<EditOutcome, BridgeError>;

    /// Acknowledges a callback query. Best-effort: failures are logged by
    /// the implementation and never surface.
    async fn answer_callback(&self, callback_id: &str, text: Option<&str>, show_alert: bool);

    /// Sends a single typing chat-action. Callers run their own refresh loop.
    async fn typing_once(&self, dest: ThreadKey) -> Result<(), BridgeError>;

    /// Creates a forum topic and returns its thread id. The name is
    /// truncated to Telegram's 128-character limit.
    async fn create_topic(&self, chat_id: i64, name: &str) -> Result<i64, BridgeError>;

    /// Renames an existing forum topic.
    async fn rename_topic(&self, chat_id: i64, thread_id: i64, name: &str)
        -> Result<(), BridgeError>;

    /// Downloads a Telegram-hosted file as raw bytes.
    async fn download_bytes(&self, file_id: &str) -> Result<Vec<u8>, BridgeError>;

    /// Downloads a Telegram-hosted file and returns it as a
    /// `data:<mime>;base64,…` URL.
    async fn download_data_url(&self, file_id: &str, mime: &str) -> Result<String, BridgeError>;
}
