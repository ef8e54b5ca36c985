// SPDX-FileCopyrightText: 2026 Opengram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Throttled edit-in-place streaming for one logical message.
//!
//! Each assistant text (or reasoning) part is projected onto one Telegram
//! message that is edited as the part grows. Edits are throttled to a
//! 2-second floor with a trailing debounce; a markdown parse failure
//! latches the message into buffer-only mode until the step-finish flush,
//! which always delivers the complete content. Content that outgrows 90%
//! of Telegram's limit is split at the best boundary and continued in a
//! fresh message.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use opengram_core::messenger::Messenger;
use opengram_core::types::{SendOptions, ThreadKey};
use opengram_telegram::split;

/// Initial payloads at or below this length are too short to send; they
/// buffer until the part grows. Heuristic, not a contract.
pub const MIN_FIRST_SEND_CHARS: usize = 10;

/// Accumulated pending text beyond this triggers an early split-and-send.
pub const EARLY_FLUSH_THRESHOLD: usize = split::TELEGRAM_MAX * 9 / 10;

/// Timing profile for a streaming message.
#[derive(Debug, Clone)]
pub struct StreamTiming {
    /// Minimum gap between in-place edits.
    pub edit_floor: Duration,
    /// Trailing delay before a below-floor update is flushed.
    pub debounce: Duration,
}

impl StreamTiming {
    /// Text parts: 2 s floor, 2 s debounce.
    pub fn text() -> Self {
        Self {
            edit_floor: Duration::from_secs(2),
            debounce: Duration::from_secs(2),
        }
    }

    /// Reasoning parts: 2 s floor, 2.5 s debounce.
    pub fn reasoning() -> Self {
        Self {
            edit_floor: Duration::from_secs(2),
            debounce: Duration::from_millis(2500),
        }
    }
}

struct StreamState {
    /// Current full content of the in-flight Telegram message.
    content: String,
    /// Byte prefix of the part's full text already finalized into earlier
    /// messages by early flushes.
    base: usize,
    message_id: Option<i32>,
    last_edit: Instant,
    /// False once a markdown send/edit degraded; partial edits stop and
    /// only the final flush touches the message again.
    markdown_ok: bool,
    /// Latest content already delivered, to skip no-op edits.
    delivered: String,
    debounce: Option<CancellationToken>,
}

/// One streaming Telegram message fed by incremental part updates.
pub struct StreamingMessage {
    messenger: Arc<dyn Messenger>,
    dest: ThreadKey,
    timing: StreamTiming,
    state: Arc<Mutex<StreamState>>,
}

impl StreamingMessage {
    pub fn new(messenger: Arc<dyn Messenger>, dest: ThreadKey, timing: StreamTiming) -> Self {
        Self {
            messenger,
            dest,
            timing,
            state: Arc::new(Mutex::new(StreamState {
                content: String::new(),
                base: 0,
                message_id: None,
                last_edit: Instant::now() - Duration::from_secs(60),
                markdown_ok: true,
                delivered: String::new(),
                debounce: None,
            })),
        }
    }

    /// Applies a part update carrying the part's full text so far.
    pub async fn update(&self, full_text: &str) {
        let mut state = self.state.lock().await;
        if state.base > full_text.len() || !full_text.is_char_boundary(state.base) {
            // The part restarted from scratch; resync.
            state.base = 0;
        }
        state.content = full_text[state.base..].to_string();

        // Outgrown the message: finalize a first piece and continue fresh.
        if state.content.len() >= EARLY_FLUSH_THRESHOLD {
            let cut = split::split_point(&state.content, EARLY_FLUSH_THRESHOLD);
            let head = state.content[..cut].to_string();
            let tail = &state.content[cut..];
            let consumed = cut + (tail.len() - tail.trim_start_matches(['\n', ' ']).len());
            let rest = state.content[consumed..].to_string();
            self.deliver(&mut state, &head).await;
            state.base += consumed;
            state.message_id = None;
            state.markdown_ok = true;
            state.content = rest;
            state.delivered = String::new();
            return;
        }

        match state.message_id {
            None => {
                if state.content.len() <= MIN_FIRST_SEND_CHARS {
                    return; // Too short to be worth a message yet.
                }
                let text = state.content.clone();
                self.deliver(&mut state, &text).await;
            }
            Some(_) => {
                if !state.markdown_ok {
                    return; // Buffer until the final flush.
                }
                if state.last_edit.elapsed() >= self.timing.edit_floor {
                    let text = state.content.clone();
                    self.deliver(&mut state, &text).await;
                } else {
                    let deadline = state.last_edit + self.timing.debounce;
                    self.schedule_debounce(&mut state, deadline);
                }
            }
        }
    }

    /// Step-finish / idle flush: cancel any debounce and deliver the
    /// complete content, logging whether markdown survived.
    pub async fn flush(&self) {
        let mut state = self.state.lock().await;
        if let Some(token) = state.debounce.take() {
            token.cancel();
        }
        if state.content.is_empty() || state.content == state.delivered {
            return;
        }
        let text = state.content.clone();
        self.deliver(&mut state, &text).await;
        info!(
            message_id = state.message_id.unwrap_or(0),
            markdown = state.markdown_ok,
            "stream flushed"
        );
    }

    /// Drops stream state, cancelling any pending debounce.
    pub async fn discard(&self) {
        let mut state = self.state.lock().await;
        if let Some(token) = state.debounce.take() {
            token.cancel();
        }
    }

    async fn deliver(&self, state: &mut StreamState, text: &str) {
        if text.is_empty() {
            return;
        }
        match state.message_id {
            None => match self
                .messenger
                .send(self.dest, text, SendOptions::default())
                .await
            {
                Ok(outcome) => {
                    state.message_id = Some(outcome.message_id);
                    state.markdown_ok = outcome.used_markdown;
                    state.last_edit = Instant::now();
                    state.delivered = text.to_string();
                }
                Err(e) => warn!(error = %e, "stream send failed"),
            },
            Some(message_id) => {
                match self
                    .messenger
                    .edit(self.dest.chat_id, message_id, text, None)
                    .await
                {
                    Ok(outcome) => {
                        if !outcome.used_markdown && state.markdown_ok {
                            debug!(message_id, "markdown degraded, buffering further edits");
                            state.markdown_ok = false;
                        }
                        state.last_edit = Instant::now();
                        if outcome.ok {
                            state.delivered = text.to_string();
                        }
                    }
                    Err(e) => warn!(error = %e, message_id, "stream edit failed"),
                }
            }
        }
    }

    fn schedule_debounce(&self, state: &mut StreamState, deadline: Instant) {
        if let Some(token) = state.debounce.take() {
            token.cancel();
        }
        let token = CancellationToken::new();
        state.debounce = Some(token.clone());

        let stream_state = Arc::clone(&self.state);
        let messenger = Arc::clone(&self.messenger);
        let dest = self.dest;
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep_until(deadline) => {}
            }
            let mut state = stream_state.lock().await;
            if token.is_cancelled() {
                return;
            }
            state.debounce = None;
            let (Some(message_id), true) = (state.message_id, state.markdown_ok) else {
                return;
            };
            if state.content == state.delivered {
                return;
            }
            let text = state.content.clone();
            match messenger.edit(dest.chat_id, message_id, &text, None).await {
                Ok(outcome) => {
                    if !outcome.used_markdown {
                        state.markdown_ok = false;
                    }
                    state.last_edit = Instant::now();
                    if outcome.ok {
                        state.delivered = text;
                    }
                }
                Err(e) => warn!(error = %e, message_id, "debounced edit failed"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opengram_test_utils::MockMessenger;

    fn stream(messenger: &Arc<MockMessenger>) -> StreamingMessage {
        StreamingMessage::new(
            Arc::clone(messenger) as Arc<dyn Messenger>,
            ThreadKey::new(-100, Some(5)),
            StreamTiming::text(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn short_first_content_is_buffered() {
        let messenger = Arc::new(MockMessenger::new());
        let s = stream(&messenger);

        s.update("short").await;
        assert_eq!(messenger.send_count().await, 0);

        s.update("this is long enough to send").await;
        assert_eq!(messenger.send_count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_updates_collapse_to_one_send_and_final_edit() {
        let messenger = Arc::new(MockMessenger::new());
        let s = stream(&messenger);

        let mut text = String::new();
        for i in 0..20 {
            text.push_str(&format!("chunk {i} "));
            s.update(&text).await;
        }
        // All 20 updates land inside the 2 s floor: one send, no edits yet.
        assert_eq!(messenger.send_count().await, 1);
        assert_eq!(messenger.edit_count().await, 0);

        s.flush().await;
        assert_eq!(messenger.edit_count().await, 1);
        let final_edit = messenger.last_edit().await.unwrap();
        assert!(final_edit.text.ends_with("chunk 19 "));
        assert!(final_edit.text.starts_with("chunk 0 "));
    }

    #[tokio::test(start_paused = true)]
    async fn update_after_floor_edits_immediately() {
        let messenger = Arc::new(MockMessenger::new());
        let s = stream(&messenger);

        s.update("the first chunk of text").await;
        assert_eq!(messenger.send_count().await, 1);

        tokio::time::advance(Duration::from_millis(2100)).await;
        s.update("the first chunk of text, extended").await;
        assert_eq!(messenger.edit_count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn debounce_fires_without_further_updates() {
        let messenger = Arc::new(MockMessenger::new());
        let s = stream(&messenger);

        s.update("the first chunk of text").await;
        s.update("the first chunk of text, extended").await;
        assert_eq!(messenger.edit_count().await, 0, "within floor, deferred");

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(messenger.edit_count().await, 1, "debounce delivered it");
        assert!(messenger
            .last_edit()
            .await
            .unwrap()
            .text
            .ends_with("extended"));
    }

    #[tokio::test(start_paused = true)]
    async fn markdown_failure_latches_buffering() {
        let messenger = Arc::new(MockMessenger::new());
        let s = stream(&messenger);

        s.update("the first chunk of text").await;
        messenger.break_markdown().await;

        tokio::time::advance(Duration::from_secs(3)).await;
        s.update("the first chunk of text, more").await;
        assert_eq!(messenger.edit_count().await, 1, "degrading edit goes out");

        tokio::time::advance(Duration::from_secs(3)).await;
        s.update("the first chunk of text, even more").await;
        assert_eq!(messenger.edit_count().await, 1, "now buffering");

        // The final flush still delivers the complete content.
        s.flush().await;
        assert_eq!(messenger.edit_count().await, 2);
        assert!(messenger
            .last_edit()
            .await
            .unwrap()
            .text
            .ends_with("even more"));
    }

    #[tokio::test(start_paused = true)]
    async fn flush_sends_short_buffered_content() {
        let messenger = Arc::new(MockMessenger::new());
        let s = stream(&messenger);

        s.update("ok").await;
        assert_eq!(messenger.send_count().await, 0);

        s.flush().await;
        assert_eq!(messenger.send_count().await, 1);
        assert_eq!(messenger.last_send().await.unwrap().text, "ok");
    }

    #[tokio::test(start_paused = true)]
    async fn flush_skips_already_delivered_content() {
        let messenger = Arc::new(MockMessenger::new());
        let s = stream(&messenger);

        s.update("the first chunk of text").await;
        s.flush().await;
        s.flush().await;
        assert_eq!(messenger.send_count().await, 1);
        assert_eq!(messenger.edit_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_content_splits_and_continues_in_new_message() {
        let messenger = Arc::new(MockMessenger::new());
        let s = stream(&messenger);

        let mut text = "a".repeat(2000);
        text.push(' ');
        text.push_str(&"b".repeat(2000));
        s.update(&text).await; // 4001 chars, above the 3686 threshold
        let first = messenger.last_send().await.unwrap();
        assert!(first.text.len() <= split::TELEGRAM_MAX);
        assert!(first.text.starts_with('a'));

        // The remainder streams into a fresh message.
        let mut grown = text.clone();
        grown.push_str(" and the story continues");
        s.update(&grown).await;
        tokio::time::sleep(Duration::from_secs(3)).await;
        s.flush().await;
        assert!(messenger.send_count().await >= 2);
    }
}
