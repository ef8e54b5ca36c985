// SPDX-FileCopyrightText: 2026 Opengram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Typing indicators as scoped resources.
//!
//! The refresh loop sends a typing chat-action on a mode-dependent cadence
//! until released. Tool mode refreshes faster but self-releases after 12
//! seconds without activity, so a tool that never completes cannot leave
//! the chat "typing" forever. Dropping the handle always stops the loop.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use opengram_core::messenger::Messenger;
use opengram_core::types::ThreadKey;

/// Refresh cadence while the agent is thinking or responding.
const IDLE_REFRESH: Duration = Duration::from_millis(2500);
/// Refresh cadence while a tool runs.
const TOOL_REFRESH: Duration = Duration::from_millis(1500);
/// Tool-mode handles release themselves after this much inactivity.
const TOOL_INACTIVITY_TIMEOUT: Duration = Duration::from_secs(12);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingMode {
    Idle,
    Tool,
}

struct Shared {
    mode: TypingMode,
    last_bump: Instant,
}

/// A running typing-indicator loop.
pub struct TypingHandle {
    cancel: CancellationToken,
    shared: Arc<Mutex<Shared>>,
}

impl TypingHandle {
    /// Starts the refresh loop for `dest`.
    pub fn start(messenger: Arc<dyn Messenger>, dest: ThreadKey, mode: TypingMode) -> Self {
        let cancel = CancellationToken::new();
        let shared = Arc::new(Mutex::new(Shared {
            mode,
            last_bump: Instant::now(),
        }));

        let loop_cancel = cancel.clone();
        let loop_shared = Arc::clone(&shared);
        tokio::spawn(async move {
            loop {
                let (mode, last_bump) = {
                    let shared = loop_shared.lock().expect("typing state poisoned");
                    (shared.mode, shared.last_bump)
                };

                if mode == TypingMode::Tool && last_bump.elapsed() > TOOL_INACTIVITY_TIMEOUT {
                    debug!("typing handle released after tool inactivity");
                    break;
                }

                if messenger.typing_once(dest).await.is_err() {
                    // Typing indicators are best-effort; keep refreshing.
                }

                let interval = match mode {
                    TypingMode::Idle => IDLE_REFRESH,
                    TypingMode::Tool => TOOL_REFRESH,
                };
                tokio::select! {
                    _ = loop_cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        });

        Self { cancel, shared }
    }

    /// Switches the mode and records activity.
    pub fn bump(&self, mode: TypingMode) {
        let mut shared = self.shared.lock().expect("typing state poisoned");
        shared.mode = mode;
        shared.last_bump = Instant::now();
    }

    pub fn release(&self) {
        self.cancel.cancel();
    }
}

impl Drop for TypingHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opengram_test_utils::MockMessenger;

    #[tokio::test(start_paused = true)]
    async fn idle_mode_refreshes_on_cadence() {
        let messenger = Arc::new(MockMessenger::new());
        let handle = TypingHandle::start(
            messenger.clone() as Arc<dyn Messenger>,
            ThreadKey::new(1, None),
            TypingMode::Idle,
        );

        tokio::time::sleep(Duration::from_millis(6000)).await;
        let count = messenger.typing_count().await;
        // 0 ms, 2500 ms, 5000 ms fire within a 6 s window.
        assert!((2..=4).contains(&count), "unexpected refresh count {count}");
        handle.release();
    }

    #[tokio::test(start_paused = true)]
    async fn release_stops_the_loop() {
        let messenger = Arc::new(MockMessenger::new());
        let handle = TypingHandle::start(
            messenger.clone() as Arc<dyn Messenger>,
            ThreadKey::new(1, None),
            TypingMode::Idle,
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.release();
        let after_release = messenger.typing_count().await;

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(messenger.typing_count().await, after_release);
    }

    #[tokio::test(start_paused = true)]
    async fn tool_mode_self_releases_after_inactivity() {
        let messenger = Arc::new(MockMessenger::new());
        let _handle = TypingHandle::start(
            messenger.clone() as Arc<dyn Messenger>,
            ThreadKey::new(1, None),
            TypingMode::Tool,
        );

        tokio::time::sleep(Duration::from_secs(13)).await;
        let at_timeout = messenger.typing_count().await;

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(
            messenger.typing_count().await,
            at_timeout,
            "tool handle must stop refreshing after the inactivity timeout"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn bump_keeps_tool_mode_alive() {
        let messenger = Arc::new(MockMessenger::new());
        let handle = TypingHandle::start(
            messenger.clone() as Arc<dyn Messenger>,
            ThreadKey::new(1, None),
            TypingMode::Tool,
        );

        for _ in 0..4 {
            tokio::time::sleep(Duration::from_secs(8)).await;
            handle.bump(TypingMode::Tool);
        }
        let count = messenger.typing_count().await;
        assert!(count >= 10, "bumped handle kept refreshing, got {count}");
        handle.release();
    }

    #[tokio::test(start_paused = true)]
    async fn drop_releases_the_loop() {
        let messenger = Arc::new(MockMessenger::new());
        {
            let _handle = TypingHandle::start(
                messenger.clone() as Arc<dyn Messenger>,
                ThreadKey::new(1, None),
                TypingMode::Idle,
            );
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        let after_drop = messenger.typing_count().await;
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(messenger.typing_count().await, after_drop);
    }
}
