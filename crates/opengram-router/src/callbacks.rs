// SPDX-FileCopyrightText: 2026 Opengram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Inline-button callback handling.
//!
//! Callback data is self-describing (`q:`/`p:` tokens carrying the thread
//! key), so handlers locate the pending record without server-side state.
//! A callback whose record is gone (typically after a restart) answers
//! with an expiry alert.

use tracing::warn;

use opengram_core::pending::{
    parse_callback, question_answered_text, question_freetext_text, permission_decided_text,
    CallbackToken, OptionChoice, PendingQuestion, PermissionChoice,
};
use opengram_core::types::{IncomingCallback, ThreadKey};

use crate::Router;

impl Router {
    /// Entry point for a filtered callback query.
    pub async fn handle_callback(&self, callback: IncomingCallback) {
        match parse_callback(&callback.data) {
            Some(CallbackToken::Question {
                key,
                question_idx,
                choice,
            }) => match choice {
                OptionChoice::Index(option_idx) => {
                    self.answer_question_option(&callback, key, question_idx, option_idx)
                        .await;
                }
                OptionChoice::Other => {
                    self.switch_to_freetext(&callback, key, question_idx).await;
                }
            },
            Some(CallbackToken::Permission { key, choice }) => {
                self.decide_permission(&callback, key, choice).await;
            }
            None => {
                warn!(data = %callback.data, "unparseable callback data");
                self.expired(&callback).await;
            }
        }
    }

    async fn answer_question_option(
        &self,
        callback: &IncomingCallback,
        key: ThreadKey,
        question_idx: usize,
        option_idx: usize,
    ) {
        match self.pending.answer_index(key, question_idx, option_idx).await {
            Some(outcome) => {
                let text = question_answered_text(&outcome.question_text, &outcome.answer);
                let _ = self
                    .messenger
                    .edit(key.chat_id, outcome.message_id, &text, None)
                    .await;
                self.messenger
                    .answer_callback(&callback.callback_id, None, false)
                    .await;
                if let Some(completed) = outcome.completed {
                    self.deliver_question_reply(completed).await;
                }
            }
            None => self.expired(callback).await,
        }
    }

    async fn switch_to_freetext(
        &self,
        callback: &IncomingCallback,
        key: ThreadKey,
        question_idx: usize,
    ) {
        match self.pending.begin_freetext(key, question_idx).await {
            Some((message_id, question_text)) => {
                let text = question_freetext_text(&question_text);
                let _ = self.messenger.edit(key.chat_id, message_id, &text, None).await;
                self.messenger
                    .answer_callback(&callback.callback_id, None, false)
                    .await;
            }
            None => self.expired(callback).await,
        }
    }

    async fn decide_permission(
        &self,
        callback: &IncomingCallback,
        key: ThreadKey,
        choice: PermissionChoice,
    ) {
        match self.pending.take_permission(key).await {
            Some(record) => {
                if let Err(e) = self.agent.reply_permission(&record.request_id, choice).await {
                    warn!(error = %e, "permission reply failed");
                }
                let verdict = match choice {
                    PermissionChoice::Once => "Accepted",
                    PermissionChoice::Always => "Accepted (always)",
                    PermissionChoice::Reject => "Denied",
                };
                let text =
                    permission_decided_text(&record.permission, &record.patterns, verdict);
                let _ = self
                    .messenger
                    .edit(key.chat_id, record.message_id, &text, None)
                    .await;
                self.messenger
                    .answer_callback(&callback.callback_id, Some(verdict), false)
                    .await;
            }
            None => self.expired(callback).await,
        }
    }

    /// Records a typed reply to a question in freetext mode.
    pub(crate) async fn answer_freetext(&self, key: ThreadKey, answer: String) {
        match self.pending.answer_freetext(key, answer).await {
            Some(outcome) => {
                let text = question_answered_text(&outcome.question_text, &outcome.answer);
                let _ = self
                    .messenger
                    .edit(key.chat_id, outcome.message_id, &text, None)
                    .await;
                if let Some(completed) = outcome.completed {
                    self.deliver_question_reply(completed).await;
                }
            }
            None => warn!("freetext answer raced with prompt cancellation"),
        }
    }

    async fn deliver_question_reply(&self, completed: PendingQuestion) {
        let answers = completed.ordered_answers();
        if let Err(e) = self
            .agent
            .reply_question(&completed.request_id, &answers)
            .await
        {
            warn!(error = %e, request_id = %completed.request_id, "question reply failed");
        }
    }

    /// Answers a callback the bridge can no longer honor (restart,
    /// failover, or superseded prompt).
    pub(crate) async fn handle_expired_callback(&self, callback: &IncomingCallback) {
        self.expired(callback).await;
    }

    async fn expired(&self, callback: &IncomingCallback) {
        self.messenger
            .answer_callback(&callback.callback_id, Some("This has expired"), true)
            .await;
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use opengram_agent::client::AgentClient;
    use opengram_core::messenger::Messenger;
    use opengram_core::pending::{PendingQuestion, PendingRegistry, QuestionSpec};
    use opengram_core::types::{IncomingCallback, IncomingMessage, ThreadKey};
    use opengram_test_utils::MockMessenger;

    use crate::{Router, RouterConfig};

    fn key() -> ThreadKey {
        ThreadKey::new(-100, Some(7))
    }

    fn router_with_pending(
        messenger: &Arc<MockMessenger>,
    ) -> (Router, Arc<PendingRegistry>) {
        let pending = Arc::new(PendingRegistry::new());
        let router = Router::new(
            Arc::clone(messenger) as Arc<dyn Messenger>,
            Arc::new(AgentClient::new("http://127.0.0.1:9").unwrap()),
            Arc::clone(&pending),
            None,
            None,
            RouterConfig {
                chat_id: -100,
                thread_id: Some(7),
                version: "t".into(),
                working_dir: std::env::temp_dir(),
            },
        );
        (router, pending)
    }

    fn two_question_record() -> PendingQuestion {
        PendingQuestion {
            request_id: "req-1".into(),
            key: key(),
            questions: vec![
                QuestionSpec {
                    text: "Color?".into(),
                    options: vec!["Red".into(), "Blue".into()],
                },
                QuestionSpec {
                    text: "Size?".into(),
                    options: vec!["S".into(), "L".into()],
                },
            ],
            answers: BTreeMap::new(),
            message_ids: vec![21, 22],
            awaiting_freetext: None,
        }
    }

    fn callback(data: &str) -> IncomingCallback {
        IncomingCallback {
            update_id: 1,
            callback_id: "cb-1".into(),
            chat_id: -100,
            thread_id: Some(7),
            date: None,
            data: data.into(),
            message_id: Some(21),
        }
    }

    fn text_msg(text: &str) -> IncomingMessage {
        IncomingMessage {
            update_id: 2,
            chat_id: -100,
            thread_id: Some(7),
            message_id: 30,
            date: 1_700_000_000,
            from_is_bot: false,
            text: Some(text.to_string()),
            caption: None,
            photo: None,
            voice: None,
            has_video: false,
        }
    }

    #[tokio::test]
    async fn option_click_edits_prompt_with_italic_answer() {
        let messenger = Arc::new(MockMessenger::new());
        let (router, pending) = router_with_pending(&messenger);
        pending.put_question(two_question_record()).await;

        router.handle_callback(callback("q:-100:7:0:0")).await;

        let edit = messenger.last_edit().await.unwrap();
        assert_eq!(edit.message_id, 21);
        assert_eq!(edit.text, "Color?\n_Red_");
        assert!(edit.keyboard.is_none(), "keyboard removed after answering");

        let acks = messenger.callbacks().await;
        assert_eq!(acks.len(), 1);
        assert!(!acks[0].2, "no alert for a valid answer");

        // One question still outstanding.
        assert_eq!(pending.pending_count(key()).await, 1);
    }

    #[tokio::test]
    async fn other_then_freetext_completes_the_request() {
        let messenger = Arc::new(MockMessenger::new());
        let (router, pending) = router_with_pending(&messenger);
        pending.put_question(two_question_record()).await;

        // Answer question 0 with a button, question 1 via Other + text.
        router.handle_callback(callback("q:-100:7:0:0")).await;
        router.handle_callback(callback("q:-100:7:1:other")).await;

        let freetext_edit = messenger.last_edit().await.unwrap();
        assert_eq!(freetext_edit.message_id, 22);
        assert_eq!(freetext_edit.text, "Size?\nPlease type your answer:");
        assert_eq!(pending.awaiting_freetext(key()).await, Some(1));

        router.handle_message(text_msg("custom")).await;

        let final_edit = messenger.last_edit().await.unwrap();
        assert_eq!(final_edit.message_id, 22);
        assert_eq!(final_edit.text, "Size?\n_custom_");
        assert_eq!(pending.pending_count(key()).await, 0, "request completed");
    }

    #[tokio::test]
    async fn expired_callback_answers_with_alert() {
        let messenger = Arc::new(MockMessenger::new());
        let (router, _pending) = router_with_pending(&messenger);

        router.handle_callback(callback("q:-100:7:0:0")).await;

        let acks = messenger.callbacks().await;
        assert_eq!(acks.len(), 1);
        assert_eq!(acks[0].1.as_deref(), Some("This has expired"));
        assert!(acks[0].2, "expiry shows an alert");
    }

    #[tokio::test]
    async fn permission_verdict_edits_message() {
        use opengram_core::pending::PendingPermission;

        let messenger = Arc::new(MockMessenger::new());
        let (router, pending) = router_with_pending(&messenger);
        pending
            .put_permission(PendingPermission {
                request_id: "perm-1".into(),
                key: key(),
                permission: "bash".into(),
                patterns: vec!["cargo *".into()],
                message_id: 33,
            })
            .await;

        router.handle_callback(callback("p:-100:7:always")).await;

        let edit = messenger.last_edit().await.unwrap();
        assert_eq!(edit.message_id, 33);
        assert!(edit.text.starts_with("Permission requested: bash"));
        assert!(edit.text.contains("cargo *"));
        assert!(edit.text.ends_with("_Accepted (always)_"));
        assert_eq!(pending.pending_count(key()).await, 0);
    }

    #[tokio::test]
    async fn malformed_callback_data_expires() {
        let messenger = Arc::new(MockMessenger::new());
        let (router, _pending) = router_with_pending(&messenger);

        router.handle_callback(callback("garbage-data")).await;
        let acks = messenger.callbacks().await;
        assert!(acks[0].2);
    }
}
