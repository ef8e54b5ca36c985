// SPDX-FileCopyrightText: 2026 Opengram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Registry of outstanding question and permission prompts.
//!
//! For each `(chat, thread)` key there is at most one pending question
//! request and one pending permission request. A new prompt for an occupied
//! key replaces the previous record; the caller is handed the replaced
//! record so it can reject it upstream. Callback data is self-describing
//! (`q:<chat>:<thread>:<qIdx>:<opt>` / `p:<chat>:<thread>:<verdict>`) so a
//! handler can locate the record without any server-side callback table.

use std::collections::{BTreeMap, HashMap};

use tokio::sync::Mutex;

use crate::types::ThreadKey;

/// One question inside a question request: prompt text plus option labels.
#[derive(Debug, Clone)]
pub struct QuestionSpec {
    pub text: String,
    pub options: Vec<String>,
}

/// An outstanding multi-question prompt.
#[derive(Debug, Clone)]
pub struct PendingQuestion {
    pub request_id: String,
    pub key: ThreadKey,
    pub questions: Vec<QuestionSpec>,
    /// Answers recorded so far, keyed by question index.
    pub answers: BTreeMap<usize, Vec<String>>,
    /// One Telegram message id per question, in question order.
    pub message_ids: Vec<i32>,
    /// Set when the user picked `Other` and we await a typed reply.
    pub awaiting_freetext: Option<usize>,
}

impl PendingQuestion {
    pub fn is_complete(&self) -> bool {
        self.answers.len() == self.questions.len()
    }

    /// Answers in question order; unanswered questions yield empty arrays.
    pub fn ordered_answers(&self) -> Vec<Vec<String>> {
        (0..self.questions.len())
            .map(|i| self.answers.get(&i).cloned().unwrap_or_default())
            .collect()
    }
}

/// An outstanding permission prompt.
#[derive(Debug, Clone)]
pub struct PendingPermission {
    pub request_id: String,
    pub key: ThreadKey,
    /// Human-readable description of what is being permitted.
    pub permission: String,
    pub patterns: Vec<String>,
    pub message_id: i32,
}

/// The user's verdict on a permission prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionChoice {
    Once,
    Always,
    Reject,
}

impl PermissionChoice {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Once => "once",
            Self::Always => "always",
            Self::Reject => "reject",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "once" => Some(Self::Once),
            "always" => Some(Self::Always),
            "reject" => Some(Self::Reject),
            _ => None,
        }
    }
}

/// Which option a question callback selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionChoice {
    Index(usize),
    Other,
}

/// A parsed callback token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackToken {
    Question {
        key: ThreadKey,
        question_idx: usize,
        choice: OptionChoice,
    },
    Permission {
        key: ThreadKey,
        choice: PermissionChoice,
    },
}

/// Builds question callback data: `q:<chat>:<thread>:<qIdx>:<optIdx|"other">`.
pub fn question_data(key: ThreadKey, question_idx: usize, choice: OptionChoice) -> String {
    let opt = match choice {
        OptionChoice::Index(i) => i.to_string(),
        OptionChoice::Other => "other".to_string(),
    };
    format!("q:{}:{}:{}", key.encode(), question_idx, opt)
}

/// Builds permission callback data: `p:<chat>:<thread>:<once|always|reject>`.
pub fn permission_data(key: ThreadKey, choice: PermissionChoice) -> String {
    format!("p:{}:{}", key.encode(), choice.as_str())
}

/// Parses callback data produced by [`question_data`] / [`permission_data`].
pub fn parse_callback(data: &str) -> Option<CallbackToken> {
    let mut parts = data.split(':');
    match parts.next()? {
        "q" => {
            let key = ThreadKey::decode(parts.next()?, parts.next()?)?;
            let question_idx = parts.next()?.parse::<usize>().ok()?;
            let choice = match parts.next()? {
                "other" => OptionChoice::Other,
                n => OptionChoice::Index(n.parse::<usize>().ok()?),
            };
            Some(CallbackToken::Question {
                key,
                question_idx,
                choice,
            })
        }
        "p" => {
            let key = ThreadKey::decode(parts.next()?, parts.next()?)?;
            let choice = PermissionChoice::parse(parts.next()?)?;
            Some(CallbackToken::Permission { key, choice })
        }
        _ => None,
    }
}

/// Prompt text for a permission request, shared by the prompt opener and
/// the verdict editor so edits rebuild the original message faithfully.
pub fn permission_prompt_text(permission: &str, patterns: &[String]) -> String {
    let mut text = format!("Permission requested: {permission}");
    if !patterns.is_empty() {
        text.push('\n');
        text.push_str(&patterns.join("\n"));
    }
    text
}

/// The answered form of a question prompt: question plus the chosen answer
/// in italics.
pub fn question_answered_text(question: &str, answer: &str) -> String {
    format!("{question}\n_{answer}_")
}

/// The freetext form of a question prompt after `Other` was pressed.
pub fn question_freetext_text(question: &str) -> String {
    format!("{question}\nPlease type your answer:")
}

/// The verdict-annotated form of a permission prompt.
pub fn permission_decided_text(permission: &str, patterns: &[String], verdict: &str) -> String {
    format!("{}\n_{verdict}_", permission_prompt_text(permission, patterns))
}

/// Everything a caller needs after recording an answer: which prompt message
/// to edit, and the completed record once all questions are answered.
#[derive(Debug)]
pub struct AnswerOutcome {
    pub message_id: i32,
    pub question_idx: usize,
    pub question_text: String,
    pub answer: String,
    /// Present when this answer completed the request.
    pub completed: Option<PendingQuestion>,
}

#[derive(Default)]
struct Slot {
    question: Option<PendingQuestion>,
    permission: Option<PendingPermission>,
}

/// In-memory registry of pending interactions, keyed by [`ThreadKey`].
#[derive(Default)]
pub struct PendingRegistry {
    slots: Mutex<HashMap<ThreadKey, Slot>>,
}

impl PendingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a question request, returning the record it replaced (if
    /// any) so the caller can reject it with the agent.
    pub async fn put_question(&self, question: PendingQuestion) -> Option<PendingQuestion> {
        let mut slots = self.slots.lock().await;
        slots
            .entry(question.key)
            .or_default()
            .question
            .replace(question)
    }

    /// Registers a permission request, returning the replaced record.
    pub async fn put_permission(&self, permission: PendingPermission) -> Option<PendingPermission> {
        let mut slots = self.slots.lock().await;
        slots
            .entry(permission.key)
            .or_default()
            .permission
            .replace(permission)
    }

    /// Removes and returns everything pending on `key`. Used when an
    /// unrelated message arrives and the prompts must be cancelled.
    pub async fn take_all(
        &self,
        key: ThreadKey,
    ) -> (Option<PendingQuestion>, Option<PendingPermission>) {
        let mut slots = self.slots.lock().await;
        match slots.remove(&key) {
            Some(slot) => (slot.question, slot.permission),
            None => (None, None),
        }
    }

    pub async fn has_pending(&self, key: ThreadKey) -> bool {
        let slots = self.slots.lock().await;
        slots
            .get(&key)
            .map(|s| s.question.is_some() || s.permission.is_some())
            .unwrap_or(false)
    }

    /// The question index awaiting a typed reply, if the prompt on `key` is
    /// in freetext mode.
    pub async fn awaiting_freetext(&self, key: ThreadKey) -> Option<usize> {
        let slots = self.slots.lock().await;
        slots.get(&key)?.question.as_ref()?.awaiting_freetext
    }

    /// Records a button answer for `question_idx`. Returns `None` when no
    /// question is pending on the key (an expired callback).
    pub async fn answer_option(
        &self,
        key: ThreadKey,
        question_idx: usize,
        answer: String,
    ) -> Option<AnswerOutcome> {
        let mut slots = self.slots.lock().await;
        let slot = slots.get_mut(&key)?;
        let question = slot.question.as_mut()?;
        let spec = question.questions.get(question_idx)?;
        let question_text = spec.text.clone();
        let message_id = question.message_ids.get(question_idx).copied()?;

        question.answers.insert(question_idx, vec![answer.clone()]);
        question.awaiting_freetext = None;

        let completed = if question.is_complete() {
            slot.question.take()
        } else {
            None
        };

        Some(AnswerOutcome {
            message_id,
            question_idx,
            question_text,
            answer,
            completed,
        })
    }

    /// Records a button answer selected by option index, resolving the
    /// option's label from the stored question.
    pub async fn answer_index(
        &self,
        key: ThreadKey,
        question_idx: usize,
        option_idx: usize,
    ) -> Option<AnswerOutcome> {
        let label = {
            let slots = self.slots.lock().await;
            slots
                .get(&key)?
                .question
                .as_ref()?
                .questions
                .get(question_idx)?
                .options
                .get(option_idx)?
                .clone()
        };
        self.answer_option(key, question_idx, label).await
    }

    /// Switches the prompt into freetext mode for `question_idx`. Returns
    /// the prompt message id and question text, or `None` for an expired
    /// callback.
    pub async fn begin_freetext(
        &self,
        key: ThreadKey,
        question_idx: usize,
    ) -> Option<(i32, String)> {
        let mut slots = self.slots.lock().await;
        let question = slots.get_mut(&key)?.question.as_mut()?;
        let text = question.questions.get(question_idx)?.text.clone();
        question.awaiting_freetext = Some(question_idx);
        let message_id = question.message_ids.get(question_idx).copied()?;
        Some((message_id, text))
    }

    /// Records a typed reply for the question currently awaiting freetext.
    pub async fn answer_freetext(&self, key: ThreadKey, text: String) -> Option<AnswerOutcome> {
        let question_idx = self.awaiting_freetext(key).await?;
        self.answer_option(key, question_idx, text).await
    }

    /// Removes and returns the pending permission on `key`.
    pub async fn take_permission(&self, key: ThreadKey) -> Option<PendingPermission> {
        let mut slots = self.slots.lock().await;
        slots.get_mut(&key)?.permission.take()
    }

    /// Number of pending records on `key` (0..=2).
    pub async fn pending_count(&self, key: ThreadKey) -> usize {
        let slots = self.slots.lock().await;
        slots
            .get(&key)
            .map(|s| s.question.is_some() as usize + s.permission.is_some() as usize)
            .unwrap_or(0)
    }
}
