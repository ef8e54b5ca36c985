// SPDX-FileCopyrightText: 2026 Opengram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Streaming projection of agent events onto Telegram messages.
//!
//! The [`Projector`] consumes the agent's ordered event stream and keeps
//! per-(session, message, part-type) state: throttled edit-in-place text
//! and reasoning streams, one-shot tool/todo/diff renderings, typing
//! indicators, and the opening of question/permission prompts.

pub mod projector;
pub mod render;
pub mod text;
pub mod typing;

pub use projector::Projector;
pub use text::{StreamTiming, StreamingMessage, EARLY_FLUSH_THRESHOLD, MIN_FIRST_SEND_CHARS};
pub use typing::{TypingHandle, TypingMode};
