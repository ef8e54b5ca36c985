// SPDX-FileCopyrightText: 2026 Opengram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Agent-side interfaces for the opengram bridge.
//!
//! Wraps the coding-agent server's HTTP API and SSE event stream behind
//! typed calls and the [`AgentEvent`] model, plus the two small external
//! HTTP collaborators: voice transcription and diff uploads.

pub mod client;
pub mod diffview;
pub mod events;
pub mod sse;
pub mod transcribe;

pub use client::{AgentClient, AgentRestarter, PromptPart, TitleReply};
pub use diffview::DiffViewerClient;
pub use events::{
    AgentEvent, Part, PartKind, PermissionRequest, QuestionRequest, SessionStatus, TodoItem,
    TodoStatus, ToolState,
};
pub use sse::SseDecoder;
pub use transcribe::TranscriptionClient;
