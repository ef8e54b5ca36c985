// SPDX-FileCopyrightText: 2026 Opengram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the opengram bridge.
//!
//! Provides the error taxonomy, the channel-agnostic message types, the
//! [`Messenger`] seam to the Telegram transport, and the registry of
//! pending question/permission prompts. Everything above the transport
//! depends on this crate and nothing in it depends on teloxide.

pub mod error;
pub mod messenger;
pub mod pending;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use error::BridgeError;
pub use messenger::Messenger;
pub use pending::{PendingPermission, PendingQuestion, PendingRegistry, PermissionChoice};
pub use types::{
    EditOutcome, Incoming, IncomingCallback, IncomingMessage, Keyboard, ModelRef, SendOptions,
    SendOutcome, SessionInfo, ThreadKey,
};
