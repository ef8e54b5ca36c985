// SPDX-FileCopyrightText: 2026 Opengram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test doubles for opengram.
//!
//! [`MockMessenger`] implements the messenger seam with captured sends and
//! edits plus scriptable markdown failures, so the projector and router can
//! be exercised without a network.

pub mod mock_messenger;

pub use mock_messenger::{EditRecord, MockMessenger, SentRecord};
