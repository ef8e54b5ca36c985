// SPDX-FileCopyrightText: 2026 Opengram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the opengram bridge.

use thiserror::Error;

/// The primary error type used across all opengram crates.
///
/// Variants map to the failure classes the bridge distinguishes at runtime:
/// configuration errors abort startup, store errors degrade to
/// single-instance mode or retry on the next tick, Telegram errors split
/// into fatal (auth, missing chat) and transient, and agent errors split
/// into timeouts (restart-and-retry) and explicit aborts.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Missing or invalid configuration (token, chat id). Exits the process.
    #[error("configuration error: {0}")]
    Config(String),

    /// The shared store root does not exist. The instance degrades to
    /// single-instance mode (permanent leader).
    #[error("shared store unavailable: {0}")]
    StoreUnavailable(String),

    /// An individual store read or write failed. The next tick retries.
    #[error("store error: {message}")]
    Store {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Unrecoverable Telegram API failure: 401 unauthorized, 409 conflict,
    /// or 400 chat-not-found.
    #[error("telegram fatal: {0}")]
    TelegramFatal(String),

    /// Any other Telegram API failure. The operation is skipped and logged.
    #[error("telegram error: {message}")]
    Telegram {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Agent call failed or timed out. Triggers one restart-and-retry.
    #[error("agent error: {message}")]
    Agent {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The agent turn was explicitly aborted by the user.
    #[error("agent turn aborted")]
    AgentAborted,

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    /// Shorthand for a transient store error wrapping an I/O or
    /// serialization failure.
    pub fn store(message: impl Into<String>, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Store {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Shorthand for a transient Telegram error.
    pub fn telegram(message: impl Into<String>) -> Self {
        Self::Telegram {
            message: message.into(),
            source: None,
        }
    }

    /// Shorthand for a transient agent error.
    pub fn agent(message: impl Into<String>) -> Self {
        Self::Agent {
            message: message.into(),
            source: None,
        }
    }

    /// True for errors that must terminate the process when raised during
    /// startup: bad configuration or a fatal Telegram failure.
    pub fn is_startup_fatal(&self) -> bool {
        matches!(self, Self::Config(_) | Self::TelegramFatal(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_are_startup_fatal() {
        assert!(BridgeError::Config("missing botToken".into()).is_startup_fatal());
        assert!(BridgeError::TelegramFatal("401 unauthorized".into()).is_startup_fatal());
    }

    #[test]
    fn transient_errors_are_not_startup_fatal() {
        assert!(!BridgeError::telegram("flood wait").is_startup_fatal());
        assert!(!BridgeError::StoreUnavailable("/nonexistent".into()).is_startup_fatal());
        assert!(!BridgeError::AgentAborted.is_startup_fatal());
    }

    #[test]
    fn display_includes_message() {
        let err = BridgeError::store(
            "failed to read state.json",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(err.to_string().contains("state.json"));
    }
}
