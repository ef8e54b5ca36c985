// SPDX-FileCopyrightText: 2026 Opengram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model for the opengram bridge.
//!
//! [`RawConfig`] mirrors the on-disk JSON shape (camelCase keys, everything
//! optional). [`BridgeConfig`] is the validated form the rest of the bridge
//! consumes: token and chat id are required, ambient toggles resolved.

use std::path::PathBuf;

use serde::{Deserialize, Deserializer, Serialize};

use opengram_core::BridgeError;

/// The merged on-disk/env configuration before validation.
///
/// Loaded from `telegram.json` files and `TELEGRAM_*` environment
/// variables; all fields optional so partial files layer cleanly.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct RawConfig {
    /// Telegram Bot API token.
    pub bot_token: Option<String>,

    /// The configured chat. Accepts a JSON number or string.
    #[serde(deserialize_with = "opt_i64_lenient")]
    pub chat_id: Option<i64>,

    /// Optional forum topic this instance is bound to.
    #[serde(deserialize_with = "opt_i64_lenient")]
    pub thread_id: Option<i64>,

    /// Optional updates-proxy endpoint replacing direct long polling.
    pub updates_url: Option<String>,

    /// Optional override of the Telegram API base URL for sends.
    pub send_url: Option<String>,

    /// Optional override of the shared coordination store root.
    pub store_root: Option<PathBuf>,
}

/// Chat and thread ids arrive as numbers from env parsing but are often
/// quoted in hand-written JSON files. Accept both.
fn opt_i64_lenient<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumOrStr {
        Num(i64),
        Str(String),
    }

    match Option::<NumOrStr>::deserialize(deserializer)? {
        None => Ok(None),
        Some(NumOrStr::Num(n)) => Ok(Some(n)),
        Some(NumOrStr::Str(s)) => s
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|e| serde::de::Error::custom(format!("invalid id {s:?}: {e}"))),
    }
}

/// Validated runtime configuration.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub bot_token: String,
    pub chat_id: i64,
    pub thread_id: Option<i64>,
    pub updates_url: Option<String>,
    pub send_url: Option<String>,
    pub store_root: Option<PathBuf>,

    /// When false the instance never coordinates and is permanently leader.
    pub coordinator_enabled: bool,
    /// Custom device-id prefix from `DEVICE_NAME`.
    pub device_prefix: Option<String>,
    /// Base URL of the agent server (`OPENCODE_URL`).
    pub agent_url: Option<String>,
    /// Enables voice transcription when present (`OPENAI_API_KEY`).
    pub openai_api_key: Option<String>,
    /// Enables full-diff uploads when present (`DIFF_VIEWER_URL`).
    pub diff_viewer_url: Option<String>,

    /// Absolute working directory this instance is bound to.
    pub working_dir: PathBuf,
}

impl RawConfig {
    /// Validates the merged config into a [`BridgeConfig`].
    ///
    /// `botToken` and `chatId` are required; their absence is a fatal
    /// configuration error.
    pub fn validate(
        self,
        working_dir: PathBuf,
        toggles: AmbientToggles,
    ) -> Result<BridgeConfig, BridgeError> {
        let bot_token = self
            .bot_token
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| {
                BridgeError::Config(
                    "botToken is required (telegram.json or TELEGRAM_BOT_TOKEN)".into(),
                )
            })?;
        let chat_id = self.chat_id.ok_or_else(|| {
            BridgeError::Config("chatId is required (telegram.json or TELEGRAM_CHAT_ID)".into())
        })?;

        Ok(BridgeConfig {
            bot_token,
            chat_id,
            thread_id: self.thread_id,
            updates_url: self.updates_url,
            send_url: self.send_url,
            store_root: self.store_root,
            coordinator_enabled: toggles.coordinator_enabled,
            device_prefix: toggles.device_prefix,
            agent_url: toggles.agent_url,
            openai_api_key: toggles.openai_api_key,
            diff_viewer_url: toggles.diff_viewer_url,
            working_dir,
        })
    }
}

/// Ambient environment toggles that are not part of the `telegram.json`
/// key set.
#[derive(Debug, Clone)]
pub struct AmbientToggles {
    pub coordinator_enabled: bool,
    pub device_prefix: Option<String>,
    pub agent_url: Option<String>,
    pub openai_api_key: Option<String>,
    pub diff_viewer_url: Option<String>,
}

impl Default for AmbientToggles {
    fn default() -> Self {
        Self {
            coordinator_enabled: true,
            device_prefix: None,
            agent_url: None,
            openai_api_key: None,
            diff_viewer_url: None,
        }
    }
}
