// SPDX-FileCopyrightText: 2026 Opengram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Merge order (later overrides earlier):
//! `$HOME/.config/opengram/telegram.json` >
//! `<working-dir>/.opencode/telegram.json` > `TELEGRAM_*` environment
//! variables. Ambient toggles (`USE_ICLOUD_COORDINATOR`, `DEVICE_NAME`,
//! `OPENCODE_URL`, `OPENAI_API_KEY`, `DIFF_VIEWER_URL`) come from the
//! environment only.

use std::path::Path;

use figment::{
    providers::{Env, Format, Json, Serialized},
    Figment,
};
use tracing::debug;

use opengram_core::BridgeError;

use crate::model::{AmbientToggles, BridgeConfig, RawConfig};

/// Loads and validates the bridge configuration for `working_dir`.
pub fn load(working_dir: &Path) -> Result<BridgeConfig, BridgeError> {
    let raw: RawConfig = build_figment(working_dir)
        .extract()
        .map_err(|e| BridgeError::Config(format!("invalid configuration: {e}")))?;
    debug!(?working_dir, "configuration merged");
    raw.validate(working_dir.to_path_buf(), ambient_toggles())
}

/// Builds the Figment used for config loading (exposed for diagnostics
/// and tests).
pub fn build_figment(working_dir: &Path) -> Figment {
    Figment::new()
        .merge(Serialized::defaults(RawConfig::default()))
        .merge(Json::file(
            dirs::home_dir()
                .map(|h| h.join(".config/opengram/telegram.json"))
                .unwrap_or_default(),
        ))
        .merge(Json::file(working_dir.join(".opencode/telegram.json")))
        .merge(env_provider())
}

/// `TELEGRAM_*` environment provider.
///
/// Uses explicit `only` + `map` so `TELEGRAM_BOT_TOKEN` maps to the JSON
/// key `botToken` and stray `TELEGRAM_*` variables from other tooling
/// cannot trip `deny_unknown_fields`.
fn env_provider() -> Env {
    Env::prefixed("TELEGRAM_")
        .lowercase(false)
        .only(&[
            "bot_token",
            "chat_id",
            "thread_id",
            "updates_url",
            "send_url",
            "store_root",
        ])
        .map(|key| match key.as_str().to_ascii_lowercase().as_str() {
            "bot_token" => "botToken".into(),
            "chat_id" => "chatId".into(),
            "thread_id" => "threadId".into(),
            "updates_url" => "updatesUrl".into(),
            "send_url" => "sendUrl".into(),
            "store_root" => "storeRoot".into(),
            other => other.to_string().into(),
        })
}

/// Reads the ambient toggles from the process environment.
pub fn ambient_toggles() -> AmbientToggles {
    toggles_from(|name| std::env::var(name).ok())
}

fn toggles_from(get: impl Fn(&str) -> Option<String>) -> AmbientToggles {
    AmbientToggles {
        coordinator_enabled: get("USE_ICLOUD_COORDINATOR")
            .map(|v| parse_bool(&v))
            .unwrap_or(true),
        device_prefix: get("DEVICE_NAME").filter(|v| !v.is_empty()),
        agent_url: get("OPENCODE_URL").filter(|v| !v.is_empty()),
        openai_api_key: get("OPENAI_API_KEY").filter(|v| !v.is_empty()),
        diff_viewer_url: get("DIFF_VIEWER_URL").filter(|v| !v.is_empty()),
    }
}

fn parse_bool(v: &str) -> bool {
    !matches!(
        v.trim().to_ascii_lowercase().as_str(),
        "0" | "false" | "off" | "no" | ""
    )
}
