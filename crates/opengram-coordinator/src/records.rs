// SPDX-FileCopyrightText: 2026 Opengram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared-store record types and device identity.
//!
//! A [`DeviceRecord`] exists per running instance (owner-writes-only); the
//! single [`StateRecord`] names the active device and the highest committed
//! Telegram update id (leader-writes-only).

use std::path::Path;

use serde::{Deserialize, Serialize};

/// One file per instance under `devices/`, proving liveness and identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    /// Stable device id (see [`device_id`]).
    pub name: String,
    /// Forum topic this device monitors, if bound to one.
    #[serde(default)]
    pub thread_id: Option<i64>,
    pub hostname: String,
    pub directory: String,
    pub pid: u32,
    /// Heartbeat timestamp, epoch milliseconds.
    pub last_seen: i64,
}

/// The single shared coordination record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct StateRecord {
    /// The device currently permitted to ingest updates.
    pub active_device: Option<String>,
    /// Epoch milliseconds of the leader's last active heartbeat.
    pub active_device_heartbeat: i64,
    /// Highest Telegram update id already committed. Monotonic across all
    /// writers that ever become leader.
    pub last_update_id: i64,
    /// Epoch milliseconds of the last write, for optimistic verification.
    pub last_modified: i64,
    /// Device id of the last writer.
    pub modified_by: String,
    /// Chats the bot has seen that don't match configuration, in first-seen
    /// order.
    pub foreign_chat_ids: Vec<i64>,
}

impl StateRecord {
    /// Records a foreign chat id. Returns true when the id is new.
    pub fn note_foreign_chat(&mut self, chat_id: i64) -> bool {
        if self.foreign_chat_ids.contains(&chat_id) {
            return false;
        }
        self.foreign_chat_ids.push(chat_id);
        true
    }
}

/// Current wall-clock time as epoch milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Composes the stable device id:
/// `[custom_prefix "@"] hostname ":" absolute_working_directory`.
pub fn device_id(custom_prefix: Option<&str>, hostname: &str, working_dir: &Path) -> String {
    match custom_prefix {
        Some(prefix) if !prefix.is_empty() => {
            format!("{}@{}:{}", prefix, hostname, working_dir.display())
        }
        _ => format!("{}:{}", hostname, working_dir.display()),
    }
}

/// Maps a device id onto a safe file name: every character outside
/// `[A-Za-z0-9._@-]` becomes `-`.
pub fn sanitize_device_id(id: &str) -> String {
    id.chars()
        .map(|c| match c {
            'A'..='Z' | 'a'..='z' | '0'..='9' | '.' | '_' | '@' | '-' => c,
            _ => '-',
        })
        .collect()
}

/// Resolves the short hostname, shelling out to `hostname -s` with an
/// environment fallback.
pub async fn detect_hostname() -> String {
    let output = tokio::process::Command::new("hostname")
        .arg("-s")
        .output()
        .await
        .ok()
        .filter(|o| o.status.success());

    if let Some(output) = output {
        let name = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if !name.is_empty() {
            return name;
        }
    }

    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn device_id_with_and_without_prefix() {
        let dir = PathBuf::from("/Users/me/proj");
        assert_eq!(device_id(None, "mbp", &dir), "mbp:/Users/me/proj");
        assert_eq!(
            device_id(Some("work"), "mbp", &dir),
            "work@mbp:/Users/me/proj"
        );
        assert_eq!(device_id(Some(""), "mbp", &dir), "mbp:/Users/me/proj");
    }

    #[test]
    fn sanitize_replaces_path_separators() {
        assert_eq!(
            sanitize_device_id("work@mbp:/Users/me/proj"),
            "work@mbp--Users-me-proj"
        );
        assert_eq!(sanitize_device_id("a.b_c-d@e"), "a.b_c-d@e");
        assert_eq!(sanitize_device_id("spaces here"), "spaces-here");
    }

    #[test]
    fn device_id_is_stable_across_calls() {
        let dir = PathBuf::from("/srv/app");
        assert_eq!(
            device_id(Some("x"), "host", &dir),
            device_id(Some("x"), "host", &dir)
        );
    }

    #[test]
    fn state_record_serializes_with_camel_case_keys() {
        let state = StateRecord {
            active_device: Some("dev-a".into()),
            active_device_heartbeat: 123,
            last_update_id: 45,
            last_modified: 678,
            modified_by: "dev-a".into(),
            foreign_chat_ids: vec![-1001],
        };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["activeDevice"], "dev-a");
        assert_eq!(json["lastUpdateId"], 45);
        assert_eq!(json["foreignChatIds"][0], -1001);
    }

    #[test]
    fn state_record_tolerates_missing_fields() {
        let state: StateRecord = serde_json::from_str("{}").unwrap();
        assert!(state.active_device.is_none());
        assert_eq!(state.last_update_id, 0);
    }

    #[test]
    fn note_foreign_chat_dedupes() {
        let mut state = StateRecord::default();
        assert!(state.note_foreign_chat(-1001));
        assert!(state.note_foreign_chat(-1002));
        assert!(!state.note_foreign_chat(-1001));
        assert_eq!(state.foreign_chat_ids, vec![-1001, -1002]);
    }
}
