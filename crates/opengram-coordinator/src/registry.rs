// SPDX-FileCopyrightText: 2026 Opengram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Leader registry: per-device files plus the global state record.
//!
//! Every instance owns exactly one `devices/<id>.json` file; the single
//! `state.json` is only ever written by the current leader (or by the
//! election protocol while candidating). Malformed device files are skipped
//! with a warning so one corrupted sync never blocks listing.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use opengram_core::BridgeError;

use crate::records::{now_millis, sanitize_device_id, DeviceRecord, StateRecord};
use crate::store::SharedStore;

/// Relative path of the shared state record.
pub const STATE_FILE: &str = "state.json";
/// Relative directory of per-device records.
pub const DEVICES_DIR: &str = "devices";

/// Device records older than this are garbage.
pub const STALE_DEVICE_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// A listed device with its 1-based selection number.
#[derive(Debug, Clone)]
pub struct DeviceEntry {
    pub index: usize,
    pub record: DeviceRecord,
    pub active: bool,
}

/// Identity of this instance, fixed at startup.
#[derive(Debug, Clone)]
pub struct DeviceIdentity {
    pub name: String,
    pub thread_id: Option<i64>,
    pub hostname: String,
    pub directory: String,
    pub pid: u32,
}

/// Typed access to the shared store's records for one instance.
pub struct LeaderRegistry {
    store: Arc<dyn SharedStore>,
    identity: DeviceIdentity,
}

impl LeaderRegistry {
    pub fn new(store: Arc<dyn SharedStore>, identity: DeviceIdentity) -> Self {
        Self { store, identity }
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// The relative store path of a device's record file.
    pub fn device_file(name: &str) -> String {
        format!("{}/{}.json", DEVICES_DIR, sanitize_device_id(name))
    }

    /// Startup: ensure the devices directory and state record exist, then
    /// announce ourselves with a fresh device record.
    pub async fn init(&self) -> Result<(), BridgeError> {
        self.store.create_dir(DEVICES_DIR).await?;
        if self.store.read(STATE_FILE).await?.is_none() {
            self.write_state(&StateRecord::default()).await?;
            debug!("initialized empty state record");
        }
        self.write_own_record().await
    }

    /// Writes this instance's device record with a current heartbeat.
    pub async fn write_own_record(&self) -> Result<(), BridgeError> {
        let record = DeviceRecord {
            name: self.identity.name.clone(),
            thread_id: self.identity.thread_id,
            hostname: self.identity.hostname.clone(),
            directory: self.identity.directory.clone(),
            pid: self.identity.pid,
            last_seen: now_millis(),
        };
        let doc = serde_json::to_value(&record)
            .map_err(|e| BridgeError::store("failed to serialize device record", e))?;
        self.store
            .write(&Self::device_file(&record.name), &doc)
            .await
    }

    /// Reads the shared state record, treating an absent file as empty.
    pub async fn read_state(&self) -> Result<StateRecord, BridgeError> {
        match self.store.read(STATE_FILE).await? {
            Some(doc) => serde_json::from_value(doc)
                .map_err(|e| BridgeError::store("malformed state record", e)),
            None => Ok(StateRecord::default()),
        }
    }

    /// Replaces the shared state record.
    pub async fn write_state(&self, state: &StateRecord) -> Result<(), BridgeError> {
        let doc = serde_json::to_value(state)
            .map_err(|e| BridgeError::store("failed to serialize state record", e))?;
        self.store.write(STATE_FILE, &doc).await
    }

    /// Lists known devices: active device first, then by most recent
    /// heartbeat, numbered from 1 for `/dev` selection.
    pub async fn list_devices(&self) -> Result<Vec<DeviceEntry>, BridgeError> {
        let state = self.read_state().await?;
        let active = state.active_device.as_deref();

        let mut records = Vec::new();
        for file in self.store.list(DEVICES_DIR).await? {
            let rel = format!("{DEVICES_DIR}/{file}");
            match self.store.read(&rel).await {
                Ok(Some(doc)) => match serde_json::from_value::<DeviceRecord>(doc) {
                    Ok(record) => records.push(record),
                    Err(e) => warn!(file = %file, error = %e, "skipping malformed device record"),
                },
                Ok(None) => {}
                Err(e) => warn!(file = %file, error = %e, "skipping unreadable device record"),
            }
        }

        records.sort_by(|a, b| {
            let a_active = Some(a.name.as_str()) == active;
            let b_active = Some(b.name.as_str()) == active;
            b_active
                .cmp(&a_active)
                .then(b.last_seen.cmp(&a.last_seen))
        });

        Ok(records
            .into_iter()
            .enumerate()
            .map(|(i, record)| DeviceEntry {
                index: i + 1,
                active: Some(record.name.as_str()) == active,
                record,
            })
            .collect())
    }

    /// Finds a device by its `/dev` number or (substring of) its name.
    pub async fn resolve_device(&self, selector: &str) -> Result<Option<DeviceEntry>, BridgeError> {
        let devices = self.list_devices().await?;
        if let Ok(n) = selector.parse::<usize>() {
            return Ok(devices.into_iter().find(|d| d.index == n));
        }
        Ok(devices
            .into_iter()
            .find(|d| d.record.name == selector || d.record.name.contains(selector)))
    }

    /// Hands leadership to `device_name` unconditionally (`/use`). The
    /// election protocol's staleness gate is deliberately skipped.
    pub async fn force_activate(&self, device_name: &str) -> Result<(), BridgeError> {
        let mut state = self.read_state().await?;
        let now = now_millis();
        state.active_device = Some(device_name.to_string());
        state.active_device_heartbeat = now;
        state.last_modified = now;
        state.modified_by = self.identity.name.clone();
        self.write_state(&state).await
    }

    /// Removes a device's record from the registry. Returns the removed
    /// record, if it existed.
    pub async fn remove_device(&self, name: &str) -> Result<Option<DeviceRecord>, BridgeError> {
        let rel = Self::device_file(name);
        let existing = match self.store.read(&rel).await? {
            Some(doc) => serde_json::from_value::<DeviceRecord>(doc).ok(),
            None => None,
        };
        self.store.delete(&rel).await?;
        Ok(existing)
    }

    /// Removes device records whose heartbeat is older than
    /// [`STALE_DEVICE_AGE`]. Returns how many were swept.
    pub async fn sweep_stale_devices(&self) -> Result<usize, BridgeError> {
        let cutoff = now_millis() - STALE_DEVICE_AGE.as_millis() as i64;
        let mut swept = 0;

        for file in self.store.list(DEVICES_DIR).await? {
            let rel = format!("{DEVICES_DIR}/{file}");
            let last_seen = match self.store.read(&rel).await {
                Ok(Some(Value::Object(map))) => {
                    map.get("lastSeen").and_then(Value::as_i64).unwrap_or(0)
                }
                Ok(_) => 0,
                Err(e) => {
                    warn!(file = %file, error = %e, "sweep skipping unreadable record");
                    continue;
                }
            };
            if last_seen < cutoff {
                debug!(file = %file, last_seen, "sweeping stale device record");
                self.store.delete(&rel).await?;
                swept += 1;
            }
        }
        Ok(swept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FsStore;
    use serde_json::json;

    fn identity(name: &str) -> DeviceIdentity {
        DeviceIdentity {
            name: name.to_string(),
            thread_id: None,
            hostname: "testhost".into(),
            directory: "/tmp/proj".into(),
            pid: 4242,
        }
    }

    async fn registry(root: &std::path::Path, name: &str) -> LeaderRegistry {
        let store = Arc::new(FsStore::open(root, "opengram").await.unwrap());
        LeaderRegistry::new(store, identity(name))
    }

    #[tokio::test]
    async fn init_creates_state_and_own_record() {
        let root = tempfile::tempdir().unwrap();
        let reg = registry(root.path(), "host:/tmp/proj").await;
        reg.init().await.unwrap();

        let state = reg.read_state().await.unwrap();
        assert!(state.active_device.is_none());

        let devices = reg.list_devices().await.unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].record.name, "host:/tmp/proj");
        assert!(devices[0].record.last_seen > 0);
    }

    #[tokio::test]
    async fn init_preserves_existing_state() {
        let root = tempfile::tempdir().unwrap();
        let reg = registry(root.path(), "a").await;
        reg.write_state(&StateRecord {
            last_update_id: 99,
            ..StateRecord::default()
        })
        .await
        .unwrap();

        reg.init().await.unwrap();
        assert_eq!(reg.read_state().await.unwrap().last_update_id, 99);
    }

    #[tokio::test]
    async fn list_orders_active_first_then_recency() {
        let root = tempfile::tempdir().unwrap();
        let reg = registry(root.path(), "a").await;
        reg.init().await.unwrap();

        let store = Arc::new(FsStore::open(root.path(), "opengram").await.unwrap());
        let now = now_millis();
        for (name, last_seen) in [("older", now - 60_000), ("newest", now + 60_000)] {
            let rec = DeviceRecord {
                name: name.into(),
                thread_id: None,
                hostname: "h".into(),
                directory: "/d".into(),
                pid: 1,
                last_seen,
            };
            store
                .write(
                    &LeaderRegistry::device_file(name),
                    &serde_json::to_value(&rec).unwrap(),
                )
                .await
                .unwrap();
        }

        reg.write_state(&StateRecord {
            active_device: Some("older".into()),
            ..StateRecord::default()
        })
        .await
        .unwrap();

        let devices = reg.list_devices().await.unwrap();
        assert_eq!(devices[0].record.name, "older", "active device leads");
        assert!(devices[0].active);
        assert_eq!(devices[0].index, 1);
        assert_eq!(devices[1].record.name, "newest");
        assert_eq!(devices.last().unwrap().record.name, "a");
    }

    #[tokio::test]
    async fn malformed_device_files_are_skipped() {
        let root = tempfile::tempdir().unwrap();
        let reg = registry(root.path(), "good").await;
        reg.init().await.unwrap();

        std::fs::write(
            root.path().join("opengram/devices/bad.json"),
            "{ definitely not json",
        )
        .unwrap();

        let devices = reg.list_devices().await.unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].record.name, "good");
    }

    #[tokio::test]
    async fn resolve_by_number_and_name() {
        let root = tempfile::tempdir().unwrap();
        let reg = registry(root.path(), "mbp:/Users/me/proj").await;
        reg.init().await.unwrap();

        let by_num = reg.resolve_device("1").await.unwrap().unwrap();
        assert_eq!(by_num.record.name, "mbp:/Users/me/proj");

        let by_substr = reg.resolve_device("mbp").await.unwrap().unwrap();
        assert_eq!(by_substr.record.name, "mbp:/Users/me/proj");

        assert!(reg.resolve_device("7").await.unwrap().is_none());
        assert!(reg.resolve_device("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sweep_removes_only_stale_records() {
        let root = tempfile::tempdir().unwrap();
        let reg = registry(root.path(), "fresh").await;
        reg.init().await.unwrap();

        let store = Arc::new(FsStore::open(root.path(), "opengram").await.unwrap());
        store
            .write(
                &LeaderRegistry::device_file("ancient"),
                &json!({
                    "name": "ancient",
                    "hostname": "h",
                    "directory": "/d",
                    "pid": 1,
                    "lastSeen": now_millis() - 25 * 60 * 60 * 1000i64,
                }),
            )
            .await
            .unwrap();

        let swept = reg.sweep_stale_devices().await.unwrap();
        assert_eq!(swept, 1);

        let names: Vec<String> = reg
            .list_devices()
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.record.name)
            .collect();
        assert_eq!(names, vec!["fresh"]);
    }

    #[tokio::test]
    async fn remove_device_returns_record() {
        let root = tempfile::tempdir().unwrap();
        let reg = registry(root.path(), "a").await;
        reg.init().await.unwrap();

        let removed = reg.remove_device("a").await.unwrap().unwrap();
        assert_eq!(removed.pid, 4242);
        assert!(reg.list_devices().await.unwrap().is_empty());
        assert!(reg.remove_device("a").await.unwrap().is_none());
    }
}
