// SPDX-FileCopyrightText: 2026 Opengram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared-store adapter: JSON documents over a replicated directory tree.
//!
//! The store exposes the raw semantics of the underlying filesystem (an
//! iCloud Drive folder or any synced directory): no cross-host locking, no
//! compare-and-swap. Writes are full-file replacements made atomic against
//! local readers by writing a sibling temp file and renaming it into place.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use opengram_core::BridgeError;

/// Directory-scoped read/write/list/delete of JSON documents.
///
/// Paths are relative to the store's app directory and use `/` separators.
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Reads and parses a document. `Ok(None)` when the file is absent.
    async fn read(&self, rel: &str) -> Result<Option<Value>, BridgeError>;

    /// Atomically replaces a document.
    async fn write(&self, rel: &str, doc: &Value) -> Result<(), BridgeError>;

    /// Lists the file names (not paths) of `*.json` documents in a
    /// directory. An absent directory lists as empty.
    async fn list(&self, rel_dir: &str) -> Result<Vec<String>, BridgeError>;

    /// Removes a document. Removing an absent document is not an error.
    async fn delete(&self, rel: &str) -> Result<(), BridgeError>;

    /// Ensures a subdirectory exists.
    async fn create_dir(&self, rel_dir: &str) -> Result<(), BridgeError>;
}

/// Filesystem-backed [`SharedStore`] rooted at `<store-root>/<app-name>/`.
#[derive(Debug)]
pub struct FsStore {
    base: PathBuf,
}

impl FsStore {
    /// Opens the store, creating `<store-root>/<app-name>/` if missing.
    ///
    /// Fails with [`BridgeError::StoreUnavailable`] when the store root
    /// itself (the replicated folder) does not exist; the caller then falls
    /// back to single-instance mode.
    pub async fn open(store_root: &Path, app_name: &str) -> Result<Self, BridgeError> {
        if !store_root.exists() {
            return Err(BridgeError::StoreUnavailable(
                store_root.display().to_string(),
            ));
        }
        let base = store_root.join(app_name);
        tokio::fs::create_dir_all(&base)
            .await
            .map_err(|e| BridgeError::store(format!("failed to create {}", base.display()), e))?;
        Ok(Self { base })
    }

    /// The app directory this store operates in.
    pub fn base(&self) -> &Path {
        &self.base
    }

    fn abs(&self, rel: &str) -> PathBuf {
        self.base.join(rel)
    }
}

#[async_trait]
impl SharedStore for FsStore {
    async fn read(&self, rel: &str) -> Result<Option<Value>, BridgeError> {
        let path = self.abs(rel);
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(BridgeError::store(
                    format!("failed to read {}", path.display()),
                    e,
                ))
            }
        };
        let doc = serde_json::from_slice(&bytes).map_err(|e| {
            BridgeError::store(format!("malformed JSON in {}", path.display()), e)
        })?;
        Ok(Some(doc))
    }

    async fn write(&self, rel: &str, doc: &Value) -> Result<(), BridgeError> {
        let path = self.abs(rel);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(doc)
            .map_err(|e| BridgeError::store("failed to serialize document", e))?;

        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| BridgeError::store(format!("failed to write {}", tmp.display()), e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| BridgeError::store(format!("failed to finalize {}", path.display()), e))
    }

    async fn list(&self, rel_dir: &str) -> Result<Vec<String>, BridgeError> {
        let dir = self.abs(rel_dir);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(BridgeError::store(
                    format!("failed to list {}", dir.display()),
                    e,
                ))
            }
        };

        let mut names = Vec::new();
        loop {
            match entries.next_entry().await {
                Ok(Some(entry)) => {
                    let name = entry.file_name().to_string_lossy().into_owned();
                    if name.ends_with(".json") {
                        names.push(name);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, dir = %dir.display(), "skipping unreadable dir entry");
                    break;
                }
            }
        }
        names.sort();
        Ok(names)
    }

    async fn delete(&self, rel: &str) -> Result<(), BridgeError> {
        let path = self.abs(rel);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BridgeError::store(
                format!("failed to delete {}", path.display()),
                e,
            )),
        }
    }

    async fn create_dir(&self, rel_dir: &str) -> Result<(), BridgeError> {
        let dir = self.abs(rel_dir);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| BridgeError::store(format!("failed to create {}", dir.display()), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn open_store(root: &Path) -> FsStore {
        FsStore::open(root, "opengram").await.expect("store opens")
    }

    #[tokio::test]
    async fn open_fails_when_root_is_missing() {
        let err = FsStore::open(Path::new("/nonexistent/icloud"), "opengram")
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::StoreUnavailable(_)));
    }

    #[tokio::test]
    async fn read_absent_returns_none() {
        let root = tempfile::tempdir().unwrap();
        let store = open_store(root.path()).await;
        assert!(store.read("state.json").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let root = tempfile::tempdir().unwrap();
        let store = open_store(root.path()).await;

        let doc = json!({"activeDevice": "a", "lastUpdateId": 7});
        store.write("state.json", &doc).await.unwrap();
        assert_eq!(store.read("state.json").await.unwrap(), Some(doc));
    }

    #[tokio::test]
    async fn write_replaces_whole_document() {
        let root = tempfile::tempdir().unwrap();
        let store = open_store(root.path()).await;

        store
            .write("state.json", &json!({"a": 1, "b": 2}))
            .await
            .unwrap();
        store.write("state.json", &json!({"a": 3})).await.unwrap();

        let read = store.read("state.json").await.unwrap().unwrap();
        assert_eq!(read, json!({"a": 3}));
    }

    #[tokio::test]
    async fn write_leaves_no_temp_files() {
        let root = tempfile::tempdir().unwrap();
        let store = open_store(root.path()).await;
        store.write("state.json", &json!({})).await.unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(store.base())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn list_returns_only_json_names() {
        let root = tempfile::tempdir().unwrap();
        let store = open_store(root.path()).await;
        store.create_dir("devices").await.unwrap();
        store
            .write("devices/mac.json", &json!({"name": "mac"}))
            .await
            .unwrap();
        std::fs::write(store.base().join("devices/notes.txt"), "x").unwrap();

        assert_eq!(store.list("devices").await.unwrap(), vec!["mac.json"]);
    }

    #[tokio::test]
    async fn list_absent_dir_is_empty() {
        let root = tempfile::tempdir().unwrap();
        let store = open_store(root.path()).await;
        assert!(store.list("devices").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let root = tempfile::tempdir().unwrap();
        let store = open_store(root.path()).await;
        store.write("x.json", &json!({})).await.unwrap();
        store.delete("x.json").await.unwrap();
        store.delete("x.json").await.unwrap();
        assert!(store.read("x.json").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn malformed_json_is_a_store_error() {
        let root = tempfile::tempdir().unwrap();
        let store = open_store(root.path()).await;
        std::fs::write(store.base().join("state.json"), "{ not json").unwrap();

        let err = store.read("state.json").await.unwrap_err();
        assert!(matches!(err, BridgeError::Store { .. }));
    }
}
