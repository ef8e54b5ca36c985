// SPDX-FileCopyrightText: 2026 Opengram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Full-diff uploads to the external diff viewer.
//!
//! Enabled by `DIFF_VIEWER_URL`. The viewer returns a share URL that the
//! streaming projector attaches as a "View Diff" button; any failure means
//! the message simply ships without the button.

use std::time::Duration;

use serde_json::{json, Value};
use tracing::debug;

use opengram_core::BridgeError;

const UPLOAD_TIMEOUT: Duration = Duration::from_secs(20);

/// Client for the diff-viewer upload endpoint.
pub struct DiffViewerClient {
    http: reqwest::Client,
    url: String,
}

impl DiffViewerClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
        }
    }

    /// Uploads a unified diff, returning the viewer URL.
    pub async fn upload(&self, title: &str, diff: &str) -> Result<String, BridgeError> {
        let response = self
            .http
            .post(&self.url)
            .timeout(UPLOAD_TIMEOUT)
            .json(&json!({ "title": title, "diff": diff }))
            .send()
            .await
            .map_err(|e| BridgeError::Internal(format!("diff upload failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BridgeError::Internal(format!(
                "diff viewer returned {status}"
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| BridgeError::Internal(format!("diff viewer returned bad JSON: {e}")))?;
        let url = body
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| BridgeError::Internal("diff viewer reply missing url".into()))?
            .to_string();

        debug!(%url, bytes = diff.len(), "diff uploaded");
        Ok(url)
    }
}
