// SPDX-FileCopyrightText: 2026 Opengram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Voice transcription via the OpenAI audio API.
//!
//! Enabled when `OPENAI_API_KEY` is configured. Failures degrade silently
//! upstream: a voice message the transcriber cannot handle is simply not
//! turned into a prompt part.

use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use opengram_core::BridgeError;

const TRANSCRIPTION_URL: &str = "https://api.openai.com/v1/audio/transcriptions";
const TRANSCRIBE_TIMEOUT: Duration = Duration::from_secs(60);

/// Client for the transcription endpoint.
pub struct TranscriptionClient {
    http: reqwest::Client,
    api_key: String,
}

impl TranscriptionClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
        }
    }

    /// Transcribes the given audio bytes. `mime` drives the upload
    /// filename so the API can pick a decoder (Telegram voice is OGG).
    pub async fn transcribe(&self, audio: Vec<u8>, mime: &str) -> Result<String, BridgeError> {
        let filename = match mime {
            m if m.contains("ogg") => "voice.ogg",
            m if m.contains("mp4") || m.contains("m4a") => "voice.m4a",
            m if m.contains("mpeg") || m.contains("mp3") => "voice.mp3",
            _ => "voice.bin",
        };

        let part = reqwest::multipart::Part::bytes(audio)
            .file_name(filename)
            .mime_str(mime)
            .map_err(|e| BridgeError::Internal(format!("invalid voice mime {mime:?}: {e}")))?;
        let form = reqwest::multipart::Form::new()
            .text("model", "whisper-1")
            .part("file", part);

        let response = self
            .http
            .post(TRANSCRIPTION_URL)
            .bearer_auth(self.api_key.trim())
            .timeout(TRANSCRIBE_TIMEOUT)
            .multipart(form)
            .send()
            .await
            .map_err(|e| BridgeError::Internal(format!("transcription request failed: {e}")))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(BridgeError::Internal(format!(
                "transcription returned {status}"
            )));
        }

        let parsed: Value = serde_json::from_str(&body)
            .map_err(|e| BridgeError::Internal(format!("transcription returned bad JSON: {e}")))?;
        let text = parsed
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_string();

        if text.is_empty() {
            return Err(BridgeError::Internal("transcription was empty".into()));
        }
        debug!(chars = text.len(), "voice transcribed");
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_holds_trimmed_key_at_request_time() {
        // The key is trimmed when the request is built; construction keeps
        // it verbatim.
        let client = TranscriptionClient::new("  sk-test  ");
        assert_eq!(client.api_key, "  sk-test  ");
    }
}
