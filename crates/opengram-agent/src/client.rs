// SPDX-FileCopyrightText: 2026 Opengram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP client for the agent server.
//!
//! The agent (an opencode-style server named by `OPENCODE_URL`) exposes
//! sessions, prompts, model listing, question/permission replies, and an
//! SSE event stream. Calls that time out trigger one best-effort agent
//! restart through the [`AgentRestarter`] seam, then a single retry.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use opengram_core::pending::PermissionChoice;
use opengram_core::types::{ModelRef, SessionInfo};
use opengram_core::BridgeError;

use crate::events::AgentEvent;
use crate::sse::SseDecoder;

/// Default per-call timeout before the restart-and-retry path kicks in.
const CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Back-off between event-stream reconnect attempts.
const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

/// One part of a prompt submission.
#[derive(Debug, Clone)]
pub enum PromptPart {
    Text { text: String },
    File { mime: String, url: String },
}

impl PromptPart {
    fn to_json(&self) -> Value {
        match self {
            PromptPart::Text { text } => json!({ "type": "text", "text": text }),
            PromptPart::File { mime, url } => json!({ "type": "file", "mime": mime, "url": url }),
        }
    }
}

/// Reply from the title-generation RPC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TitleReply {
    Title(String),
    Unknown(String),
}

/// Best-effort restart hook invoked when an agent call times out.
#[async_trait]
pub trait AgentRestarter: Send + Sync {
    async fn restart(&self) -> Result<(), BridgeError>;
}

/// Client for the agent's HTTP API.
pub struct AgentClient {
    http: reqwest::Client,
    /// Separate client without a request timeout, for the SSE stream.
    stream_http: reqwest::Client,
    base: String,
    restarter: Option<Arc<dyn AgentRestarter>>,
}

impl AgentClient {
    pub fn new(base_url: &str) -> Result<Self, BridgeError> {
        reqwest::Url::parse(base_url)
            .map_err(|e| BridgeError::Config(format!("invalid agent URL {base_url:?}: {e}")))?;

        let http = reqwest::Client::builder()
            .timeout(CALL_TIMEOUT)
            .build()
            .map_err(|e| BridgeError::agent(format!("failed to build http client: {e}")))?;
        let stream_http = reqwest::Client::new();

        Ok(Self {
            http,
            stream_http,
            base: base_url.trim_end_matches('/').to_string(),
            restarter: None,
        })
    }

    pub fn with_restarter(mut self, restarter: Arc<dyn AgentRestarter>) -> Self {
        self.restarter = Some(restarter);
        self
    }

    /// The agent's externally visible URL, echoed by `/connect`.
    pub fn base_url(&self) -> &str {
        &self.base
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base, path.trim_start_matches('/'))
    }

    pub async fn create_session(&self) -> Result<SessionInfo, BridgeError> {
        let body = self
            .execute(self.http.post(self.endpoint("session")), "create session")
            .await?;
        let id = body
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| BridgeError::agent("create session reply missing id"))?;
        let mut session = SessionInfo::new(id);
        session.title_known = body.get("title").and_then(Value::as_str).is_some();
        info!(session_id = %session.id, "agent session created");
        Ok(session)
    }

    /// Submits a prompt. The model override, when present, applies to this
    /// call only.
    pub async fn prompt(
        &self,
        session_id: &str,
        parts: &[PromptPart],
        model: Option<&ModelRef>,
    ) -> Result<(), BridgeError> {
        let mut body = json!({
            "parts": parts.iter().map(PromptPart::to_json).collect::<Vec<_>>(),
        });
        if let Some(model) = model {
            body["model"] = json!({
                "providerID": model.provider,
                "modelID": model.model,
            });
        }

        self.execute(
            self.http
                .post(self.endpoint(&format!("session/{session_id}/prompt")))
                .json(&body),
            "prompt",
        )
        .await?;
        Ok(())
    }

    /// Aborts the session's in-flight turn.
    pub async fn abort(&self, session_id: &str) -> Result<(), BridgeError> {
        self.execute(
            self.http
                .post(self.endpoint(&format!("session/{session_id}/abort"))),
            "abort",
        )
        .await?;
        Ok(())
    }

    /// Forwards a named command (`/plan`, `/build`, `/review …`).
    pub async fn command(
        &self,
        session_id: &str,
        command: &str,
        arguments: &str,
    ) -> Result<(), BridgeError> {
        self.execute(
            self.http
                .post(self.endpoint(&format!("session/{session_id}/command")))
                .json(&json!({ "command": command, "arguments": arguments })),
            "command",
        )
        .await?;
        Ok(())
    }

    /// Lists the `provider/model` pairs the agent knows.
    pub async fn list_models(&self) -> Result<Vec<ModelRef>, BridgeError> {
        let body = self
            .execute(self.http.get(self.endpoint("config/providers")), "list models")
            .await?;
        let mut models = Vec::new();
        for provider in body
            .get("providers")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            let Some(provider_id) = provider.get("id").and_then(Value::as_str) else {
                continue;
            };
            for model in provider
                .get("models")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
            {
                if let Some(model_id) = model.get("id").and_then(Value::as_str) {
                    models.push(ModelRef {
                        provider: provider_id.to_string(),
                        model: model_id.to_string(),
                    });
                }
            }
        }
        Ok(models)
    }

    pub async fn rename_session(&self, session_id: &str, title: &str) -> Result<(), BridgeError> {
        self.execute(
            self.http
                .patch(self.endpoint(&format!("session/{session_id}")))
                .json(&json!({ "title": title })),
            "rename session",
        )
        .await?;
        Ok(())
    }

    /// Asks the agent to title the session after its first user message.
    /// The reply is either a usable title or an explicit unknown.
    pub async fn generate_title(
        &self,
        session_id: &str,
        text: &str,
    ) -> Result<TitleReply, BridgeError> {
        let body = self
            .execute(
                self.http
                    .post(self.endpoint(&format!("session/{session_id}/title")))
                    .json(&json!({ "text": text })),
                "generate title",
            )
            .await?;

        let value = body
            .get("value")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        match body.get("type").and_then(Value::as_str) {
            Some("title") if !value.is_empty() => Ok(TitleReply::Title(value)),
            _ => Ok(TitleReply::Unknown(value)),
        }
    }

    pub async fn reply_question(
        &self,
        request_id: &str,
        answers: &[Vec<String>],
    ) -> Result<(), BridgeError> {
        self.execute(
            self.http
                .post(self.endpoint(&format!("question/{request_id}/reply")))
                .json(&json!({ "answers": answers })),
            "question reply",
        )
        .await?;
        Ok(())
    }

    pub async fn reject_question(&self, request_id: &str) -> Result<(), BridgeError> {
        self.execute(
            self.http
                .post(self.endpoint(&format!("question/{request_id}/reject"))),
            "question reject",
        )
        .await?;
        Ok(())
    }

    pub async fn reply_permission(
        &self,
        request_id: &str,
        choice: PermissionChoice,
    ) -> Result<(), BridgeError> {
        self.execute(
            self.http
                .post(self.endpoint(&format!("permission/{request_id}")))
                .json(&json!({ "response": choice.as_str() })),
            "permission reply",
        )
        .await?;
        Ok(())
    }

    /// Connects to the agent's SSE event stream and feeds parsed events to
    /// the returned channel, reconnecting with back-off until cancelled.
    pub fn spawn_event_stream(
        self: &Arc<Self>,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<AgentEvent> {
        let (tx, rx) = mpsc::channel(256);
        let client = Arc::clone(self);

        tokio::spawn(async move {
            loop {
                if cancel.is_cancelled() {
                    break;
                }
                client.consume_event_stream(&tx, &cancel).await;
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(RECONNECT_BACKOFF) => {}
                }
            }
            debug!("agent event stream task stopped");
        });

        rx
    }

    async fn consume_event_stream(
        &self,
        tx: &mpsc::Sender<AgentEvent>,
        cancel: &CancellationToken,
    ) {
        let response = match self.stream_http.get(self.endpoint("event")).send().await {
            Ok(resp) if resp.status().is_success() => resp,
            Ok(resp) => {
                warn!(status = %resp.status(), "agent event stream rejected");
                return;
            }
            Err(e) => {
                warn!(error = %e, "agent event stream unreachable");
                return;
            }
        };

        debug!("agent event stream connected");
        let mut decoder = SseDecoder::new();
        let mut stream = response.bytes_stream();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                chunk = stream.next() => match chunk {
                    Some(Ok(bytes)) => {
                        for payload in decoder.feed(&String::from_utf8_lossy(&bytes)) {
                            match serde_json::from_str::<Value>(&payload) {
                                Ok(value) => {
                                    if tx.send(AgentEvent::parse(&value)).await.is_err() {
                                        return;
                                    }
                                }
                                Err(e) => warn!(error = %e, "dropping malformed agent event"),
                            }
                        }
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "agent event stream broke");
                        return;
                    }
                    None => {
                        debug!("agent event stream ended");
                        return;
                    }
                }
            }
        }
    }

    /// Sends a request; a timeout triggers one agent restart and one retry.
    async fn execute(
        &self,
        request: reqwest::RequestBuilder,
        what: &str,
    ) -> Result<Value, BridgeError> {
        let retry = request.try_clone();
        match request.send().await {
            Ok(response) => Self::check(response, what).await,
            Err(e) if e.is_timeout() => {
                warn!(what, "agent call timed out, restarting agent and retrying");
                if let Some(restarter) = &self.restarter {
                    if let Err(restart_err) = restarter.restart().await {
                        warn!(error = %restart_err, "agent restart failed");
                    }
                }
                let retry = retry.ok_or_else(|| {
                    BridgeError::agent(format!("{what} timed out (request not retriable)"))
                })?;
                match retry.send().await {
                    Ok(response) => Self::check(response, what).await,
                    Err(e) => Err(BridgeError::Agent {
                        message: format!("{what} failed after restart: {e}"),
                        source: Some(Box::new(e)),
                    }),
                }
            }
            Err(e) => Err(BridgeError::Agent {
                message: format!("{what} failed: {e}"),
                source: Some(Box::new(e)),
            }),
        }
    }

    async fn check(response: reqwest::Response, what: &str) -> Result<Value, BridgeError> {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            let mut detail = body;
            let mut cut = detail.len().min(200);
            while !detail.is_char_boundary(cut) {
                cut -= 1;
            }
            detail.truncate(cut);
            return Err(BridgeError::agent(format!("{what} returned {status}: {detail}")));
        }
        if body.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body)
            .map_err(|e| BridgeError::agent(format!("{what} returned malformed JSON: {e}")))
    }
}
