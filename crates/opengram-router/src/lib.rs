// SPDX-FileCopyrightText: 2026 Opengram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Update ingestion and command routing.
//!
//! The [`IngestLoop`] runs on every instance but only polls Telegram while
//! it holds leadership; filtered updates land in the [`Router`], which
//! answers pending prompts, executes slash commands, or submits prompts to
//! the agent.

pub mod bash;
pub mod callbacks;
pub mod commands;
pub mod ingest;
pub mod prompt;
pub mod vcs;

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::warn;

use opengram_agent::client::AgentClient;
use opengram_agent::transcribe::TranscriptionClient;
use opengram_coordinator::registry::LeaderRegistry;
use opengram_core::messenger::Messenger;
use opengram_core::pending::PendingRegistry;
use opengram_core::types::{SendOptions, SessionInfo, ThreadKey};

use bash::BashTracker;

pub use ingest::IngestLoop;

/// Static facts the router needs about this instance.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub chat_id: i64,
    pub thread_id: Option<i64>,
    pub version: String,
    pub working_dir: PathBuf,
}

/// Classifies filtered updates and executes them.
pub struct Router {
    messenger: Arc<dyn Messenger>,
    agent: Arc<AgentClient>,
    pending: Arc<PendingRegistry>,
    /// Absent when the shared store is unavailable (single-instance mode).
    registry: Option<Arc<LeaderRegistry>>,
    bash: Arc<BashTracker>,
    transcriber: Option<Arc<TranscriptionClient>>,
    session: Arc<Mutex<Option<SessionInfo>>>,
    config: RouterConfig,
}

impl Router {
    pub fn new(
        messenger: Arc<dyn Messenger>,
        agent: Arc<AgentClient>,
        pending: Arc<PendingRegistry>,
        registry: Option<Arc<LeaderRegistry>>,
        transcriber: Option<Arc<TranscriptionClient>>,
        config: RouterConfig,
    ) -> Self {
        Self {
            messenger,
            agent,
            pending,
            registry,
            bash: Arc::new(BashTracker::new()),
            transcriber,
            session: Arc::new(Mutex::new(None)),
            config,
        }
    }

    /// Seeds the router with a pre-existing session (the `[session-id]`
    /// CLI argument).
    pub async fn adopt_session(&self, session: SessionInfo) {
        *self.session.lock().await = Some(session);
    }

    /// The current session, if one exists.
    pub async fn current_session(&self) -> Option<SessionInfo> {
        self.session.lock().await.clone()
    }

    pub(crate) async fn reply(&self, key: ThreadKey, text: &str) {
        if let Err(e) = self
            .messenger
            .send(key, text, SendOptions::default())
            .await
        {
            warn!(error = %e, "failed to send reply");
        }
    }

    /// Creates the agent session lazily on first use.
    pub(crate) async fn ensure_session(
        &self,
    ) -> Result<SessionInfo, opengram_core::BridgeError> {
        let mut guard = self.session.lock().await;
        if let Some(session) = guard.as_ref() {
            return Ok(session.clone());
        }
        let session = self.agent.create_session().await?;
        *guard = Some(session.clone());
        Ok(session)
    }
}
