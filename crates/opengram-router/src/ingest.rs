// SPDX-FileCopyrightText: 2026 Opengram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The ingest-and-heartbeat loop.
//!
//! Runs on every instance. Standbys only check for a stale leader and
//! prove their own existence; the leader additionally polls Telegram
//! (directly or via the updates proxy), filters the batch, persists the
//! committed update offset, and dispatches to the router. The loop is
//! total: any error is logged and the loop continues after a back-off.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use opengram_coordinator::records::now_millis;
use opengram_coordinator::registry::LeaderRegistry;
use opengram_coordinator::timers::{TimerKind, TimerSet};
use opengram_coordinator::{Election, TickOutcome};
use opengram_core::types::Incoming;
use opengram_core::BridgeError;
use opengram_telegram::{normalize_update, ProxyClient, TelegramTransport};

use crate::Router;

/// Back-off after an ingest tick fails.
const ERROR_BACKOFF: Duration = Duration::from_secs(5);
/// Pacing between empty updates-proxy polls.
const PROXY_IDLE_DELAY: Duration = Duration::from_secs(2);
/// Long-poll timeout handed to getUpdates.
const LONG_POLL_SECS: u32 = 30;

/// Chat/thread binding for update filtering.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub chat_id: i64,
    pub thread_id: Option<i64>,
}

/// The per-instance ingest loop.
pub struct IngestLoop {
    election: Election,
    timers: TimerSet,
    registry: Option<Arc<LeaderRegistry>>,
    transport: Arc<TelegramTransport>,
    proxy: Option<ProxyClient>,
    router: Arc<Router>,
    config: IngestConfig,
    /// Epoch seconds at startup; messages older than this are history.
    started_at: i64,
    last_update_id: i64,
    /// Foreign ids already warned about when no shared store exists.
    local_foreign: HashSet<i64>,
    cancel: CancellationToken,
}

impl IngestLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        election: Election,
        registry: Option<Arc<LeaderRegistry>>,
        transport: Arc<TelegramTransport>,
        proxy: Option<ProxyClient>,
        router: Arc<Router>,
        config: IngestConfig,
        cancel: CancellationToken,
    ) -> Self {
        let timers = TimerSet::for_role(election.role());
        Self {
            election,
            timers,
            registry,
            transport,
            proxy,
            router,
            config,
            started_at: now_millis() / 1000,
            last_update_id: 0,
            local_foreign: HashSet::new(),
            cancel,
        }
    }

    /// Runs until cancelled.
    pub async fn run(mut self) {
        self.refresh_offset().await;
        let outcome = self.election.tick().await;
        self.apply_outcome(outcome).await;
        if self.election.is_leader() {
            // A permanent leader never sees a BecameLeader transition.
            self.announce().await;
        }

        while !self.cancel.is_cancelled() {
            if let Err(e) = self.tick().await {
                warn!(error = %e, "ingest tick failed");
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = tokio::time::sleep(ERROR_BACKOFF) => {}
                }
            }
        }
        info!("ingest loop stopped");
    }

    async fn tick(&mut self) -> Result<(), BridgeError> {
        let due = self.timers.poll(Instant::now());
        for kind in &due {
            match kind {
                TimerKind::DeviceHeartbeat => {
                    if let Some(registry) = &self.registry {
                        if let Err(e) = registry.write_own_record().await {
                            warn!(error = %e, "device heartbeat failed");
                        }
                    }
                }
                TimerKind::ActiveHeartbeat => {
                    if let Err(e) = self.election.heartbeat().await {
                        warn!(error = %e, "active heartbeat failed");
                    }
                }
                TimerKind::StaleSweep => {
                    if let Some(registry) = &self.registry {
                        match registry.sweep_stale_devices().await {
                            Ok(0) => {}
                            Ok(n) => info!(swept = n, "removed stale device records"),
                            Err(e) => warn!(error = %e, "stale sweep failed"),
                        }
                    }
                }
                TimerKind::StandbyCheck => {}
            }
        }

        if self.election.is_leader() {
            let outcome = self.election.tick().await;
            self.apply_outcome(outcome).await;
            if self.election.is_leader() {
                self.poll_and_dispatch().await?;
            }
            return Ok(());
        }

        // Standby: run the election check when its timer fired, then sleep
        // until the next deadline.
        if due.contains(&TimerKind::StandbyCheck) {
            let outcome = self.election.tick().await;
            self.apply_outcome(outcome).await;
            if self.election.is_leader() {
                return Ok(());
            }
        }
        let wait = self
            .timers
            .next_deadline_in(Instant::now())
            .min(Duration::from_secs(30));
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = tokio::time::sleep(wait) => {}
        }
        Ok(())
    }

    async fn apply_outcome(&mut self, outcome: TickOutcome) {
        match outcome {
            TickOutcome::BecameLeader => {
                self.timers = TimerSet::for_role(self.election.role());
                self.refresh_offset().await;
                self.announce().await;
            }
            TickOutcome::LostLeadership => {
                info!("dropping to standby");
                self.timers = TimerSet::for_role(self.election.role());
            }
            TickOutcome::Unchanged => {}
        }
    }

    async fn announce(&self) {
        let name = self
            .registry
            .as_ref()
            .map(|r| r.identity().name.clone())
            .unwrap_or_else(|| "this instance".to_string());
        self.router.announce_active(&name).await;
    }

    /// Picks up the committed offset from the shared state record.
    async fn refresh_offset(&mut self) {
        if let Some(registry) = &self.registry {
            match registry.read_state().await {
                Ok(state) => {
                    self.last_update_id = self.last_update_id.max(state.last_update_id);
                }
                Err(e) => warn!(error = %e, "could not read committed offset"),
            }
        }
    }

    async fn poll_and_dispatch(&mut self) -> Result<(), BridgeError> {
        let batch: Vec<(i64, Option<Incoming>)> = match &self.proxy {
            Some(proxy) => proxy
                .fetch(
                    self.last_update_id,
                    self.config.chat_id,
                    self.config.thread_id,
                )
                .await?
                .into_iter()
                .map(|u| (u.update_id, normalize_update(&u.payload)))
                .collect(),
            None => self
                .transport
                .long_poll(self.last_update_id, LONG_POLL_SECS)
                .await?
                .iter()
                .map(|u| (i64::from(u.id.0), normalize_update(u)))
                .collect(),
        };

        let was_empty = batch.is_empty();
        for (update_id, incoming) in batch {
            // Telegram ids are monotonic; anything at or below the
            // committed offset was already delivered by a previous leader.
            if update_id <= self.last_update_id {
                debug!(update_id, "suppressing replayed update");
                continue;
            }
            self.commit_offset(update_id).await;
            if let Some(incoming) = incoming {
                self.filter_and_dispatch(incoming).await;
            }
        }

        // Direct long polling blocks for LONG_POLL_SECS; the proxy returns
        // immediately, so pace empty polls.
        if self.proxy.is_some() && was_empty {
            tokio::select! {
                _ = self.cancel.cancelled() => {}
                _ = tokio::time::sleep(PROXY_IDLE_DELAY) => {}
            }
        }
        Ok(())
    }

    /// Persists the committed offset before the next poll can be computed.
    async fn commit_offset(&mut self, update_id: i64) {
        self.last_update_id = update_id;
        let Some(registry) = &self.registry else {
            return;
        };
        match registry.read_state().await {
            Ok(mut state) => {
                if update_id > state.last_update_id {
                    state.last_update_id = update_id;
                    state.last_modified = now_millis();
                    state.modified_by = registry.identity().name.clone();
                    if let Err(e) = registry.write_state(&state).await {
                        warn!(error = %e, update_id, "failed to persist offset");
                    }
                }
            }
            Err(e) => warn!(error = %e, "failed to read state for offset commit"),
        }
    }

    async fn filter_and_dispatch(&mut self, incoming: Incoming) {
        if incoming.chat_id() != self.config.chat_id {
            self.note_foreign_chat(incoming.chat_id()).await;
            return;
        }
        if let Some(required) = self.config.thread_id {
            if incoming.thread_id() != Some(required) {
                debug!(thread = ?incoming.thread_id(), "dropping off-topic update");
                return;
            }
        }

        let threshold = self
            .started_at
            .max(self.election.became_active_at().unwrap_or(0));

        match incoming {
            Incoming::Message(msg) => {
                if msg.from_is_bot {
                    return;
                }
                if msg.date < threshold {
                    debug!(date = msg.date, threshold, "dropping pre-leadership message");
                    return;
                }
                self.router.handle_message(msg).await;
            }
            Incoming::Callback(callback) => {
                if callback.date.is_some_and(|d| d < threshold) {
                    // History from before this leadership; tell the user
                    // the button is dead instead of silently ignoring it.
                    self.router.handle_expired_callback(&callback).await;
                    return;
                }
                self.router.handle_callback(callback).await;
            }
        }
    }

    /// Records a chat the bot is not configured for and warns once per
    /// newly seen id.
    async fn note_foreign_chat(&mut self, chat_id: i64) {
        let (is_new, total, recent) = match &self.registry {
            Some(registry) => match registry.read_state().await {
                Ok(mut state) => {
                    let is_new = state.note_foreign_chat(chat_id);
                    if is_new {
                        if let Err(e) = registry.write_state(&state).await {
                            warn!(error = %e, "failed to record foreign chat");
                        }
                    }
                    let recent: Vec<i64> = state
                        .foreign_chat_ids
                        .iter()
                        .rev()
                        .take(5)
                        .rev()
                        .copied()
                        .collect();
                    (is_new, state.foreign_chat_ids.len(), recent)
                }
                Err(e) => {
                    warn!(error = %e, "failed to read state for foreign chat");
                    return;
                }
            },
            None => {
                let is_new = self.local_foreign.insert(chat_id);
                let mut recent: Vec<i64> = self.local_foreign.iter().copied().collect();
                recent.sort_unstable();
                let len = recent.len();
                (is_new, len, recent.into_iter().rev().take(5).rev().collect())
            }
        };

        if is_new {
            warn!(chat_id, total, "update from unconfigured chat");
            self.router
                .announce_foreign_chats(total, &recent)
                .await;
        }
    }
}

/// Formats the aggregate foreign-chat warning.
pub fn foreign_warning(total: usize, recent: &[i64]) -> String {
    let listed: Vec<String> = recent.iter().map(|id| id.to_string()).collect();
    format!(
        "Seeing updates from {total} unconfigured chat(s); most recent: {}",
        listed.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn foreign_warning_lists_recent_ids() {
        let text = foreign_warning(7, &[-1001, -1002, -1003]);
        assert!(text.contains("7 unconfigured"));
        assert!(text.contains("-1001, -1002, -1003"));
    }

    #[test]
    fn proxy_idle_delay_is_short() {
        // The proxy path must poll frequently enough that failover tests
        // relying on prompt delivery stay within budget.
        assert!(PROXY_IDLE_DELAY <= Duration::from_secs(5));
        assert_eq!(LONG_POLL_SECS, 30);
    }
}
