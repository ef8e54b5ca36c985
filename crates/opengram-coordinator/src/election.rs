// SPDX-FileCopyrightText: 2026 Opengram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Leader election and failover over the shared store.
//!
//! The store has no compare-and-swap, so promotion is optimistic:
//! candidates separate themselves in wall time with a random delay, write
//! the state record, wait one replication period, and re-read to verify
//! ownership. Election is advisory: every store error short-circuits to
//! standby and the next tick simply tries again.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, info, warn};

use opengram_core::BridgeError;

use crate::records::{now_millis, StateRecord};
use crate::registry::LeaderRegistry;

/// Election timing parameters.
#[derive(Debug, Clone)]
pub struct ElectionConfig {
    /// Age beyond which a leader's active heartbeat counts as stale.
    /// Strictly greater than the maximum active-heartbeat interval.
    pub heartbeat_timeout: Duration,
    /// Upper bound of the random candidation delay.
    pub failover_jitter: Duration,
    /// Wait between the optimistic write and the verification read, at
    /// least one filesystem-replication period.
    pub verify_delay: Duration,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout: Duration::from_secs(90),
            failover_jitter: Duration::from_secs(10),
            verify_delay: Duration::from_millis(500),
        }
    }
}

/// The instance's current coordination role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Standby,
    Leader,
}

/// What a call to [`Election::tick`] changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Unchanged,
    BecameLeader,
    LostLeadership,
}

/// Per-instance election state machine.
pub struct Election {
    /// Absent only in single-instance mode, which never reads the store.
    registry: Option<Arc<LeaderRegistry>>,
    config: ElectionConfig,
    role: Role,
    /// Epoch seconds of the most recent promotion. Telegram messages dated
    /// before this are history and must not be replayed.
    became_active_at: Option<i64>,
}

impl Election {
    pub fn new(registry: Arc<LeaderRegistry>, config: ElectionConfig) -> Self {
        Self {
            registry: Some(registry),
            config,
            role: Role::Standby,
            became_active_at: None,
        }
    }

    /// A permanently-leading election, used when coordination is disabled
    /// or the shared store is unavailable.
    pub fn permanent_leader() -> Self {
        Self {
            registry: None,
            config: ElectionConfig::default(),
            role: Role::Leader,
            became_active_at: Some(now_millis() / 1000),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_leader(&self) -> bool {
        self.role == Role::Leader
    }

    /// Epoch seconds of the latest promotion, if this instance leads.
    pub fn became_active_at(&self) -> Option<i64> {
        self.became_active_at
    }

    /// Runs one election check. Called from the ingest loop on every tick
    /// (leaders) or on every standby-check fire (standbys).
    pub async fn tick(&mut self) -> TickOutcome {
        let Some(registry) = self.registry.clone() else {
            return TickOutcome::Unchanged;
        };

        let state = match registry.read_state().await {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, "election read failed, dropping to standby");
                return self.enter_standby();
            }
        };

        let me = registry.identity().name.clone();

        match self.role {
            Role::Leader => {
                if state.active_device.as_deref() == Some(me.as_str()) {
                    TickOutcome::Unchanged
                } else {
                    info!(
                        new_leader = state.active_device.as_deref().unwrap_or("<none>"),
                        "leadership taken over by another device"
                    );
                    self.enter_standby()
                }
            }
            Role::Standby => {
                if state.active_device.as_deref() == Some(me.as_str()) {
                    return self.enter_leader();
                }
                let age = now_millis() - state.active_device_heartbeat;
                let stale = state.active_device.is_none()
                    || age > self.config.heartbeat_timeout.as_millis() as i64;
                if stale {
                    self.candidate(&registry, &me).await
                } else {
                    TickOutcome::Unchanged
                }
            }
        }
    }

    /// Attempts promotion after observing a stale (or absent) leader.
    async fn candidate(&mut self, registry: &LeaderRegistry, me: &str) -> TickOutcome {
        // Separate contenders in wall time.
        let jitter_ms = self.config.failover_jitter.as_millis() as u64;
        if jitter_ms > 0 {
            let delay = rand::thread_rng().gen_range(0..jitter_ms);
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        // Someone else may have won during the sleep.
        let state = match registry.read_state().await {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, "candidation re-read failed");
                return self.enter_standby();
            }
        };
        if let Some(active) = state.active_device.as_deref() {
            let age = now_millis() - state.active_device_heartbeat;
            if active != me && age <= self.config.heartbeat_timeout.as_millis() as i64 {
                debug!(active, "fresh leader appeared during candidation");
                return self.enter_standby();
            }
        }

        let prev_last_modified = state.last_modified;
        let now = now_millis();
        let claimed = StateRecord {
            active_device: Some(me.to_string()),
            active_device_heartbeat: now,
            last_modified: now,
            modified_by: me.to_string(),
            ..state
        };
        if let Err(e) = registry.write_state(&claimed).await {
            warn!(error = %e, "candidation write failed");
            return self.enter_standby();
        }

        // Give the replicated filesystem one propagation period, then make
        // sure our write survived.
        tokio::time::sleep(self.config.verify_delay).await;
        match registry.read_state().await {
            Ok(verified)
                if verified.active_device.as_deref() == Some(me)
                    && verified.last_modified >= prev_last_modified =>
            {
                self.enter_leader()
            }
            Ok(verified) => {
                debug!(
                    winner = verified.active_device.as_deref().unwrap_or("<none>"),
                    "lost candidation race"
                );
                self.enter_standby()
            }
            Err(e) => {
                warn!(error = %e, "candidation verify failed");
                self.enter_standby()
            }
        }
    }

    /// Refreshes the active heartbeat in the state record. Returns false
    /// when we are no longer the recorded leader (the caller's next tick
    /// will demote us).
    pub async fn heartbeat(&self) -> Result<bool, BridgeError> {
        let Some(registry) = &self.registry else {
            return Ok(true);
        };
        let me = registry.identity().name.as_str();
        let mut state = registry.read_state().await?;
        if state.active_device.as_deref() != Some(me) {
            return Ok(false);
        }
        let now = now_millis();
        state.active_device_heartbeat = now;
        state.last_modified = now;
        state.modified_by = me.to_string();
        registry.write_state(&state).await?;
        Ok(true)
    }

    fn enter_leader(&mut self) -> TickOutcome {
        if self.role == Role::Leader {
            return TickOutcome::Unchanged;
        }
        self.role = Role::Leader;
        self.became_active_at = Some(now_millis() / 1000);
        info!("now ACTIVE");
        TickOutcome::BecameLeader
    }

    fn enter_standby(&mut self) -> TickOutcome {
        if self.role == Role::Standby {
            return TickOutcome::Unchanged;
        }
        self.role = Role::Standby;
        self.became_active_at = None;
        TickOutcome::LostLeadership
    }
}
