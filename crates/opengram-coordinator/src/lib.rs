// SPDX-FileCopyrightText: 2026 Opengram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Multi-instance coordination over a replicated filesystem.
//!
//! Several bridge instances (across one or more machines) share a store
//! directory synced by something like iCloud Drive. This crate elects
//! exactly one active instance, fails over automatically when the leader
//! dies, and maintains the device registry the `/dev`, `/use`, and `/stop`
//! commands operate on. There is no true locking: election is optimistic
//! write-then-verify, and correctness leans on Telegram's monotonic update
//! ids to make transient double-leaders harmless.

pub mod election;
pub mod records;
pub mod registry;
pub mod store;
pub mod timers;

pub use election::{Election, ElectionConfig, Role, TickOutcome};
pub use records::{
    detect_hostname, device_id, now_millis, sanitize_device_id, DeviceRecord, StateRecord,
};
pub use registry::{DeviceEntry, DeviceIdentity, LeaderRegistry, DEVICES_DIR, STATE_FILE};
pub use store::{FsStore, SharedStore};
pub use timers::{JitterTimer, TimerKind, TimerSet};
