// SPDX-FileCopyrightText: 2026 Opengram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Layered configuration for the opengram bridge.
//!
//! JSON config files (home, then working directory) with `TELEGRAM_*`
//! environment overrides; ambient toggles from the environment.

pub mod loader;
pub mod model;

pub use loader::{ambient_toggles, load};
pub use model::{AmbientToggles, BridgeConfig, RawConfig};
