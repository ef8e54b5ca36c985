// SPDX-FileCopyrightText: 2026 Opengram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! opengram: a per-session bridge between a local coding agent and a
//! Telegram forum chat.
//!
//! Binds one working directory to one chat (optionally one topic),
//! streams the agent's output to Telegram with live message editing, and
//! forwards user text, photos, voice, and button presses back as prompts
//! and decisions. Multiple instances coordinate through a shared
//! filesystem so exactly one is active at a time.

mod runtime;
mod shutdown;

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Per-session Telegram bridge for a local coding agent.
#[derive(Parser, Debug)]
#[command(name = "opengram", version, about, long_about = None)]
struct Cli {
    /// Working directory to bind this instance to (defaults to the
    /// current directory).
    directory: Option<PathBuf>,

    /// Existing agent session id to adopt instead of creating one.
    session_id: Option<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let code = runtime::run(cli.directory, cli.session_id).await;
    std::process::exit(code);
}
