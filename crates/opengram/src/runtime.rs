// SPDX-FileCopyrightText: 2026 Opengram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Wiring: configuration, coordinator, transport, agent, and the two
//! long-lived loops.
//!
//! Exit codes: 0 on normal shutdown, 1 for startup failures (missing
//! config, invalid token, unreachable store with fallback disabled).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use opengram_agent::client::AgentClient;
use opengram_agent::diffview::DiffViewerClient;
use opengram_agent::transcribe::TranscriptionClient;
use opengram_config::BridgeConfig;
use opengram_coordinator::registry::{DeviceIdentity, LeaderRegistry};
use opengram_coordinator::store::FsStore;
use opengram_coordinator::{detect_hostname, device_id, Election, ElectionConfig};
use opengram_core::messenger::Messenger;
use opengram_core::pending::PendingRegistry;
use opengram_core::types::SessionInfo;
use opengram_core::BridgeError;
use opengram_router::ingest::IngestConfig;
use opengram_router::{IngestLoop, Router, RouterConfig};
use opengram_stream::Projector;
use opengram_telegram::{ProxyClient, TelegramTransport};

use crate::shutdown;

/// Name of the app directory inside the shared store root.
const APP_NAME: &str = "opengram";

/// Default agent server address when `OPENCODE_URL` is unset.
const DEFAULT_AGENT_URL: &str = "http://127.0.0.1:4096";

/// Bot command menu published at startup.
const COMMANDS: &[(&str, &str)] = &[
    ("connect", "Show the agent URL"),
    ("version", "Show the bridge version"),
    ("model", "Show, list, or set the model"),
    ("interrupt", "Kill tracked processes or abort the turn"),
    ("plan", "Switch the agent to plan mode"),
    ("build", "Switch the agent to build mode"),
    ("review", "Review a commit, branch, or PR"),
    ("rename", "Rename the session and topic"),
    ("cap", "Run a shell command and capture output"),
    ("ps", "List tracked processes"),
    ("dev", "List registered devices"),
    ("use", "Force-activate a device"),
    ("stop", "Stop a non-active device"),
    ("restart", "Restart via the external helper"),
    ("upgrade", "Upgrade via the external helper"),
    ("start", "Start an instance in another directory"),
];

/// Loads configuration and runs the bridge to completion. Returns the
/// process exit code.
pub async fn run(directory: Option<PathBuf>, session_id: Option<String>) -> i32 {
    let working_dir = match resolve_working_dir(directory) {
        Ok(dir) => dir,
        Err(e) => {
            error!(error = %e, "cannot resolve working directory");
            return 1;
        }
    };

    let config = match opengram_config::load(&working_dir) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "configuration error");
            return 1;
        }
    };

    match bootstrap(config, session_id).await {
        Ok(()) => 0,
        Err(e) if e.is_startup_fatal() => {
            error!(error = %e, "startup failed");
            1
        }
        Err(e) => {
            error!(error = %e, "bridge stopped");
            1
        }
    }
}

fn resolve_working_dir(directory: Option<PathBuf>) -> std::io::Result<PathBuf> {
    let dir = match directory {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };
    dir.canonicalize()
}

async fn bootstrap(config: BridgeConfig, session_id: Option<String>) -> Result<(), BridgeError> {
    let transport = Arc::new(TelegramTransport::new(
        &config.bot_token,
        config.send_url.as_deref(),
    )?);
    // Invalid tokens fail here, before any loop starts.
    transport.check_auth().await?;
    if let Err(e) = transport.set_commands(COMMANDS).await {
        warn!(error = %e, "failed to publish command menu");
    }

    let messenger: Arc<dyn Messenger> = transport.clone();

    let agent_url = config
        .agent_url
        .clone()
        .unwrap_or_else(|| DEFAULT_AGENT_URL.to_string());
    let agent = Arc::new(AgentClient::new(&agent_url)?);

    let (registry, election) = build_coordinator(&config).await;

    let pending = Arc::new(PendingRegistry::new());
    let transcriber = config
        .openai_api_key
        .clone()
        .map(|key| Arc::new(TranscriptionClient::new(key)));
    let diff_viewer = config.diff_viewer_url.clone().map(DiffViewerClient::new);

    let router = Arc::new(Router::new(
        Arc::clone(&messenger),
        Arc::clone(&agent),
        Arc::clone(&pending),
        registry.clone(),
        transcriber,
        RouterConfig {
            chat_id: config.chat_id,
            thread_id: config.thread_id,
            version: env!("CARGO_PKG_VERSION").to_string(),
            working_dir: config.working_dir.clone(),
        },
    ));
    if let Some(id) = session_id {
        info!(session_id = %id, "adopting existing session");
        router.adopt_session(SessionInfo::new(id)).await;
    }

    let cancel = shutdown::install_signal_handler();

    // Event consumer: agent events -> streaming projector.
    let mut projector = Projector::new(
        Arc::clone(&messenger),
        Arc::clone(&agent),
        Arc::clone(&pending),
        diff_viewer,
        config.chat_id,
        config.thread_id,
    );
    let mut events = agent.spawn_event_stream(cancel.clone());
    let consumer_cancel = cancel.clone();
    let consumer = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = consumer_cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => projector.handle_event(event).await,
                    None => break,
                },
            }
        }
        info!("event consumer stopped");
    });

    // Ingest loop: election, heartbeats, polling, routing.
    let proxy = match &config.updates_url {
        Some(url) => Some(ProxyClient::new(url)?),
        None => None,
    };
    let ingest = IngestLoop::new(
        election,
        registry,
        Arc::clone(&transport),
        proxy,
        Arc::clone(&router),
        IngestConfig {
            chat_id: config.chat_id,
            thread_id: config.thread_id,
        },
        cancel.clone(),
    );
    let ingest_handle = tokio::spawn(ingest.run());

    cancel.cancelled().await;
    info!("shutting down");
    let drain = async {
        let _ = ingest_handle.await;
        let _ = consumer.await;
    };
    if tokio::time::timeout(Duration::from_secs(5), drain).await.is_err() {
        warn!("loops did not drain in time, exiting anyway");
    }
    Ok(())
}

/// Opens the shared store and initializes the device registry, degrading
/// to single-instance mode when the store root is missing or
/// coordination is disabled.
async fn build_coordinator(
    config: &BridgeConfig,
) -> (Option<Arc<LeaderRegistry>>, Election) {
    if !config.coordinator_enabled {
        info!("coordinator disabled, this instance is permanently active");
        return (None, Election::permanent_leader());
    }

    let store_root = config
        .store_root
        .clone()
        .unwrap_or_else(default_store_root);

    let store = match FsStore::open(&store_root, APP_NAME).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            warn!(error = %e, "shared store unavailable, single-instance mode");
            return (None, Election::permanent_leader());
        }
    };

    let hostname = detect_hostname().await;
    let identity = DeviceIdentity {
        name: device_id(
            config.device_prefix.as_deref(),
            &hostname,
            &config.working_dir,
        ),
        thread_id: config.thread_id,
        hostname,
        directory: config.working_dir.display().to_string(),
        pid: std::process::id(),
    };
    info!(device = %identity.name, "joining coordination store");

    let registry = Arc::new(LeaderRegistry::new(store, identity));
    if let Err(e) = registry.init().await {
        warn!(error = %e, "registry init failed, single-instance mode");
        return (None, Election::permanent_leader());
    }

    let election = Election::new(Arc::clone(&registry), ElectionConfig::default());
    (Some(registry), election)
}

/// The iCloud Drive container, the default replicated folder on macOS.
fn default_store_root() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join("Library/Mobile Documents/com~apple~CloudDocs"))
        .unwrap_or_else(|| PathBuf::from("/nonexistent"))
}
