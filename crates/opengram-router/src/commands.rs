// SPDX-FileCopyrightText: 2026 Opengram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Message classification and the slash-command table.
//!
//! Order matters: an outstanding freetext question claims the text first,
//! then any pending prompts are cancelled, then the single-character abort,
//! then recognised slash commands. Everything else (unknown verbs
//! included) becomes a prompt submission.

use tracing::{info, warn};

use opengram_core::pending::PermissionChoice;
use opengram_core::types::{IncomingMessage, ModelRef, ThreadKey};

use crate::vcs;
use crate::Router;

impl Router {
    /// Entry point for a filtered incoming message.
    pub async fn handle_message(&self, msg: IncomingMessage) {
        let key = msg.key();
        let text = msg.effective_text().map(str::to_owned);

        // 1. An outstanding freetext question claims any plain text.
        if self.pending.awaiting_freetext(key).await.is_some() {
            if let Some(answer) = text.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
                self.answer_freetext(key, answer.to_string()).await;
                return;
            }
        }

        // 2. Any other pending prompt is cancelled by a new message, which
        // is then processed normally.
        self.cancel_pending(key).await;

        let trimmed = text.as_deref().map(str::trim).unwrap_or("");

        // 3. Single-character abort.
        if trimmed.eq_ignore_ascii_case("x") {
            self.abort_turn(key).await;
            return;
        }

        // 4. Slash commands.
        if trimmed.starts_with('/') && self.dispatch_command(key, trimmed).await {
            return;
        }

        // 5. Prompt submission.
        self.submit_prompt(key, &msg).await;
    }

    /// Cancels pending question/permission prompts on `key`.
    pub(crate) async fn cancel_pending(&self, key: ThreadKey) {
        let (question, permission) = self.pending.take_all(key).await;
        if let Some(question) = question {
            info!(request_id = %question.request_id, "cancelling pending question");
            if let Err(e) = self.agent.reject_question(&question.request_id).await {
                warn!(error = %e, "question reject failed");
            }
        }
        if let Some(permission) = permission {
            info!(request_id = %permission.request_id, "auto-rejecting pending permission");
            if let Err(e) = self
                .agent
                .reply_permission(&permission.request_id, PermissionChoice::Reject)
                .await
            {
                warn!(error = %e, "permission reject failed");
            }
            let text = opengram_core::pending::permission_decided_text(
                &permission.permission,
                &permission.patterns,
                "Dismissed",
            );
            let _ = self
                .messenger
                .edit(key.chat_id, permission.message_id, &text, None)
                .await;
        }
    }

    async fn abort_turn(&self, key: ThreadKey) {
        match self.current_session().await {
            Some(session) => {
                if let Err(e) = self.agent.abort(&session.id).await {
                    warn!(error = %e, "abort failed");
                    self.reply(key, "Failed to abort the current turn.").await;
                }
            }
            None => self.reply(key, "No active session.").await,
        }
    }

    /// Executes a recognised slash command. Returns false for unknown
    /// verbs, which then fall through to prompt submission.
    async fn dispatch_command(&self, key: ThreadKey, line: &str) -> bool {
        let (verb, args) = match line.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (line, ""),
        };
        // Telegram appends @botname in group command menus.
        let verb = verb.split('@').next().unwrap_or(verb);

        match verb {
            "/connect" => {
                self.reply(key, self.agent.base_url()).await;
            }
            "/version" => {
                self.reply(key, &format!("opengram {}", self.config.version))
                    .await;
            }
            "/model" => self.cmd_model(key, args).await,
            "/interrupt" => self.cmd_interrupt(key, args).await,
            "/plan" | "/build" | "/review" => {
                self.cmd_agent_command(key, verb.trim_start_matches('/'), args)
                    .await;
            }
            "/rename" => self.cmd_rename(key, args).await,
            "/cap" => self.cmd_cap(key, args).await,
            "/ps" => self.cmd_ps(key).await,
            "/dev" => self.cmd_devices(key).await,
            "/use" => self.cmd_use(key, args).await,
            "/stop" => self.cmd_stop(key, args).await,
            "/restart" => self.cmd_helper(key, "opengram-restart").await,
            "/upgrade" => self.cmd_helper(key, "opengram-upgrade").await,
            "/start" => self.cmd_start(key, args).await,
            _ => return false,
        }
        true
    }

    async fn cmd_model(&self, key: ThreadKey, args: &str) {
        match args {
            "" => {
                let current = self
                    .current_session()
                    .await
                    .and_then(|s| s.selected_model)
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| "default (no override)".to_string());
                self.reply(key, &format!("Model: {current}")).await;
            }
            "list" => match self.agent.list_models().await {
                Ok(models) if !models.is_empty() => {
                    let lines: Vec<String> = models
                        .iter()
                        .enumerate()
                        .map(|(i, m)| format!("{}. {m}", i + 1))
                        .collect();
                    self.reply(key, &lines.join("\n")).await;
                }
                Ok(_) => self.reply(key, "The agent reports no models.").await,
                Err(e) => {
                    warn!(error = %e, "model list failed");
                    self.reply(key, "Failed to fetch models.").await;
                }
            },
            "reset" => {
                if let Some(session) = self.session.lock().await.as_mut() {
                    session.selected_model = None;
                }
                self.reply(key, "Model override cleared.").await;
            }
            selector => match ModelRef::parse(selector) {
                Some(model) => {
                    let mut guard = self.session.lock().await;
                    match guard.as_mut() {
                        Some(session) => {
                            session.selected_model = Some(model.clone());
                            drop(guard);
                            self.reply(key, &format!("Model set to {model}.")).await;
                        }
                        None => {
                            drop(guard);
                            self.reply(key, "No session yet; send a prompt first.").await;
                        }
                    }
                }
                None => {
                    self.reply(key, "Usage: /model [list|reset|<provider>/<model>]")
                        .await;
                }
            },
        }
    }

    async fn cmd_interrupt(&self, key: ThreadKey, args: &str) {
        if !args.is_empty() {
            match args.parse::<u32>() {
                Ok(pid) => {
                    if self.bash.kill(pid).await {
                        self.reply(key, &format!("Killed {pid}.")).await;
                    } else {
                        self.reply(key, &format!("{pid} is not a tracked process."))
                            .await;
                    }
                }
                Err(_) => self.reply(key, "Usage: /interrupt [pid]").await,
            }
            return;
        }

        let killed = self.bash.kill_all().await;
        if killed > 0 {
            self.reply(key, &format!("Killed {killed} tracked process(es)."))
                .await;
        } else {
            self.abort_turn(key).await;
        }
    }

    async fn cmd_agent_command(&self, key: ThreadKey, command: &str, args: &str) {
        let session = match self.ensure_session().await {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "session creation failed");
                self.reply(key, "Failed to reach the agent.").await;
                return;
            }
        };
        if let Err(e) = self.agent.command(&session.id, command, args).await {
            warn!(error = %e, command, "agent command failed");
            self.reply(key, &format!("/{command} failed.")).await;
        }
    }

    async fn cmd_rename(&self, key: ThreadKey, args: &str) {
        if args.is_empty() {
            self.reply(key, "Usage: /rename <title>").await;
            return;
        }
        let session = match self.current_session().await {
            Some(session) => session,
            None => {
                self.reply(key, "No active session.").await;
                return;
            }
        };
        if let Err(e) = self.agent.rename_session(&session.id, args).await {
            warn!(error = %e, "session rename failed");
        }
        if let Some(thread) = key.thread_id.or(self.config.thread_id) {
            if let Err(e) = self.messenger.rename_topic(key.chat_id, thread, args).await {
                warn!(error = %e, "topic rename failed");
            }
        }
        if let Some(session) = self.session.lock().await.as_mut() {
            session.title_known = true;
        }
        self.reply(key, &format!("Renamed to: {args}")).await;
    }

    async fn cmd_cap(&self, key: ThreadKey, args: &str) {
        if args.is_empty() {
            self.reply(key, "Usage: /cap <command>").await;
            return;
        }
        let output = self.bash.capture(args, &self.config.working_dir).await;
        self.reply(key, &format!("$ {args}\n{output}")).await;
    }

    async fn cmd_ps(&self, key: ThreadKey) {
        let procs = self.bash.list().await;
        if procs.is_empty() {
            self.reply(key, "No tracked processes.").await;
            return;
        }
        let lines: Vec<String> = procs
            .iter()
            .map(|p| {
                format!(
                    "{} ({}s): {}",
                    p.pid,
                    p.started.elapsed().as_secs(),
                    p.command
                )
            })
            .collect();
        self.reply(key, &lines.join("\n")).await;
    }

    async fn cmd_devices(&self, key: ThreadKey) {
        let Some(registry) = &self.registry else {
            self.reply(key, "Coordination store unavailable.").await;
            return;
        };
        match registry.list_devices().await {
            Ok(devices) if !devices.is_empty() => {
                let now = opengram_coordinator::now_millis();
                let lines: Vec<String> = devices
                    .iter()
                    .map(|d| {
                        let age_secs = (now - d.record.last_seen).max(0) / 1000;
                        format!(
                            "{}. {}{} — seen {}s ago",
                            d.index,
                            d.record.name,
                            if d.active { " [ACTIVE]" } else { "" },
                            age_secs,
                        )
                    })
                    .collect();
                self.reply(key, &lines.join("\n")).await;
            }
            Ok(_) => self.reply(key, "No devices registered.").await,
            Err(e) => {
                warn!(error = %e, "device listing failed");
                self.reply(key, "Failed to list devices.").await;
            }
        }
    }

    async fn cmd_use(&self, key: ThreadKey, args: &str) {
        let Some(registry) = &self.registry else {
            self.reply(key, "Coordination store unavailable.").await;
            return;
        };
        if args.is_empty() {
            self.reply(key, "Usage: /use <number|name>").await;
            return;
        }
        match registry.resolve_device(args).await {
            Ok(Some(device)) => {
                match registry.force_activate(&device.record.name).await {
                    Ok(()) => {
                        self.reply(key, &format!("Activation handed to {}.", device.record.name))
                            .await;
                    }
                    Err(e) => {
                        warn!(error = %e, "forced activation failed");
                        self.reply(key, "Failed to write activation.").await;
                    }
                }
            }
            Ok(None) => self.reply(key, &format!("No device matches {args:?}.")).await,
            Err(e) => {
                warn!(error = %e, "device resolution failed");
                self.reply(key, "Failed to list devices.").await;
            }
        }
    }

    async fn cmd_stop(&self, key: ThreadKey, args: &str) {
        let Some(registry) = &self.registry else {
            self.reply(key, "Coordination store unavailable.").await;
            return;
        };
        if args.is_empty() {
            self.reply(key, "Usage: /stop <number|name>").await;
            return;
        }
        match registry.resolve_device(args).await {
            Ok(Some(device)) => {
                if device.active {
                    self.reply(key, "Refusing to stop the active device; /use another first.")
                        .await;
                    return;
                }
                if let Err(e) = registry.remove_device(&device.record.name).await {
                    warn!(error = %e, "device removal failed");
                    self.reply(key, "Failed to remove the device record.").await;
                    return;
                }
                // Killing only works when the device ran on this host.
                if device.record.hostname == registry.identity().hostname {
                    crate::bash::kill_pid(device.record.pid).await;
                }
                self.reply(key, &format!("Stopped {}.", device.record.name))
                    .await;
            }
            Ok(None) => self.reply(key, &format!("No device matches {args:?}.")).await,
            Err(e) => {
                warn!(error = %e, "device resolution failed");
                self.reply(key, "Failed to list devices.").await;
            }
        }
    }

    /// `/restart` and `/upgrade` delegate to external helper commands.
    async fn cmd_helper(&self, key: ThreadKey, helper: &str) {
        match tokio::process::Command::new(helper)
            .current_dir(&self.config.working_dir)
            .spawn()
        {
            Ok(_) => self.reply(key, &format!("{helper} invoked.")).await,
            Err(e) => {
                warn!(error = %e, helper, "helper spawn failed");
                self.reply(key, &format!("Failed to invoke {helper}: {e}"))
                    .await;
            }
        }
    }

    /// `/start <dir>`: launch a sibling instance in another directory.
    async fn cmd_start(&self, key: ThreadKey, args: &str) {
        if args.is_empty() {
            self.reply(key, "Usage: /start <directory>").await;
            return;
        }
        let exe = match std::env::current_exe() {
            Ok(exe) => exe,
            Err(e) => {
                self.reply(key, &format!("Cannot locate binary: {e}")).await;
                return;
            }
        };
        match tokio::process::Command::new(exe).arg(args).spawn() {
            Ok(child) => {
                info!(directory = args, pid = child.id().unwrap_or(0), "sibling started");
                self.reply(key, &format!("Started an instance in {args}.")).await;
            }
            Err(e) => {
                self.reply(key, &format!("Failed to start: {e}")).await;
            }
        }
    }

    /// Posts the one-line promotion notification.
    pub async fn announce_active(&self, device_name: &str) {
        let key = ThreadKey::new(self.config.chat_id, self.config.thread_id);
        let commit = vcs::commit_summary(&self.config.working_dir).await;
        self.reply(key, &format!("now ACTIVE: {device_name} ({commit})"))
            .await;
    }

    /// Posts the aggregate foreign-chat warning.
    pub async fn announce_foreign_chats(&self, total: usize, recent: &[i64]) {
        let key = ThreadKey::new(self.config.chat_id, self.config.thread_id);
        self.reply(key, &crate::ingest::foreign_warning(total, recent))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use opengram_agent::client::AgentClient;
    use opengram_core::messenger::Messenger;
    use opengram_core::pending::{PendingPermission, PendingRegistry};
    use opengram_core::types::IncomingMessage;
    use opengram_test_utils::MockMessenger;

    use crate::{Router, RouterConfig};

    /// An agent URL nothing listens on: calls fail fast with a
    /// connection error, which the router logs and degrades around.
    const DEAD_AGENT: &str = "http://127.0.0.1:9";

    fn router(messenger: &Arc<MockMessenger>) -> Router {
        Router::new(
            Arc::clone(messenger) as Arc<dyn Messenger>,
            Arc::new(AgentClient::new(DEAD_AGENT).unwrap()),
            Arc::new(PendingRegistry::new()),
            None,
            None,
            RouterConfig {
                chat_id: -100,
                thread_id: Some(7),
                version: "0.1.0-test".into(),
                working_dir: std::env::temp_dir(),
            },
        )
    }

    fn text_msg(text: &str) -> IncomingMessage {
        IncomingMessage {
            update_id: 1,
            chat_id: -100,
            thread_id: Some(7),
            message_id: 10,
            date: 1_700_000_000,
            from_is_bot: false,
            text: Some(text.to_string()),
            caption: None,
            photo: None,
            voice: None,
            has_video: false,
        }
    }

    #[tokio::test]
    async fn version_command_replies_with_version() {
        let messenger = Arc::new(MockMessenger::new());
        let r = router(&messenger);

        r.handle_message(text_msg("/version")).await;
        let sent = messenger.last_send().await.unwrap();
        assert!(sent.text.contains("0.1.0-test"));
        assert_eq!(sent.dest.thread_id, Some(7));
    }

    #[tokio::test]
    async fn connect_echoes_agent_url() {
        let messenger = Arc::new(MockMessenger::new());
        let r = router(&messenger);

        r.handle_message(text_msg("/connect")).await;
        assert_eq!(messenger.last_send().await.unwrap().text, DEAD_AGENT);
    }

    #[tokio::test]
    async fn unknown_verbs_fall_through_to_prompt_submission() {
        let messenger = Arc::new(MockMessenger::new());
        let r = router(&messenger);

        r.handle_message(text_msg("/definitely-not-a-command")).await;
        // Prompt submission needs a session; the dead agent makes that
        // fail, which proves the text was NOT swallowed as a command.
        assert_eq!(
            messenger.last_send().await.unwrap().text,
            "Failed to reach the agent."
        );
    }

    #[tokio::test]
    async fn single_x_without_session_reports_it() {
        let messenger = Arc::new(MockMessenger::new());
        let r = router(&messenger);

        r.handle_message(text_msg("x")).await;
        assert_eq!(messenger.last_send().await.unwrap().text, "No active session.");

        // Case-insensitive.
        r.handle_message(text_msg("X")).await;
        assert_eq!(messenger.send_count().await, 2);
    }

    #[tokio::test]
    async fn video_messages_are_rejected() {
        let messenger = Arc::new(MockMessenger::new());
        let r = router(&messenger);

        let mut msg = text_msg("look at this");
        msg.has_video = true;
        r.handle_message(msg).await;
        assert_eq!(
            messenger.last_send().await.unwrap().text,
            "Video messages are not supported."
        );
    }

    #[tokio::test]
    async fn cap_runs_and_reports_output() {
        let messenger = Arc::new(MockMessenger::new());
        let r = router(&messenger);

        r.handle_message(text_msg("/cap echo hello-from-cap")).await;
        let sent = messenger.last_send().await.unwrap();
        assert!(sent.text.starts_with("$ echo hello-from-cap"));
        assert!(sent.text.contains("hello-from-cap"));
    }

    #[tokio::test]
    async fn ps_with_nothing_running_says_so() {
        let messenger = Arc::new(MockMessenger::new());
        let r = router(&messenger);

        r.handle_message(text_msg("/ps")).await;
        assert_eq!(
            messenger.last_send().await.unwrap().text,
            "No tracked processes."
        );
    }

    #[tokio::test]
    async fn dev_without_store_reports_unavailable() {
        let messenger = Arc::new(MockMessenger::new());
        let r = router(&messenger);

        r.handle_message(text_msg("/dev")).await;
        assert_eq!(
            messenger.last_send().await.unwrap().text,
            "Coordination store unavailable."
        );
    }

    #[tokio::test]
    async fn dev_with_store_lists_numbered_devices() {
        use opengram_coordinator::registry::{DeviceIdentity, LeaderRegistry};
        use opengram_coordinator::store::FsStore;

        let root = tempfile::tempdir().unwrap();
        let store = Arc::new(FsStore::open(root.path(), "opengram").await.unwrap());
        let registry = Arc::new(LeaderRegistry::new(
            store,
            DeviceIdentity {
                name: "mbp:/work".into(),
                thread_id: None,
                hostname: "mbp".into(),
                directory: "/work".into(),
                pid: 1,
            },
        ));
        registry.init().await.unwrap();

        let messenger = Arc::new(MockMessenger::new());
        let r = Router::new(
            Arc::clone(&messenger) as Arc<dyn Messenger>,
            Arc::new(AgentClient::new(DEAD_AGENT).unwrap()),
            Arc::new(PendingRegistry::new()),
            Some(registry),
            None,
            RouterConfig {
                chat_id: -100,
                thread_id: None,
                version: "t".into(),
                working_dir: std::env::temp_dir(),
            },
        );

        r.handle_message(text_msg("/dev")).await;
        let sent = messenger.last_send().await.unwrap();
        assert!(sent.text.starts_with("1. mbp:/work"));
    }

    #[tokio::test]
    async fn model_without_session_shows_default() {
        let messenger = Arc::new(MockMessenger::new());
        let r = router(&messenger);

        r.handle_message(text_msg("/model")).await;
        assert!(messenger
            .last_send()
            .await
            .unwrap()
            .text
            .contains("default (no override)"));
    }

    #[tokio::test]
    async fn model_usage_on_garbage() {
        let messenger = Arc::new(MockMessenger::new());
        let r = router(&messenger);

        r.handle_message(text_msg("/model not-a-model-spec")).await;
        assert!(messenger.last_send().await.unwrap().text.starts_with("Usage:"));
    }

    #[tokio::test]
    async fn new_message_dismisses_pending_permission() {
        let messenger = Arc::new(MockMessenger::new());
        let r = router(&messenger);

        let key = text_msg("any").key();
        r.pending
            .put_permission(PendingPermission {
                request_id: "perm-1".into(),
                key,
                permission: "bash".into(),
                patterns: vec![],
                message_id: 42,
            })
            .await;

        r.handle_message(text_msg("/version")).await;

        let edit = messenger.last_edit().await.unwrap();
        assert_eq!(edit.message_id, 42);
        assert!(edit.text.contains("Dismissed"));
        assert_eq!(r.pending.pending_count(key).await, 0);

        // The message itself was still processed afterwards.
        assert!(messenger.last_send().await.unwrap().text.contains("0.1.0-test"));
    }
}
