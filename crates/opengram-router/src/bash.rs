// SPDX-FileCopyrightText: 2026 Opengram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tracked bash captures for `/cap`, `/ps`, and `/interrupt`.
//!
//! Each capture runs `bash -lc <command>` with collected stdout and
//! stderr and a three-minute hard kill. Running captures are tracked by
//! pid so `/interrupt` can target them and `/ps` can report them.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Hard kill for `/cap` commands.
const CAPTURE_TIMEOUT: Duration = Duration::from_secs(180);

/// A running tracked process.
#[derive(Debug, Clone)]
pub struct TrackedProcess {
    pub pid: u32,
    pub command: String,
    pub started: Instant,
}

/// Registry of in-flight bash captures.
#[derive(Default)]
pub struct BashTracker {
    procs: Mutex<HashMap<u32, TrackedProcess>>,
}

impl BashTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs a command and returns its collected output, killing it after
    /// three minutes.
    pub async fn capture(&self, command: &str, dir: &Path) -> String {
        self.capture_with_timeout(command, dir, CAPTURE_TIMEOUT).await
    }

    pub(crate) async fn capture_with_timeout(
        &self,
        command: &str,
        dir: &Path,
        timeout: Duration,
    ) -> String {
        let child = Command::new("bash")
            .arg("-lc")
            .arg(command)
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) => return format!("Failed to spawn: {e}"),
        };
        let pid = child.id().unwrap_or(0);
        self.procs.lock().await.insert(
            pid,
            TrackedProcess {
                pid,
                command: command.to_string(),
                started: Instant::now(),
            },
        );
        debug!(pid, command, "bash capture started");

        let result = tokio::time::timeout(timeout, child.wait_with_output()).await;
        self.procs.lock().await.remove(&pid);

        match result {
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let stderr = String::from_utf8_lossy(&output.stderr);

                let mut text = String::new();
                if !stdout.trim().is_empty() {
                    text.push_str(stdout.trim_end());
                }
                if !stderr.trim().is_empty() {
                    if !text.is_empty() {
                        text.push('\n');
                    }
                    text.push_str("stderr:\n");
                    text.push_str(stderr.trim_end());
                }
                if text.is_empty() {
                    text.push_str("(no output)");
                }
                if !output.status.success() {
                    text.push_str(&format!("\nexit: {}", output.status));
                }
                text
            }
            Ok(Err(e)) => format!("Capture failed: {e}"),
            Err(_) => format!("Killed after {}s timeout.", timeout.as_secs()),
        }
    }

    /// Currently running captures, ordered by pid.
    pub async fn list(&self) -> Vec<TrackedProcess> {
        let mut procs: Vec<TrackedProcess> = self.procs.lock().await.values().cloned().collect();
        procs.sort_by_key(|p| p.pid);
        procs
    }

    /// Kills one tracked process. Returns false when the pid is not ours.
    pub async fn kill(&self, pid: u32) -> bool {
        if !self.procs.lock().await.contains_key(&pid) {
            return false;
        }
        kill_pid(pid).await;
        true
    }

    /// Kills every tracked process, returning how many were signalled.
    pub async fn kill_all(&self) -> usize {
        let pids: Vec<u32> = self.procs.lock().await.keys().copied().collect();
        for pid in &pids {
            kill_pid(*pid).await;
        }
        pids.len()
    }
}

/// Signals a process by pid. Best-effort.
pub async fn kill_pid(pid: u32) {
    match Command::new("kill")
        .arg("-KILL")
        .arg(pid.to_string())
        .status()
        .await
    {
        Ok(status) if status.success() => debug!(pid, "killed process"),
        Ok(status) => warn!(pid, %status, "kill returned non-zero"),
        Err(e) => warn!(pid, error = %e, "failed to run kill"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn capture_collects_stdout_and_stderr() {
        let tracker = BashTracker::new();
        let dir = tempfile::tempdir().unwrap();
        let output = tracker
            .capture("echo out; echo err >&2", dir.path())
            .await;
        assert!(output.contains("out"));
        assert!(output.contains("stderr:\nerr"));
    }

    #[tokio::test]
    async fn capture_reports_exit_status() {
        let tracker = BashTracker::new();
        let dir = tempfile::tempdir().unwrap();
        let output = tracker.capture("exit 3", dir.path()).await;
        assert!(output.contains("(no output)"));
        assert!(output.contains("exit:"));
    }

    #[tokio::test]
    async fn capture_times_out_and_kills() {
        let tracker = BashTracker::new();
        let dir = tempfile::tempdir().unwrap();
        let output = tracker
            .capture_with_timeout("sleep 30", dir.path(), Duration::from_millis(200))
            .await;
        assert!(output.contains("Killed after"), "got: {output}");
        assert!(tracker.list().await.is_empty(), "process untracked after kill");
    }

    #[tokio::test]
    async fn running_captures_appear_in_list() {
        let tracker = std::sync::Arc::new(BashTracker::new());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_path_buf();

        let bg = std::sync::Arc::clone(&tracker);
        let handle = tokio::spawn(async move {
            bg.capture_with_timeout("sleep 2", &path, Duration::from_secs(5))
                .await
        });

        tokio::time::sleep(Duration::from_millis(300)).await;
        let running = tracker.list().await;
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].command, "sleep 2");

        assert_eq!(tracker.kill_all().await, 1);
        let _ = handle.await;
        assert!(tracker.list().await.is_empty());
    }
}
