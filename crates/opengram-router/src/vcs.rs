// SPDX-FileCopyrightText: 2026 Opengram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! One-line commit summary for the "now ACTIVE" notification.
//!
//! Tries git first, then jj, then gives up; the bridge works fine in
//! directories under neither.

use std::path::Path;

use tokio::process::Command;

/// `<short-hash> <subject>` of the current commit, or a placeholder.
pub async fn commit_summary(dir: &Path) -> String {
    if let Some(line) = run(dir, "git", &["log", "-1", "--format=%h %s"]).await {
        return line;
    }
    if let Some(line) = run(
        dir,
        "jj",
        &[
            "log",
            "--no-graph",
            "-r",
            "@",
            "-T",
            r#"commit_id.short() ++ " " ++ description.first_line()"#,
        ],
    )
    .await
    {
        return line;
    }
    "no commit info".to_string()
}

async fn run(dir: &Path, program: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(program)
        .args(args)
        .current_dir(dir)
        .output()
        .await
        .ok()
        .filter(|o| o.status.success())?;

    let text = String::from_utf8_lossy(&output.stdout);
    let line = text.lines().next()?.trim();
    if line.is_empty() {
        return None;
    }
    Some(line.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn falls_back_outside_any_repository() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(commit_summary(dir.path()).await, "no commit info");
    }
}
