//! Inbox notifications
//!
//! Appends to the daily markdown inbox (`~/.notes/inbox/YYYY-MM-DD.md`) in the
//! format inbox-mcp reads, so manual repair steps reach the user even when
//! nothing is watching the event stream.

use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::Local;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::types::{Fix, FixResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Normal,
    High,
}

impl Priority {
    fn to_markdown(self) -> &'static str {
        match self {
            Priority::Normal => "",
            Priority::High => "*[HIGH]*",
        }
    }
}

#[derive(Debug, Clone)]
pub struct InboxNotifier {
    dir: PathBuf,
}

impl InboxNotifier {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Inbox directory: explicit path, else `INBOX_PATH`, else `~/.notes/inbox`
    pub fn resolve(explicit: Option<PathBuf>) -> Self {
        let dir = explicit
            .or_else(|| std::env::var("INBOX_PATH").ok().map(PathBuf::from))
            .unwrap_or_else(|| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join(".notes")
                    .join("inbox")
            });
        Self::new(dir)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn send(&self, message: &str, priority: Priority, tags: &[&str]) -> Result<()> {
        fs::create_dir_all(&self.dir).await?;

        let now = Local::now();
        let file_path = self.dir.join(format!("{}.md", now.format("%Y-%m-%d")));

        let tags = tags
            .iter()
            .map(|t| format!("#{}", t))
            .collect::<Vec<_>>()
            .join(" ");
        let header = format!(
            "## {} [mcp-doctor] {} {}",
            now.format("%Y-%m-%d %H:%M:%S"),
            tags,
            priority.to_markdown()
        )
        .trim()
        .to_string();

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&file_path)
            .await?;

        let entry = if file.metadata().await?.len() > 0 {
            format!("\n---\n\n{}\n\n{}\n", header, message)
        } else {
            format!(
                "# Inbox - {}\n\n{}\n\n{}\n",
                now.format("%Y-%m-%d"),
                header,
                message
            )
        };

        file.write_all(entry.as_bytes()).await?;
        Ok(())
    }

    /// Report fixes that need a human: skipped manual fixes and failed
    /// results that cannot be retried
    pub async fn notify_manual_steps(&self, skipped: &[Fix], failed: &[FixResult]) -> Result<()> {
        if skipped.is_empty() && failed.is_empty() {
            return Ok(());
        }

        let mut lines = Vec::new();
        for fix in skipped {
            lines.push(format!("- [ ] `{}`: {}", fix.id(), fix.description()));
        }
        for result in failed {
            if let Some(failure) = &result.error {
                lines.push(format!("- [ ] `{}`: {}", result.fix_id, failure.message));
            }
        }

        let message = format!("MCP server repairs need your attention:\n{}", lines.join("\n"));
        self.send(&message, Priority::High, &["mcp", "repair"]).await
    }

    pub async fn notify_config_repaired(&self, paths: &[PathBuf]) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }

        let list = paths
            .iter()
            .map(|p| format!("- {}", p.display()))
            .collect::<Vec<_>>()
            .join("\n");
        let message = format!("Repaired MCP client config syntax:\n{}", list);
        self.send(&message, Priority::Normal, &["mcp", "auto-repair"]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ErrorKind, ErrorRecord, FixFailure, FixId};
    use tempfile::tempdir;

    fn read_today(dir: &Path) -> String {
        let file = dir.join(format!("{}.md", Local::now().format("%Y-%m-%d")));
        std::fs::read_to_string(file).unwrap()
    }

    #[tokio::test]
    async fn test_first_entry_has_heading_then_separators() {
        let dir = tempdir().unwrap();
        let notifier = InboxNotifier::new(dir.path());

        notifier.send("first", Priority::Normal, &["mcp"]).await.unwrap();
        notifier.send("second", Priority::High, &["mcp"]).await.unwrap();

        let content = read_today(dir.path());
        assert!(content.starts_with("# Inbox - "));
        assert!(content.contains("[mcp-doctor] #mcp"));
        assert!(content.contains("\n---\n"));
        assert!(content.contains("*[HIGH]*"));
    }

    #[tokio::test]
    async fn test_manual_steps_listed() {
        let dir = tempdir().unwrap();
        let notifier = InboxNotifier::new(dir.path());
        let fix = Fix::manual(
            FixId::rule("s1", ErrorKind::PermissionError),
            ErrorRecord::new(ErrorKind::PermissionError, "EACCES").for_server("s1"),
            "Make the server binary executable",
            vec![],
        );
        let failed = FixResult::failed(
            FixId::rule("s2", ErrorKind::PathError),
            FixFailure::unknown("disk full"),
        );

        notifier.notify_manual_steps(&[fix], &[failed]).await.unwrap();

        let content = read_today(dir.path());
        assert!(content.contains("`s1:permission`: Make the server binary executable"));
        assert!(content.contains("`s2:path`: disk full"));
    }

    #[tokio::test]
    async fn test_nothing_to_report_writes_nothing() {
        let dir = tempdir().unwrap();
        let notifier = InboxNotifier::new(dir.path().join("inbox"));

        notifier.notify_manual_steps(&[], &[]).await.unwrap();
        notifier.notify_config_repaired(&[]).await.unwrap();

        assert!(!notifier.dir().exists());
    }
}
