//! Client config backups
//!
//! Backups are plain copies named `<client>-<YYYYmmdd-HHMMSS-mmm>.json` in
//! one directory, so lexical order is chronological order.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{Duration, NaiveDateTime, Utc};
use tracing::{debug, info};

use crate::error::BackupError;
use crate::types::{ClientTarget, ClientType};

const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S-%3f";

#[async_trait]
pub trait BackupManager: Send + Sync {
    /// Copy the client's config file now
    async fn create_backup(&self, target: &ClientTarget) -> Result<PathBuf, BackupError>;

    /// Copy the config file unless a recent backup exists.
    /// Returns the new backup path, or `None` if none was needed.
    async fn create_automatic_backup_if_needed(
        &self,
        target: &ClientTarget,
    ) -> Result<Option<PathBuf>, BackupError>;

    /// Copy the newest backup over the client's config file.
    /// Returns the backup that was restored.
    async fn restore_latest(&self, target: &ClientTarget) -> Result<PathBuf, BackupError>;
}

/// Timestamped copies under a backup directory
#[derive(Debug, Clone)]
pub struct FileBackupManager {
    dir: PathBuf,
    min_interval: Duration,
}

impl FileBackupManager {
    pub fn new(dir: impl Into<PathBuf>, min_interval_mins: i64) -> Self {
        Self {
            dir: dir.into(),
            min_interval: Duration::minutes(min_interval_mins),
        }
    }

    /// Backups for a client, oldest first
    pub async fn list_backups(&self, client: ClientType) -> Result<Vec<PathBuf>, BackupError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(BackupError::io(&self.dir, e)),
        };

        let mut backups = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| BackupError::io(&self.dir, e))?
        {
            let path = entry.path();
            if backup_timestamp(&path, client).is_some() {
                backups.push(path);
            }
        }

        backups.sort();
        Ok(backups)
    }
}

#[async_trait]
impl BackupManager for FileBackupManager {
    async fn create_backup(&self, target: &ClientTarget) -> Result<PathBuf, BackupError> {
        if !target.config_path.exists() {
            return Err(BackupError::MissingSource(target.config_path.clone()));
        }

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| BackupError::io(&self.dir, e))?;

        let name = format!(
            "{}-{}.json",
            target.client,
            Utc::now().format(TIMESTAMP_FORMAT)
        );
        let dest = self.dir.join(name);

        tokio::fs::copy(&target.config_path, &dest)
            .await
            .map_err(|e| BackupError::io(&dest, e))?;

        info!(client = %target.client, backup = %dest.display(), "created backup");
        Ok(dest)
    }

    async fn create_automatic_backup_if_needed(
        &self,
        target: &ClientTarget,
    ) -> Result<Option<PathBuf>, BackupError> {
        if !target.config_path.exists() {
            debug!(path = %target.config_path.display(), "no config file to back up");
            return Ok(None);
        }

        let newest = self
            .list_backups(target.client)
            .await?
            .last()
            .and_then(|p| backup_timestamp(p, target.client));

        if let Some(taken) = newest {
            let age = Utc::now().naive_utc() - taken;
            if age < self.min_interval {
                debug!(
                    client = %target.client,
                    age_mins = age.num_minutes(),
                    "recent backup exists, skipping"
                );
                return Ok(None);
            }
        }

        self.create_backup(target).await.map(Some)
    }

    async fn restore_latest(&self, target: &ClientTarget) -> Result<PathBuf, BackupError> {
        let latest = self
            .list_backups(target.client)
            .await?
            .pop()
            .ok_or_else(|| BackupError::NoBackup(target.client.to_string()))?;

        tokio::fs::copy(&latest, &target.config_path)
            .await
            .map_err(|e| BackupError::io(&target.config_path, e))?;

        info!(
            client = %target.client,
            backup = %latest.display(),
            "restored config from backup"
        );
        Ok(latest)
    }
}

/// Parse the timestamp out of a backup file name for `client`
fn backup_timestamp(path: &Path, client: ClientType) -> Option<NaiveDateTime> {
    let name = path.file_name()?.to_str()?;
    let stamp = name
        .strip_prefix(client.as_str())?
        .strip_prefix('-')?
        .strip_suffix(".json")?;
    NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn target(dir: &Path) -> ClientTarget {
        let config_path = dir.join("mcp.json");
        std::fs::write(&config_path, r#"{"mcpServers":{}}"#).unwrap();
        ClientTarget {
            client: ClientType::Cursor,
            config_path,
        }
    }

    #[tokio::test]
    async fn test_create_and_list_backups() {
        let dir = tempdir().unwrap();
        let manager = FileBackupManager::new(dir.path().join("backups"), 60);
        let target = target(dir.path());

        let backup = manager.create_backup(&target).await.unwrap();

        assert!(backup.exists());
        assert_eq!(manager.list_backups(ClientType::Cursor).await.unwrap(), vec![backup]);
        assert!(manager.list_backups(ClientType::Windsurf).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_automatic_backup_respects_interval() {
        let dir = tempdir().unwrap();
        let manager = FileBackupManager::new(dir.path().join("backups"), 60);
        let target = target(dir.path());

        assert!(manager
            .create_automatic_backup_if_needed(&target)
            .await
            .unwrap()
            .is_some());
        assert!(manager
            .create_automatic_backup_if_needed(&target)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_zero_interval_always_backs_up() {
        let dir = tempdir().unwrap();
        let manager = FileBackupManager::new(dir.path().join("backups"), 0);
        let target = target(dir.path());

        manager.create_automatic_backup_if_needed(&target).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = manager.create_automatic_backup_if_needed(&target).await.unwrap();

        assert!(second.is_some());
        assert_eq!(manager.list_backups(ClientType::Cursor).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_source() {
        let dir = tempdir().unwrap();
        let manager = FileBackupManager::new(dir.path().join("backups"), 60);
        let target = ClientTarget {
            client: ClientType::Cursor,
            config_path: dir.path().join("absent.json"),
        };

        assert!(matches!(
            manager.create_backup(&target).await,
            Err(BackupError::MissingSource(_))
        ));
        assert!(manager
            .create_automatic_backup_if_needed(&target)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_restore_latest() {
        let dir = tempdir().unwrap();
        let manager = FileBackupManager::new(dir.path().join("backups"), 60);
        let target = target(dir.path());

        assert!(matches!(
            manager.restore_latest(&target).await,
            Err(BackupError::NoBackup(_))
        ));

        manager.create_backup(&target).await.unwrap();
        std::fs::write(&target.config_path, "{ broken").unwrap();
        manager.restore_latest(&target).await.unwrap();

        assert_eq!(
            std::fs::read_to_string(&target.config_path).unwrap(),
            r#"{"mcpServers":{}}"#
        );
    }
}
