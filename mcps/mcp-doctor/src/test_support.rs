//! In-memory collaborators for unit tests

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::advisor::{AdvisorReport, AiAdvisor, SuggestedFix};
use crate::backup::BackupManager;
use crate::config_store::{ConfigManager, FieldChange};
use crate::error::{BackupError, ConfigStoreError};
use crate::types::{ClientTarget, ClientType, ErrorKind, ErrorRecord, McpServer, ServerRegistry};

/// `s1` runs `python`, `s2` runs `node`; each in its own Cursor file
pub fn registry() -> ServerRegistry {
    let server = |name: &str, command: &str| McpServer {
        name: name.to_string(),
        client: ClientType::Cursor,
        config_path: PathBuf::from(format!("/tmp/{}.json", name)),
        command: command.to_string(),
        args: vec![],
        env: Default::default(),
    };
    ServerRegistry::new(vec![server("s1", "python"), server("s2", "node")])
}

#[derive(Default)]
pub struct MemoryConfigManager {
    updates: Mutex<Vec<(PathBuf, Vec<FieldChange>)>>,
    repairs: Mutex<Vec<PathBuf>>,
    repair_result: bool,
    failure: Option<String>,
    delay: Option<Duration>,
}

impl MemoryConfigManager {
    pub fn repairing(mut self, repaired: bool) -> Self {
        self.repair_result = repaired;
        self
    }

    pub fn failing(mut self, message: &str) -> Self {
        self.failure = Some(message.to_string());
        self
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn updates(&self) -> Vec<(PathBuf, Vec<FieldChange>)> {
        self.updates.lock().unwrap().clone()
    }

    pub fn repairs(&self) -> Vec<PathBuf> {
        self.repairs.lock().unwrap().clone()
    }

    async fn simulate(&self, path: &Path) -> Result<(), ConfigStoreError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.failure {
            Some(message) => Err(ConfigStoreError::io(
                path,
                std::io::Error::other(message.clone()),
            )),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ConfigManager for MemoryConfigManager {
    async fn update_client_config(
        &self,
        _client: ClientType,
        path: &Path,
        changes: &[FieldChange],
    ) -> Result<(), ConfigStoreError> {
        self.simulate(path).await?;
        self.updates
            .lock()
            .unwrap()
            .push((path.to_path_buf(), changes.to_vec()));
        Ok(())
    }

    async fn repair_config(
        &self,
        path: &Path,
        _client: ClientType,
    ) -> Result<bool, ConfigStoreError> {
        self.simulate(path).await?;
        self.repairs.lock().unwrap().push(path.to_path_buf());
        Ok(self.repair_result)
    }

    async fn load_servers(
        &self,
        _client: ClientType,
        _path: &Path,
    ) -> Result<Vec<McpServer>, ConfigStoreError> {
        Ok(registry().iter().cloned().collect())
    }
}

#[derive(Default)]
pub struct MemoryBackupManager {
    backed_up: Mutex<Vec<PathBuf>>,
    fail: bool,
}

impl MemoryBackupManager {
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn backed_up(&self) -> Vec<PathBuf> {
        self.backed_up.lock().unwrap().clone()
    }
}

#[async_trait]
impl BackupManager for MemoryBackupManager {
    async fn create_backup(&self, target: &ClientTarget) -> Result<PathBuf, BackupError> {
        if self.fail {
            return Err(BackupError::MissingSource(target.config_path.clone()));
        }
        self.backed_up
            .lock()
            .unwrap()
            .push(target.config_path.clone());
        Ok(target.config_path.with_extension("bak"))
    }

    async fn create_automatic_backup_if_needed(
        &self,
        target: &ClientTarget,
    ) -> Result<Option<PathBuf>, BackupError> {
        self.create_backup(target).await.map(Some)
    }

    async fn restore_latest(&self, target: &ClientTarget) -> Result<PathBuf, BackupError> {
        if self.backed_up().contains(&target.config_path) {
            Ok(target.config_path.with_extension("bak"))
        } else {
            Err(BackupError::NoBackup(target.client.to_string()))
        }
    }
}

pub struct StubAdvisor {
    report: Option<AdvisorReport>,
    delay: Option<Duration>,
}

impl StubAdvisor {
    pub fn returning(report: AdvisorReport) -> Self {
        Self {
            report: Some(report),
            delay: None,
        }
    }

    /// One suggestion for a network error on `server`
    pub fn suggesting(server: &str, confidence: u8) -> Self {
        Self::returning(AdvisorReport {
            suggested_fixes: vec![SuggestedFix {
                error: ErrorRecord::new(ErrorKind::NetworkError, "ECONNREFUSED")
                    .for_server(server),
                description: "Start the upstream service first".to_string(),
                changes: vec![],
            }],
            confidence,
            explanation: "The server could not reach its upstream".to_string(),
        })
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            report: None,
            delay: Some(delay),
        }
    }
}

#[async_trait]
impl AiAdvisor for StubAdvisor {
    async fn analyze_log(
        &self,
        _content: &str,
        _known_errors: &[ErrorRecord],
    ) -> Result<AdvisorReport> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.report
            .clone()
            .ok_or_else(|| anyhow!("advisor unavailable"))
    }
}
