//! Command availability probes
//!
//! Strategies ask a prober whether an alternative executable exists before
//! proposing a substitution. Probes are local and read-only.

use std::collections::HashSet;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, instrument};

use crate::error::ProbeError;

/// Answers "can this command be launched here?"
#[async_trait]
pub trait CommandProber: Send + Sync {
    async fn is_available(&self, command: &str) -> bool;
}

/// Probes by running `<command> --version` with a timeout
#[derive(Debug, Clone)]
pub struct SystemProber {
    timeout: Duration,
}

impl SystemProber {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    #[instrument(skip(self))]
    async fn run_version(&self, command: &str) -> Result<bool, ProbeError> {
        let child = Command::new(command)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();

        match tokio::time::timeout(self.timeout, child).await {
            Ok(Ok(status)) => Ok(status.success()),
            Ok(Err(source)) => Err(ProbeError::Spawn {
                command: command.to_string(),
                source,
            }),
            Err(_) => Err(ProbeError::Timeout {
                command: command.to_string(),
                secs: self.timeout.as_secs(),
            }),
        }
    }
}

impl Default for SystemProber {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl CommandProber for SystemProber {
    async fn is_available(&self, command: &str) -> bool {
        match self.run_version(command).await {
            Ok(available) => available,
            Err(e) => {
                debug!("probe failed: {}", e);
                false
            }
        }
    }
}

/// Answers from a precomputed set of available commands
#[derive(Debug, Clone, Default)]
pub struct StaticProber {
    available: HashSet<String>,
}

impl StaticProber {
    pub fn new<I, S>(commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            available: commands.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl CommandProber for StaticProber {
    async fn is_available(&self, command: &str) -> bool {
        self.available.contains(command)
    }
}
