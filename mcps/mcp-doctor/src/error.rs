//! Error types for the repair engine and its collaborators
//!
//! Strategy and plan building never fail. These errors come from the
//! collaborators (config files, backups, probes) and from structurally
//! invalid requests such as confirming a fix that is not in the plan.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::{ClientType, FixId};

/// Errors surfaced by the engine itself
#[derive(Error, Debug)]
pub enum DoctorError {
    /// A confirmed fix id does not exist in the plan
    #[error("fix not found in plan: {0}")]
    FixNotFound(FixId),

    /// No config file is configured for this client
    #[error("no config file configured for {0}")]
    UnknownClient(ClientType),

    #[error("backup error: {0}")]
    Backup(#[from] BackupError),
}

/// Errors from reading, repairing or writing client config files
#[derive(Error, Debug)]
pub enum ConfigStoreError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Syntax repair did not produce valid JSON
    #[error("config at {path} could not be repaired: {reason}")]
    Unrepairable { path: PathBuf, reason: String },

    #[error("server '{server}' not found in {path}")]
    ServerNotFound { server: String, path: PathBuf },

    /// The stored value no longer matches what the change was planned against
    #[error("server '{server}' in {path} has command '{found}', expected '{expected}'")]
    StaleValue {
        server: String,
        path: PathBuf,
        expected: String,
        found: String,
    },
}

impl ConfigStoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors from the backup store
#[derive(Error, Debug)]
pub enum BackupError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config file does not exist: {0}")]
    MissingSource(PathBuf),

    #[error("no backup found for {0}")]
    NoBackup(String),
}

impl BackupError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors from command availability probes
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("probe of '{command}' timed out after {secs}s")]
    Timeout { command: String, secs: u64 },
}

pub type DoctorResult<T> = Result<T, DoctorError>;
