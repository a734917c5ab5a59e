//! Repair-cycle serialization
//!
//! One async mutex per key. A cycle takes every key it touches up front, in
//! sorted order, so two cycles can never wait on each other.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::trace;

use crate::types::McpServer;

#[derive(Debug, Clone, Default)]
pub struct ServerLocks {
    locks: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

/// Held for the duration of one repair cycle
#[derive(Debug)]
pub struct CycleGuard {
    keys: Vec<String>,
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl CycleGuard {
    pub fn keys(&self) -> &[String] {
        &self.keys
    }
}

impl ServerLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock key for a server registration
    pub fn server_key(server: &McpServer) -> String {
        format!("server:{}", server.name)
    }

    /// Lock key for a client config file
    pub fn file_key(path: &Path) -> String {
        format!("file:{}", path.display())
    }

    /// Keys for a set of servers: each server plus the file it lives in
    pub fn keys_for<'a>(servers: impl IntoIterator<Item = &'a McpServer>) -> Vec<String> {
        servers
            .into_iter()
            .flat_map(|s| [Self::server_key(s), Self::file_key(&s.config_path)])
            .collect()
    }

    /// Wait for every key, acquiring in sorted order
    pub async fn acquire(&self, keys: impl IntoIterator<Item = String>) -> CycleGuard {
        let mut keys: Vec<String> = keys.into_iter().collect();
        keys.sort();
        keys.dedup();

        let mut guards = Vec::with_capacity(keys.len());
        for key in &keys {
            trace!(key = %key, "acquiring repair lock");
            guards.push(self.entry(key).lock_owned().await);
        }

        CycleGuard {
            keys,
            _guards: guards,
        }
    }

    fn entry(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut map = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        map.entry(key.to_string()).or_default().clone()
    }
}
