//! Configuration for the repair engine
//!
//! Loaded from TOML. Every section is optional and falls back to defaults.
//!
//! ```toml
//! [timeouts]
//! mutation_secs = 10
//!
//! [commands]
//! bundled_runtime_dir = "~/.mcp-doctor/runtime"
//! [commands.alternatives]
//! python = ["python3"]
//!
//! [backups]
//! min_interval_mins = 60
//!
//! [advisor]
//! command = ["claude", "-p", "--output-format", "text"]
//!
//! [[clients]]
//! client = "cursor"
//! config_path = "~/.cursor/mcp.json"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::types::{ClientTarget, ClientType};

/// Top-level configuration (from mcp-doctor.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DoctorConfig {
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub commands: CommandConfig,
    #[serde(default)]
    pub backups: BackupConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub advisor: AdvisorConfig,
    /// Client config files to manage; empty means the well-known locations
    #[serde(default)]
    pub clients: Vec<ClientEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Bound on each config mutation or repair call
    #[serde(default = "default_mutation_secs")]
    pub mutation_secs: u64,
    /// Bound on each `--version` probe
    #[serde(default = "default_probe_secs")]
    pub probe_secs: u64,
    /// Bound on each advisor call
    #[serde(default = "default_advisor_secs")]
    pub advisor_secs: u64,
}

fn default_mutation_secs() -> u64 {
    10
}

fn default_probe_secs() -> u64 {
    5
}

fn default_advisor_secs() -> u64 {
    60
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            mutation_secs: default_mutation_secs(),
            probe_secs: default_probe_secs(),
            advisor_secs: default_advisor_secs(),
        }
    }
}

impl TimeoutConfig {
    pub fn mutation(&self) -> Duration {
        Duration::from_secs(self.mutation_secs)
    }

    pub fn probe(&self) -> Duration {
        Duration::from_secs(self.probe_secs)
    }

    pub fn advisor(&self) -> Duration {
        Duration::from_secs(self.advisor_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandConfig {
    /// Missing command -> candidates, probed in order
    #[serde(default = "default_alternatives")]
    pub alternatives: BTreeMap<String, Vec<String>>,
    /// Directory of a bundled runtime; `<dir>/bin/<cmd>` becomes a candidate
    /// for node, npm and npx
    #[serde(default)]
    pub bundled_runtime_dir: Option<String>,
}

fn default_alternatives() -> BTreeMap<String, Vec<String>> {
    [
        ("python", vec!["python3"]),
        ("python3", vec!["python"]),
        ("pip", vec!["pip3"]),
        ("pip3", vec!["pip"]),
        ("node", vec!["nodejs"]),
        ("nodejs", vec!["node"]),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.into_iter().map(String::from).collect()))
    .collect()
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            alternatives: default_alternatives(),
            bundled_runtime_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    #[serde(default = "default_backup_dir")]
    pub dir: String,
    /// Automatic backups are skipped if the newest one is younger than this
    #[serde(default = "default_min_interval")]
    pub min_interval_mins: i64,
}

fn default_backup_dir() -> String {
    "~/.binks/mcp-doctor/backups".to_string()
}

fn default_min_interval() -> i64 {
    60
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            dir: default_backup_dir(),
            min_interval_mins: default_min_interval(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Write manual steps to the inbox
    #[serde(default)]
    pub inbox: bool,
    #[serde(default)]
    pub inbox_path: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdvisorConfig {
    /// Program and arguments of an external advisor; empty disables it
    #[serde(default)]
    pub command: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientEntry {
    pub client: ClientType,
    pub config_path: String,
}

impl DoctorConfig {
    /// Load config from the standard locations
    ///
    /// Search order:
    /// 1. `MCP_DOCTOR_CONFIG` env var
    /// 2. `~/.binks/mcp-doctor.toml`
    /// 3. `$XDG_CONFIG_HOME/mcp-doctor/config.toml`
    /// 4. Defaults
    pub fn load() -> Result<Self> {
        if let Ok(env_path) = std::env::var("MCP_DOCTOR_CONFIG") {
            let path = expand_path(&env_path);
            tracing::info!("Loading config from MCP_DOCTOR_CONFIG={}", path.display());
            return Self::load_from_path(&path);
        }

        let candidates = [
            dirs::home_dir().map(|h| h.join(".binks").join("mcp-doctor.toml")),
            dirs::config_dir().map(|c| c.join("mcp-doctor").join("config.toml")),
        ];

        for path in candidates.into_iter().flatten() {
            if path.exists() {
                tracing::info!("Loading config from {}", path.display());
                return Self::load_from_path(&path);
            }
        }

        tracing::debug!("No mcp-doctor config found, using defaults");
        Ok(Self::default())
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))
    }

    /// Client files to manage, with `~` expanded
    pub fn client_targets(&self) -> Vec<ClientTarget> {
        if self.clients.is_empty() {
            return default_client_targets();
        }

        self.clients
            .iter()
            .map(|entry| ClientTarget {
                client: entry.client,
                config_path: expand_path(&entry.config_path),
            })
            .collect()
    }

    pub fn backup_dir(&self) -> PathBuf {
        expand_path(&self.backups.dir)
    }

    pub fn inbox_path(&self) -> Option<PathBuf> {
        self.notify.inbox_path.as_deref().map(expand_path)
    }
}

/// Well-known client config locations for this platform
fn default_client_targets() -> Vec<ClientTarget> {
    let mut targets = Vec::new();

    if let Some(config_dir) = dirs::config_dir() {
        targets.push(ClientTarget {
            client: ClientType::ClaudeDesktop,
            config_path: config_dir.join("Claude").join("claude_desktop_config.json"),
        });
    }

    if let Some(home) = dirs::home_dir() {
        targets.push(ClientTarget {
            client: ClientType::Cursor,
            config_path: home.join(".cursor").join("mcp.json"),
        });
        targets.push(ClientTarget {
            client: ClientType::Windsurf,
            config_path: home.join(".codeium").join("windsurf").join("mcp_config.json"),
        });
    }

    targets
}

pub(crate) fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_sections_missing() {
        let config: DoctorConfig = toml::from_str("").unwrap();
        assert_eq!(config.timeouts.mutation_secs, 10);
        assert_eq!(config.alternatives_for("python"), vec!["python3".to_string()]);
        assert_eq!(config.backups.min_interval_mins, 60);
        assert!(!config.notify.inbox);
        assert!(config.advisor.command.is_empty());
    }

    #[test]
    fn test_explicit_clients_override_defaults() {
        let config: DoctorConfig = toml::from_str(
            r#"
            [[clients]]
            client = "vs_code"
            config_path = "/tmp/mcp.json"
            "#,
        )
        .unwrap();

        let targets = config.client_targets();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].client, ClientType::VsCode);
        assert_eq!(targets[0].config_path, PathBuf::from("/tmp/mcp.json"));
    }

    #[test]
    fn test_custom_alternatives_replace_table() {
        let config: DoctorConfig = toml::from_str(
            r#"
            [commands.alternatives]
            uv = ["uvx"]
            "#,
        )
        .unwrap();
        assert_eq!(config.alternatives_for("uv"), vec!["uvx".to_string()]);
        assert!(config.alternatives_for("python").is_empty());
    }

    impl DoctorConfig {
        fn alternatives_for(&self, command: &str) -> Vec<String> {
            self.commands
                .alternatives
                .get(command)
                .cloned()
                .unwrap_or_default()
        }
    }
}
