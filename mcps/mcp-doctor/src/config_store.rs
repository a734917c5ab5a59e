//! Client configuration store
//!
//! The [`ConfigManager`] trait is the only path by which the engine mutates
//! configuration. [`JsonConfigManager`] implements it for the JSON files MCP
//! clients keep (`{"mcpServers": {"name": {"command": ..., "args": [...], "env": {...}}}}`).
//! Writes go to a temp file and are renamed into place.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::error::ConfigStoreError;
use crate::types::{Change, ChangeKind, ClientTarget, ClientType, McpServer, ServerRegistry};

// ============================================================================
// Field Changes
// ============================================================================

/// A single field mutation on one server entry
#[derive(Debug, Clone, PartialEq)]
pub enum FieldUpdate {
    /// Replace the launch command. With `expected`, the write fails unless
    /// the stored command still equals it.
    Command {
        command: String,
        expected: Option<String>,
    },
    Args(Vec<String>),
    /// `None` removes the variable
    Env { name: String, value: Option<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldChange {
    pub server: String,
    pub update: FieldUpdate,
}

impl FieldChange {
    pub fn command(server: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            update: FieldUpdate::Command {
                command: command.into(),
                expected: None,
            },
        }
    }

    /// Only write if the stored value is still `before`
    pub fn expecting(mut self, before: impl Into<String>) -> Self {
        if let FieldUpdate::Command { expected, .. } = &mut self.update {
            *expected = Some(before.into());
        }
        self
    }

    /// Translate a proposed change into a config mutation, if it has one.
    ///
    /// Permission and package changes never translate.
    pub fn from_change(change: &Change) -> Option<Self> {
        let after = change.after.as_ref()?;
        let update = match change.kind {
            ChangeKind::Command => FieldUpdate::Command {
                command: after.as_str()?.to_string(),
                expected: change
                    .before
                    .as_ref()
                    .and_then(Value::as_str)
                    .map(str::to_string),
            },
            ChangeKind::EnvironmentVariable => FieldUpdate::Env {
                name: after.get("name")?.as_str()?.to_string(),
                value: after
                    .get("value")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            },
            ChangeKind::ConfigField => {
                let value = after.get("value")?;
                match after.get("field")?.as_str()? {
                    "command" => FieldUpdate::Command {
                        command: value.as_str()?.to_string(),
                        expected: None,
                    },
                    "args" => FieldUpdate::Args(
                        value
                            .as_array()?
                            .iter()
                            .map(|v| v.as_str().map(str::to_string))
                            .collect::<Option<Vec<_>>>()?,
                    ),
                    _ => return None,
                }
            }
            ChangeKind::Permission | ChangeKind::Package => return None,
        };

        Some(Self {
            server: change.server.clone(),
            update,
        })
    }
}

// ============================================================================
// ConfigManager Trait
// ============================================================================

/// Owner of client configuration files. Implementations guarantee
/// single-writer semantics per file.
#[async_trait]
pub trait ConfigManager: Send + Sync {
    /// Persist field substitutions. Fails on any write error.
    async fn update_client_config(
        &self,
        client: ClientType,
        path: &Path,
        changes: &[FieldChange],
    ) -> Result<(), ConfigStoreError>;

    /// Attempt a syntax repair. Returns whether the file was changed.
    async fn repair_config(&self, path: &Path, client: ClientType)
        -> Result<bool, ConfigStoreError>;

    /// Read the server registrations in one client file.
    /// A missing file has no servers.
    async fn load_servers(
        &self,
        client: ClientType,
        path: &Path,
    ) -> Result<Vec<McpServer>, ConfigStoreError>;
}

/// Build a registry from every configured client file.
/// Unreadable files are logged and skipped.
pub async fn load_registry(config: &dyn ConfigManager, targets: &[ClientTarget]) -> ServerRegistry {
    let mut servers = Vec::new();

    for target in targets {
        match config.load_servers(target.client, &target.config_path).await {
            Ok(found) => servers.extend(found),
            Err(e) => warn!(client = %target.client, "failed to load servers: {}", e),
        }
    }

    let registry = ServerRegistry::new(servers);
    for name in registry.duplicate_names() {
        warn!(
            server = name,
            "server name registered in more than one client file; only the first is repaired"
        );
    }
    registry
}

// ============================================================================
// JSON Implementation
// ============================================================================

/// Config manager for MCP client JSON files
#[derive(Debug, Default)]
pub struct JsonConfigManager {
    write_lock: Mutex<()>,
}

impl JsonConfigManager {
    pub fn new() -> Self {
        Self::default()
    }

    async fn read_text(path: &Path) -> Result<String, ConfigStoreError> {
        tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ConfigStoreError::io(path, e))
    }

    async fn read_json(path: &Path) -> Result<Value, ConfigStoreError> {
        let text = Self::read_text(path).await?;
        serde_json::from_str(text.trim_start_matches('\u{feff}')).map_err(|source| {
            ConfigStoreError::Parse {
                path: path.to_path_buf(),
                source,
            }
        })
    }

    /// Write to `<file>.tmp` and rename over the original
    async fn write_atomic(path: &Path, value: &Value) -> Result<(), ConfigStoreError> {
        let mut content = serde_json::to_string_pretty(value).map_err(|source| {
            ConfigStoreError::Parse {
                path: path.to_path_buf(),
                source,
            }
        })?;
        content.push('\n');

        let tmp = temp_path(path);
        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| ConfigStoreError::io(&tmp, e))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| ConfigStoreError::io(path, e))
    }
}

#[async_trait]
impl ConfigManager for JsonConfigManager {
    #[instrument(skip(self, changes), fields(path = %path.display(), count = changes.len()))]
    async fn update_client_config(
        &self,
        client: ClientType,
        path: &Path,
        changes: &[FieldChange],
    ) -> Result<(), ConfigStoreError> {
        let _guard = self.write_lock.lock().await;

        let mut root = Self::read_json(path).await?;
        let servers = root
            .get_mut(client.root_key())
            .and_then(Value::as_object_mut);

        let Some(servers) = servers else {
            return Err(ConfigStoreError::Unrepairable {
                path: path.to_path_buf(),
                reason: format!("missing '{}' object", client.root_key()),
            });
        };

        for change in changes {
            let entry = servers
                .get_mut(&change.server)
                .and_then(Value::as_object_mut)
                .ok_or_else(|| ConfigStoreError::ServerNotFound {
                    server: change.server.clone(),
                    path: path.to_path_buf(),
                })?;

            if let FieldUpdate::Command {
                expected: Some(expected),
                ..
            } = &change.update
            {
                let found = entry.get("command").and_then(Value::as_str).unwrap_or_default();
                if found != expected.as_str() {
                    return Err(ConfigStoreError::StaleValue {
                        server: change.server.clone(),
                        path: path.to_path_buf(),
                        expected: expected.clone(),
                        found: found.to_string(),
                    });
                }
            }
            apply_update(entry, &change.update);
        }

        Self::write_atomic(path, &root).await?;
        info!("updated client config");
        Ok(())
    }

    #[instrument(skip(self), fields(path = %path.display()))]
    async fn repair_config(
        &self,
        path: &Path,
        client: ClientType,
    ) -> Result<bool, ConfigStoreError> {
        let _guard = self.write_lock.lock().await;

        let text = Self::read_text(path).await?;
        if serde_json::from_str::<Value>(&text).is_ok() {
            debug!("config already valid");
            return Ok(false);
        }

        let sanitized = sanitize_json(&text);
        let mut value: Value =
            serde_json::from_str(&sanitized).map_err(|e| ConfigStoreError::Unrepairable {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        if let Some(root) = value.as_object_mut() {
            root.entry(client.root_key())
                .or_insert_with(|| Value::Object(Map::new()));
        } else {
            return Err(ConfigStoreError::Unrepairable {
                path: path.to_path_buf(),
                reason: "top-level value is not an object".to_string(),
            });
        }

        Self::write_atomic(path, &value).await?;
        info!(client = %client, "repaired config syntax");
        Ok(true)
    }

    async fn load_servers(
        &self,
        client: ClientType,
        path: &Path,
    ) -> Result<Vec<McpServer>, ConfigStoreError> {
        if !path.exists() {
            debug!(path = %path.display(), "client config not present");
            return Ok(Vec::new());
        }

        let root = Self::read_json(path).await?;
        let Some(entries) = root.get(client.root_key()).and_then(Value::as_object) else {
            return Ok(Vec::new());
        };

        let mut servers = Vec::new();
        for (name, entry) in entries {
            // Remote (url-based) servers have no local command to repair
            let Some(command) = entry.get("command").and_then(Value::as_str) else {
                debug!(server = %name, "skipping server without a command");
                continue;
            };

            servers.push(McpServer {
                name: name.clone(),
                client,
                config_path: path.to_path_buf(),
                command: command.to_string(),
                args: entry
                    .get("args")
                    .and_then(Value::as_array)
                    .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
                    .unwrap_or_default(),
                env: entry
                    .get("env")
                    .and_then(Value::as_object)
                    .map(|o| {
                        o.iter()
                            .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                            .collect()
                    })
                    .unwrap_or_default(),
            });
        }

        Ok(servers)
    }
}

fn apply_update(entry: &mut Map<String, Value>, update: &FieldUpdate) {
    match update {
        FieldUpdate::Command { command, .. } => {
            entry.insert("command".to_string(), Value::String(command.clone()));
        }
        FieldUpdate::Args(args) => {
            entry.insert(
                "args".to_string(),
                Value::Array(args.iter().cloned().map(Value::String).collect()),
            );
        }
        FieldUpdate::Env { name, value } => {
            let env = entry
                .entry("env")
                .or_insert_with(|| Value::Object(Map::new()));
            if let Some(env) = env.as_object_mut() {
                match value {
                    Some(v) => {
                        env.insert(name.clone(), Value::String(v.clone()));
                    }
                    None => {
                        env.remove(name);
                    }
                }
            }
        }
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "config.json".to_string());
    path.with_file_name(format!("{}.tmp", name))
}

/// Strip a BOM, `//` and `/* */` comments, and trailing commas, leaving
/// string contents untouched
pub fn sanitize_json(text: &str) -> String {
    let text = text.trim_start_matches('\u{feff}');
    let without_comments = strip_comments(text);
    strip_trailing_commas(&without_comments)
}

fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut in_string = false;
    let mut escaped = false;

    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match (c, chars.peek()) {
            ('"', _) => {
                in_string = true;
                out.push(c);
            }
            ('/', Some('/')) => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                chars.next();
                let mut prev = '\0';
                for next in chars.by_ref() {
                    if prev == '*' && next == '/' {
                        break;
                    }
                    prev = next;
                }
            }
            _ => out.push(c),
        }
    }

    out
}

fn strip_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        if c == '"' {
            in_string = true;
        } else if c == ',' {
            let next = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
            if matches!(next, Some('}') | Some(']') | None) {
                continue;
            }
        }
        out.push(c);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    const VALID: &str = r#"{
  "mcpServers": {
    "files": { "command": "python", "args": ["-m", "files"], "env": { "ROOT": "/tmp" } },
    "remote": { "url": "https://example.com/mcp" }
  }
}"#;

    #[test]
    fn test_sanitize_strips_comments_and_trailing_commas() {
        let broken = "\u{feff}{\n  // servers\n  \"mcpServers\": {\n    \"a\": { \"command\": \"node\", /* inline */ \"args\": [\"x\",], },\n  },\n}";
        let value: Value = serde_json::from_str(&sanitize_json(broken)).unwrap();
        assert_eq!(value["mcpServers"]["a"]["args"], json!(["x"]));
    }

    #[test]
    fn test_sanitize_preserves_string_contents() {
        let text = r#"{"url": "http://host//path", "note": "a, }", "glob": "/*.json",}"#;
        let value: Value = serde_json::from_str(&sanitize_json(text)).unwrap();
        assert_eq!(value["url"], "http://host//path");
        assert_eq!(value["note"], "a, }");
        assert_eq!(value["glob"], "/*.json");
    }

    #[test]
    fn test_field_change_from_change() {
        let change = Change::command("s1", "python", "python3");
        assert_eq!(
            FieldChange::from_change(&change),
            Some(FieldChange::command("s1", "python3").expecting("python"))
        );

        let package = Change::package("s1", "foo", "pip");
        assert_eq!(FieldChange::from_change(&package), None);

        let env = Change {
            kind: ChangeKind::EnvironmentVariable,
            description: "set token".to_string(),
            server: "s1".to_string(),
            before: None,
            after: Some(json!({ "name": "TOKEN", "value": "abc" })),
        };
        assert_eq!(
            FieldChange::from_change(&env).map(|c| c.update),
            Some(FieldUpdate::Env {
                name: "TOKEN".to_string(),
                value: Some("abc".to_string())
            })
        );
    }

    #[tokio::test]
    async fn test_load_servers_skips_remote_entries() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("claude.json");
        std::fs::write(&path, VALID).unwrap();

        let servers = JsonConfigManager::new()
            .load_servers(ClientType::ClaudeDesktop, &path)
            .await
            .unwrap();

        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].name, "files");
        assert_eq!(servers[0].args, vec!["-m", "files"]);
        assert_eq!(servers[0].env.get("ROOT").map(String::as_str), Some("/tmp"));
    }

    #[tokio::test]
    async fn test_update_command_field() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("claude.json");
        std::fs::write(&path, VALID).unwrap();

        let manager = JsonConfigManager::new();
        manager
            .update_client_config(
                ClientType::ClaudeDesktop,
                &path,
                &[FieldChange::command("files", "python3")],
            )
            .await
            .unwrap();

        let value: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["mcpServers"]["files"]["command"], "python3");
        assert_eq!(value["mcpServers"]["remote"]["url"], "https://example.com/mcp");
        assert!(!temp_path(&path).exists());
    }

    #[tokio::test]
    async fn test_update_unknown_server_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("claude.json");
        std::fs::write(&path, VALID).unwrap();

        let err = JsonConfigManager::new()
            .update_client_config(
                ClientType::ClaudeDesktop,
                &path,
                &[FieldChange::command("ghost", "python3")],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigStoreError::ServerNotFound { .. }));
    }

    #[tokio::test]
    async fn test_update_refuses_stale_command() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("claude.json");
        std::fs::write(&path, VALID).unwrap();

        let err = JsonConfigManager::new()
            .update_client_config(
                ClientType::ClaudeDesktop,
                &path,
                &[FieldChange::command("files", "python3").expecting("node")],
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ConfigStoreError::StaleValue { .. }));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), VALID);
    }

    #[tokio::test]
    async fn test_repair_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cursor.json");
        std::fs::write(&path, "{ \"mcpServers\": { \"a\": { \"command\": \"node\", }, }, }").unwrap();

        let manager = JsonConfigManager::new();
        assert!(manager.repair_config(&path, ClientType::Cursor).await.unwrap());
        // Second pass is a no-op
        assert!(!manager.repair_config(&path, ClientType::Cursor).await.unwrap());

        let value: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["mcpServers"]["a"]["command"], "node");
    }

    #[tokio::test]
    async fn test_repair_config_unrepairable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cursor.json");
        std::fs::write(&path, "{ \"mcpServers\": { \"a\": ").unwrap();

        let err = JsonConfigManager::new()
            .repair_config(&path, ClientType::Cursor)
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigStoreError::Unrepairable { .. }));
    }

    #[tokio::test]
    async fn test_load_registry_skips_missing_files() {
        let dir = tempdir().unwrap();
        let present = dir.path().join("claude.json");
        std::fs::write(&present, VALID).unwrap();

        let targets = vec![
            ClientTarget {
                client: ClientType::ClaudeDesktop,
                config_path: present,
            },
            ClientTarget {
                client: ClientType::Cursor,
                config_path: dir.path().join("absent.json"),
            },
        ];

        let registry = load_registry(&JsonConfigManager::new(), &targets).await;
        assert_eq!(registry.len(), 1);
        assert!(registry.get("files").is_some());
    }
}
