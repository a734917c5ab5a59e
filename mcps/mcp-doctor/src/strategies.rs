//! Fix generation strategies for different error kinds
//!
//! One strategy per [`ErrorKind`]. Strategies are pure apart from asking the
//! [`CommandProber`] whether an alternative executable exists.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::debug;

use crate::probe::CommandProber;
use crate::settings::{expand_path, CommandConfig};
use crate::types::{Change, ErrorKind, ErrorRecord, Fix, FixId, McpServer};

static COMMAND_NOT_FOUND: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r#"(?i)command\s+["'`]([^"'`]+)["'`]\s+not found"#,
        r"(?i)([\w./\\-]+): command not found",
        r"(?i)spawn\s+(\S+)\s+ENOENT",
        r#"'([^']+)' is not recognized as an internal or external command"#,
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

static MODULE_NOT_FOUND: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r#"(?i)module not found:\s*['"]?([\w@./-]+)"#,
        r#"(?i)cannot find module\s+['"]([^'"]+)['"]"#,
        r#"(?i)no module named\s+['"]?([\w.]+)"#,
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

/// Commands that a bundled runtime directory can stand in for
const BUNDLED_RUNTIME_COMMANDS: &[&str] = &["node", "npm", "npx"];

/// Maps an error group to a candidate fix
pub struct StrategyRegistry {
    prober: Arc<dyn CommandProber>,
    alternatives: BTreeMap<String, Vec<String>>,
    bundled_runtime_dir: Option<PathBuf>,
}

impl StrategyRegistry {
    pub fn new(prober: Arc<dyn CommandProber>, commands: &CommandConfig) -> Self {
        Self {
            prober,
            alternatives: commands.alternatives.clone(),
            bundled_runtime_dir: commands.bundled_runtime_dir.as_deref().map(expand_path),
        }
    }

    /// Propose one fix for all errors of `kind` belonging to `server`
    pub async fn propose_fix(
        &self,
        kind: ErrorKind,
        errors: &[ErrorRecord],
        server: &McpServer,
    ) -> Option<Fix> {
        if errors.is_empty() {
            return None;
        }

        match kind {
            ErrorKind::PathError => self.path_error_fix(errors, server).await,
            ErrorKind::PermissionError => Some(permission_error_fix(errors, server)),
            ErrorKind::ConfigError => Some(config_error_fix(errors, server)),
            ErrorKind::NetworkError | ErrorKind::EnvironmentError | ErrorKind::UnknownError => {
                None
            }
        }
    }

    /// Candidates for a missing command, in probe order
    pub fn candidates_for(&self, command: &str) -> Vec<String> {
        let name = command_basename(command);
        let mut candidates: Vec<String> = self
            .alternatives
            .get(name)
            .cloned()
            .unwrap_or_default();

        if let Some(dir) = &self.bundled_runtime_dir {
            if BUNDLED_RUNTIME_COMMANDS.contains(&name) {
                candidates.push(dir.join("bin").join(name).display().to_string());
            }
        }

        candidates.retain(|c| c != command);
        candidates
    }

    /// First candidate the prober accepts
    async fn find_alternative(&self, command: &str) -> Option<String> {
        for candidate in self.candidates_for(command) {
            if self.prober.is_available(&candidate).await {
                debug!(command, candidate = %candidate, "alternative command available");
                return Some(candidate);
            }
        }
        None
    }

    async fn path_error_fix(&self, errors: &[ErrorRecord], server: &McpServer) -> Option<Fix> {
        let id = FixId::rule(&server.name, ErrorKind::PathError);

        for error in errors {
            if !is_command_not_found(error.message()) {
                continue;
            }

            let missing = extract_missing_command(error.message())
                .unwrap_or_else(|| server.command.clone());

            // Only the server's own launch command is ours to substitute
            if command_basename(&missing) != command_basename(&server.command) {
                debug!(
                    server = %server.name,
                    missing = %missing,
                    "missing command is not the server's command"
                );
                continue;
            }

            if let Some(alternative) = self.find_alternative(&missing).await {
                return Some(Fix::automatic(
                    id,
                    error.clone(),
                    format!(
                        "Use '{}' instead of missing command '{}' for {}",
                        alternative, missing, server.name
                    ),
                    vec![Change::command(&server.name, &server.command, &alternative)],
                ));
            }
        }

        errors.iter().find_map(|error| {
            let package = extract_missing_module(error.message())?;
            let manager = package_manager(&server.command, error.message());
            Some(Fix::manual(
                id.clone(),
                error.clone(),
                format!("Install missing package '{}' for {}", package, server.name),
                vec![Change::package(&server.name, &package, manager)],
            ))
        })
    }
}

/// Permission problems need privilege elevation; always manual
fn permission_error_fix(errors: &[ErrorRecord], server: &McpServer) -> Fix {
    let error = &errors[0];
    Fix::manual(
        FixId::rule(&server.name, ErrorKind::PermissionError),
        error.clone(),
        format!(
            "Grant the permissions {} needs ({})",
            server.name,
            error.message()
        ),
        vec![Change::permission(
            &server.name,
            format!(
                "Adjust file or executable permissions for '{}'",
                server.command
            ),
        )],
    )
}

fn config_error_fix(errors: &[ErrorRecord], server: &McpServer) -> Fix {
    let description = if errors.len() > 1 {
        format!(
            "Repair configuration syntax for {} ({} errors)",
            server.name,
            errors.len()
        )
    } else {
        format!("Repair configuration syntax for {}", server.name)
    };

    Fix::automatic(
        FixId::rule(&server.name, ErrorKind::ConfigError),
        errors[0].clone(),
        description,
        vec![Change::config_syntax(&server.name, &server.config_path)],
    )
}

pub fn is_command_not_found(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("command not found")
        || lower.contains("not found in path")
        || COMMAND_NOT_FOUND.iter().any(|re| re.is_match(message))
}

/// Pull the missing command out of messages like `Command "python" not found`
pub fn extract_missing_command(message: &str) -> Option<String> {
    COMMAND_NOT_FOUND
        .iter()
        .find_map(|re| re.captures(message))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

pub fn extract_missing_module(message: &str) -> Option<String> {
    MODULE_NOT_FOUND
        .iter()
        .find_map(|re| re.captures(message))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim_end_matches('.').to_string())
}

fn package_manager(server_command: &str, message: &str) -> &'static str {
    let name = command_basename(server_command);
    if name.starts_with("python") || name.starts_with("pip") || name.starts_with("uv") {
        return "pip";
    }
    if ["node", "nodejs", "npm", "npx", "bun"].contains(&name) {
        return "npm";
    }

    let lower = message.to_lowercase();
    if lower.contains("no module named") {
        "pip"
    } else if lower.contains("cannot find module") {
        "npm"
    } else {
        "the server's package manager"
    }
}

fn command_basename(command: &str) -> &str {
    Path::new(command)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(command)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::StaticProber;
    use crate::types::{ChangeKind, ClientType};
    use serde_json::json;

    fn server(command: &str) -> McpServer {
        McpServer {
            name: "s1".to_string(),
            client: ClientType::ClaudeDesktop,
            config_path: PathBuf::from("/tmp/claude.json"),
            command: command.to_string(),
            args: vec![],
            env: Default::default(),
        }
    }

    fn registry(available: &[&str]) -> StrategyRegistry {
        StrategyRegistry::new(
            Arc::new(StaticProber::new(available.iter().copied())),
            &CommandConfig::default(),
        )
    }

    fn path_error(message: &str) -> ErrorRecord {
        ErrorRecord::new(ErrorKind::PathError, message).for_server("s1")
    }

    #[tokio::test]
    async fn test_resolves_python_to_python3() {
        let errors = vec![path_error("Command \"python\" not found in PATH")];
        let fix = registry(&["python3"])
            .propose_fix(ErrorKind::PathError, &errors, &server("python"))
            .await
            .unwrap();

        assert!(fix.is_automatic());
        let change = fix.find_change(ChangeKind::Command).unwrap();
        assert_eq!(change.before, Some(json!("python")));
        assert_eq!(change.after, Some(json!("python3")));
    }

    #[tokio::test]
    async fn test_unresolved_command_returns_none() {
        let errors = vec![path_error("Command \"python\" not found in PATH")];
        let fix = registry(&[])
            .propose_fix(ErrorKind::PathError, &errors, &server("python"))
            .await;
        assert!(fix.is_none());
    }

    #[tokio::test]
    async fn test_other_missing_command_is_not_substituted() {
        let errors = vec![path_error("Command \"python\" not found in PATH")];
        let fix = registry(&["python3"])
            .propose_fix(ErrorKind::PathError, &errors, &server("node"))
            .await;
        assert!(fix.is_none());
    }

    #[tokio::test]
    async fn test_absolute_command_substitutes_stored_value() {
        let errors = vec![path_error("/usr/bin/python: command not found")];
        let fix = registry(&["python3"])
            .propose_fix(ErrorKind::PathError, &errors, &server("/usr/bin/python"))
            .await
            .unwrap();

        let change = fix.find_change(ChangeKind::Command).unwrap();
        assert_eq!(change.before, Some(json!("/usr/bin/python")));
        assert_eq!(change.after, Some(json!("python3")));
    }

    #[tokio::test]
    async fn test_module_not_found_is_manual_package_fix() {
        let errors = vec![path_error("Module not found: foo")];
        let fix = registry(&["python3"])
            .propose_fix(ErrorKind::PathError, &errors, &server("python"))
            .await
            .unwrap();

        assert!(!fix.is_automatic());
        let change = fix.find_change(ChangeKind::Package).unwrap();
        assert_eq!(change.after, Some(json!({ "package": "foo", "manager": "pip" })));
    }

    #[tokio::test]
    async fn test_unmatched_path_message_returns_none() {
        let errors = vec![path_error("Something odd happened")];
        let fix = registry(&["python3"])
            .propose_fix(ErrorKind::PathError, &errors, &server("python"))
            .await;
        assert!(fix.is_none());
    }

    #[tokio::test]
    async fn test_permission_fix_is_manual() {
        let errors = vec![ErrorRecord::new(ErrorKind::PermissionError, "EACCES").for_server("s1")];
        let fix = registry(&[])
            .propose_fix(ErrorKind::PermissionError, &errors, &server("node"))
            .await
            .unwrap();

        assert!(!fix.is_automatic());
        let change = fix.find_change(ChangeKind::Permission).unwrap();
        assert!(change.before.is_none() && change.after.is_none());
    }

    #[tokio::test]
    async fn test_config_fix_is_automatic() {
        let errors = vec![
            ErrorRecord::new(ErrorKind::ConfigError, "Unexpected token }").for_server("s1"),
            ErrorRecord::new(ErrorKind::ConfigError, "Trailing comma").for_server("s1"),
        ];
        let fix = registry(&[])
            .propose_fix(ErrorKind::ConfigError, &errors, &server("node"))
            .await
            .unwrap();

        assert!(fix.is_automatic());
        assert_eq!(fix.changes().len(), 1);
        assert_eq!(fix.changes()[0].kind, ChangeKind::ConfigField);
    }

    #[tokio::test]
    async fn test_kinds_without_strategy() {
        let registry = registry(&["python3"]);
        for kind in [
            ErrorKind::NetworkError,
            ErrorKind::EnvironmentError,
            ErrorKind::UnknownError,
        ] {
            let errors = vec![ErrorRecord::new(kind, "boom").for_server("s1")];
            assert!(registry
                .propose_fix(kind, &errors, &server("python"))
                .await
                .is_none());
        }
    }

    #[test]
    fn test_extract_missing_command_variants() {
        assert_eq!(
            extract_missing_command("Command \"python\" not found in PATH").as_deref(),
            Some("python")
        );
        assert_eq!(
            extract_missing_command("bash: npx: command not found").as_deref(),
            Some("npx")
        );
        assert_eq!(
            extract_missing_command("Error: spawn uvx ENOENT").as_deref(),
            Some("uvx")
        );
    }

    #[test]
    fn test_extract_missing_module_variants() {
        assert_eq!(
            extract_missing_module("Error: Cannot find module '@scope/pkg'").as_deref(),
            Some("@scope/pkg")
        );
        assert_eq!(
            extract_missing_module("ModuleNotFoundError: No module named 'mcp'").as_deref(),
            Some("mcp")
        );
    }

    #[test]
    fn test_bundled_runtime_candidate() {
        let commands = CommandConfig {
            bundled_runtime_dir: Some("/opt/runtime".to_string()),
            ..CommandConfig::default()
        };
        let registry = StrategyRegistry::new(Arc::new(StaticProber::default()), &commands);

        assert_eq!(
            registry.candidates_for("npx"),
            vec!["/opt/runtime/bin/npx".to_string()]
        );
        assert_eq!(
            registry.candidates_for("node"),
            vec!["nodejs".to_string(), "/opt/runtime/bin/node".to_string()]
        );
    }
}
