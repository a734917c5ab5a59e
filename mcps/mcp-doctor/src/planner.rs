//! Repair plan construction
//!
//! Groups errors by owning server and then by kind, asks the strategy
//! registry for one fix per group, and aggregates the result into a
//! [`RepairPlan`]. Building a plan never fails: groups without a strategy are
//! left out of `fixes` but stay in `errors`.

use tracing::{debug, warn};

use crate::strategies::StrategyRegistry;
use crate::types::{ErrorKind, ErrorRecord, RepairPlan, ServerRegistry};

/// Errors for one server, grouped by kind in first-appearance order
struct ServerGroup<'a> {
    server: &'a str,
    kinds: Vec<(ErrorKind, Vec<ErrorRecord>)>,
}

/// Build a repair plan for `errors`.
///
/// Deterministic given the same errors and the same set of available
/// alternative commands.
pub async fn build_plan(
    strategies: &StrategyRegistry,
    servers: &ServerRegistry,
    errors: Vec<ErrorRecord>,
) -> RepairPlan {
    let mut fixes = Vec::new();

    for group in group_errors(&errors) {
        let Some(server) = servers.get(group.server) else {
            warn!(server = group.server, "errors reference an unregistered server, skipping");
            continue;
        };

        for (kind, records) in &group.kinds {
            debug!(
                server = group.server,
                %kind,
                count = records.len(),
                "proposing fix"
            );
            match strategies.propose_fix(*kind, records, server).await {
                Some(fix) => fixes.push(fix),
                None => debug!(server = group.server, %kind, "no strategy matched"),
            }
        }
    }

    RepairPlan::new(errors, fixes)
}

/// Partition by server name, then by kind. Errors without a server are
/// out of scope for mutation-based repair and are dropped here.
fn group_errors(errors: &[ErrorRecord]) -> Vec<ServerGroup<'_>> {
    let mut groups: Vec<ServerGroup<'_>> = Vec::new();

    for error in errors {
        let Some(server) = error.server() else {
            continue;
        };

        let index = match groups.iter().position(|g| g.server == server) {
            Some(i) => i,
            None => {
                groups.push(ServerGroup {
                    server,
                    kinds: Vec::new(),
                });
                groups.len() - 1
            }
        };

        let kinds = &mut groups[index].kinds;
        match kinds.iter_mut().find(|(k, _)| *k == error.kind()) {
            Some((_, records)) => records.push(error.clone()),
            None => kinds.push((error.kind(), vec![error.clone()])),
        }
    }

    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::StaticProber;
    use crate::settings::CommandConfig;
    use crate::types::{ChangeKind, ClientType, McpServer};
    use std::path::PathBuf;
    use std::sync::Arc;

    fn servers() -> ServerRegistry {
        let server = |name: &str, command: &str| McpServer {
            name: name.to_string(),
            client: ClientType::Cursor,
            config_path: PathBuf::from("/tmp/mcp.json"),
            command: command.to_string(),
            args: vec![],
            env: Default::default(),
        };
        ServerRegistry::new(vec![server("s1", "python"), server("s2", "node")])
    }

    fn strategies() -> StrategyRegistry {
        StrategyRegistry::new(
            Arc::new(StaticProber::new(["python3"])),
            &CommandConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_python_path_error_plan() {
        let errors = vec![ErrorRecord::new(
            ErrorKind::PathError,
            "Command \"python\" not found in PATH",
        )
        .for_server("s1")];

        let plan = build_plan(&strategies(), &servers(), errors).await;

        assert_eq!(plan.fixes.len(), 1);
        let fix = &plan.fixes[0];
        assert!(fix.is_automatic());
        assert_eq!(fix.changes()[0].kind, ChangeKind::Command);
        // Command substitutions always need a human
        assert!(plan.requires_confirmation);
    }

    #[tokio::test]
    async fn test_same_kind_errors_grouped_into_one_fix() {
        let errors = vec![
            ErrorRecord::new(ErrorKind::ConfigError, "Unexpected token").for_server("s1"),
            ErrorRecord::new(ErrorKind::ConfigError, "Trailing comma").for_server("s1"),
        ];

        let plan = build_plan(&strategies(), &servers(), errors).await;

        assert_eq!(plan.errors.len(), 2);
        assert_eq!(plan.fixes.len(), 1);
        assert!(!plan.requires_confirmation);
    }

    #[tokio::test]
    async fn test_permission_error_requires_confirmation() {
        let errors =
            vec![ErrorRecord::new(ErrorKind::PermissionError, "EACCES").for_server("s1")];

        let plan = build_plan(&strategies(), &servers(), errors).await;

        assert_eq!(plan.fixes.len(), 1);
        assert!(!plan.fixes[0].is_automatic());
        assert!(plan.requires_confirmation);
    }

    #[tokio::test]
    async fn test_serverless_and_unknown_server_errors_ignored() {
        let errors = vec![
            ErrorRecord::new(ErrorKind::ConfigError, "client-wide"),
            ErrorRecord::new(ErrorKind::ConfigError, "ghost").for_server("missing"),
            ErrorRecord::new(ErrorKind::NetworkError, "ECONNREFUSED").for_server("s2"),
        ];

        let plan = build_plan(&strategies(), &servers(), errors).await;

        assert!(plan.fixes.is_empty());
        assert_eq!(plan.errors.len(), 3);
        assert_eq!(plan.unaddressed_errors().len(), 3);
    }

    #[tokio::test]
    async fn test_plan_order_follows_grouping() {
        let errors = vec![
            ErrorRecord::new(ErrorKind::ConfigError, "bad").for_server("s2"),
            ErrorRecord::new(ErrorKind::PermissionError, "EACCES").for_server("s1"),
            ErrorRecord::new(ErrorKind::PermissionError, "EPERM").for_server("s2"),
        ];

        let plan = build_plan(&strategies(), &servers(), errors).await;
        let ids: Vec<_> = plan.fixes.iter().map(|f| f.id().to_string()).collect();
        assert_eq!(ids, vec!["s2:config", "s2:permission", "s1:permission"]);
    }

    #[tokio::test]
    async fn test_plan_is_deterministic() {
        let errors = vec![
            ErrorRecord::new(ErrorKind::PathError, "Command \"python\" not found").for_server("s1"),
            ErrorRecord::new(ErrorKind::ConfigError, "bad").for_server("s2"),
            ErrorRecord::new(ErrorKind::PermissionError, "EACCES").for_server("s2"),
        ];

        let first = build_plan(&strategies(), &servers(), errors.clone()).await;
        let second = build_plan(&strategies(), &servers(), errors).await;

        assert_eq!(first.fixes, second.fixes);
        assert_eq!(first.requires_confirmation, second.requires_confirmation);
    }
}
