//! Fix execution
//!
//! Applies one fix at a time through the [`ConfigManager`], dispatched by the
//! kind of error the fix addresses. Every outcome, including collaborator
//! errors and timeouts, comes back as a [`FixResult`]; nothing here returns
//! `Err` or retries.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::config_store::{ConfigManager, FieldChange};
use crate::error::ConfigStoreError;
use crate::types::{
    Change, ChangeKind, ClientTarget, ErrorKind, Fix, FixFailure, FixResult, McpServer,
    ServerRegistry,
};

/// How the fix reached the executor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Automatic path; only automatic fixes may mutate
    Unattended,
    /// The user accepted this fix
    Confirmed,
}

pub struct FixExecutor {
    config: Arc<dyn ConfigManager>,
    timeout: Duration,
}

impl FixExecutor {
    pub fn new(config: Arc<dyn ConfigManager>, timeout: Duration) -> Self {
        Self { config, timeout }
    }

    /// Apply a fix without a human in the loop
    #[instrument(skip_all, fields(fix = %fix.id()))]
    pub async fn apply_fix(&self, fix: &Fix, servers: &ServerRegistry) -> FixResult {
        self.execute(fix, servers, Mode::Unattended).await
    }

    /// Apply a fix the user explicitly accepted.
    ///
    /// Field-style changes are persisted even for non-automatic fixes.
    /// Permission and package changes still fail as manual steps.
    #[instrument(skip_all, fields(fix = %fix.id()))]
    pub async fn apply_confirmed(&self, fix: &Fix, servers: &ServerRegistry) -> FixResult {
        self.execute(fix, servers, Mode::Confirmed).await
    }

    async fn execute(&self, fix: &Fix, servers: &ServerRegistry, mode: Mode) -> FixResult {
        let outcome = match mode {
            Mode::Unattended => self.dispatch(fix, servers).await,
            Mode::Confirmed => self.dispatch_confirmed(fix, servers).await,
        };

        match outcome {
            Ok(changes) => {
                info!(changes = changes.len(), "fix applied");
                FixResult::applied(fix.id().clone(), changes)
            }
            Err(failure) if failure.message == FixFailure::ALREADY_VALID => {
                debug!("nothing to repair");
                FixResult::failed(fix.id().clone(), failure)
            }
            Err(failure) => {
                warn!(kind = %failure.kind, "fix not applied: {}", failure.message);
                FixResult::failed(fix.id().clone(), failure)
            }
        }
    }

    async fn dispatch(&self, fix: &Fix, servers: &ServerRegistry) -> Result<Vec<Change>, FixFailure> {
        match fix.error().kind() {
            ErrorKind::PathError => self.apply_path(fix, servers).await,
            ErrorKind::PermissionError => Err(manual_step(fix)),
            ErrorKind::ConfigError => self.apply_config(fix, servers).await,
            kind @ (ErrorKind::NetworkError
            | ErrorKind::EnvironmentError
            | ErrorKind::UnknownError) => {
                Err(FixFailure::unknown(format!("No automatic repair for {}", kind)))
            }
        }
    }

    async fn dispatch_confirmed(
        &self,
        fix: &Fix,
        servers: &ServerRegistry,
    ) -> Result<Vec<Change>, FixFailure> {
        let needs_human = fix.error().kind() == ErrorKind::PermissionError
            || fix
                .changes()
                .iter()
                .any(|c| matches!(c.kind, ChangeKind::Permission | ChangeKind::Package));
        if needs_human {
            return Err(manual_step(fix));
        }

        let fields: Vec<&Change> = fix
            .changes()
            .iter()
            .filter(|c| FieldChange::from_change(c).is_some())
            .collect();

        if fields.is_empty() {
            // Nothing to substitute; a confirmed syntax repair runs as usual
            return match fix.error().kind() {
                ErrorKind::ConfigError => self.apply_config(fix, servers).await,
                kind => Err(FixFailure::unknown(format!(
                    "Fix for {} has no change that can be applied",
                    kind
                ))),
            };
        }

        self.persist(&fields, servers).await
    }

    async fn apply_path(&self, fix: &Fix, servers: &ServerRegistry) -> Result<Vec<Change>, FixFailure> {
        if !fix.is_automatic() {
            return Err(FixFailure::manual(
                ErrorKind::PathError,
                "Fix requires confirmation before it can be applied",
            ));
        }

        let Some(change) = fix.find_change(ChangeKind::Command) else {
            return Err(FixFailure::unknown("Path fix has no command change"));
        };

        self.persist(&[change], servers).await
    }

    async fn apply_config(&self, fix: &Fix, servers: &ServerRegistry) -> Result<Vec<Change>, FixFailure> {
        let server = owning_server(fix, servers)?;

        let repaired = self
            .bounded(
                "repair_config",
                self.config.repair_config(&server.config_path, server.client),
            )
            .await?;

        if repaired {
            Ok(fix.changes().to_vec())
        } else {
            Err(FixFailure::manual(
                ErrorKind::ConfigError,
                FixFailure::ALREADY_VALID,
            ))
        }
    }

    /// Write field changes, one config call per client file
    async fn persist(&self, changes: &[&Change], servers: &ServerRegistry) -> Result<Vec<Change>, FixFailure> {
        let mut batches: Vec<(ClientTarget, Vec<FieldChange>)> = Vec::new();

        for change in changes {
            let server = servers.get(&change.server).ok_or_else(|| {
                FixFailure::unknown(format!("Server '{}' is not registered", change.server))
            })?;
            let field = FieldChange::from_change(change).ok_or_else(|| {
                FixFailure::unknown(format!("Change '{}' has no value to write", change.description))
            })?;

            let target = server.target();
            match batches.iter_mut().find(|(t, _)| *t == target) {
                Some((_, fields)) => fields.push(field),
                None => batches.push((target, vec![field])),
            }
        }

        for (target, fields) in &batches {
            self.bounded(
                "update_client_config",
                self.config
                    .update_client_config(target.client, &target.config_path, fields),
            )
            .await?;
        }

        Ok(changes.iter().map(|c| (*c).clone()).collect())
    }

    /// Bound a collaborator call and fold every failure into `UnknownError`
    async fn bounded<T, F>(&self, operation: &str, call: F) -> Result<T, FixFailure>
    where
        F: Future<Output = Result<T, ConfigStoreError>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(FixFailure::unknown(e.to_string())),
            Err(_) => Err(FixFailure::unknown(format!(
                "{} timed out after {}s",
                operation,
                self.timeout.as_secs_f32()
            ))),
        }
    }
}

fn owning_server<'a>(fix: &Fix, servers: &'a ServerRegistry) -> Result<&'a McpServer, FixFailure> {
    let name = fix
        .error()
        .server()
        .ok_or_else(|| FixFailure::unknown("Fix is not bound to a server"))?;
    servers
        .get(name)
        .ok_or_else(|| FixFailure::unknown(format!("Server '{}' is not registered", name)))
}

fn manual_step(fix: &Fix) -> FixFailure {
    FixFailure::manual(
        fix.error().kind(),
        format!("Manual step required: {}", fix.description()),
    )
}
