//! Repair engine
//!
//! Owns the collaborators and runs repair cycles:
//!
//! - [`RepairEngine::fix_all_issues`]: plan, then apply automatic fixes only
//! - [`RepairEngine::apply_confirmed`]: apply the fixes a user accepted
//! - [`RepairEngine::advise`]: ask the advisor about unaddressed errors
//! - [`RepairEngine::auto_repair`]: backup then syntax-repair every client file
//!
//! Fixes in a plan are applied one at a time in plan order while the cycle
//! holds the locks of every server it touches. Every client file a cycle may
//! write is backed up first, so [`RepairEngine::restore`] can undo it.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::advisor::{merge_report, AdvisorSummary, AiAdvisor, CommandAdvisor};
use crate::backup::{BackupManager, FileBackupManager};
use crate::config_store::{self, ConfigManager, FieldChange, JsonConfigManager};
use crate::error::{DoctorError, DoctorResult};
use crate::events::RepairEventSender;
use crate::executor::FixExecutor;
use crate::locks::ServerLocks;
use crate::notify::InboxNotifier;
use crate::planner;
use crate::probe::{CommandProber, SystemProber};
use crate::settings::{CommandConfig, DoctorConfig, TimeoutConfig};
use crate::strategies::StrategyRegistry;
use crate::types::{
    ClientTarget, ClientType, ErrorKind, ErrorRecord, Fix, FixFailure, FixId, FixResult,
    RepairPlan, ServerRegistry,
};

// ============================================================================
// Reports
// ============================================================================

/// Outcome of an unattended run
#[derive(Debug, Clone, Serialize)]
pub struct FixAllReport {
    pub plan_id: String,
    /// One per automatic fix, in plan order
    pub results: Vec<FixResult>,
    /// Manual fixes, never applied on this path
    pub skipped: Vec<Fix>,
    /// Errors no fix addressed
    pub unaddressed: Vec<ErrorRecord>,
}

impl FixAllReport {
    pub fn applied(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }
}

/// Outcome of applying user-accepted fixes
#[derive(Debug, Clone, Serialize)]
pub struct ConfirmationReport {
    pub plan_id: String,
    /// One per accepted fix, in plan order
    pub results: Vec<FixResult>,
    pub discarded: Vec<FixId>,
}

// ============================================================================
// Engine
// ============================================================================

pub struct RepairEngine {
    strategies: StrategyRegistry,
    executor: FixExecutor,
    config: Arc<dyn ConfigManager>,
    backups: Arc<dyn BackupManager>,
    advisor: Option<Arc<dyn AiAdvisor>>,
    notifier: Option<InboxNotifier>,
    targets: Vec<ClientTarget>,
    locks: ServerLocks,
    events: RepairEventSender,
    timeouts: TimeoutConfig,
}

pub struct RepairEngineBuilder {
    config: Arc<dyn ConfigManager>,
    backups: Arc<dyn BackupManager>,
    prober: Arc<dyn CommandProber>,
    commands: CommandConfig,
    advisor: Option<Arc<dyn AiAdvisor>>,
    notifier: Option<InboxNotifier>,
    targets: Vec<ClientTarget>,
    events: RepairEventSender,
    timeouts: TimeoutConfig,
}

impl RepairEngineBuilder {
    pub fn prober(mut self, prober: Arc<dyn CommandProber>) -> Self {
        self.prober = prober;
        self
    }

    pub fn commands(mut self, commands: CommandConfig) -> Self {
        self.commands = commands;
        self
    }

    pub fn advisor(mut self, advisor: Arc<dyn AiAdvisor>) -> Self {
        self.advisor = Some(advisor);
        self
    }

    pub fn notifier(mut self, notifier: InboxNotifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Client files `auto_repair` and `load_servers` work on
    pub fn targets(mut self, targets: Vec<ClientTarget>) -> Self {
        self.targets = targets;
        self
    }

    pub fn events(mut self, events: RepairEventSender) -> Self {
        self.events = events;
        self
    }

    pub fn timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn build(self) -> RepairEngine {
        RepairEngine {
            strategies: StrategyRegistry::new(self.prober, &self.commands),
            executor: FixExecutor::new(self.config.clone(), self.timeouts.mutation()),
            config: self.config,
            backups: self.backups,
            advisor: self.advisor,
            notifier: self.notifier,
            targets: self.targets,
            locks: ServerLocks::new(),
            events: self.events,
            timeouts: self.timeouts,
        }
    }
}

impl RepairEngine {
    pub fn builder(
        config: Arc<dyn ConfigManager>,
        backups: Arc<dyn BackupManager>,
    ) -> RepairEngineBuilder {
        RepairEngineBuilder {
            config,
            backups,
            prober: Arc::new(SystemProber::default()),
            commands: CommandConfig::default(),
            advisor: None,
            notifier: None,
            targets: Vec::new(),
            events: RepairEventSender::none(),
            timeouts: TimeoutConfig::default(),
        }
    }

    /// Wire the default file-backed collaborators from settings
    pub fn from_settings(settings: &DoctorConfig) -> RepairEngineBuilder {
        let mut builder = Self::builder(
            Arc::new(JsonConfigManager::new()),
            Arc::new(FileBackupManager::new(
                settings.backup_dir(),
                settings.backups.min_interval_mins,
            )),
        )
        .prober(Arc::new(SystemProber::new(settings.timeouts.probe())))
        .commands(settings.commands.clone())
        .targets(settings.client_targets())
        .timeouts(settings.timeouts.clone());

        if let Some(advisor) = CommandAdvisor::from_argv(&settings.advisor.command) {
            builder = builder.advisor(Arc::new(advisor));
        }
        if settings.notify.inbox {
            builder = builder.notifier(InboxNotifier::resolve(settings.inbox_path()));
        }

        builder
    }

    pub fn targets(&self) -> &[ClientTarget] {
        &self.targets
    }

    pub fn has_advisor(&self) -> bool {
        self.advisor.is_some()
    }

    /// Read server registrations from every configured client file
    pub async fn load_servers(&self) -> ServerRegistry {
        config_store::load_registry(self.config.as_ref(), &self.targets).await
    }

    pub async fn build_plan(&self, servers: &ServerRegistry, errors: Vec<ErrorRecord>) -> RepairPlan {
        planner::build_plan(&self.strategies, servers, errors).await
    }

    /// Plan, then apply every automatic fix in plan order.
    ///
    /// Manual fixes are reported as skipped and never applied here.
    #[instrument(skip_all, fields(errors = errors.len()))]
    pub async fn fix_all_issues(&self, servers: &ServerRegistry, errors: Vec<ErrorRecord>) -> FixAllReport {
        let plan = self.build_plan(servers, errors).await;
        let _guard = self.lock_fixes(servers, plan.fixes.iter()).await;

        let automatic: Vec<&Fix> = plan.fixes.iter().filter(|f| f.is_automatic()).collect();
        let unsaved = self.snapshot(servers, &automatic).await;

        let mut results = Vec::new();
        let mut skipped = Vec::new();

        for fix in &plan.fixes {
            if fix.is_automatic() {
                let result = match backup_failure(fix, servers, &unsaved) {
                    Some(result) => result,
                    None => self.executor.apply_fix(fix, servers).await,
                };
                self.events.fix_applied(fix, &result);
                results.push(result);
            } else {
                self.events.fix_skipped(fix, "requires confirmation");
                skipped.push(fix.clone());
            }
        }

        let report = FixAllReport {
            plan_id: plan.id.clone(),
            unaddressed: plan.unaddressed_errors().into_iter().cloned().collect(),
            results,
            skipped,
        };

        info!(
            plan = %report.plan_id,
            applied = report.applied(),
            attempted = report.results.len(),
            skipped = report.skipped.len(),
            unaddressed = report.unaddressed.len(),
            "repair cycle finished"
        );

        self.notify_manual_steps(&report.skipped, &report.results).await;
        report
    }

    /// Apply the accepted fixes of `plan` in plan order and discard the rest.
    ///
    /// Every id must belong to the plan; nothing runs otherwise.
    #[instrument(skip_all, fields(plan = %plan.id, accepted = accepted.len()))]
    pub async fn apply_confirmed(
        &self,
        servers: &ServerRegistry,
        plan: &RepairPlan,
        accepted: &[FixId],
    ) -> DoctorResult<ConfirmationReport> {
        if let Some(unknown) = accepted.iter().find(|id| plan.find_fix(id).is_none()) {
            return Err(DoctorError::FixNotFound(unknown.clone()));
        }

        let chosen: Vec<&Fix> = plan
            .fixes
            .iter()
            .filter(|f| accepted.contains(f.id()))
            .collect();
        let _guard = self.lock_fixes(servers, chosen.iter().copied()).await;
        let unsaved = self.snapshot(servers, &chosen).await;

        let mut results = Vec::new();
        let mut discarded = Vec::new();

        for fix in &plan.fixes {
            if accepted.contains(fix.id()) {
                let result = match backup_failure(fix, servers, &unsaved) {
                    Some(result) => result,
                    None => self.executor.apply_confirmed(fix, servers).await,
                };
                self.events.fix_applied(fix, &result);
                results.push(result);
            } else {
                self.events.fix_discarded(fix);
                discarded.push(fix.id().clone());
            }
        }

        let failed: Vec<FixResult> = results
            .iter()
            .filter(|r| !r.success && !r.is_already_valid())
            .cloned()
            .collect();
        self.notify_manual_steps(&[], &failed).await;

        Ok(ConfirmationReport {
            plan_id: plan.id.clone(),
            results,
            discarded,
        })
    }

    /// Ask the advisor about errors the rules could not address and merge
    /// its suggestions into `plan` as manual fixes.
    ///
    /// Returns `None` when there is nothing to ask, no advisor, or the
    /// advisor failed or timed out.
    #[instrument(skip_all, fields(plan = %plan.id))]
    pub async fn advise(&self, plan: &mut RepairPlan, log: &str) -> Option<AdvisorSummary> {
        if plan.unaddressed_errors().is_empty() {
            return None;
        }
        let advisor = self.advisor.as_ref()?;

        let call = advisor.analyze_log(log, &plan.errors);
        match tokio::time::timeout(self.timeouts.advisor(), call).await {
            Ok(Ok(report)) => Some(merge_report(plan, report)),
            Ok(Err(e)) => {
                warn!("advisor failed: {:#}", e);
                None
            }
            Err(_) => {
                warn!(secs = self.timeouts.advisor_secs, "advisor timed out");
                None
            }
        }
    }

    /// Best-effort background healing: back up each client file if due,
    /// then repair its syntax. Returns whether anything was repaired.
    #[instrument(skip_all, fields(clients = self.targets.len()))]
    pub async fn auto_repair(&self) -> bool {
        let keys = self
            .targets
            .iter()
            .map(|t| ServerLocks::file_key(&t.config_path));
        let _guard = self.locks.acquire(keys).await;

        let mut repaired = Vec::new();

        for target in &self.targets {
            if !target.config_path.exists() {
                continue;
            }

            if let Err(e) = self.backups.create_automatic_backup_if_needed(target).await {
                warn!(client = %target.client, "backup failed, not repairing: {}", e);
                continue;
            }

            let call = self.config.repair_config(&target.config_path, target.client);
            match tokio::time::timeout(self.timeouts.mutation(), call).await {
                Ok(Ok(true)) => repaired.push(target.config_path.clone()),
                Ok(Ok(false)) => {}
                Ok(Err(e)) => warn!(client = %target.client, "config repair failed: {}", e),
                Err(_) => warn!(client = %target.client, "config repair timed out"),
            }
        }

        let any = !repaired.is_empty();
        info!(repaired = repaired.len(), "auto-repair finished");
        self.events.auto_repair_completed(self.targets.len(), any);

        if let Some(notifier) = &self.notifier {
            if let Err(e) = notifier.notify_config_repaired(&repaired).await {
                warn!("failed to write inbox notification: {}", e);
            }
        }

        any
    }

    /// Put the newest backup of `client`'s config file back in place
    #[instrument(skip(self))]
    pub async fn restore(&self, client: ClientType) -> DoctorResult<PathBuf> {
        let target = self
            .targets
            .iter()
            .find(|t| t.client == client)
            .ok_or(DoctorError::UnknownClient(client))?;

        let _guard = self
            .locks
            .acquire([ServerLocks::file_key(&target.config_path)])
            .await;
        Ok(self.backups.restore_latest(target).await?)
    }

    async fn lock_fixes<'a>(
        &self,
        servers: &ServerRegistry,
        fixes: impl Iterator<Item = &'a Fix>,
    ) -> crate::locks::CycleGuard {
        let touched = fixes
            .flat_map(|f| f.changes().iter().map(|c| c.server.as_str()).chain(f.error().server()))
            .filter_map(|name| servers.get(name));
        self.locks.acquire(ServerLocks::keys_for(touched)).await
    }

    /// Back up every client file `fixes` may write, once each.
    /// Returns the files that could not be backed up.
    async fn snapshot(&self, servers: &ServerRegistry, fixes: &[&Fix]) -> Vec<PathBuf> {
        let mut targets: Vec<ClientTarget> = Vec::new();
        for fix in fixes.iter().filter(|f| may_write(f)) {
            for target in fix_targets(fix, servers) {
                if !targets.contains(&target) {
                    targets.push(target);
                }
            }
        }

        let mut unsaved = Vec::new();
        for target in &targets {
            let call = self.backups.create_backup(target);
            let outcome = match tokio::time::timeout(self.timeouts.mutation(), call).await {
                Ok(Ok(backup)) => {
                    debug!(client = %target.client, backup = %backup.display(), "snapshot taken");
                    continue;
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => "timed out".to_string(),
            };
            warn!(client = %target.client, "backup failed, not applying fixes: {}", outcome);
            unsaved.push(target.config_path.clone());
        }
        unsaved
    }

    async fn notify_manual_steps(&self, skipped: &[Fix], results: &[FixResult]) {
        let Some(notifier) = &self.notifier else {
            return;
        };

        let failed: Vec<FixResult> = results
            .iter()
            .filter(|r| !r.success && !r.is_already_valid())
            .cloned()
            .collect();
        if let Err(e) = notifier.notify_manual_steps(skipped, &failed).await {
            warn!("failed to write inbox notification: {}", e);
        }
    }
}

/// Whether executing `fix` can write a client file
fn may_write(fix: &Fix) -> bool {
    fix.error().kind() == ErrorKind::ConfigError
        || fix
            .changes()
            .iter()
            .any(|c| FieldChange::from_change(c).is_some())
}

/// Client files of every server the fix names
fn fix_targets<'a>(
    fix: &'a Fix,
    servers: &'a ServerRegistry,
) -> impl Iterator<Item = ClientTarget> + 'a {
    fix.changes()
        .iter()
        .map(|c| c.server.as_str())
        .chain(fix.error().server())
        .filter_map(|name| servers.get(name))
        .map(|server| server.target())
}

/// A failed result for a writing fix whose file has no fresh backup
fn backup_failure(fix: &Fix, servers: &ServerRegistry, unsaved: &[PathBuf]) -> Option<FixResult> {
    if unsaved.is_empty() || !may_write(fix) {
        return None;
    }
    let target = fix_targets(fix, servers).find(|t| unsaved.contains(&t.config_path))?;
    Some(FixResult::failed(
        fix.id().clone(),
        FixFailure::manual(
            fix.error().kind(),
            format!(
                "Backup of {} failed; fix not applied",
                target.config_path.display()
            ),
        ),
    ))
}
