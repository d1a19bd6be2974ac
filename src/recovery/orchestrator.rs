//! Recovery Orchestrator: the seven-step disaster-recovery state machine
//!
//! pending → backing-up → generating-domains → deploying → updating-dns →
//! restoring-data → reconfiguring → notifying → completed
//!
//! Any fatal step failure jumps straight to `failed`. Completed steps are
//! not rolled back. At most one run is active at a time; a second trigger
//! is rejected, never queued.

use chrono::Utc;
use futures::future::join_all;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::archive::Archiver;
use super::domains::generate_domains;
use super::run::{
    Backup, DomainMap, DomainRole, RecoveryPhase, RecoveryRun, RecoveryStatus, RecoveryStep,
    RecoveryTestResult, StepOutcome,
};
use crate::alerts::AlertSink;
use crate::collaborators::{
    CommandRunner, ConfigStore, DeploymentProvider, DnsProvider, HttpClient, HttpRequest,
};
use crate::config::defaults::PROVIDER_TIMEOUT_SECS;
use crate::config::{BotWebhookConfig, DomainSuffixes, RecoveryConfig};
use crate::storage::StateStore;
use crate::types::{AlertKind, Severity};

#[derive(Debug, thiserror::Error)]
pub enum RecoveryError {
    #[error("recovery {0} is already in progress")]
    AlreadyInProgress(Uuid),
    #[error("recovery {0} is not active")]
    NotActive(Uuid),
    #[error("failed to scan backups: {0}")]
    Backups(#[from] std::io::Error),
}

/// Collaborators the orchestrator drives
pub struct RecoveryDeps {
    pub providers: Vec<Arc<dyn DeploymentProvider>>,
    pub dns: Option<Arc<dyn DnsProvider>>,
    pub config_store: Arc<dyn ConfigStore>,
    pub http: Arc<dyn HttpClient>,
    pub commands: Arc<dyn CommandRunner>,
    pub alerts: Arc<AlertSink>,
    pub store: Arc<dyn StateStore>,
}

/// Read-only view of the in-progress run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveRunInfo {
    pub id: Uuid,
    pub reason: String,
    pub phase: RecoveryPhase,
}

struct ActiveRun {
    info: ActiveRunInfo,
    cancel: CancellationToken,
}

/// Clears the active marker on drop, but only if it still names this run
struct ActiveGuard<'a> {
    slot: &'a Mutex<Option<ActiveRun>>,
    id: Uuid,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        if slot.as_ref().map(|a| a.info.id) == Some(self.id) {
            *slot = None;
        }
    }
}

/// Why a run stopped before completing
enum Halt {
    Failed,
    Cancelled,
}

pub struct RecoveryOrchestrator {
    providers: Vec<Arc<dyn DeploymentProvider>>,
    dns: Option<Arc<dyn DnsProvider>>,
    config_store: Arc<dyn ConfigStore>,
    http: Arc<dyn HttpClient>,
    archiver: Archiver,
    alerts: Arc<AlertSink>,
    store: Arc<dyn StateStore>,
    suffixes: DomainSuffixes,
    bot_webhook: Option<BotWebhookConfig>,
    history: RwLock<VecDeque<RecoveryRun>>,
    history_limit: usize,
    active: Mutex<Option<ActiveRun>>,
}

impl RecoveryOrchestrator {
    pub fn new(config: &RecoveryConfig, deps: RecoveryDeps) -> Self {
        let mut history: Vec<RecoveryRun> = match deps.store.recent_recoveries(config.history_limit) {
            Ok(runs) => runs,
            Err(e) => {
                warn!(error = %e, "Failed to load recovery history, starting empty");
                Vec::new()
            }
        };
        history.reverse();

        Self {
            providers: deps.providers,
            dns: deps.dns,
            config_store: deps.config_store,
            http: deps.http,
            archiver: Archiver::new(config, deps.commands),
            alerts: deps.alerts,
            store: deps.store,
            suffixes: config.domain_suffixes.clone(),
            bot_webhook: config.bot_webhook.clone(),
            history: RwLock::new(history.into_iter().collect()),
            history_limit: config.history_limit.max(1),
            active: Mutex::new(None),
        }
    }

    pub fn is_active(&self) -> bool {
        self.lock_active().is_some()
    }

    pub fn active_run(&self) -> Option<ActiveRunInfo> {
        self.lock_active().as_ref().map(|a| a.info.clone())
    }

    /// Finished runs, oldest first
    pub async fn history(&self) -> Vec<RecoveryRun> {
        self.history.read().await.iter().cloned().collect()
    }

    pub async fn list_backups(&self) -> Result<Vec<Backup>, RecoveryError> {
        Ok(self.archiver.list().await?)
    }

    /// Cancel the active run. Clears the marker immediately; the in-flight
    /// step finishes and the run stops at the next step boundary.
    pub fn cancel(&self, id: Uuid) -> Result<(), RecoveryError> {
        let mut slot = self.lock_active();
        match slot.as_ref() {
            Some(active) if active.info.id == id => {
                active.cancel.cancel();
                *slot = None;
                info!(run_id = %id, "Recovery cancelled");
                Ok(())
            }
            _ => Err(RecoveryError::NotActive(id)),
        }
    }

    /// Execute the full seven-step recovery.
    ///
    /// Returns `Err` only when another run is active. Step failures produce
    /// `Ok(run)` with status `Failed`.
    pub async fn start_full_recovery(&self, reason: &str) -> Result<RecoveryRun, RecoveryError> {
        let mut run = RecoveryRun::new(reason);
        let (_guard, cancel) = self.begin(&run)?;

        info!(run_id = %run.id, reason = %reason, "🚑 Starting full recovery");
        let outcome = self.execute(&mut run, &cancel).await;
        self.finish(run, outcome, &cancel).await
    }

    /// Restore application state from an existing archive as its own run
    pub async fn restore_from_backup(&self, backup: &Backup) -> Result<RecoveryRun, RecoveryError> {
        let mut run = RecoveryRun::new("backup_restore");
        let (_guard, cancel) = self.begin(&run)?;

        info!(run_id = %run.id, backup = %backup.name, "Restoring from backup");
        let outcome = self.extract_backup(&mut run, backup, &cancel).await;
        self.finish(run, outcome, &cancel).await
    }

    /// Full recovery with reason "test"; success means the run completed
    pub async fn test_recovery(&self) -> RecoveryTestResult {
        match self.start_full_recovery("test").await {
            Ok(run) => RecoveryTestResult {
                success: run.status == RecoveryStatus::Completed,
                error: run.error.clone(),
                recovery: Some(run),
            },
            Err(e) => RecoveryTestResult {
                success: false,
                recovery: None,
                error: Some(e.to_string()),
            },
        }
    }

    // ========================================================================
    // State machine
    // ========================================================================

    async fn execute(&self, run: &mut RecoveryRun, cancel: &CancellationToken) -> Result<(), Halt> {
        // 1. Backup
        self.enter(run, RecoveryStep::Backup, cancel)?;
        let started = Utc::now();
        let result = self.archiver.create(run.id).await.map(|b| {
            let detail = format!("archived to {} ({} bytes)", b.path.display(), b.size);
            (b, detail)
        });
        let backup = self.conclude(run, RecoveryStep::Backup, started, result)?;
        run.backup = Some(backup.clone());

        // 2. Domain generation
        self.enter(run, RecoveryStep::GenerateDomains, cancel)?;
        let started = Utc::now();
        let result = generate_domains(&self.suffixes, started)
            .map(|d| {
                let detail = d.to_string();
                (d, detail)
            })
            .map_err(|e| format!("entropy source unavailable: {}", e));
        let domains = self.conclude(run, RecoveryStep::GenerateDomains, started, result)?;
        run.new_domains = Some(domains.clone());

        // 3. Deployment: independent per provider, fatal only if none succeed
        self.enter(run, RecoveryStep::Deploy, cancel)?;
        let started = Utc::now();
        let attempts = join_all(self.providers.iter().map(|provider| {
            let domains = &domains;
            async move { (provider, provider.deploy(domains).await) }
        }))
        .await;
        let attempted = attempts.len();
        let mut deployed = Vec::new();
        for (provider, result) in attempts {
            match result {
                Ok(deployment) => {
                    info!(run_id = %run.id, provider = %provider.name(), "Deployment succeeded");
                    deployed.push((Arc::clone(provider), deployment));
                }
                Err(e) => warn!(run_id = %run.id, provider = %provider.name(), error = %e, "Deployment failed"),
            }
        }
        let result = if deployed.is_empty() {
            Err(format!("no deployment provider succeeded ({} attempted)", attempted))
        } else {
            Ok(((), format!("{}/{} providers deployed", deployed.len(), attempted)))
        };
        self.conclude(run, RecoveryStep::Deploy, started, result)?;
        run.deployments = deployed.iter().map(|(_, d)| d.clone()).collect();

        // 4. DNS: best-effort per record
        self.enter(run, RecoveryStep::UpdateDns, cancel)?;
        let started = Utc::now();
        let detail = match (&self.dns, deployed.first()) {
            (Some(dns), Some((_, primary))) => {
                let target = primary
                    .endpoint
                    .clone()
                    .unwrap_or_else(|| primary.provider.clone());
                let mut updated = 0usize;
                for (role, host) in domains.iter() {
                    match dns.upsert_record(host, &target).await {
                        Ok(()) => updated += 1,
                        Err(e) => warn!(
                            run_id = %run.id,
                            role = %role,
                            host = %host,
                            error = %e,
                            "DNS update failed"
                        ),
                    }
                }
                format!("{}/{} records updated", updated, domains.len())
            }
            _ => "no DNS provider configured".to_string(),
        };
        self.conclude(run, RecoveryStep::UpdateDns, started, Ok(((), detail)))?;

        // 5. Data restore: fatal only if no deployment accepted the backup.
        // A deployment that rejects the restore is logged and stays live
        // without the data; the run continues on the ones that accepted it.
        self.enter(run, RecoveryStep::RestoreData, cancel)?;
        let started = Utc::now();
        let restores = join_all(deployed.iter().map(|(provider, deployment)| {
            let backup = &backup;
            async move { (provider.name().to_string(), provider.restore_data(deployment, backup).await) }
        }))
        .await;
        let mut accepted = 0usize;
        for (provider, result) in &restores {
            match result {
                Ok(()) => accepted += 1,
                Err(e) => warn!(run_id = %run.id, provider = %provider, error = %e, "Data restore failed"),
            }
        }
        let result = if accepted == 0 {
            Err(format!("no deployment accepted the backup ({} attempted)", restores.len()))
        } else {
            Ok(((), format!("{}/{} deployments restored", accepted, restores.len())))
        };
        self.conclude(run, RecoveryStep::RestoreData, started, result)?;

        // 6. Reconfiguration: hosting descriptors, then webhook registration
        self.enter(run, RecoveryStep::Reconfigure, cancel)?;
        let started = Utc::now();
        let result = self.reconfigure(&domains).await;
        self.conclude(run, RecoveryStep::Reconfigure, started, result)?;

        // 7. Notification
        self.enter(run, RecoveryStep::Notify, cancel)?;
        let started = Utc::now();
        let message = format!(
            "Recovery {} complete (reason: {}). New domains: {}",
            run.id, run.reason, domains
        );
        let alert = self
            .alerts
            .emit(AlertKind::RecoveryComplete, message, Severity::Info)
            .await;
        self.conclude(run, RecoveryStep::Notify, started, Ok(((), format!("alert {}", alert.id))))?;

        if cancel.is_cancelled() {
            return Err(Halt::Cancelled);
        }
        Ok(())
    }

    async fn extract_backup(
        &self,
        run: &mut RecoveryRun,
        backup: &Backup,
        cancel: &CancellationToken,
    ) -> Result<(), Halt> {
        self.enter(run, RecoveryStep::ExtractBackup, cancel)?;
        let started = Utc::now();
        let result = self
            .archiver
            .extract(backup)
            .await
            .map(|()| ((), format!("extracted {}", backup.path.display())));
        self.conclude(run, RecoveryStep::ExtractBackup, started, result)?;
        run.backup = Some(backup.clone());
        Ok(())
    }

    async fn reconfigure(&self, domains: &DomainMap) -> Result<((), String), String> {
        self.config_store
            .upsert(&domains.env_entries())
            .await
            .map_err(|e| format!("hosting configuration update failed: {}", e))?;

        let Some(webhook) = &self.bot_webhook else {
            return Ok(((), "hosting configuration updated".to_string()));
        };
        let Some(bot_host) = domains.get(DomainRole::Bot) else {
            return Err("no bot domain generated".to_string());
        };

        let webhook_url = format!("https://{}/webhook", bot_host);
        let body = serde_json::json!({
            "url": webhook_url,
            "max_connections": 100,
            "allowed_updates": ["message", "callback_query"],
        });
        let url = format!(
            "{}/bot{}/setWebhook",
            webhook.api_base.trim_end_matches('/'),
            webhook.bot_token
        );
        let resp = self
            .http
            .request(HttpRequest::post_json(url, body, Duration::from_secs(PROVIDER_TIMEOUT_SECS)))
            .await
            .map_err(|e| format!("webhook registration failed: {}", e))?;
        if !resp.is_success() {
            return Err(format!("webhook registration rejected with status {}", resp.status));
        }
        Ok(((), format!("hosting configuration updated, webhook set to {}", webhook_url)))
    }

    // ========================================================================
    // Run bookkeeping
    // ========================================================================

    fn lock_active(&self) -> std::sync::MutexGuard<'_, Option<ActiveRun>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Claim the active marker for `run` or reject
    fn begin(&self, run: &RecoveryRun) -> Result<(ActiveGuard<'_>, CancellationToken), RecoveryError> {
        let mut slot = self.lock_active();
        if let Some(active) = slot.as_ref() {
            warn!(
                active = %active.info.id,
                reason = %run.reason,
                "Recovery requested while another is in progress, rejecting"
            );
            return Err(RecoveryError::AlreadyInProgress(active.info.id));
        }
        let cancel = CancellationToken::new();
        *slot = Some(ActiveRun {
            info: ActiveRunInfo {
                id: run.id,
                reason: run.reason.clone(),
                phase: RecoveryPhase::Pending,
            },
            cancel: cancel.clone(),
        });
        Ok((
            ActiveGuard {
                slot: &self.active,
                id: run.id,
            },
            cancel,
        ))
    }

    /// Move to the phase of `step`, honouring cancellation at the boundary
    fn enter(&self, run: &mut RecoveryRun, step: RecoveryStep, cancel: &CancellationToken) -> Result<(), Halt> {
        if cancel.is_cancelled() {
            return Err(Halt::Cancelled);
        }
        run.phase = step.phase();
        if let Some(active) = self.lock_active().as_mut() {
            if active.info.id == run.id {
                active.info.phase = run.phase;
            }
        }
        info!(run_id = %run.id, phase = %run.phase, "Recovery step: {}", step);
        Ok(())
    }

    /// Record a step outcome; a failure halts the run
    fn conclude<T>(
        &self,
        run: &mut RecoveryRun,
        step: RecoveryStep,
        started: chrono::DateTime<Utc>,
        result: Result<(T, String), String>,
    ) -> Result<T, Halt> {
        let finished = Utc::now();
        match result {
            Ok((value, detail)) => {
                run.steps.push(StepOutcome {
                    step,
                    succeeded: true,
                    started_at: started,
                    finished_at: finished,
                    detail: Some(detail),
                    error: None,
                });
                Ok(value)
            }
            Err(e) => {
                error!(run_id = %run.id, step = %step, error = %e, "Recovery step failed");
                run.steps.push(StepOutcome {
                    step,
                    succeeded: false,
                    started_at: started,
                    finished_at: finished,
                    detail: None,
                    error: Some(e.clone()),
                });
                run.error = Some(format!("{} failed: {}", step, e));
                Err(Halt::Failed)
            }
        }
    }

    /// Settle the terminal state, append to history and persist
    async fn finish(
        &self,
        mut run: RecoveryRun,
        outcome: Result<(), Halt>,
        cancel: &CancellationToken,
    ) -> Result<RecoveryRun, RecoveryError> {
        let (status, phase) = match outcome {
            Ok(()) if !cancel.is_cancelled() => (RecoveryStatus::Completed, RecoveryPhase::Completed),
            Ok(()) | Err(Halt::Cancelled) => (RecoveryStatus::Cancelled, RecoveryPhase::Cancelled),
            Err(Halt::Failed) => (RecoveryStatus::Failed, RecoveryPhase::Failed),
        };
        run.status = status;
        run.phase = phase;
        run.ended_at = Some(Utc::now());
        if status == RecoveryStatus::Cancelled && run.error.is_none() {
            run.error = Some("cancelled".to_string());
        }

        match status {
            RecoveryStatus::Completed => info!(run_id = %run.id, reason = %run.reason, "✅ Recovery completed"),
            RecoveryStatus::Cancelled => warn!(run_id = %run.id, reason = %run.reason, "Recovery cancelled"),
            _ => {
                error!(
                    run_id = %run.id,
                    reason = %run.reason,
                    error = run.error.as_deref().unwrap_or("unknown"),
                    "Recovery failed"
                );
                self.alerts
                    .emit(
                        AlertKind::RecoveryError,
                        format!(
                            "Recovery {} failed: {}",
                            run.id,
                            run.error.as_deref().unwrap_or("unknown error")
                        ),
                        Severity::Critical,
                    )
                    .await;
            }
        }

        {
            let mut history = self.history.write().await;
            history.push_back(run.clone());
            while history.len() > self.history_limit {
                history.pop_front();
            }
        }
        if let Err(e) = self.store.append_recovery(&run) {
            warn!(run_id = %run.id, error = %e, "Failed to persist recovery run");
        }
        Ok(run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{
        CommandError, CommandOutput, HttpResponse, MemoryConfigStore, ProviderError, TransportError,
    };
    use crate::recovery::{Deployment, DeploymentStatus};
    use crate::storage::InMemoryStore;
    use async_trait::async_trait;
    use std::path::Path;

    struct TarStub;

    #[async_trait]
    impl CommandRunner for TarStub {
        async fn run(&self, _program: &str, args: &[String], _cwd: &Path) -> Result<CommandOutput, CommandError> {
            if args.first().map(String::as_str) == Some("-czf") {
                std::fs::write(&args[1], b"archive").map_err(|source| CommandError::Spawn {
                    program: "tar".to_string(),
                    source,
                })?;
            }
            Ok(CommandOutput {
                success: true,
                code: Some(0),
                stderr: String::new(),
            })
        }
    }

    struct OkHttp;

    #[async_trait]
    impl HttpClient for OkHttp {
        async fn request(&self, _req: HttpRequest) -> Result<HttpResponse, TransportError> {
            Ok(HttpResponse {
                status: 200,
                body: "{}".to_string(),
            })
        }
    }

    struct StubProvider {
        name: &'static str,
        fail_deploy: bool,
        fail_restore: bool,
    }

    #[async_trait]
    impl DeploymentProvider for StubProvider {
        fn name(&self) -> &str {
            self.name
        }

        async fn deploy(&self, domains: &DomainMap) -> Result<Deployment, ProviderError> {
            if self.fail_deploy {
                return Err(ProviderError::Failed("quota exceeded".to_string()));
            }
            Ok(Deployment {
                provider: self.name.to_string(),
                domains: domains.clone(),
                status: DeploymentStatus::Deployed,
                endpoint: Some(format!("{}.edge", self.name)),
                deployed_at: Utc::now(),
            })
        }

        async fn restore_data(&self, _deployment: &Deployment, _backup: &Backup) -> Result<(), ProviderError> {
            if self.fail_restore {
                Err(ProviderError::Failed("restore refused".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn orchestrator(
        dir: &Path,
        providers: Vec<Arc<dyn DeploymentProvider>>,
        config_store: Arc<MemoryConfigStore>,
    ) -> RecoveryOrchestrator {
        let config = RecoveryConfig {
            backup_dir: dir.join("backups"),
            source_dir: dir.to_path_buf(),
            restore_dir: dir.join("restore"),
            ..RecoveryConfig::default()
        };
        RecoveryOrchestrator::new(
            &config,
            RecoveryDeps {
                providers,
                dns: None,
                config_store,
                http: Arc::new(OkHttp),
                commands: Arc::new(TarStub),
                alerts: Arc::new(AlertSink::new(Vec::new(), chrono::Duration::hours(1))),
                store: Arc::new(InMemoryStore::new()),
            },
        )
    }

    fn provider(name: &'static str, fail_deploy: bool, fail_restore: bool) -> Arc<dyn DeploymentProvider> {
        Arc::new(StubProvider {
            name,
            fail_deploy,
            fail_restore,
        })
    }

    #[tokio::test]
    async fn test_partial_provider_failure_still_completes() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryConfigStore::new());
        let orch = orchestrator(
            dir.path(),
            vec![provider("primary", true, false), provider("secondary", false, false)],
            store.clone(),
        );

        let run = orch.start_full_recovery("test").await.unwrap();
        assert_eq!(run.status, RecoveryStatus::Completed);
        assert_eq!(run.phase, RecoveryPhase::Completed);
        assert_eq!(run.deployments.len(), 1);
        assert_eq!(run.steps.len(), 7);
        assert!(run.steps.iter().all(|s| s.succeeded));

        let domains = run.new_domains.unwrap();
        assert_eq!(store.get("BOT_DOMAIN").as_deref(), domains.get(DomainRole::Bot));
        assert!(!orch.is_active());
        assert_eq!(orch.history().await.len(), 1);
    }

    #[tokio::test]
    async fn test_restore_failure_on_every_deployment_fails_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryConfigStore::new());
        let orch = orchestrator(dir.path(), vec![provider("primary", false, true)], store.clone());

        let run = orch.start_full_recovery("test").await.unwrap();
        assert_eq!(run.status, RecoveryStatus::Failed);
        assert_eq!(run.failed_step(), Some(RecoveryStep::RestoreData));
        assert!(run.error.unwrap().starts_with("restore_data failed"));
        // Nothing after the failed step ran
        assert_eq!(store.publish_count(), 0);
    }

    #[tokio::test]
    async fn test_restore_from_backup_is_single_step_run() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path(), Vec::new(), Arc::new(MemoryConfigStore::new()));
        let backup = Backup {
            name: "emergency-x".to_string(),
            path: dir.path().join("emergency-x.tar.gz"),
            size: 0,
            created_at: Utc::now(),
        };

        let run = orch.restore_from_backup(&backup).await.unwrap();
        assert_eq!(run.status, RecoveryStatus::Completed);
        assert_eq!(run.reason, "backup_restore");
        assert_eq!(run.steps.len(), 1);
        assert_eq!(run.steps[0].step, RecoveryStep::ExtractBackup);
        assert_eq!(run.backup, Some(backup));
    }

    #[test]
    fn test_cancel_unknown_run_is_not_active() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path(), Vec::new(), Arc::new(MemoryConfigStore::new()));
        let id = Uuid::new_v4();
        assert!(matches!(orch.cancel(id), Err(RecoveryError::NotActive(x)) if x == id));
    }
}
