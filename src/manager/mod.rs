//! Security Manager: the root control loop
//!
//! Wires the Health Monitor, Token Rotation Manager and Recovery
//! Orchestrator together:
//!
//! - start: initialize components → start monitor, rotation and alert
//!   retention loops → mark running → `system_start` alert
//! - after every sweep: derive system status; on critical health emit a
//!   `critical_failure` alert and, under the auto-recovery policy, trigger a
//!   full recovery unless one is already active
//! - shutdown: reverse order; an active recovery is cancelled, not awaited

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::alerts::AlertSink;
use crate::collaborators::{
    CommandRunner, ConfigStore, DeploymentProvider, DnsProvider, EnvFileStore, HttpClient,
    HttpDeploymentProvider, HttpDnsProvider, ReqwestHttpClient, SystemCommandRunner, TransportError,
};
use crate::config::WardenConfig;
use crate::monitor::{HealthMonitor, HealthSnapshot, MonitorError, SweepObserver, TargetStatus};
use crate::recovery::{RecoveryDeps, RecoveryError, RecoveryOrchestrator, RecoveryRun, RecoveryStatus, RecoveryTestResult};
use crate::rotation::{RotationError, RotationRecord, TokenRotationManager};
use crate::storage::StateStore;
use crate::types::{AlertKind, Severity, SystemStatus};

#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("monitor error: {0}")]
    Monitor(#[from] MonitorError),
    #[error("rotation error: {0}")]
    Rotation(#[from] RotationError),
    #[error("recovery error: {0}")]
    Recovery(#[from] RecoveryError),
    #[error("security manager is already running")]
    AlreadyRunning,
}

/// Everything the controller talks to outside its own state
pub struct Collaborators {
    pub http: Arc<dyn HttpClient>,
    pub commands: Arc<dyn CommandRunner>,
    pub providers: Vec<Arc<dyn DeploymentProvider>>,
    pub dns: Option<Arc<dyn DnsProvider>>,
    pub config_store: Arc<dyn ConfigStore>,
    pub alerts: Arc<AlertSink>,
    pub store: Arc<dyn StateStore>,
}

impl Collaborators {
    /// Production collaborators: reqwest, child processes, HTTP providers,
    /// env/compose files and the configured alert channels
    pub fn from_config(config: &WardenConfig, store: Arc<dyn StateStore>) -> Result<Self, TransportError> {
        let http: Arc<dyn HttpClient> = Arc::new(ReqwestHttpClient::new()?);
        let providers = config
            .recovery
            .providers
            .iter()
            .map(|p| Arc::new(HttpDeploymentProvider::new(p, http.clone())) as Arc<dyn DeploymentProvider>)
            .collect();
        let dns = config
            .recovery
            .dns
            .as_ref()
            .map(|d| Arc::new(HttpDnsProvider::new(d, http.clone())) as Arc<dyn DnsProvider>);

        Ok(Self {
            commands: Arc::new(SystemCommandRunner),
            providers,
            dns,
            config_store: Arc::new(EnvFileStore::from_config(&config.recovery.hosting)),
            alerts: Arc::new(AlertSink::from_config(&config.alerts, http.clone())),
            store,
            http,
        })
    }
}

struct Loops {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

pub struct SecurityManager {
    monitor: Arc<HealthMonitor>,
    rotation: Arc<TokenRotationManager>,
    recovery: Arc<RecoveryOrchestrator>,
    alerts: Arc<AlertSink>,
    status: watch::Sender<SystemStatus>,
    auto_recovery: bool,
    critical_threshold: u32,
    critical_streak: AtomicU32,
    alert_sweep_interval: Duration,
    loops: std::sync::Mutex<Option<Loops>>,
}

impl SecurityManager {
    /// Initialize the monitor, rotation manager and orchestrator.
    ///
    /// Loops are not started; call [`SecurityManager::start`].
    pub async fn initialize(config: &WardenConfig, collaborators: Collaborators) -> Result<Arc<Self>, ManagerError> {
        let (status, _) = watch::channel(SystemStatus::Initializing);
        info!("🛡️ Initializing security manager...");

        let monitor = HealthMonitor::from_config(&config.monitor, collaborators.http.clone()).await?;
        info!("✓ Health monitor initialized");

        let rotation = TokenRotationManager::load(
            &config.rotation,
            collaborators.config_store.clone(),
            collaborators.store.clone(),
        )?
        .with_alerts(collaborators.alerts.clone());
        info!("✓ Token rotation manager initialized");

        let recovery = RecoveryOrchestrator::new(
            &config.recovery,
            RecoveryDeps {
                providers: collaborators.providers,
                dns: collaborators.dns,
                config_store: collaborators.config_store,
                http: collaborators.http,
                commands: collaborators.commands,
                alerts: collaborators.alerts.clone(),
                store: collaborators.store,
            },
        );
        info!("✓ Recovery orchestrator initialized");

        Ok(Arc::new(Self {
            monitor: Arc::new(monitor),
            rotation: Arc::new(rotation),
            recovery: Arc::new(recovery),
            alerts: collaborators.alerts,
            status,
            auto_recovery: config.recovery.auto_recovery,
            critical_threshold: config.recovery.critical_sweeps_before_recovery.max(1),
            critical_streak: AtomicU32::new(0),
            alert_sweep_interval: config.alerts.sweep_interval(),
            loops: std::sync::Mutex::new(None),
        }))
    }

    /// Start the monitor, rotation and alert retention loops.
    ///
    /// A component that refuses to start puts the manager in `Error` and
    /// raises a critical `system_error` alert.
    pub async fn start(self: &Arc<Self>) -> Result<(), ManagerError> {
        if let Err(e) = self.start_loops() {
            if !matches!(e, ManagerError::AlreadyRunning) {
                self.status.send_replace(SystemStatus::Error);
                error!(error = %e, "❌ Security manager failed to start");
                self.alerts
                    .emit(
                        AlertKind::SystemError,
                        format!("Security manager failed to start: {}", e),
                        Severity::Critical,
                    )
                    .await;
            }
            return Err(e);
        }

        // A sweep may already have published a health status
        self.status.send_if_modified(|status| {
            let fresh = matches!(
                status,
                SystemStatus::Initializing | SystemStatus::Stopped | SystemStatus::Error
            );
            if fresh {
                *status = SystemStatus::Running;
            }
            fresh
        });
        info!("✅ Security manager running");
        self.alerts
            .emit(AlertKind::SystemStart, "Security manager started", Severity::Info)
            .await;
        Ok(())
    }

    fn start_loops(self: &Arc<Self>) -> Result<(), ManagerError> {
        let mut slot = self.loops.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            return Err(ManagerError::AlreadyRunning);
        }

        let observer: Arc<dyn SweepObserver> = Arc::clone(self) as Arc<dyn SweepObserver>;
        let monitor_handle = self.monitor.start(Some(observer))?;
        let rotation_handle = match self.rotation.start() {
            Ok(handle) => handle,
            Err(e) => {
                self.monitor.stop();
                return Err(e.into());
            }
        };
        let cancel = CancellationToken::new();
        let retention_handle = tokio::spawn(
            Arc::clone(&self.alerts).run_retention(self.alert_sweep_interval, cancel.clone()),
        );

        *slot = Some(Loops {
            cancel,
            handles: vec![monitor_handle, rotation_handle, retention_handle],
        });
        Ok(())
    }

    /// Stop every loop and cancel any active recovery.
    ///
    /// Loop tasks are awaited; the recovery run is not.
    pub async fn shutdown(&self) {
        self.status.send_replace(SystemStatus::Stopping);
        info!("🛑 Security manager stopping...");

        let loops = self.loops.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(loops) = &loops {
            loops.cancel.cancel();
        }
        self.rotation.stop();
        self.monitor.stop();

        if let Some(active) = self.recovery.active_run() {
            match self.recovery.cancel(active.id) {
                Ok(()) => warn!(run_id = %active.id, phase = %active.phase, "Cancelled in-progress recovery"),
                Err(e) => debug!(error = %e, "Recovery finished before it could be cancelled"),
            }
        }

        if let Some(loops) = loops {
            for handle in loops.handles {
                if let Err(e) = handle.await {
                    error!(error = %e, "Control loop task panicked");
                }
            }
        }

        self.status.send_replace(SystemStatus::Stopped);
        info!("Security manager stopped");
    }

    // ========================================================================
    // Manual operations
    // ========================================================================

    /// Rotate every live secret now
    pub async fn rotate_tokens(&self) -> Result<RotationRecord, RotationError> {
        info!("Manual token rotation requested");
        self.rotation.rotate_all().await
    }

    /// Run the recovery machine with reason "test" and report the outcome
    pub async fn test_recovery(&self) -> RecoveryTestResult {
        info!("🧪 Recovery test requested");
        let result = self.recovery.test_recovery().await;
        if result.success {
            self.alerts
                .emit(AlertKind::RecoveryTest, "Recovery test completed successfully", Severity::Info)
                .await;
        } else {
            self.alerts
                .emit(
                    AlertKind::RecoveryTestError,
                    format!(
                        "Recovery test failed: {}",
                        result.error.as_deref().unwrap_or("unknown error")
                    ),
                    Severity::Warning,
                )
                .await;
        }
        result
    }

    /// Operator-initiated full recovery
    pub async fn emergency_recovery(&self) -> Result<RecoveryRun, RecoveryError> {
        self.alerts
            .emit(
                AlertKind::EmergencyRecovery,
                "Emergency recovery initiated manually",
                Severity::Critical,
            )
            .await;
        let result = self.recovery.start_full_recovery("emergency_manual").await;
        if let Err(e) = &result {
            error!(error = %e, "Emergency recovery could not start");
            self.alerts
                .emit(
                    AlertKind::RecoveryError,
                    format!("Emergency recovery failed to start: {}", e),
                    Severity::Critical,
                )
                .await;
        }
        result
    }

    // ========================================================================
    // Status
    // ========================================================================

    pub fn status(&self) -> SystemStatus {
        *self.status.borrow()
    }

    /// Status stream; every change is pushed to receivers
    pub fn subscribe_status(&self) -> watch::Receiver<SystemStatus> {
        self.status.subscribe()
    }

    pub fn monitor(&self) -> &Arc<HealthMonitor> {
        &self.monitor
    }

    pub fn rotation(&self) -> &Arc<TokenRotationManager> {
        &self.rotation
    }

    pub fn recovery(&self) -> &Arc<RecoveryOrchestrator> {
        &self.recovery
    }

    pub fn alerts(&self) -> &Arc<AlertSink> {
        &self.alerts
    }

    fn trigger_recovery(&self) {
        if self.recovery.is_active() {
            debug!("Recovery already in progress, not triggering another");
            return;
        }
        let recovery = Arc::clone(&self.recovery);
        tokio::spawn(async move {
            match recovery.start_full_recovery("critical_failure").await {
                Ok(run) if run.status == RecoveryStatus::Completed => {
                    info!(run_id = %run.id, "Automatic recovery completed");
                }
                Ok(run) => warn!(run_id = %run.id, status = %run.status, "Automatic recovery did not complete"),
                Err(RecoveryError::AlreadyInProgress(id)) => {
                    debug!(active = %id, "Automatic recovery skipped, another run is active");
                }
                Err(e) => error!(error = %e, "Automatic recovery could not start"),
            }
        });
    }
}

fn derive_status(snapshot: &HealthSnapshot) -> SystemStatus {
    match snapshot.overall() {
        TargetStatus::Critical => SystemStatus::Critical,
        TargetStatus::Warning => SystemStatus::Warning,
        TargetStatus::Healthy | TargetStatus::Unknown => SystemStatus::Running,
    }
}

#[async_trait]
impl SweepObserver for SecurityManager {
    async fn on_sweep(&self, snapshot: &HealthSnapshot) {
        let previous = self.status();
        let derived = derive_status(snapshot);
        // Stopping/stopped win over health
        let live = previous.is_active() || previous == SystemStatus::Initializing;
        if live && previous != derived {
            self.status.send_replace(derived);
            info!(from = %previous, to = %derived, "System status changed");
        }

        if !snapshot.has_critical() {
            self.critical_streak.store(0, Ordering::SeqCst);
            if derived == SystemStatus::Warning && previous != SystemStatus::Warning {
                self.alerts
                    .emit(
                        AlertKind::MonitoringAlert,
                        format!("{} of {} targets degraded", snapshot.warning, snapshot.total),
                        Severity::Warning,
                    )
                    .await;
            }
            return;
        }

        let streak = self.critical_streak.fetch_add(1, Ordering::SeqCst) + 1;
        self.alerts
            .emit(
                AlertKind::CriticalFailure,
                format!(
                    "Critical failure: {} of {} targets critical ({:.1}% healthy)",
                    snapshot.critical,
                    snapshot.total,
                    snapshot.health_percentage()
                ),
                Severity::Critical,
            )
            .await;

        if !self.auto_recovery {
            debug!("Auto-recovery disabled, not triggering recovery");
            return;
        }
        if streak >= self.critical_threshold {
            self.critical_streak.store(0, Ordering::SeqCst);
            self.trigger_recovery();
        } else {
            debug!(streak, threshold = self.critical_threshold, "Critical streak below recovery threshold");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn snapshot(healthy: usize, warning: usize, critical: usize) -> HealthSnapshot {
        HealthSnapshot {
            healthy,
            warning,
            critical,
            unknown: 0,
            total: healthy + warning + critical,
            taken_at: Utc::now(),
        }
    }

    #[test]
    fn test_status_derived_from_worst_target() {
        assert_eq!(derive_status(&snapshot(3, 1, 1)), SystemStatus::Critical);
        assert_eq!(derive_status(&snapshot(3, 1, 0)), SystemStatus::Warning);
        assert_eq!(derive_status(&snapshot(3, 0, 0)), SystemStatus::Running);
        assert_eq!(derive_status(&snapshot(0, 0, 0)), SystemStatus::Running);
    }
}
