//! Security Manager wiring: critical health triggers recovery under policy
//!
//! Run with: cargo test --test manager_scenarios

use async_trait::async_trait;
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use warden::collaborators::{
    CommandError, CommandOutput, CommandRunner, DeploymentProvider, HttpClient, HttpRequest,
    HttpResponse, MemoryConfigStore, ProviderError, TransportError,
};
use warden::config::{SecretConfig, TargetConfig, WardenConfig};
use warden::monitor::FnCheck;
use warden::recovery::{Backup, Deployment, DeploymentStatus, DomainMap};
use warden::rotation::SecretKind;
use warden::{
    AlertKind, AlertSink, Collaborators, InMemoryStore, ManagerError, RecoveryError,
    RecoveryStatus, SecurityAlert, SecurityManager, Severity, SystemStatus, TargetKind,
};

struct FakeTar;

#[async_trait]
impl CommandRunner for FakeTar {
    async fn run(&self, _program: &str, args: &[String], _cwd: &Path) -> Result<CommandOutput, CommandError> {
        if args.first().map(String::as_str) == Some("-czf") {
            std::fs::write(&args[1], b"snapshot").map_err(|source| CommandError::Spawn {
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

struct AcceptAllHttp;

#[async_trait]
impl HttpClient for AcceptAllHttp {
    async fn request(&self, _request: HttpRequest) -> Result<HttpResponse, TransportError> {
        Ok(HttpResponse {
            status: 200,
            body: String::new(),
        })
    }
}

/// Always-succeeding provider; optionally parks in `deploy` until released
struct StubProvider {
    gate: Option<Arc<Gate>>,
}

struct Gate {
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl DeploymentProvider for StubProvider {
    fn name(&self) -> &str {
        "stub"
    }

    async fn deploy(&self, domains: &DomainMap) -> Result<Deployment, ProviderError> {
        if let Some(gate) = &self.gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        Ok(Deployment {
            provider: "stub".to_string(),
            domains: domains.clone(),
            status: DeploymentStatus::Deployed,
            endpoint: None,
            deployed_at: Utc::now(),
        })
    }

    async fn restore_data(&self, _deployment: &Deployment, _backup: &Backup) -> Result<(), ProviderError> {
        Ok(())
    }
}

fn gate() -> Arc<Gate> {
    Arc::new(Gate {
        entered: Notify::new(),
        release: Notify::new(),
    })
}

/// One custom target backed by the "database" predicate; long loop intervals
fn config(dir: &Path, auto_recovery: bool) -> WardenConfig {
    let mut config = WardenConfig::default();
    config.monitor.interval_secs = 3600;
    config.monitor.data_path = dir.to_path_buf();
    config.monitor.targets = vec![TargetConfig {
        name: "database".to_string(),
        kind: TargetKind::Custom,
        address: None,
        predicate: Some("database".to_string()),
        timeout_secs: 1,
        interval_secs: 3600,
    }];
    config.rotation.interval_secs = 3600;
    config.rotation.secrets = vec![SecretConfig {
        name: "WARDEN_TEST_MANAGER_KEY".to_string(),
        kind: SecretKind::ApiKey,
    }];
    config.recovery.auto_recovery = auto_recovery;
    config.recovery.backup_dir = dir.join("backups");
    config.recovery.source_dir = dir.to_path_buf();
    config.recovery.restore_dir = dir.join("restore");
    config
}

async fn manager(config: &WardenConfig, database_up: bool) -> Arc<SecurityManager> {
    gated_manager(config, database_up, None).await
}

async fn gated_manager(config: &WardenConfig, database_up: bool, gate: Option<Arc<Gate>>) -> Arc<SecurityManager> {
    let collaborators = Collaborators {
        http: Arc::new(AcceptAllHttp),
        commands: Arc::new(FakeTar),
        providers: vec![Arc::new(StubProvider { gate }) as Arc<dyn DeploymentProvider>],
        dns: None,
        config_store: Arc::new(MemoryConfigStore::new()),
        alerts: Arc::new(AlertSink::new(Vec::new(), chrono::Duration::hours(1))),
        store: Arc::new(InMemoryStore::new()),
    };
    let manager = SecurityManager::initialize(config, collaborators).await.unwrap();
    manager.monitor().register_predicate(
        "database",
        Arc::new(FnCheck::new(move || {
            if database_up {
                Ok(())
            } else {
                Err("database unreachable".to_string())
            }
        })),
    );
    manager
}

async fn wait_for(
    rx: &mut tokio::sync::broadcast::Receiver<SecurityAlert>,
    kind: AlertKind,
) -> SecurityAlert {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let alert = rx.recv().await.unwrap();
            if alert.kind == kind {
                return alert;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("no {} alert within timeout", kind))
}

#[tokio::test]
async fn critical_sweep_triggers_automatic_recovery() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager(&config(dir.path(), true), false).await;
    let mut alerts = manager.alerts().subscribe();

    assert_eq!(manager.status(), SystemStatus::Initializing);
    manager.start().await.unwrap();

    let critical = wait_for(&mut alerts, AlertKind::CriticalFailure).await;
    assert!(critical.message.contains("1 of 1"));
    wait_for(&mut alerts, AlertKind::RecoveryComplete).await;

    // The run is appended to history just after the notification step
    let mut history = manager.recovery().history().await;
    for _ in 0..50 {
        if !history.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        history = manager.recovery().history().await;
    }
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].reason, "critical_failure");
    assert_eq!(history[0].status, RecoveryStatus::Completed);
    assert_eq!(manager.status(), SystemStatus::Critical);

    manager.shutdown().await;
    assert_eq!(manager.status(), SystemStatus::Stopped);
}

#[tokio::test]
async fn auto_recovery_disabled_only_alerts() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager(&config(dir.path(), false), false).await;
    let mut alerts = manager.alerts().subscribe();

    manager.start().await.unwrap();
    wait_for(&mut alerts, AlertKind::CriticalFailure).await;

    assert!(!manager.recovery().is_active());
    assert!(manager.recovery().history().await.is_empty());

    manager.shutdown().await;
}

#[tokio::test]
async fn healthy_sweep_keeps_running_status() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager(&config(dir.path(), true), true).await;
    let mut alerts = manager.alerts().subscribe();
    let mut snapshots = manager.monitor().subscribe();

    manager.start().await.unwrap();
    wait_for(&mut alerts, AlertKind::SystemStart).await;
    snapshots.changed().await.unwrap();

    assert_eq!(snapshots.borrow().as_ref().map(|s| s.healthy), Some(1));
    assert_eq!(manager.status(), SystemStatus::Running);
    assert!(matches!(
        manager.start().await,
        Err(warden::ManagerError::AlreadyRunning)
    ));

    manager.shutdown().await;
    assert_eq!(manager.status(), SystemStatus::Stopped);
}

#[tokio::test]
async fn manual_rotation_and_recovery_test_emit_alerts() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager(&config(dir.path(), false), true).await;
    let mut alerts = manager.alerts().subscribe();

    let record = manager.rotate_tokens().await.unwrap();
    assert_eq!(record.rotated, 1);
    wait_for(&mut alerts, AlertKind::TokenRotation).await;

    let result = manager.test_recovery().await;
    assert!(result.success);
    wait_for(&mut alerts, AlertKind::RecoveryTest).await;

    let run = manager.emergency_recovery().await.unwrap();
    assert_eq!(run.reason, "emergency_manual");
    wait_for(&mut alerts, AlertKind::EmergencyRecovery).await;
}

#[tokio::test]
async fn component_start_failure_reports_system_error() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager(&config(dir.path(), false), true).await;
    let mut alerts = manager.alerts().subscribe();

    // Monitor loop already claimed outside the manager
    manager.monitor().start(None).unwrap();
    assert!(matches!(manager.start().await, Err(ManagerError::Monitor(_))));
    assert_eq!(manager.status(), SystemStatus::Error);

    let alert = wait_for(&mut alerts, AlertKind::SystemError).await;
    assert_eq!(alert.severity, Severity::Critical);
    assert!(!manager.rotation().is_scheduled());

    // Once the conflict is gone the manager starts normally
    manager.monitor().stop();
    manager.start().await.unwrap();
    assert_eq!(manager.status(), SystemStatus::Running);
    manager.shutdown().await;
}

#[tokio::test]
async fn shutdown_cancels_parked_recovery_without_waiting() {
    let dir = tempfile::tempdir().unwrap();
    let gate = gate();
    let manager = gated_manager(&config(dir.path(), true), false, Some(gate.clone())).await;

    manager.start().await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), gate.entered.notified())
        .await
        .expect("recovery never reached deployment");
    assert!(manager.recovery().is_active());

    tokio::time::timeout(Duration::from_secs(2), manager.shutdown())
        .await
        .expect("shutdown waited on the recovery run");
    assert!(!manager.recovery().is_active());
    assert_eq!(manager.status(), SystemStatus::Stopped);

    // The in-flight deploy finishes, then the run stops at the next step
    gate.release.notify_one();
    let mut history = manager.recovery().history().await;
    for _ in 0..100 {
        if !history.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        history = manager.recovery().history().await;
    }
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].reason, "critical_failure");
    assert_eq!(history[0].status, RecoveryStatus::Cancelled);
}

#[tokio::test]
async fn emergency_recovery_rejected_while_active_alerts() {
    let dir = tempfile::tempdir().unwrap();
    let gate = gate();
    let manager = gated_manager(&config(dir.path(), false), true, Some(gate.clone())).await;
    let mut alerts = manager.alerts().subscribe();

    let first = tokio::spawn({
        let manager = Arc::clone(&manager);
        async move { manager.recovery().start_full_recovery("manual").await }
    });
    gate.entered.notified().await;

    assert!(matches!(
        manager.emergency_recovery().await,
        Err(RecoveryError::AlreadyInProgress(_))
    ));
    let alert = wait_for(&mut alerts, AlertKind::RecoveryError).await;
    assert_eq!(alert.severity, Severity::Critical);
    assert!(alert.message.contains("failed to start"));

    gate.release.notify_one();
    let run = first.await.unwrap().unwrap();
    assert_eq!(run.status, RecoveryStatus::Completed);
}
