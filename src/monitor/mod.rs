//! Health Monitor: concurrent sweeps over a roster of targets
//!
//! Each sweep checks every registered target concurrently, writes each
//! target's result back into the roster as soon as that check finishes, and
//! publishes an immutable `HealthSnapshot` once all results are in.
//!
//! The loop sweeps, notifies the observer, then sleeps. Cancellation is
//! honoured between sweeps only; an in-flight sweep always completes.

mod checks;
mod target;

pub use checks::{check_disk_free, CustomCheck, DiskSpaceCheck, FileSystemCheck, FnCheck, PathExistsCheck};
pub use target::{CheckResult, HealthSnapshot, MonitoredTarget, TargetKind, TargetStatus};

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::collaborators::HttpClient;
use crate::config::{MonitorConfig, SystemThresholds};

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("target '{0}' is already registered")]
    DuplicateTarget(String),
    #[error("{kind} target '{name}' requires an address")]
    MissingAddress { name: String, kind: TargetKind },
    #[error("monitoring loop already running")]
    AlreadyRunning,
}

/// Receives every snapshot produced by the monitoring loop
#[async_trait]
pub trait SweepObserver: Send + Sync {
    async fn on_sweep(&self, snapshot: &HealthSnapshot);
}

pub struct HealthMonitor {
    targets: RwLock<Vec<MonitoredTarget>>,
    predicates: std::sync::RwLock<HashMap<String, Arc<dyn CustomCheck>>>,
    http: Arc<dyn HttpClient>,
    thresholds: SystemThresholds,
    data_path: PathBuf,
    interval: Duration,
    snapshots: watch::Sender<Option<HealthSnapshot>>,
    loop_cancel: std::sync::Mutex<Option<CancellationToken>>,
}

impl HealthMonitor {
    /// Monitor with an empty roster and the built-in predicates
    pub fn new(config: &MonitorConfig, http: Arc<dyn HttpClient>) -> Self {
        let (snapshots, _) = watch::channel(None);
        let monitor = Self {
            targets: RwLock::new(Vec::new()),
            predicates: std::sync::RwLock::new(HashMap::new()),
            http,
            thresholds: config.system.clone(),
            data_path: config.data_path.clone(),
            interval: config.interval(),
            snapshots,
            loop_cancel: std::sync::Mutex::new(None),
        };

        monitor.register_predicate(
            "data_directory",
            Arc::new(PathExistsCheck { path: config.data_path.clone() }),
        );
        monitor.register_predicate("file_system", Arc::new(FileSystemCheck::new(&config.data_path)));
        monitor.register_predicate(
            "disk_space",
            Arc::new(DiskSpaceCheck {
                path: config.data_path.clone(),
                min_free_bytes: config.system.min_free_disk_bytes,
            }),
        );
        monitor
    }

    /// Monitor with the configured roster (or the default system check)
    pub async fn from_config(config: &MonitorConfig, http: Arc<dyn HttpClient>) -> Result<Self, MonitorError> {
        let monitor = Self::new(config, http);
        for target in config.effective_targets() {
            monitor.register(MonitoredTarget::from_config(&target)).await?;
        }
        Ok(monitor)
    }

    pub async fn register(&self, target: MonitoredTarget) -> Result<(), MonitorError> {
        if matches!(target.kind, TargetKind::Http | TargetKind::Tcp)
            && target.address.as_deref().map_or(true, str::is_empty)
        {
            return Err(MonitorError::MissingAddress {
                name: target.name,
                kind: target.kind,
            });
        }

        let mut targets = self.targets.write().await;
        if targets.iter().any(|t| t.name == target.name) {
            return Err(MonitorError::DuplicateTarget(target.name));
        }
        info!(target = %target.name, kind = %target.kind, "Registered monitor target");
        targets.push(target);
        Ok(())
    }

    /// Remove a target; returns whether it was registered
    pub async fn deregister(&self, name: &str) -> bool {
        let mut targets = self.targets.write().await;
        let before = targets.len();
        targets.retain(|t| t.name != name);
        before != targets.len()
    }

    /// Register (or replace) a named predicate for custom targets
    pub fn register_predicate(&self, name: impl Into<String>, check: Arc<dyn CustomCheck>) {
        self.predicates
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.into(), check);
    }

    /// Roster with last observed state
    pub async fn targets(&self) -> Vec<MonitoredTarget> {
        self.targets.read().await.clone()
    }

    /// Most recent snapshot, if a sweep has completed
    pub fn latest(&self) -> Option<HealthSnapshot> {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<HealthSnapshot>> {
        self.snapshots.subscribe()
    }

    /// Check every registered target concurrently and publish the snapshot
    pub async fn sweep_once(&self) -> HealthSnapshot {
        let roster = self.targets.read().await.clone();
        debug!(targets = roster.len(), "Starting sweep");

        let checks = roster.iter().map(|target| async move {
            let result = self.check_one(target).await;
            self.record(&result).await;
            result
        });
        let results = join_all(checks).await;

        let snapshot = HealthSnapshot::from_results(&results, Utc::now());
        info!(
            healthy = snapshot.healthy,
            warning = snapshot.warning,
            critical = snapshot.critical,
            total = snapshot.total,
            health_pct = snapshot.health_percentage(),
            "Sweep complete"
        );
        self.snapshots.send_replace(Some(snapshot.clone()));
        snapshot
    }

    /// Run one target's check according to its kind
    pub async fn check_one(&self, target: &MonitoredTarget) -> CheckResult {
        let start = Instant::now();

        let (status, error) = match target.kind {
            TargetKind::Http => match target.address.as_deref() {
                Some(url) => checks::check_http(&self.http, url, target.timeout).await,
                None => (TargetStatus::Critical, Some("no address configured".to_string())),
            },
            TargetKind::Tcp => match target.address.as_deref() {
                Some(addr) => checks::check_tcp(addr, target.timeout).await,
                None => (TargetStatus::Critical, Some("no address configured".to_string())),
            },
            TargetKind::System => {
                let path = self.data_path.clone();
                let thresholds = self.thresholds.clone();
                tokio::task::spawn_blocking(move || checks::check_system(&path, &thresholds))
                    .await
                    .unwrap_or_else(|e| (TargetStatus::Unknown, Some(format!("system check panicked: {}", e))))
            }
            TargetKind::Custom => self.run_predicate(target).await,
        };

        let result = CheckResult {
            name: target.name.clone(),
            status,
            latency: start.elapsed(),
            error,
            checked_at: Utc::now(),
        };

        match result.status {
            TargetStatus::Healthy => debug!(target = %result.name, latency_ms = result.latency.as_millis() as u64, "Target healthy"),
            status => warn!(
                target = %result.name,
                status = %status,
                error = result.error.as_deref().unwrap_or(""),
                "Target check failed"
            ),
        }
        result
    }

    async fn run_predicate(&self, target: &MonitoredTarget) -> checks::Verdict {
        let predicate = self
            .predicates
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(target.predicate_name())
            .cloned();

        let Some(check) = predicate else {
            return (
                TargetStatus::Unknown,
                Some(format!("unknown predicate '{}'", target.predicate_name())),
            );
        };

        match tokio::time::timeout(target.timeout, check.evaluate()).await {
            Ok(Ok(())) => (TargetStatus::Healthy, None),
            Ok(Err(reason)) => (TargetStatus::Critical, Some(reason)),
            Err(_) => (
                TargetStatus::Critical,
                Some(format!("predicate timed out after {}ms", target.timeout.as_millis())),
            ),
        }
    }

    /// Write one result into the roster; a target deregistered mid-sweep is skipped
    async fn record(&self, result: &CheckResult) {
        let mut targets = self.targets.write().await;
        if let Some(target) = targets.iter_mut().find(|t| t.name == result.name) {
            target.apply(result);
        }
    }

    /// Spawn the monitoring loop
    pub fn start(self: &Arc<Self>, observer: Option<Arc<dyn SweepObserver>>) -> Result<JoinHandle<()>, MonitorError> {
        let mut slot = self.loop_cancel.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            return Err(MonitorError::AlreadyRunning);
        }
        let cancel = CancellationToken::new();
        *slot = Some(cancel.clone());
        Ok(tokio::spawn(Arc::clone(self).run(observer, cancel)))
    }

    /// Signal the loop to exit after the current sweep
    pub fn stop(&self) {
        if let Some(cancel) = self.loop_cancel.lock().unwrap_or_else(|e| e.into_inner()).take() {
            cancel.cancel();
        }
    }

    pub fn is_running(&self) -> bool {
        self.loop_cancel
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    pub async fn run(self: Arc<Self>, observer: Option<Arc<dyn SweepObserver>>, cancel: CancellationToken) {
        info!(interval_secs = self.interval.as_secs(), "[Monitor] Health monitoring started");
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let snapshot = self.sweep_once().await;
            if let Some(observer) = &observer {
                observer.on_sweep(&snapshot).await;
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
        info!("[Monitor] Health monitoring stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{HttpRequest, HttpResponse, TransportError};

    struct StatusByUrl;

    #[async_trait]
    impl HttpClient for StatusByUrl {
        async fn request(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
            let status = request
                .url
                .rsplit('/')
                .next()
                .and_then(|s| s.parse().ok())
                .unwrap_or(200);
            Ok(HttpResponse { status, body: String::new() })
        }
    }

    fn monitor() -> HealthMonitor {
        HealthMonitor::new(&MonitorConfig::default(), Arc::new(StatusByUrl))
    }

    #[tokio::test]
    async fn test_register_rejects_duplicates_and_missing_address() {
        let m = monitor();
        m.register(MonitoredTarget::http("web", "http://svc/200")).await.unwrap();
        assert!(matches!(
            m.register(MonitoredTarget::http("web", "http://svc/200")).await,
            Err(MonitorError::DuplicateTarget(_))
        ));

        let mut bad = MonitoredTarget::http("api", "");
        bad.address = None;
        assert!(matches!(m.register(bad).await, Err(MonitorError::MissingAddress { .. })));
    }

    #[tokio::test]
    async fn test_http_status_mapping() {
        let m = monitor();
        m.register(MonitoredTarget::http("ok", "http://svc/204")).await.unwrap();
        m.register(MonitoredTarget::http("client", "http://svc/404")).await.unwrap();
        m.register(MonitoredTarget::http("server", "http://svc/503")).await.unwrap();

        let snap = m.sweep_once().await;
        assert_eq!((snap.healthy, snap.warning, snap.critical), (1, 1, 1));

        let targets = m.targets().await;
        let server = targets.iter().find(|t| t.name == "server").unwrap();
        assert_eq!(server.status, TargetStatus::Critical);
        assert_eq!(server.last_error.as_deref(), Some("HTTP 503"));
    }

    #[tokio::test]
    async fn test_custom_predicates() {
        let m = monitor();
        m.register_predicate("always", Arc::new(FnCheck::new(|| Ok(()))));
        m.register_predicate("never", Arc::new(FnCheck::new(|| Err("down".to_string()))));
        m.register(MonitoredTarget::custom("a", "always")).await.unwrap();
        m.register(MonitoredTarget::custom("b", "never")).await.unwrap();
        m.register(MonitoredTarget::custom("c", "no_such_predicate")).await.unwrap();

        let snap = m.sweep_once().await;
        assert_eq!((snap.healthy, snap.critical, snap.unknown), (1, 1, 1));
    }

    #[tokio::test]
    async fn test_deregister() {
        let m = monitor();
        m.register(MonitoredTarget::http("web", "http://svc/200")).await.unwrap();
        assert!(m.deregister("web").await);
        assert!(!m.deregister("web").await);
        assert_eq!(m.sweep_once().await.total, 0);
    }

    #[tokio::test]
    async fn test_snapshot_published_to_subscribers() {
        let m = monitor();
        let mut rx = m.subscribe();
        m.register(MonitoredTarget::http("web", "http://svc/200")).await.unwrap();
        m.sweep_once().await;
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().as_ref().map(|s| s.healthy), Some(1));
        assert_eq!(m.latest().map(|s| s.total), Some(1));
    }

    #[tokio::test]
    async fn test_loop_start_stop() {
        let m = Arc::new(monitor());
        m.register(MonitoredTarget::http("web", "http://svc/200")).await.unwrap();
        let mut rx = m.subscribe();

        let handle = m.start(None).unwrap();
        assert!(matches!(m.start(None), Err(MonitorError::AlreadyRunning)));
        rx.changed().await.unwrap();

        m.stop();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("loop should exit after stop")
            .unwrap();
        assert!(!m.is_running());
    }
}
