//! Monitored targets, per-check results and sweep snapshots

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::TargetConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Http,
    Tcp,
    Custom,
    System,
}

impl std::fmt::Display for TargetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetKind::Http => write!(f, "http"),
            TargetKind::Tcp => write!(f, "tcp"),
            TargetKind::Custom => write!(f, "custom"),
            TargetKind::System => write!(f, "system"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetStatus {
    Healthy,
    Warning,
    Critical,
    #[default]
    Unknown,
}

impl std::fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetStatus::Healthy => write!(f, "HEALTHY"),
            TargetStatus::Warning => write!(f, "WARNING"),
            TargetStatus::Critical => write!(f, "CRITICAL"),
            TargetStatus::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// A registered target and its last observed state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoredTarget {
    pub name: String,
    pub kind: TargetKind,
    /// URL for http, `host:port` for tcp
    pub address: Option<String>,
    /// Predicate name for custom targets (falls back to `name`)
    pub predicate: Option<String>,
    pub timeout: Duration,
    pub interval: Duration,

    pub last_checked: Option<DateTime<Utc>>,
    pub status: TargetStatus,
    pub latency: Option<Duration>,
    pub last_error: Option<String>,
}

impl MonitoredTarget {
    fn new(name: impl Into<String>, kind: TargetKind, address: Option<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            address,
            predicate: None,
            timeout: Duration::from_secs(crate::config::defaults::TARGET_TIMEOUT_SECS),
            interval: Duration::from_secs(crate::config::defaults::MONITOR_INTERVAL_SECS),
            last_checked: None,
            status: TargetStatus::Unknown,
            latency: None,
            last_error: None,
        }
    }

    pub fn http(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self::new(name, TargetKind::Http, Some(url.into()))
    }

    pub fn tcp(name: impl Into<String>, addr: impl Into<String>) -> Self {
        Self::new(name, TargetKind::Tcp, Some(addr.into()))
    }

    pub fn custom(name: impl Into<String>, predicate: impl Into<String>) -> Self {
        let mut target = Self::new(name, TargetKind::Custom, None);
        target.predicate = Some(predicate.into());
        target
    }

    pub fn system(name: impl Into<String>) -> Self {
        Self::new(name, TargetKind::System, None)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn from_config(config: &TargetConfig) -> Self {
        let mut target = Self::new(config.name.clone(), config.kind, config.address.clone());
        target.predicate = config.predicate.clone();
        target.timeout = Duration::from_secs(config.timeout_secs);
        target.interval = Duration::from_secs(config.interval_secs);
        target
    }

    /// Predicate looked up for custom targets
    pub fn predicate_name(&self) -> &str {
        self.predicate.as_deref().unwrap_or(&self.name)
    }

    pub(crate) fn apply(&mut self, result: &CheckResult) {
        self.last_checked = Some(result.checked_at);
        self.status = result.status;
        self.latency = Some(result.latency);
        self.last_error = result.error.clone();
    }
}

/// Outcome of checking one target once
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub status: TargetStatus,
    pub latency: Duration,
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

/// Immutable aggregate of one sweep
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub healthy: usize,
    pub warning: usize,
    pub critical: usize,
    pub unknown: usize,
    pub total: usize,
    pub taken_at: DateTime<Utc>,
}

impl HealthSnapshot {
    pub fn from_results(results: &[CheckResult], taken_at: DateTime<Utc>) -> Self {
        let count = |s: TargetStatus| results.iter().filter(|r| r.status == s).count();
        Self {
            healthy: count(TargetStatus::Healthy),
            warning: count(TargetStatus::Warning),
            critical: count(TargetStatus::Critical),
            unknown: count(TargetStatus::Unknown),
            total: results.len(),
            taken_at,
        }
    }

    /// Share of healthy targets in percent; 0 for an empty roster
    pub fn health_percentage(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.healthy as f64 / self.total as f64 * 100.0
        }
    }

    pub fn has_critical(&self) -> bool {
        self.critical > 0
    }

    /// Worst status present in the sweep
    pub fn overall(&self) -> TargetStatus {
        if self.critical > 0 {
            TargetStatus::Critical
        } else if self.warning > 0 {
            TargetStatus::Warning
        } else if self.total == 0 || self.unknown == self.total {
            TargetStatus::Unknown
        } else {
            TargetStatus::Healthy
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(status: TargetStatus) -> CheckResult {
        CheckResult {
            name: "t".to_string(),
            status,
            latency: Duration::from_millis(5),
            error: None,
            checked_at: Utc::now(),
        }
    }

    #[test]
    fn test_snapshot_counts_and_percentage() {
        let results = vec![
            result(TargetStatus::Healthy),
            result(TargetStatus::Healthy),
            result(TargetStatus::Warning),
            result(TargetStatus::Critical),
        ];
        let snap = HealthSnapshot::from_results(&results, Utc::now());
        assert_eq!((snap.healthy, snap.warning, snap.critical, snap.total), (2, 1, 1, 4));
        assert_eq!(snap.health_percentage(), 50.0);
        assert_eq!(snap.overall(), TargetStatus::Critical);
    }

    #[test]
    fn test_empty_snapshot_is_zero_percent() {
        let snap = HealthSnapshot::from_results(&[], Utc::now());
        assert_eq!(snap.health_percentage(), 0.0);
        assert!(!snap.has_critical());
    }

    #[test]
    fn test_custom_predicate_defaults_to_name() {
        let mut target = MonitoredTarget::system("disk");
        target.kind = TargetKind::Custom;
        assert_eq!(target.predicate_name(), "disk");
        assert_eq!(MonitoredTarget::custom("db", "database").predicate_name(), "database");
    }
}
