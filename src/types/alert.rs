//! Alert types: Severity, AlertKind, SecurityAlert

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Alert severity, ordered from least to most urgent
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    /// Emoji prefix used by chat channels
    pub fn emoji(self) -> &'static str {
        match self {
            Severity::Info => "ℹ️",
            Severity::Warning => "⚠️",
            Severity::Critical => "🚨",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "INFO"),
            Severity::Warning => write!(f, "WARNING"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Event category of a security alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    SystemStart,
    SystemError,
    TokenRotation,
    TokenRotationError,
    RecoveryTest,
    RecoveryTestError,
    EmergencyRecovery,
    RecoveryComplete,
    RecoveryError,
    CriticalFailure,
    MonitoringAlert,
}

impl AlertKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertKind::SystemStart => "system_start",
            AlertKind::SystemError => "system_error",
            AlertKind::TokenRotation => "token_rotation",
            AlertKind::TokenRotationError => "token_rotation_error",
            AlertKind::RecoveryTest => "recovery_test",
            AlertKind::RecoveryTestError => "recovery_test_error",
            AlertKind::EmergencyRecovery => "emergency_recovery",
            AlertKind::RecoveryComplete => "recovery_complete",
            AlertKind::RecoveryError => "recovery_error",
            AlertKind::CriticalFailure => "critical_failure",
            AlertKind::MonitoringAlert => "monitoring_alert",
        }
    }
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A write-once security event.
///
/// Retained by the alert sink for the configured window, then purged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityAlert {
    pub id: Uuid,
    pub kind: AlertKind,
    pub message: String,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
}

impl SecurityAlert {
    pub fn new(kind: AlertKind, message: impl Into<String>, severity: Severity) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            message: message.into(),
            severity,
            timestamp: Utc::now(),
        }
    }

    /// Whether this alert is older than `retention` relative to `now`
    pub fn is_expired(&self, now: DateTime<Utc>, retention: chrono::Duration) -> bool {
        now - self.timestamp > retention
    }
}
