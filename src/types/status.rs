//! Controller lifecycle and health status

use serde::{Deserialize, Serialize};

/// Overall controller status as published by the security manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemStatus {
    Initializing,
    Running,
    Warning,
    Critical,
    Stopping,
    Stopped,
    Error,
}

impl SystemStatus {
    /// Whether the loops are live (running, possibly degraded)
    pub fn is_active(self) -> bool {
        matches!(
            self,
            SystemStatus::Running | SystemStatus::Warning | SystemStatus::Critical
        )
    }
}

impl std::fmt::Display for SystemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SystemStatus::Initializing => "INITIALIZING",
            SystemStatus::Running => "RUNNING",
            SystemStatus::Warning => "WARNING",
            SystemStatus::Critical => "CRITICAL",
            SystemStatus::Stopping => "STOPPING",
            SystemStatus::Stopped => "STOPPED",
            SystemStatus::Error => "ERROR",
        };
        f.write_str(s)
    }
}
