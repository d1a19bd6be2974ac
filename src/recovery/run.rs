//! Recovery run model: phases, step outcomes, domains, deployments, backups

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStatus {
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for RecoveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecoveryStatus::InProgress => write!(f, "in_progress"),
            RecoveryStatus::Completed => write!(f, "completed"),
            RecoveryStatus::Failed => write!(f, "failed"),
            RecoveryStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Position in the recovery state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryPhase {
    Pending,
    BackingUp,
    GeneratingDomains,
    Deploying,
    UpdatingDns,
    RestoringData,
    Reconfiguring,
    Notifying,
    Completed,
    Failed,
    Cancelled,
}

impl RecoveryPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RecoveryPhase::Completed | RecoveryPhase::Failed | RecoveryPhase::Cancelled
        )
    }
}

impl std::fmt::Display for RecoveryPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RecoveryPhase::Pending => "pending",
            RecoveryPhase::BackingUp => "backing-up",
            RecoveryPhase::GeneratingDomains => "generating-domains",
            RecoveryPhase::Deploying => "deploying",
            RecoveryPhase::UpdatingDns => "updating-dns",
            RecoveryPhase::RestoringData => "restoring-data",
            RecoveryPhase::Reconfiguring => "reconfiguring",
            RecoveryPhase::Notifying => "notifying",
            RecoveryPhase::Completed => "completed",
            RecoveryPhase::Failed => "failed",
            RecoveryPhase::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStep {
    Backup,
    GenerateDomains,
    Deploy,
    UpdateDns,
    RestoreData,
    Reconfigure,
    Notify,
    /// Sole step of a backup-restore run
    ExtractBackup,
}

impl RecoveryStep {
    pub fn phase(self) -> RecoveryPhase {
        match self {
            RecoveryStep::Backup => RecoveryPhase::BackingUp,
            RecoveryStep::GenerateDomains => RecoveryPhase::GeneratingDomains,
            RecoveryStep::Deploy => RecoveryPhase::Deploying,
            RecoveryStep::UpdateDns => RecoveryPhase::UpdatingDns,
            RecoveryStep::RestoreData | RecoveryStep::ExtractBackup => RecoveryPhase::RestoringData,
            RecoveryStep::Reconfigure => RecoveryPhase::Reconfiguring,
            RecoveryStep::Notify => RecoveryPhase::Notifying,
        }
    }
}

impl std::fmt::Display for RecoveryStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RecoveryStep::Backup => "backup",
            RecoveryStep::GenerateDomains => "generate_domains",
            RecoveryStep::Deploy => "deploy",
            RecoveryStep::UpdateDns => "update_dns",
            RecoveryStep::RestoreData => "restore_data",
            RecoveryStep::Reconfigure => "reconfigure",
            RecoveryStep::Notify => "notify",
            RecoveryStep::ExtractBackup => "extract_backup",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub step: RecoveryStep,
    pub succeeded: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub detail: Option<String>,
    pub error: Option<String>,
}

/// Role a generated hostname serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainRole {
    Main,
    Bot,
    Api,
    Backup,
}

impl DomainRole {
    pub const ALL: [DomainRole; 4] = [DomainRole::Main, DomainRole::Bot, DomainRole::Api, DomainRole::Backup];

    /// Hostname prefix
    pub fn prefix(self) -> &'static str {
        match self {
            DomainRole::Main => "vote",
            DomainRole::Bot => "bot",
            DomainRole::Api => "api",
            DomainRole::Backup => "backup",
        }
    }

    /// Hosting configuration key carrying this role's hostname
    pub fn env_key(self) -> &'static str {
        match self {
            DomainRole::Main => "MAIN_DOMAIN",
            DomainRole::Bot => "BOT_DOMAIN",
            DomainRole::Api => "API_DOMAIN",
            DomainRole::Backup => "BACKUP_DOMAIN",
        }
    }
}

impl std::fmt::Display for DomainRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DomainRole::Main => write!(f, "main"),
            DomainRole::Bot => write!(f, "bot"),
            DomainRole::Api => write!(f, "api"),
            DomainRole::Backup => write!(f, "backup"),
        }
    }
}

/// Generated hostnames keyed by role
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DomainMap(BTreeMap<DomainRole, String>);

impl DomainMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, role: DomainRole, host: impl Into<String>) {
        self.0.insert(role, host.into());
    }

    pub fn get(&self, role: DomainRole) -> Option<&str> {
        self.0.get(&role).map(String::as_str)
    }

    /// The main-role hostname
    pub fn primary(&self) -> Option<&str> {
        self.get(DomainRole::Main)
    }

    pub fn iter(&self) -> impl Iterator<Item = (DomainRole, &str)> {
        self.0.iter().map(|(r, h)| (*r, h.as_str()))
    }

    pub fn roles(&self) -> Vec<DomainRole> {
        self.0.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `(MAIN_DOMAIN, host)`-style pairs for the configuration store
    pub fn env_entries(&self) -> Vec<(String, String)> {
        self.iter()
            .map(|(role, host)| (role.env_key().to_string(), host.to_string()))
            .collect()
    }
}

impl std::fmt::Display for DomainMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self.iter().map(|(r, h)| format!("{}: {}", r, h)).collect();
        f.write_str(&parts.join(", "))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Deploying,
    Deployed,
    Failed,
}

/// One provider's deployment of a domain map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    pub provider: String,
    pub domains: DomainMap,
    pub status: DeploymentStatus,
    /// Address DNS records should point at
    pub endpoint: Option<String>,
    pub deployed_at: DateTime<Utc>,
}

/// An archive of application state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backup {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

/// One execution of the recovery state machine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryRun {
    pub id: Uuid,
    pub reason: String,
    pub status: RecoveryStatus,
    pub phase: RecoveryPhase,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub steps: Vec<StepOutcome>,
    pub new_domains: Option<DomainMap>,
    #[serde(default)]
    pub deployments: Vec<Deployment>,
    #[serde(default)]
    pub backup: Option<Backup>,
    pub error: Option<String>,
}

impl RecoveryRun {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            reason: reason.into(),
            status: RecoveryStatus::InProgress,
            phase: RecoveryPhase::Pending,
            started_at: Utc::now(),
            ended_at: None,
            steps: Vec::new(),
            new_domains: None,
            deployments: Vec::new(),
            backup: None,
            error: None,
        }
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        self.ended_at.map(|end| end - self.started_at)
    }

    /// The step that failed, if any
    pub fn failed_step(&self) -> Option<RecoveryStep> {
        self.steps.iter().find(|s| !s.succeeded).map(|s| s.step)
    }
}

/// Outcome of a test recovery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryTestResult {
    pub success: bool,
    pub recovery: Option<RecoveryRun>,
    pub error: Option<String>,
}
