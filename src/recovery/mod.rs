//! Disaster recovery: backup, fresh domains, redeploy, DNS, data restore,
//! reconfiguration and notification as one guarded state machine.

mod archive;
mod domains;
mod orchestrator;
mod run;

pub use archive::Archiver;
pub use domains::generate_domains;
pub use orchestrator::{ActiveRunInfo, RecoveryDeps, RecoveryError, RecoveryOrchestrator};
pub use run::{
    Backup, Deployment, DeploymentStatus, DomainMap, DomainRole, RecoveryPhase, RecoveryRun,
    RecoveryStatus, RecoveryStep, RecoveryTestResult, StepOutcome,
};
