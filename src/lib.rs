//! Warden: Self-Healing Infrastructure Controller
//!
//! Keeps a small web service alive and its credentials fresh.
//!
//! ## Architecture
//!
//! - **Health Monitor**: concurrent sweeps over HTTP/TCP/custom/system targets
//! - **Token Rotation Manager**: scheduled and on-demand secret rotation with
//!   bounded per-secret backups
//! - **Recovery Orchestrator**: seven-step disaster recovery onto fresh domains
//! - **Security Manager**: the control loop tying the three together, with
//!   alerts fanned out through the **Alert Sink**
//!
//! Every side effect goes through an injected capability in `collaborators`.

pub mod alerts;
pub mod collaborators;
pub mod config;
pub mod manager;
pub mod monitor;
pub mod recovery;
pub mod rotation;
pub mod storage;
pub mod types;

// Re-export configuration
pub use config::WardenConfig;

// Re-export shared types
pub use types::{AlertKind, SecurityAlert, Severity, SystemStatus};

// Re-export components
pub use alerts::AlertSink;
pub use manager::{Collaborators, ManagerError, SecurityManager};
pub use monitor::{HealthMonitor, HealthSnapshot, MonitoredTarget, TargetKind, TargetStatus};
pub use recovery::{RecoveryError, RecoveryOrchestrator, RecoveryRun, RecoveryStatus};
pub use rotation::{RotationError, RotationRecord, TokenRotationManager};

// Re-export storage
pub use storage::{InMemoryStore, SledStateStore, StateStore};
