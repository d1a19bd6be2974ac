//! StateStore trait: pluggable persistence for controller state
//!
//! Persists the three pieces of state the controller owns:
//! - the live + backup secret set
//! - recovery run history (bounded)
//! - rotation record history (bounded)
//!
//! Backends:
//! - `SledStateStore`: durable, one sled tree per concern
//! - `InMemoryStore`: for tests and dry runs

use crate::recovery::RecoveryRun;
use crate::rotation::{RotationRecord, Secret};

/// Trait for pluggable persistence backends
///
/// Implementations must be thread-safe (Send + Sync) for shared access
/// across async tasks.
pub trait StateStore: Send + Sync {
    /// Replace the stored secret set
    fn save_secrets(&self, secrets: &[Secret]) -> Result<(), StoreError>;

    /// Stored secret set, `None` if never saved
    fn load_secrets(&self) -> Result<Option<Vec<Secret>>, StoreError>;

    /// Append a finished recovery run, evicting the oldest beyond the bound
    fn append_recovery(&self, run: &RecoveryRun) -> Result<(), StoreError>;

    /// Recent recovery runs (most recent first)
    fn recent_recoveries(&self, limit: usize) -> Result<Vec<RecoveryRun>, StoreError>;

    /// Append a rotation record, evicting the oldest beyond the bound
    fn append_rotation(&self, record: &RotationRecord) -> Result<(), StoreError>;

    /// Recent rotation records (most recent first)
    fn recent_rotations(&self, limit: usize) -> Result<Vec<RotationRecord>, StoreError>;

    /// Backend name for logging
    fn backend_name(&self) -> &'static str;
}

/// Persistence errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),
    #[error("lock poisoned: {0}")]
    Poisoned(String),
}

/// History bounds applied on append
#[derive(Debug, Clone, Copy)]
pub struct HistoryLimits {
    pub recoveries: usize,
    pub rotations: usize,
}

impl Default for HistoryLimits {
    fn default() -> Self {
        Self {
            recoveries: crate::config::defaults::RECOVERY_HISTORY_LIMIT,
            rotations: crate::config::defaults::ROTATION_HISTORY_LIMIT,
        }
    }
}

/// In-memory persistence for testing and dry runs
///
/// Thread-safe via `RwLock`. Not durable; data is lost on restart.
pub struct InMemoryStore {
    secrets: std::sync::RwLock<Option<Vec<Secret>>>,
    recoveries: std::sync::RwLock<Vec<RecoveryRun>>,
    rotations: std::sync::RwLock<Vec<RotationRecord>>,
    limits: HistoryLimits,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_limits(HistoryLimits::default())
    }

    pub fn with_limits(limits: HistoryLimits) -> Self {
        Self {
            secrets: std::sync::RwLock::new(None),
            recoveries: std::sync::RwLock::new(Vec::new()),
            rotations: std::sync::RwLock::new(Vec::new()),
            limits,
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn push_bounded<T>(store: &mut Vec<T>, item: T, limit: usize) {
    store.push(item);
    // Evict oldest if over limit
    if store.len() > limit.max(1) {
        let excess = store.len() - limit.max(1);
        store.drain(..excess);
    }
}

impl StateStore for InMemoryStore {
    fn save_secrets(&self, secrets: &[Secret]) -> Result<(), StoreError> {
        let mut store = self
            .secrets
            .write()
            .map_err(|e| StoreError::Poisoned(e.to_string()))?;
        *store = Some(secrets.to_vec());
        Ok(())
    }

    fn load_secrets(&self) -> Result<Option<Vec<Secret>>, StoreError> {
        let store = self
            .secrets
            .read()
            .map_err(|e| StoreError::Poisoned(e.to_string()))?;
        Ok(store.clone())
    }

    fn append_recovery(&self, run: &RecoveryRun) -> Result<(), StoreError> {
        let mut store = self
            .recoveries
            .write()
            .map_err(|e| StoreError::Poisoned(e.to_string()))?;
        push_bounded(&mut store, run.clone(), self.limits.recoveries);
        Ok(())
    }

    fn recent_recoveries(&self, limit: usize) -> Result<Vec<RecoveryRun>, StoreError> {
        let store = self
            .recoveries
            .read()
            .map_err(|e| StoreError::Poisoned(e.to_string()))?;
        Ok(store.iter().rev().take(limit).cloned().collect())
    }

    fn append_rotation(&self, record: &RotationRecord) -> Result<(), StoreError> {
        let mut store = self
            .rotations
            .write()
            .map_err(|e| StoreError::Poisoned(e.to_string()))?;
        push_bounded(&mut store, record.clone(), self.limits.rotations);
        Ok(())
    }

    fn recent_rotations(&self, limit: usize) -> Result<Vec<RotationRecord>, StoreError> {
        let store = self
            .rotations
            .read()
            .map_err(|e| StoreError::Poisoned(e.to_string()))?;
        Ok(store.iter().rev().take(limit).cloned().collect())
    }

    fn backend_name(&self) -> &'static str {
        "InMemory"
    }
}
