//! Controller State Storage
//!
//! Durable storage for the secret set, recovery history and rotation history
//! using Sled DB. History trees are keyed by big-endian nanosecond timestamps
//! so iteration order is chronological.

pub mod lockfile;
pub mod persistence;

pub use lockfile::{LockError, ProcessLock};
pub use persistence::{HistoryLimits, InMemoryStore, StateStore, StoreError};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

use crate::recovery::RecoveryRun;
use crate::rotation::{RotationRecord, Secret};

const SECRETS_TREE: &str = "secrets";
const SECRETS_KEY: &[u8] = b"secret_set";
const RECOVERIES_TREE: &str = "recoveries";
const ROTATIONS_TREE: &str = "rotations";

/// Sled-backed state store
#[derive(Clone)]
pub struct SledStateStore {
    db: sled::Db,
    secrets: sled::Tree,
    recoveries: sled::Tree,
    rotations: sled::Tree,
    limits: HistoryLimits,
}

impl SledStateStore {
    /// Open or create the state database
    pub fn open<P: AsRef<Path>>(path: P, limits: HistoryLimits) -> Result<Self> {
        let path_ref = path.as_ref();
        let db = sled::open(path_ref).context("Failed to open sled database")?;
        let secrets = db.open_tree(SECRETS_TREE).context("Failed to open secrets tree")?;
        let recoveries = db
            .open_tree(RECOVERIES_TREE)
            .context("Failed to open recoveries tree")?;
        let rotations = db
            .open_tree(ROTATIONS_TREE)
            .context("Failed to open rotations tree")?;

        tracing::info!("State storage opened at {:?}", path_ref);

        Ok(Self {
            db,
            secrets,
            recoveries,
            rotations,
            limits,
        })
    }

    /// Number of stored recovery runs
    pub fn recovery_count(&self) -> usize {
        self.recoveries.len()
    }

    /// Number of stored rotation records
    pub fn rotation_count(&self) -> usize {
        self.rotations.len()
    }
}

/// Nanosecond key, bumped past any existing entry with the same instant
fn unique_key(tree: &sled::Tree, at: DateTime<Utc>) -> Result<[u8; 8], StoreError> {
    let mut nanos = at
        .timestamp_nanos_opt()
        .unwrap_or_else(|| at.timestamp().saturating_mul(1_000_000_000));
    while tree.contains_key(nanos.to_be_bytes())? {
        nanos += 1;
    }
    Ok(nanos.to_be_bytes())
}

fn append_bounded<T: Serialize>(
    db: &sled::Db,
    tree: &sled::Tree,
    at: DateTime<Utc>,
    item: &T,
    limit: usize,
) -> Result<(), StoreError> {
    let key = unique_key(tree, at)?;
    tree.insert(key, serde_json::to_vec(item)?)?;
    while tree.len() > limit.max(1) {
        if tree.pop_min()?.is_none() {
            break;
        }
    }
    db.flush()?;
    Ok(())
}

fn recent<T: DeserializeOwned>(tree: &sled::Tree, limit: usize) -> Result<Vec<T>, StoreError> {
    let mut out = Vec::new();

    // Iterate in reverse order (most recent first)
    for item in tree.iter().rev() {
        if out.len() >= limit {
            break;
        }
        let (_key, value) = item?;
        match serde_json::from_slice::<T>(&value) {
            Ok(v) => out.push(v),
            Err(e) => {
                tracing::warn!("Failed to deserialize stored entry: {}", e);
                continue;
            }
        }
    }
    Ok(out)
}

impl StateStore for SledStateStore {
    fn save_secrets(&self, secrets: &[Secret]) -> Result<(), StoreError> {
        self.secrets.insert(SECRETS_KEY, serde_json::to_vec(secrets)?)?;
        self.db.flush()?;
        Ok(())
    }

    fn load_secrets(&self) -> Result<Option<Vec<Secret>>, StoreError> {
        match self.secrets.get(SECRETS_KEY)? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    fn append_recovery(&self, run: &RecoveryRun) -> Result<(), StoreError> {
        append_bounded(&self.db, &self.recoveries, run.started_at, run, self.limits.recoveries)
    }

    fn recent_recoveries(&self, limit: usize) -> Result<Vec<RecoveryRun>, StoreError> {
        recent(&self.recoveries, limit)
    }

    fn append_rotation(&self, record: &RotationRecord) -> Result<(), StoreError> {
        append_bounded(&self.db, &self.rotations, record.timestamp, record, self.limits.rotations)
    }

    fn recent_rotations(&self, limit: usize) -> Result<Vec<RotationRecord>, StoreError> {
        recent(&self.rotations, limit)
    }

    fn backend_name(&self) -> &'static str {
        "Sled"
    }
}
