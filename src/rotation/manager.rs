//! Token Rotation Manager
//!
//! Owns the live + backup secret set. A rotation pass generates every
//! replacement first, then demotes and replaces under one write lock, then
//! republishes hosting configuration once for the whole pass.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::generator::generate;
use super::secret::{Secret, SecretKind, SecretSet};
use crate::alerts::AlertSink;
use crate::collaborators::ConfigStore;
use crate::config::RotationConfig;
use crate::storage::{StateStore, StoreError};
use crate::types::{AlertKind, Severity};

#[derive(Debug, thiserror::Error)]
pub enum RotationError {
    #[error("a rotation is already in progress")]
    InProgress,
    #[error("secret '{0}' not found")]
    NotFound(String),
    #[error("no backup found for secret '{0}'")]
    NoBackupFound(String),
    #[error("entropy source unavailable: {0}")]
    Entropy(#[from] rand::Error),
    #[error("state store error: {0}")]
    Store(#[from] StoreError),
    #[error("rotation loop already running")]
    AlreadyRunning,
}

/// Outcome of one rotation pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RotationRecord {
    pub timestamp: DateTime<Utc>,
    pub rotated: usize,
    pub success: bool,
    pub error: Option<String>,
}

/// Point-in-time view for status displays
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationStatus {
    pub is_rotating: bool,
    pub last_rotation: Option<DateTime<Utc>>,
    pub next_rotation: Option<DateTime<Utc>>,
    pub live_secrets: Vec<String>,
    pub backup_count: usize,
}

/// Held/not-held flag released on every exit path
struct RotationGuard<'a>(&'a AtomicBool);

impl<'a> RotationGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RotationGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct TokenRotationManager {
    secrets: RwLock<SecretSet>,
    rotating: AtomicBool,
    history: RwLock<VecDeque<RotationRecord>>,
    history_limit: usize,
    interval: Duration,
    last_rotation: RwLock<Option<DateTime<Utc>>>,
    next_rotation: RwLock<Option<DateTime<Utc>>>,
    config_store: Arc<dyn ConfigStore>,
    store: Arc<dyn StateStore>,
    alerts: Option<Arc<AlertSink>>,
    loop_cancel: std::sync::Mutex<Option<CancellationToken>>,
}

impl TokenRotationManager {
    /// Load persisted secrets and fill in any roster entries that are missing.
    ///
    /// A missing roster secret takes its value from the environment variable
    /// of the same name, or a freshly generated one.
    pub fn load(
        config: &RotationConfig,
        config_store: Arc<dyn ConfigStore>,
        store: Arc<dyn StateStore>,
    ) -> Result<Self, RotationError> {
        let mut set = match store.load_secrets()? {
            Some(records) => SecretSet::from_records(records, config.backup_retention),
            None => SecretSet::new(config.backup_retention),
        };

        let mut seeded = 0usize;
        for entry in &config.secrets {
            if set.contains(&entry.name) {
                continue;
            }
            let value = match std::env::var(&entry.name) {
                Ok(v) if !v.is_empty() => v,
                _ => generate(entry.kind)?,
            };
            set.insert_live(Secret::live(&entry.name, entry.kind, value));
            seeded += 1;
        }
        if seeded > 0 {
            store.save_secrets(&set.to_records())?;
        }

        let mut history: Vec<RotationRecord> = store.recent_rotations(config.history_limit)?;
        history.reverse();
        let last_rotation = history.iter().rev().find(|r| r.success).map(|r| r.timestamp);

        info!(
            live = set.len(),
            backups = set.backup_count(),
            seeded,
            "Token rotation manager loaded"
        );

        Ok(Self {
            secrets: RwLock::new(set),
            rotating: AtomicBool::new(false),
            history: RwLock::new(history.into_iter().collect()),
            history_limit: config.history_limit.max(1),
            interval: config.interval(),
            last_rotation: RwLock::new(last_rotation),
            next_rotation: RwLock::new(None),
            config_store,
            store,
            alerts: None,
            loop_cancel: std::sync::Mutex::new(None),
        })
    }

    /// Emit token rotation alerts through `alerts`
    pub fn with_alerts(mut self, alerts: Arc<AlertSink>) -> Self {
        self.alerts = Some(alerts);
        self
    }

    pub fn is_rotating(&self) -> bool {
        self.rotating.load(Ordering::Acquire)
    }

    /// Rotate every live secret and republish once.
    ///
    /// Rejected with `InProgress` while another rotation holds the flag.
    /// Publish failures land in the returned record; the new values stay live.
    pub async fn rotate_all(&self) -> Result<RotationRecord, RotationError> {
        let Some(_guard) = RotationGuard::acquire(&self.rotating) else {
            warn!("Rotation pass requested while one is already running, rejecting");
            return Err(RotationError::InProgress);
        };

        info!("🔄 Starting rotation pass");
        let started = Utc::now();

        let mut roster: Vec<(String, SecretKind)> = self
            .secrets
            .read()
            .await
            .live()
            .map(|s| (s.name.clone(), s.kind))
            .collect();
        roster.sort_by_key(|(_, kind)| *kind);

        // Generate everything before touching the set so an entropy failure mutates nothing
        let mut replacements = Vec::with_capacity(roster.len());
        for (name, kind) in &roster {
            match generate(*kind) {
                Ok(value) => replacements.push((name.clone(), value)),
                Err(e) => {
                    error!(error = %e, "Entropy source failed, rotation pass aborted");
                    let record = RotationRecord {
                        timestamp: started,
                        rotated: 0,
                        success: false,
                        error: Some(format!("entropy source unavailable: {}", e)),
                    };
                    self.finish_pass(record).await;
                    return Err(RotationError::Entropy(e));
                }
            }
        }

        {
            let mut set = self.secrets.write().await;
            let now = Utc::now();
            for kind in SecretKind::ALL {
                let group: Vec<&(String, String)> = replacements
                    .iter()
                    .zip(&roster)
                    .filter(|(_, (_, k))| *k == kind)
                    .map(|(r, _)| r)
                    .collect();
                if group.is_empty() {
                    continue;
                }
                for (name, value) in &group {
                    set.supersede(name, value.clone(), now)?;
                }
                debug!(kind = %kind, count = group.len(), "Rotated secret group");
            }
            self.persist_secrets(&set);
        }

        // Barrier: one publish observing every rotation from this pass
        let publish_error = if replacements.is_empty() {
            None
        } else {
            self.config_store
                .upsert(&replacements)
                .await
                .err()
                .map(|e| e.to_string())
        };

        let record = RotationRecord {
            timestamp: started,
            rotated: replacements.len(),
            success: publish_error.is_none(),
            error: publish_error,
        };
        *self.last_rotation.write().await = Some(started);
        self.finish_pass(record.clone()).await;

        Ok(record)
    }

    /// Rotate a single secret and republish it.
    ///
    /// Returns whether the republish succeeded; the new value is live either way.
    pub async fn rotate_one(&self, name: &str) -> Result<bool, RotationError> {
        let Some(_guard) = RotationGuard::acquire(&self.rotating) else {
            warn!(secret = %name, "Rotation requested while one is already running, rejecting");
            return Err(RotationError::InProgress);
        };

        let kind = self
            .secrets
            .read()
            .await
            .get(name)
            .map(|s| s.kind)
            .ok_or_else(|| RotationError::NotFound(name.to_string()))?;
        let value = generate(kind)?;

        {
            let mut set = self.secrets.write().await;
            set.supersede(name, value.clone(), Utc::now())?;
            self.persist_secrets(&set);
        }

        info!(secret = %name, kind = %kind, "Secret rotated");
        Ok(self.publish(&[(name.to_string(), value)]).await)
    }

    /// Promote the newest backup of `name` back to live and republish it.
    ///
    /// Returns whether the republish succeeded; fails with `NoBackupFound`
    /// when nothing is retained for `name`.
    pub async fn restore_from_backup(&self, name: &str) -> Result<bool, RotationError> {
        let Some(_guard) = RotationGuard::acquire(&self.rotating) else {
            warn!(secret = %name, "Restore requested while a rotation is running, rejecting");
            return Err(RotationError::InProgress);
        };

        let restored = {
            let mut set = self.secrets.write().await;
            let restored = set.promote_latest_backup(name, Utc::now())?;
            self.persist_secrets(&set);
            restored
        };

        info!(secret = %name, "Secret restored from backup");
        Ok(self.publish(&[(restored.name, restored.value)]).await)
    }

    /// Current live value of a secret
    pub async fn current(&self, name: &str) -> Option<Secret> {
        self.secrets.read().await.get(name).cloned()
    }

    /// Retained backups of a secret, newest first
    pub async fn backups(&self, name: &str) -> Vec<Secret> {
        self.secrets
            .read()
            .await
            .backups_for(name)
            .into_iter()
            .cloned()
            .collect()
    }

    pub async fn status(&self) -> RotationStatus {
        let set = self.secrets.read().await;
        RotationStatus {
            is_rotating: self.is_rotating(),
            last_rotation: *self.last_rotation.read().await,
            next_rotation: *self.next_rotation.read().await,
            live_secrets: set.live_names(),
            backup_count: set.backup_count(),
        }
    }

    /// Rotation records, oldest first
    pub async fn history(&self) -> Vec<RotationRecord> {
        self.history.read().await.iter().cloned().collect()
    }

    /// Spawn the scheduled rotation loop
    pub fn start(self: &Arc<Self>) -> Result<JoinHandle<()>, RotationError> {
        let mut slot = self.loop_cancel.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            return Err(RotationError::AlreadyRunning);
        }
        let cancel = CancellationToken::new();
        *slot = Some(cancel.clone());
        Ok(tokio::spawn(Arc::clone(self).run(cancel)))
    }

    pub fn stop(&self) {
        if let Some(cancel) = self.loop_cancel.lock().unwrap_or_else(|e| e.into_inner()).take() {
            cancel.cancel();
        }
    }

    /// Whether the scheduled loop has been started and not stopped
    pub fn is_scheduled(&self) -> bool {
        self.loop_cancel
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Sleep one interval, rotate, repeat until cancelled
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!(interval_secs = self.interval.as_secs(), "[Rotation] Scheduled rotation started");
        loop {
            if let Ok(step) = chrono::Duration::from_std(self.interval) {
                *self.next_rotation.write().await = Some(Utc::now() + step);
            }
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("[Rotation] Scheduled rotation stopped");
                    *self.next_rotation.write().await = None;
                    return;
                }
                _ = tokio::time::sleep(self.interval) => {}
            }
            match self.rotate_all().await {
                Ok(_) | Err(RotationError::InProgress) => {}
                Err(e) => error!(error = %e, "[Rotation] Scheduled pass failed"),
            }
        }
    }

    async fn publish(&self, entries: &[(String, String)]) -> bool {
        match self.config_store.upsert(entries).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Configuration republish failed, new secret values remain live");
                false
            }
        }
    }

    fn persist_secrets(&self, set: &SecretSet) {
        if let Err(e) = self.store.save_secrets(&set.to_records()) {
            warn!(error = %e, "Failed to persist secret set");
        }
    }

    async fn finish_pass(&self, record: RotationRecord) {
        {
            let mut history = self.history.write().await;
            history.push_back(record.clone());
            while history.len() > self.history_limit {
                history.pop_front();
            }
        }
        if let Err(e) = self.store.append_rotation(&record) {
            warn!(error = %e, "Failed to persist rotation record");
        }

        if record.success {
            info!(rotated = record.rotated, "✅ Rotation pass complete");
        } else {
            error!(
                rotated = record.rotated,
                error = record.error.as_deref().unwrap_or("unknown"),
                "Rotation pass finished with errors"
            );
        }

        if let Some(alerts) = &self.alerts {
            if record.success {
                alerts
                    .emit(
                        AlertKind::TokenRotation,
                        format!("Rotated {} secrets", record.rotated),
                        Severity::Info,
                    )
                    .await;
            } else {
                alerts
                    .emit(
                        AlertKind::TokenRotationError,
                        format!(
                            "Token rotation failed: {}",
                            record.error.as_deref().unwrap_or("unknown error")
                        ),
                        Severity::Warning,
                    )
                    .await;
            }
        }
    }
}
