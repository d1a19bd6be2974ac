//! Secret model and the live + backup secret set

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

use super::RotationError;

/// Separator between a live name and a backup generation suffix
pub const BACKUP_MARKER: &str = "_backup_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretKind {
    BotCredential,
    ApiKey,
    SigningSecret,
    EncryptionKey,
}

impl SecretKind {
    pub const ALL: [SecretKind; 4] = [
        SecretKind::BotCredential,
        SecretKind::ApiKey,
        SecretKind::SigningSecret,
        SecretKind::EncryptionKey,
    ];
}

impl std::fmt::Display for SecretKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SecretKind::BotCredential => write!(f, "bot_credential"),
            SecretKind::ApiKey => write!(f, "api_key"),
            SecretKind::SigningSecret => write!(f, "signing_secret"),
            SecretKind::EncryptionKey => write!(f, "encryption_key"),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret {
    pub name: String,
    pub kind: SecretKind,
    pub value: String,
    pub updated_at: DateTime<Utc>,
    pub is_backup: bool,
}

impl Secret {
    pub fn live(name: impl Into<String>, kind: SecretKind, value: String) -> Self {
        Self {
            name: name.into(),
            kind,
            value,
            updated_at: Utc::now(),
            is_backup: false,
        }
    }

    /// Live name and generation suffix of a backup entry
    pub fn backup_origin(&self) -> Option<(&str, i64)> {
        if !self.is_backup {
            return None;
        }
        let (live, generation) = self.name.rsplit_once(BACKUP_MARKER)?;
        Some((live, generation.parse().ok()?))
    }
}

// Values never reach logs
impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secret")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("value", &"<redacted>")
            .field("updated_at", &self.updated_at)
            .field("is_backup", &self.is_backup)
            .finish()
    }
}

/// Live secrets plus a bounded FIFO of prior values per live name
#[derive(Debug, Clone)]
pub struct SecretSet {
    live: BTreeMap<String, Secret>,
    /// Oldest at the front, newest at the back
    backups: BTreeMap<String, VecDeque<Secret>>,
    retention: usize,
}

impl SecretSet {
    pub fn new(retention: usize) -> Self {
        Self {
            live: BTreeMap::new(),
            backups: BTreeMap::new(),
            retention: retention.max(1),
        }
    }

    pub fn insert_live(&mut self, secret: Secret) {
        self.live.insert(secret.name.clone(), Secret { is_backup: false, ..secret });
    }

    pub fn get(&self, name: &str) -> Option<&Secret> {
        self.live.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.live.contains_key(name)
    }

    pub fn live(&self) -> impl Iterator<Item = &Secret> {
        self.live.values()
    }

    pub fn live_names(&self) -> Vec<String> {
        self.live.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Backups for one live name, newest first
    pub fn backups_for(&self, name: &str) -> Vec<&Secret> {
        self.backups
            .get(name)
            .map(|q| q.iter().rev().collect())
            .unwrap_or_default()
    }

    pub fn backup_count(&self) -> usize {
        self.backups.values().map(VecDeque::len).sum()
    }

    /// Demote the current value to a backup and install `value` as live.
    ///
    /// Evicts the oldest backups beyond the retention bound.
    pub fn supersede(&mut self, name: &str, value: String, now: DateTime<Utc>) -> Result<(), RotationError> {
        let current = self
            .live
            .get_mut(name)
            .ok_or_else(|| RotationError::NotFound(name.to_string()))?;

        let queue = self.backups.entry(name.to_string()).or_default();
        // Suffixes stay strictly increasing even within one millisecond
        let mut generation = now.timestamp_millis();
        if let Some((_, last)) = queue.back().and_then(Secret::backup_origin) {
            generation = generation.max(last + 1);
        }

        queue.push_back(Secret {
            name: format!("{}{}{}", name, BACKUP_MARKER, generation),
            kind: current.kind,
            value: std::mem::replace(&mut current.value, value),
            updated_at: current.updated_at,
            is_backup: true,
        });
        current.updated_at = now;

        while queue.len() > self.retention {
            if let Some(evicted) = queue.pop_front() {
                tracing::debug!(secret = %name, backup = %evicted.name, "Evicted oldest backup");
            }
        }
        Ok(())
    }

    /// Promote the newest backup back to live and drop it from the backup set
    pub fn promote_latest_backup(&mut self, name: &str, now: DateTime<Utc>) -> Result<Secret, RotationError> {
        let backup = self
            .backups
            .get_mut(name)
            .and_then(VecDeque::pop_back)
            .ok_or_else(|| RotationError::NoBackupFound(name.to_string()))?;

        let restored = Secret {
            name: name.to_string(),
            kind: backup.kind,
            value: backup.value,
            updated_at: now,
            is_backup: false,
        };
        self.live.insert(name.to_string(), restored.clone());
        Ok(restored)
    }

    /// Flatten to persisted records (live first, then backups oldest first)
    pub fn to_records(&self) -> Vec<Secret> {
        self.live
            .values()
            .cloned()
            .chain(self.backups.values().flat_map(|q| q.iter().cloned()))
            .collect()
    }

    /// Rebuild from persisted records. Backups whose live secret is absent are dropped.
    pub fn from_records(records: Vec<Secret>, retention: usize) -> Self {
        let mut set = Self::new(retention);
        let mut orphans: Vec<(String, i64, Secret)> = Vec::new();

        for record in records {
            if record.is_backup {
                let origin = record.backup_origin().map(|(l, g)| (l.to_string(), g));
                if let Some((live, generation)) = origin {
                    orphans.push((live, generation, record));
                }
            } else {
                set.insert_live(record);
            }
        }

        orphans.sort_by_key(|(_, generation, _)| *generation);
        for (live, _, record) in orphans {
            if !set.live.contains_key(&live) {
                continue;
            }
            let queue = set.backups.entry(live).or_default();
            queue.push_back(record);
            while queue.len() > set.retention {
                queue.pop_front();
            }
        }
        set
    }
}
