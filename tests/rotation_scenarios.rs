//! Token rotation scenarios: FIFO backups, restore, mutual exclusion
//!
//! Run with: cargo test --test rotation_scenarios

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Notify;

use warden::collaborators::{ConfigStore, ConfigStoreError, MemoryConfigStore};
use warden::config::{RotationConfig, SecretConfig};
use warden::rotation::SecretKind;
use warden::{InMemoryStore, RotationError, StateStore, TokenRotationManager};

fn config(names: &[(&str, SecretKind)]) -> RotationConfig {
    RotationConfig {
        backup_retention: 3,
        secrets: names
            .iter()
            .map(|(name, kind)| SecretConfig {
                name: name.to_string(),
                kind: *kind,
            })
            .collect(),
        ..RotationConfig::default()
    }
}

fn manager(config: &RotationConfig, publish: Arc<dyn ConfigStore>) -> TokenRotationManager {
    TokenRotationManager::load(config, publish, Arc::new(InMemoryStore::new())).unwrap()
}

async fn live_value(m: &TokenRotationManager, name: &str) -> String {
    m.current(name).await.map(|s| s.value).unwrap_or_default()
}

#[tokio::test]
async fn four_rotations_keep_three_newest_backups() {
    let cfg = config(&[("WARDEN_TEST_API_KEY", SecretKind::ApiKey)]);
    let m = manager(&cfg, Arc::new(MemoryConfigStore::new()));

    let mut predecessors = Vec::new();
    for _ in 0..4 {
        predecessors.push(live_value(&m, "WARDEN_TEST_API_KEY").await);
        let record = m.rotate_all().await.unwrap();
        assert_eq!(record.rotated, 1);
        assert!(record.success);
    }

    let backups = m.backups("WARDEN_TEST_API_KEY").await;
    assert_eq!(backups.len(), 3);
    // Newest first; the first predecessor was evicted
    let values: Vec<&str> = backups.iter().map(|b| b.value.as_str()).collect();
    assert_eq!(values, vec![&predecessors[3][..], &predecessors[2][..], &predecessors[1][..]]);
    assert!(!values.contains(&predecessors[0].as_str()));
    assert!(backups.iter().all(|b| b.is_backup));

    let live = m.current("WARDEN_TEST_API_KEY").await.unwrap();
    assert_eq!(live.value.len(), 64);
    assert!(!predecessors.contains(&live.value));
    assert_eq!(m.history().await.len(), 4);
}

#[tokio::test]
async fn restore_brings_back_prior_value_then_runs_dry() {
    let cfg = config(&[("WARDEN_TEST_JWT_SECRET", SecretKind::SigningSecret)]);
    let publish = Arc::new(MemoryConfigStore::new());
    let m = manager(&cfg, publish.clone());

    let original = live_value(&m, "WARDEN_TEST_JWT_SECRET").await;
    assert!(m.rotate_one("WARDEN_TEST_JWT_SECRET").await.unwrap());
    assert_ne!(live_value(&m, "WARDEN_TEST_JWT_SECRET").await, original);

    assert!(m.restore_from_backup("WARDEN_TEST_JWT_SECRET").await.unwrap());
    assert_eq!(live_value(&m, "WARDEN_TEST_JWT_SECRET").await, original);
    assert!(m.backups("WARDEN_TEST_JWT_SECRET").await.is_empty());
    assert_eq!(publish.get("WARDEN_TEST_JWT_SECRET"), Some(original));

    assert!(matches!(
        m.restore_from_backup("WARDEN_TEST_JWT_SECRET").await,
        Err(RotationError::NoBackupFound(_))
    ));
}

#[tokio::test]
async fn unknown_secret_is_not_found() {
    let cfg = config(&[("WARDEN_TEST_BOT_TOKEN", SecretKind::BotCredential)]);
    let m = manager(&cfg, Arc::new(MemoryConfigStore::new()));
    assert!(matches!(
        m.rotate_one("NO_SUCH_SECRET").await,
        Err(RotationError::NotFound(_))
    ));
}

#[tokio::test]
async fn rotation_pass_publishes_once_and_persists() {
    let cfg = config(&[
        ("WARDEN_TEST_BOT_TOKEN", SecretKind::BotCredential),
        ("WARDEN_TEST_VENDOR_KEY", SecretKind::ApiKey),
        ("WARDEN_TEST_DATA_KEY", SecretKind::EncryptionKey),
    ]);
    let publish = Arc::new(MemoryConfigStore::new());
    let store = Arc::new(InMemoryStore::new());
    let m = TokenRotationManager::load(&cfg, publish.clone(), store.clone()).unwrap();

    let record = m.rotate_all().await.unwrap();
    assert_eq!(record.rotated, 3);
    assert_eq!(publish.publish_count(), 1);
    assert_eq!(
        publish.get("WARDEN_TEST_BOT_TOKEN"),
        Some(live_value(&m, "WARDEN_TEST_BOT_TOKEN").await)
    );

    // A fresh manager over the same store sees the rotated values
    let reloaded = TokenRotationManager::load(&cfg, publish.clone(), store.clone()).unwrap();
    assert_eq!(
        live_value(&reloaded, "WARDEN_TEST_DATA_KEY").await,
        live_value(&m, "WARDEN_TEST_DATA_KEY").await
    );
    assert_eq!(reloaded.backups("WARDEN_TEST_DATA_KEY").await.len(), 1);
    assert_eq!(store.recent_rotations(10).unwrap().len(), 1);
}

/// Parks inside `upsert` until released
struct GatedStore {
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl ConfigStore for GatedStore {
    async fn upsert(&self, _entries: &[(String, String)]) -> Result<(), ConfigStoreError> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(())
    }
}

#[tokio::test]
async fn concurrent_rotation_is_rejected_not_queued() {
    let cfg = config(&[("WARDEN_TEST_API_KEY", SecretKind::ApiKey)]);
    let gate = Arc::new(GatedStore {
        entered: Notify::new(),
        release: Notify::new(),
    });
    let m = Arc::new(manager(&cfg, gate.clone()));

    let first = tokio::spawn({
        let m = Arc::clone(&m);
        async move { m.rotate_all().await }
    });
    gate.entered.notified().await;

    assert!(m.is_rotating());
    assert!(matches!(m.rotate_all().await, Err(RotationError::InProgress)));
    assert!(matches!(
        m.rotate_one("WARDEN_TEST_API_KEY").await,
        Err(RotationError::InProgress)
    ));

    gate.release.notify_one();
    let record = first.await.unwrap().unwrap();
    assert!(record.success);
    assert!(!m.is_rotating());
    // The rejected attempts left no record behind
    assert_eq!(m.history().await.len(), 1);
}

#[tokio::test]
async fn publish_failure_is_recorded_but_values_stay_rotated() {
    struct FailingStore;

    #[async_trait]
    impl ConfigStore for FailingStore {
        async fn upsert(&self, _entries: &[(String, String)]) -> Result<(), ConfigStoreError> {
            Err(ConfigStoreError::InvalidKey("denied".to_string()))
        }
    }

    let cfg = config(&[("WARDEN_TEST_API_KEY", SecretKind::ApiKey)]);
    let m = manager(&cfg, Arc::new(FailingStore));
    let before = live_value(&m, "WARDEN_TEST_API_KEY").await;

    let record = m.rotate_all().await.unwrap();
    assert!(!record.success);
    assert!(record.error.is_some());
    assert_ne!(live_value(&m, "WARDEN_TEST_API_KEY").await, before);
    assert_eq!(m.backups("WARDEN_TEST_API_KEY").await[0].value, before);
}
