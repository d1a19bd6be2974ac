//! Configuration store capability
//!
//! The controller republishes hosting configuration as key/value upserts.
//! `EnvFileStore` writes them into a dotenv-style file and substitutes
//! `${KEY}` placeholders in compose descriptors; `MemoryConfigStore` keeps
//! them in memory for tests and dry runs.

use async_trait::async_trait;
use regex::{NoExpand, Regex};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::config::HostingConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigStoreError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid key '{0}'")]
    InvalidKey(String),
}

#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Upsert every entry in one publish
    async fn upsert(&self, entries: &[(String, String)]) -> Result<(), ConfigStoreError>;
}

// ============================================================================
// Env-file + compose placeholders
// ============================================================================

pub struct EnvFileStore {
    env_file: PathBuf,
    compose_files: Vec<PathBuf>,
}

impl EnvFileStore {
    pub fn new(env_file: impl Into<PathBuf>, compose_files: Vec<PathBuf>) -> Self {
        Self {
            env_file: env_file.into(),
            compose_files,
        }
    }

    pub fn from_config(config: &HostingConfig) -> Self {
        Self::new(config.env_file.clone(), config.compose_files.clone())
    }
}

/// Replace `KEY=...` lines, appending keys that are not yet present
fn apply_env_entries(contents: &str, entries: &[(String, String)]) -> Result<String, ConfigStoreError> {
    let mut out = contents.to_string();
    for (key, value) in entries {
        if key.is_empty() || key.contains(&['=', '\n'][..]) {
            return Err(ConfigStoreError::InvalidKey(key.clone()));
        }
        let pattern = format!(r"(?m)^{}=.*$", regex::escape(key));
        let re = Regex::new(&pattern).map_err(|_| ConfigStoreError::InvalidKey(key.clone()))?;
        let line = format!("{}={}", key, value);

        if re.is_match(&out) {
            out = re.replace_all(&out, NoExpand(&line)).into_owned();
        } else {
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(&line);
            out.push('\n');
        }
    }
    Ok(out)
}

fn apply_placeholders(contents: &str, entries: &[(String, String)]) -> String {
    entries.iter().fold(contents.to_string(), |acc, (key, value)| {
        acc.replace(&format!("${{{}}}", key), value)
    })
}

/// Write through a sibling temp file so readers never see a partial file
async fn write_atomic(path: &Path, contents: &str) -> Result<(), ConfigStoreError> {
    let tmp = path.with_extension("warden-tmp");
    tokio::fs::write(&tmp, contents)
        .await
        .map_err(|source| ConfigStoreError::Write { path: tmp.clone(), source })?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|source| ConfigStoreError::Write { path: path.to_path_buf(), source })
}

#[async_trait]
impl ConfigStore for EnvFileStore {
    async fn upsert(&self, entries: &[(String, String)]) -> Result<(), ConfigStoreError> {
        let current = match tokio::fs::read_to_string(&self.env_file).await {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(source) => {
                return Err(ConfigStoreError::Read {
                    path: self.env_file.clone(),
                    source,
                })
            }
        };
        let updated = apply_env_entries(&current, entries)?;
        write_atomic(&self.env_file, &updated).await?;

        for compose in &self.compose_files {
            let contents = match tokio::fs::read_to_string(compose).await {
                Ok(s) => s,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tracing::debug!(file = %compose.display(), "Compose file absent, skipping");
                    continue;
                }
                Err(source) => {
                    return Err(ConfigStoreError::Read {
                        path: compose.clone(),
                        source,
                    })
                }
            };
            let replaced = apply_placeholders(&contents, entries);
            if replaced != contents {
                write_atomic(compose, &replaced).await?;
            }
        }

        tracing::info!(
            env_file = %self.env_file.display(),
            keys = entries.len(),
            "Hosting configuration republished"
        );
        Ok(())
    }
}

// ============================================================================
// In-memory store
// ============================================================================

#[derive(Default)]
pub struct MemoryConfigStore {
    values: Mutex<BTreeMap<String, String>>,
    publishes: AtomicUsize,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    /// Number of `upsert` calls observed
    pub fn publish_count(&self) -> usize {
        self.publishes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn upsert(&self, entries: &[(String, String)]) -> Result<(), ConfigStoreError> {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        for (key, value) in entries {
            values.insert(key.clone(), value.clone());
        }
        self.publishes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
