//! Warden Configuration - controller tunables as operator-editable TOML values
//!
//! Each struct implements `Default` with the built-in values from `defaults`,
//! so an absent or empty config file yields a working controller.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use super::defaults;
use crate::monitor::TargetKind;
use crate::rotation::{SecretKind, BACKUP_MARKER};

/// Environment variable pointing at the config file
pub const CONFIG_ENV_VAR: &str = "WARDEN_CONFIG";

/// Config file looked up in the working directory
pub const LOCAL_CONFIG_FILE: &str = "warden.toml";

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for one controller deployment.
///
/// Load with `WardenConfig::load()` which searches:
/// 1. `$WARDEN_CONFIG` env var
/// 2. `./warden.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WardenConfig {
    /// Health monitor roster and thresholds
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Secret roster and rotation schedule
    #[serde(default)]
    pub rotation: RotationConfig,

    /// Disaster-recovery policy and providers
    #[serde(default)]
    pub recovery: RecoveryConfig,

    /// Alert channels and retention
    #[serde(default)]
    pub alerts: AlertsConfig,

    /// Persisted state location
    #[serde(default)]
    pub storage: StorageConfig,
}

impl WardenConfig {
    /// Load configuration using the standard search order:
    /// 1. `$WARDEN_CONFIG` environment variable
    /// 2. `./warden.toml` in the current working directory
    /// 3. Built-in defaults
    pub fn load() -> Self {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), "Loaded config from {}", CONFIG_ENV_VAR);
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from {}, falling back", CONFIG_ENV_VAR);
                    }
                }
            } else {
                warn!(path = %path, "{} points to non-existent file, falling back", CONFIG_ENV_VAR);
            }
        }

        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!("Loaded config from ./{}", LOCAL_CONFIG_FILE);
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./{}, using defaults", LOCAL_CONFIG_FILE);
                }
            }
        }

        info!("No {} found, using built-in defaults", LOCAL_CONFIG_FILE);
        Self::default()
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let config: Self = toml::from_str(&contents)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Validate the configuration for internal consistency.
    ///
    /// Rules:
    /// - Target and secret names are unique
    /// - http/tcp targets carry an address
    /// - Intervals and timeouts are non-zero
    /// - Backup retention is at least 1
    /// - Secret names never contain the backup marker
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        if self.monitor.interval_secs == 0 {
            errors.push("monitor.interval_secs must be > 0".to_string());
        }

        let mut target_names = HashSet::new();
        for target in &self.monitor.targets {
            if !target_names.insert(target.name.as_str()) {
                errors.push(format!("monitor.targets: duplicate target name '{}'", target.name));
            }
            if matches!(target.kind, TargetKind::Http | TargetKind::Tcp)
                && target.address.as_deref().map_or(true, str::is_empty)
            {
                errors.push(format!(
                    "monitor.targets.{}: {} targets require an address",
                    target.name, target.kind
                ));
            }
            if target.timeout_secs == 0 {
                errors.push(format!("monitor.targets.{}: timeout_secs must be > 0", target.name));
            }
        }

        let sys = &self.monitor.system;
        if sys.warn_free_disk_bytes < sys.min_free_disk_bytes {
            errors.push(format!(
                "monitor.system: warn_free_disk_bytes ({}) must be >= min_free_disk_bytes ({})",
                sys.warn_free_disk_bytes, sys.min_free_disk_bytes
            ));
        }
        if sys.warn_available_memory_percent < sys.min_available_memory_percent {
            errors.push(format!(
                "monitor.system: warn_available_memory_percent ({:.1}) must be >= min_available_memory_percent ({:.1})",
                sys.warn_available_memory_percent, sys.min_available_memory_percent
            ));
        }

        if self.rotation.interval_secs == 0 {
            errors.push("rotation.interval_secs must be > 0".to_string());
        }
        if self.rotation.backup_retention == 0 {
            errors.push("rotation.backup_retention must be >= 1".to_string());
        }
        let mut secret_names = HashSet::new();
        for secret in &self.rotation.secrets {
            if !secret_names.insert(secret.name.as_str()) {
                errors.push(format!("rotation.secrets: duplicate secret name '{}'", secret.name));
            }
            if secret.name.contains(BACKUP_MARKER) {
                errors.push(format!(
                    "rotation.secrets.{}: name must not contain '{}'",
                    secret.name, BACKUP_MARKER
                ));
            }
        }

        if self.alerts.sweep_interval_secs == 0 {
            errors.push("alerts.sweep_interval_secs must be > 0".to_string());
        }

        let mut provider_names = HashSet::new();
        for provider in &self.recovery.providers {
            if !provider_names.insert(provider.name.as_str()) {
                errors.push(format!("recovery.providers: duplicate provider '{}'", provider.name));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config I/O error ({0:?}): {1}")]
    Io(PathBuf, std::io::Error),
    #[error("Config parse error ({0:?}): {1}")]
    Parse(PathBuf, toml::de::Error),
    #[error("Config serialization error: {0}")]
    Serialize(toml::ser::Error),
    #[error("Config validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),
}

// ============================================================================
// Monitor
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Sleep between sweeps
    #[serde(default = "default_monitor_interval")]
    pub interval_secs: u64,

    /// Path inspected by system checks and the `data_directory` predicate
    #[serde(default = "default_data_path")]
    pub data_path: PathBuf,

    #[serde(default)]
    pub system: SystemThresholds,

    #[serde(default)]
    pub targets: Vec<TargetConfig>,
}

fn default_monitor_interval() -> u64 {
    defaults::MONITOR_INTERVAL_SECS
}
fn default_data_path() -> PathBuf {
    PathBuf::from(".")
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_monitor_interval(),
            data_path: default_data_path(),
            system: SystemThresholds::default(),
            targets: Vec::new(),
        }
    }
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Configured targets, or the built-in system check when none are configured
    pub fn effective_targets(&self) -> Vec<TargetConfig> {
        if self.targets.is_empty() {
            vec![TargetConfig {
                name: "System Health".to_string(),
                kind: TargetKind::System,
                address: None,
                predicate: None,
                timeout_secs: 5,
                interval_secs: 60,
            }]
        } else {
            self.targets.clone()
        }
    }
}

/// Resource-pressure policy for `system` targets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemThresholds {
    #[serde(default = "default_min_free_disk")]
    pub min_free_disk_bytes: u64,
    #[serde(default = "default_warn_free_disk")]
    pub warn_free_disk_bytes: u64,
    #[serde(default = "default_min_memory")]
    pub min_available_memory_percent: f64,
    #[serde(default = "default_warn_memory")]
    pub warn_available_memory_percent: f64,
}

fn default_min_free_disk() -> u64 { defaults::MIN_FREE_DISK_BYTES }
fn default_warn_free_disk() -> u64 { defaults::WARN_FREE_DISK_BYTES }
fn default_min_memory() -> f64 { defaults::MIN_AVAILABLE_MEMORY_PERCENT }
fn default_warn_memory() -> f64 { defaults::WARN_AVAILABLE_MEMORY_PERCENT }

impl Default for SystemThresholds {
    fn default() -> Self {
        Self {
            min_free_disk_bytes: default_min_free_disk(),
            warn_free_disk_bytes: default_warn_free_disk(),
            min_available_memory_percent: default_min_memory(),
            warn_available_memory_percent: default_warn_memory(),
        }
    }
}

/// One monitored target as written in the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    pub name: String,
    pub kind: TargetKind,
    #[serde(default)]
    pub address: Option<String>,
    /// Predicate name for `custom` targets (defaults to the target name)
    #[serde(default)]
    pub predicate: Option<String>,
    #[serde(default = "default_target_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_monitor_interval")]
    pub interval_secs: u64,
}

fn default_target_timeout() -> u64 {
    defaults::TARGET_TIMEOUT_SECS
}

// ============================================================================
// Rotation
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationConfig {
    #[serde(default = "default_rotation_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_backup_retention")]
    pub backup_retention: usize,
    #[serde(default = "default_rotation_history")]
    pub history_limit: usize,
    #[serde(default = "default_secrets")]
    pub secrets: Vec<SecretConfig>,
}

fn default_rotation_interval() -> u64 { defaults::ROTATION_INTERVAL_SECS }
fn default_backup_retention() -> usize { defaults::BACKUP_RETENTION }
fn default_rotation_history() -> usize { defaults::ROTATION_HISTORY_LIMIT }

fn default_secrets() -> Vec<SecretConfig> {
    [
        ("TELEGRAM_BOT_TOKEN", SecretKind::BotCredential),
        ("TELEGRAM_ALERT_BOT_TOKEN", SecretKind::BotCredential),
        ("VERCEL_API_KEY", SecretKind::ApiKey),
        ("AWS_ACCESS_KEY_ID", SecretKind::ApiKey),
        ("JWT_ACCESS_SECRET", SecretKind::SigningSecret),
        ("DATA_ENCRYPTION_KEY", SecretKind::EncryptionKey),
    ]
    .into_iter()
    .map(|(name, kind)| SecretConfig {
        name: name.to_string(),
        kind,
    })
    .collect()
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_rotation_interval(),
            backup_retention: default_backup_retention(),
            history_limit: default_rotation_history(),
            secrets: default_secrets(),
        }
    }
}

impl RotationConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretConfig {
    pub name: String,
    pub kind: SecretKind,
}

// ============================================================================
// Recovery
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Trigger a full recovery automatically on critical health
    #[serde(default = "default_true")]
    pub auto_recovery: bool,

    /// Consecutive critical sweeps required before auto-recovery fires
    #[serde(default = "default_critical_sweeps")]
    pub critical_sweeps_before_recovery: u32,

    #[serde(default = "default_backup_dir")]
    pub backup_dir: PathBuf,

    /// Tree archived by the backup step
    #[serde(default = "default_data_path")]
    pub source_dir: PathBuf,

    /// Extraction target for backup restores
    #[serde(default = "default_data_path")]
    pub restore_dir: PathBuf,

    #[serde(default = "default_archive_excludes")]
    pub archive_excludes: Vec<String>,

    #[serde(default = "default_recovery_history")]
    pub history_limit: usize,

    #[serde(default)]
    pub domain_suffixes: DomainSuffixes,

    #[serde(default)]
    pub providers: Vec<ProviderConfig>,

    #[serde(default)]
    pub dns: Option<DnsConfig>,

    #[serde(default)]
    pub bot_webhook: Option<BotWebhookConfig>,

    #[serde(default)]
    pub hosting: HostingConfig,
}

fn default_true() -> bool { true }
fn default_critical_sweeps() -> u32 { 1 }
fn default_backup_dir() -> PathBuf { PathBuf::from("./backups") }
fn default_recovery_history() -> usize { defaults::RECOVERY_HISTORY_LIMIT }

fn default_archive_excludes() -> Vec<String> {
    vec![
        "node_modules".to_string(),
        ".git".to_string(),
        "backups".to_string(),
    ]
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            auto_recovery: true,
            critical_sweeps_before_recovery: default_critical_sweeps(),
            backup_dir: default_backup_dir(),
            source_dir: default_data_path(),
            restore_dir: default_data_path(),
            archive_excludes: default_archive_excludes(),
            history_limit: default_recovery_history(),
            domain_suffixes: DomainSuffixes::default(),
            providers: Vec::new(),
            dns: None,
            bot_webhook: None,
            hosting: HostingConfig::default(),
        }
    }
}

/// Hosting suffix appended to generated hostnames, per role
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainSuffixes {
    #[serde(default = "default_primary_suffix")]
    pub main: String,
    #[serde(default = "default_primary_suffix")]
    pub bot: String,
    #[serde(default = "default_primary_suffix")]
    pub api: String,
    #[serde(default = "default_backup_suffix")]
    pub backup: String,
}

fn default_primary_suffix() -> String { "vercel.app".to_string() }
fn default_backup_suffix() -> String { "netlify.app".to_string() }

impl Default for DomainSuffixes {
    fn default() -> Self {
        Self {
            main: default_primary_suffix(),
            bot: default_primary_suffix(),
            api: default_primary_suffix(),
            backup: default_backup_suffix(),
        }
    }
}

/// A deployment backend reached over HTTP
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub api_url: String,
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsConfig {
    pub api_url: String,
    #[serde(default)]
    pub token: Option<String>,
}

/// Chat-bot webhook re-registration after a domain change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotWebhookConfig {
    #[serde(default = "default_telegram_api")]
    pub api_base: String,
    pub bot_token: String,
}

fn default_telegram_api() -> String {
    defaults::TELEGRAM_API_BASE.to_string()
}

/// Hosting descriptor files rewritten on republish
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostingConfig {
    #[serde(default = "default_env_file")]
    pub env_file: PathBuf,
    #[serde(default = "default_compose_files")]
    pub compose_files: Vec<PathBuf>,
}

fn default_env_file() -> PathBuf { PathBuf::from(".env") }
fn default_compose_files() -> Vec<PathBuf> {
    vec![
        PathBuf::from("docker-compose.frontend.yml"),
        PathBuf::from("docker-compose.bot.yml"),
    ]
}

impl Default for HostingConfig {
    fn default() -> Self {
        Self {
            env_file: default_env_file(),
            compose_files: default_compose_files(),
        }
    }
}

// ============================================================================
// Alerts
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertsConfig {
    #[serde(default = "default_alert_retention")]
    pub retention_secs: u64,
    #[serde(default = "default_alert_sweep")]
    pub sweep_interval_secs: u64,
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
}

fn default_alert_retention() -> u64 { defaults::ALERT_RETENTION_SECS }
fn default_alert_sweep() -> u64 { defaults::ALERT_SWEEP_INTERVAL_SECS }

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            retention_secs: default_alert_retention(),
            sweep_interval_secs: default_alert_sweep(),
            channels: Vec::new(),
        }
    }
}

impl AlertsConfig {
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.retention_secs).unwrap_or(i64::MAX))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Notification channel, tagged by `type` in TOML
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelConfig {
    Telegram {
        bot_token: String,
        chat_id: String,
        #[serde(default = "default_telegram_api")]
        api_base: String,
    },
    Webhook {
        url: String,
        #[serde(default)]
        token: Option<String>,
    },
}

// ============================================================================
// Storage
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_dir")]
    pub data_dir: PathBuf,
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from("./data")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_storage_dir(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        let config = WardenConfig::default();
        assert!(config.validate().is_ok(), "Default config must always validate");
    }

    #[test]
    fn test_empty_toml_produces_defaults() {
        let config: WardenConfig = toml::from_str("").expect("empty TOML should parse");
        assert_eq!(config.monitor.interval_secs, 30);
        assert_eq!(config.rotation.backup_retention, 3);
        assert_eq!(config.rotation.secrets.len(), 6);
        assert!(config.recovery.auto_recovery);
        assert_eq!(config.alerts.retention_secs, 604_800);
    }

    #[test]
    fn test_partial_toml_override() {
        let toml_str = r#"
[monitor]
interval_secs = 10

[[monitor.targets]]
name = "web"
kind = "http"
address = "https://example.com/health"

[[alerts.channels]]
type = "webhook"
url = "https://hooks.example.com/alert"

[recovery]
auto_recovery = false
"#;
        let config: WardenConfig = toml::from_str(toml_str).expect("partial TOML should parse");
        assert_eq!(config.monitor.interval_secs, 10);
        assert_eq!(config.monitor.targets.len(), 1);
        assert_eq!(config.monitor.targets[0].timeout_secs, 10);
        assert!(!config.recovery.auto_recovery);
        assert!(matches!(config.alerts.channels[0], ChannelConfig::Webhook { .. }));
        // Untouched sections keep defaults
        assert_eq!(config.rotation.interval_secs, 86_400);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_http_target_without_address_rejected() {
        let mut config = WardenConfig::default();
        config.monitor.targets.push(TargetConfig {
            name: "web".to_string(),
            kind: TargetKind::Http,
            address: None,
            predicate: None,
            timeout_secs: 5,
            interval_secs: 30,
        });
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("require an address"));
    }

    #[test]
    fn test_duplicate_secret_and_marker_rejected() {
        let mut config = WardenConfig::default();
        config.rotation.secrets = vec![
            SecretConfig { name: "API_KEY".to_string(), kind: SecretKind::ApiKey },
            SecretConfig { name: "API_KEY".to_string(), kind: SecretKind::ApiKey },
            SecretConfig { name: "X_backup_1".to_string(), kind: SecretKind::ApiKey },
        ];
        match config.validate() {
            Err(ConfigError::Validation(errors)) => assert_eq!(errors.len(), 2),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_default_roster_is_single_system_check() {
        let config = MonitorConfig::default();
        let targets = config.effective_targets();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].kind, TargetKind::System);
    }

    #[test]
    fn test_load_from_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("warden.toml");
        let config = WardenConfig::default();
        std::fs::write(&path, config.to_toml().unwrap()).unwrap();

        let loaded = WardenConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.rotation.secrets.len(), config.rotation.secrets.len());
        assert_eq!(loaded.storage.data_dir, config.storage.data_dir);
    }
}
