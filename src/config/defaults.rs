//! System-wide default constants.
//!
//! Grouped by subsystem for easy discovery.

// ============================================================================
// Health Monitor
// ============================================================================

/// Interval between monitoring sweeps (seconds).
pub const MONITOR_INTERVAL_SECS: u64 = 30;

/// Per-target check timeout (seconds).
pub const TARGET_TIMEOUT_SECS: u64 = 10;

/// Free disk below this is critical (bytes). 1 GiB.
pub const MIN_FREE_DISK_BYTES: u64 = 1024 * 1024 * 1024;

/// Free disk below this is a warning (bytes). 2 GiB.
pub const WARN_FREE_DISK_BYTES: u64 = 2 * 1024 * 1024 * 1024;

/// Available memory below this share of total is critical (percent).
pub const MIN_AVAILABLE_MEMORY_PERCENT: f64 = 5.0;

/// Available memory below this share of total is a warning (percent).
pub const WARN_AVAILABLE_MEMORY_PERCENT: f64 = 10.0;

// ============================================================================
// Token Rotation
// ============================================================================

/// Interval between scheduled rotation passes (seconds). 86 400 = 24 hours.
pub const ROTATION_INTERVAL_SECS: u64 = 86_400;

/// Backups retained per live secret.
pub const BACKUP_RETENTION: usize = 3;

/// Rotation records kept in history.
pub const ROTATION_HISTORY_LIMIT: usize = 100;

/// Generated length for bot credentials (characters).
pub const BOT_CREDENTIAL_LENGTH: usize = 35;

/// Generated length for API keys (characters).
pub const API_KEY_LENGTH: usize = 64;

/// Generated length for signing secrets (characters).
pub const SIGNING_SECRET_LENGTH: usize = 128;

/// Encryption key width (bytes). 32 = 256-bit.
pub const ENCRYPTION_KEY_BYTES: usize = 32;

// ============================================================================
// Recovery
// ============================================================================

/// Recovery runs kept in history.
pub const RECOVERY_HISTORY_LIMIT: usize = 50;

/// Random suffix length appended to generated hostnames.
pub const DOMAIN_SUFFIX_LENGTH: usize = 8;

/// Timeout for deployment/DNS/webhook provider calls (seconds).
pub const PROVIDER_TIMEOUT_SECS: u64 = 60;

// ============================================================================
// Alerts
// ============================================================================

/// Alert retention window (seconds). 604 800 = 7 days.
pub const ALERT_RETENTION_SECS: u64 = 604_800;

/// Interval between alert retention sweeps (seconds).
pub const ALERT_SWEEP_INTERVAL_SECS: u64 = 5;

/// Timeout for notification channel delivery (seconds).
pub const NOTIFY_TIMEOUT_SECS: u64 = 10;

/// Buffered alerts per broadcast subscriber before it starts lagging.
pub const ALERT_CHANNEL_CAPACITY: usize = 256;

/// Default chat-bot API base.
pub const TELEGRAM_API_BASE: &str = "https://api.telegram.org";
