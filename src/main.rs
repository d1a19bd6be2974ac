//! Warden - Self-Healing Infrastructure Controller
//!
//! Monitors service health, recovers onto fresh infrastructure when health
//! turns critical, and rotates credentials on a schedule.
//!
//! # Usage
//!
//! ```bash
//! # Run the controller until Ctrl+C
//! warden run
//!
//! # One health sweep, printed as a table
//! warden check
//!
//! # Rotate every secret now, or just one
//! warden rotate
//! warden rotate --name VERCEL_API_KEY
//!
//! # Dry-run the recovery state machine
//! warden recover --test
//! ```
//!
//! # Environment Variables
//!
//! - `WARDEN_CONFIG`: Path to the TOML configuration (default: ./warden.toml)
//! - `RUST_LOG`: Logging level (default: info)

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use warden::config::{self, WardenConfig};
use warden::storage::{HistoryLimits, ProcessLock, SledStateStore, StateStore};
use warden::{Collaborators, RecoveryStatus, SecurityManager};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "warden")]
#[command(about = "Self-healing infrastructure controller")]
#[command(version)]
struct CliArgs {
    /// Path to the TOML configuration (overrides WARDEN_CONFIG and ./warden.toml)
    #[arg(long, short)]
    config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: SubCommand,
}

#[derive(clap::Subcommand, Debug)]
enum SubCommand {
    /// Run monitoring, rotation and auto-recovery until Ctrl+C
    Run,

    /// Run one health sweep and print the result
    Check,

    /// Rotate every live secret, or a single one
    Rotate {
        /// Rotate only this secret
        #[arg(long)]
        name: Option<String>,
    },

    /// Promote the newest backup of a secret back to live
    RestoreSecret {
        /// Secret name
        name: String,
    },

    /// Execute the recovery state machine
    Recover {
        /// Run as a recovery test (reason "test")
        #[arg(long, conflicts_with = "reason")]
        test: bool,

        /// Trigger reason recorded on the run
        #[arg(long, default_value = "manual")]
        reason: String,
    },

    /// List backup archives, newest first
    Backups,

    /// Show recovery and rotation history
    History {
        /// Entries per history
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

// ============================================================================
// Initialization
// ============================================================================

fn load_config(path: Option<&std::path::Path>) -> Result<WardenConfig> {
    let config = match path {
        Some(path) => WardenConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => WardenConfig::load(),
    };
    Ok(config)
}

/// Lock the data directory, open state storage and build the manager
async fn init_manager(config: &WardenConfig) -> Result<(Arc<SecurityManager>, ProcessLock)> {
    let data_dir = &config.storage.data_dir;
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;

    info!("🔒 Acquiring process lock...");
    let lock = ProcessLock::acquire(data_dir).context("Failed to acquire process lock")?;
    info!("✓ Process lock acquired");

    let limits = HistoryLimits {
        recoveries: config.recovery.history_limit,
        rotations: config.rotation.history_limit,
    };
    let store = SledStateStore::open(data_dir.join("state.db"), limits)?;
    info!(backend = store.backend_name(), "✓ State storage initialized");

    let collaborators = Collaborators::from_config(config, Arc::new(store))
        .context("Failed to build HTTP client")?;
    let manager = SecurityManager::initialize(config, collaborators)
        .await
        .context("Failed to initialize security manager")?;
    Ok((manager, lock))
}

// ============================================================================
// Commands
// ============================================================================

async fn run_daemon(manager: Arc<SecurityManager>) -> Result<()> {
    // Graceful shutdown via Ctrl+C
    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("🛑 Received Ctrl+C, initiating shutdown...");
        shutdown_token.cancel();
    });

    manager.start().await?;

    let mut status = manager.subscribe_status();
    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => break,
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *status.borrow_and_update();
                info!("System status: {}", current);
            }
        }
    }

    manager.shutdown().await;
    Ok(())
}

async fn run_check(manager: &SecurityManager) {
    let snapshot = manager.monitor().sweep_once().await;
    for target in manager.monitor().targets().await {
        println!(
            "{:<24} {:<7} {:<9} {:>6}ms  {}",
            target.name,
            target.kind.to_string(),
            format!("{:?}", target.status).to_uppercase(),
            target.latency.map_or(0, |l| l.as_millis()),
            target.last_error.as_deref().unwrap_or("")
        );
    }
    println!(
        "\n{} healthy, {} warning, {} critical of {} ({:.1}% healthy)",
        snapshot.healthy,
        snapshot.warning,
        snapshot.critical,
        snapshot.total,
        snapshot.health_percentage()
    );
}

async fn run_history(manager: &SecurityManager, limit: usize) {
    println!("Recovery runs:");
    for run in manager.recovery().history().await.iter().rev().take(limit) {
        println!(
            "  {} {} reason={} status={}{}",
            run.started_at.format("%Y-%m-%d %H:%M:%S"),
            run.id,
            run.reason,
            run.status,
            run.error.as_deref().map(|e| format!(" error={}", e)).unwrap_or_default()
        );
    }
    println!("Rotation passes:");
    for record in manager.rotation().history().await.iter().rev().take(limit) {
        println!(
            "  {} rotated={} success={}{}",
            record.timestamp.format("%Y-%m-%d %H:%M:%S"),
            record.rotated,
            record.success,
            record.error.as_deref().map(|e| format!(" error={}", e)).unwrap_or_default()
        );
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();

    let warden_config = load_config(args.config.as_deref())?;
    info!(
        "Targets: {} | Secrets: {} | Providers: {} | Auto-recovery: {}",
        warden_config.monitor.effective_targets().len(),
        warden_config.rotation.secrets.len(),
        warden_config.recovery.providers.len(),
        warden_config.recovery.auto_recovery
    );
    config::init(warden_config);
    let warden_config = config::get().context("Configuration not initialized")?;

    let (manager, _process_lock) = init_manager(warden_config).await?;

    match args.command {
        SubCommand::Run => {
            info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
            info!("  WARDEN - Self-Healing Infrastructure Controller");
            info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
            run_daemon(manager).await?;
        }
        SubCommand::Check => run_check(&manager).await,
        SubCommand::Rotate { name: Some(name) } => {
            let published = manager.rotation().rotate_one(&name).await?;
            println!("Rotated {} (republished: {})", name, published);
        }
        SubCommand::Rotate { name: None } => {
            let record = manager.rotate_tokens().await?;
            println!(
                "Rotated {} secrets (success: {}){}",
                record.rotated,
                record.success,
                record.error.map(|e| format!(": {}", e)).unwrap_or_default()
            );
        }
        SubCommand::RestoreSecret { name } => {
            let published = manager.rotation().restore_from_backup(&name).await?;
            println!("Restored {} from backup (republished: {})", name, published);
        }
        SubCommand::Recover { test: true, .. } => {
            let result = manager.test_recovery().await;
            println!(
                "Recovery test {}{}",
                if result.success { "succeeded" } else { "failed" },
                result.error.map(|e| format!(": {}", e)).unwrap_or_default()
            );
        }
        SubCommand::Recover { test: false, reason } => {
            let run = manager.recovery().start_full_recovery(&reason).await?;
            println!("Recovery {} {}", run.id, run.status);
            if let Some(domains) = &run.new_domains {
                println!("Domains: {}", domains);
            }
            if run.status != RecoveryStatus::Completed {
                warn!(error = run.error.as_deref().unwrap_or("unknown"), "Recovery did not complete");
            }
        }
        SubCommand::Backups => {
            for backup in manager.recovery().list_backups().await? {
                println!(
                    "{}  {:>10} bytes  {}",
                    backup.created_at.format("%Y-%m-%d %H:%M:%S"),
                    backup.size,
                    backup.name
                );
            }
        }
        SubCommand::History { limit } => run_history(&manager, limit).await,
    }

    Ok(())
}
