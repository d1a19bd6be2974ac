//! Per-kind check policies and custom predicates
//!
//! - http: GET; 2xx healthy, 4xx warning, anything else critical
//! - tcp: connect within the timeout; success healthy, else critical
//! - system: disk free and memory headroom against configured thresholds
//! - custom: named predicate supplied by the caller

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;

use super::target::TargetStatus;
use crate::collaborators::{HttpClient, HttpRequest};
use crate::config::SystemThresholds;

/// Status plus optional error text from one check
pub(crate) type Verdict = (TargetStatus, Option<String>);

pub(crate) async fn check_http(http: &Arc<dyn HttpClient>, url: &str, timeout: Duration) -> Verdict {
    let request = http.request(HttpRequest::get(url, timeout));
    match tokio::time::timeout(timeout, request).await {
        Err(_) => (
            TargetStatus::Critical,
            Some(format!("timed out after {}ms", timeout.as_millis())),
        ),
        Ok(Err(e)) => (TargetStatus::Critical, Some(e.to_string())),
        Ok(Ok(resp)) if resp.is_success() => (TargetStatus::Healthy, None),
        Ok(Ok(resp)) if resp.is_client_error() => {
            (TargetStatus::Warning, Some(format!("HTTP {}", resp.status)))
        }
        Ok(Ok(resp)) => (TargetStatus::Critical, Some(format!("HTTP {}", resp.status))),
    }
}

pub(crate) async fn check_tcp(addr: &str, timeout: Duration) -> Verdict {
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(_stream)) => (TargetStatus::Healthy, None),
        Ok(Err(e)) => (TargetStatus::Critical, Some(format!("connect failed: {}", e))),
        Err(_) => (
            TargetStatus::Critical,
            Some(format!("connect timed out after {}ms", timeout.as_millis())),
        ),
    }
}

/// Resource pressure on the host that holds `data_path`
pub(crate) fn check_system(data_path: &Path, thresholds: &SystemThresholds) -> Verdict {
    let mut worst = TargetStatus::Healthy;
    let mut problems: Vec<String> = Vec::new();

    match check_disk_free(data_path) {
        Ok(free) if free < thresholds.min_free_disk_bytes => {
            worst = TargetStatus::Critical;
            problems.push(format!("only {} MB disk free", free / 1_048_576));
        }
        Ok(free) if free < thresholds.warn_free_disk_bytes => {
            worst = TargetStatus::Warning;
            problems.push(format!("{} MB disk free, approaching minimum", free / 1_048_576));
        }
        Ok(_) => {}
        Err(e) => {
            worst = TargetStatus::Warning;
            problems.push(format!("could not check disk space: {}", e));
        }
    }

    // Hosts without /proc/meminfo skip the memory check
    if let Some(percent) = available_memory_percent() {
        if percent < thresholds.min_available_memory_percent {
            worst = TargetStatus::Critical;
            problems.push(format!("{:.1}% memory available", percent));
        } else if percent < thresholds.warn_available_memory_percent {
            if worst == TargetStatus::Healthy {
                worst = TargetStatus::Warning;
            }
            problems.push(format!("{:.1}% memory available", percent));
        }
    }

    let error = (!problems.is_empty()).then(|| problems.join("; "));
    (worst, error)
}

/// Check free disk space for a given path (returns bytes)
pub fn check_disk_free(path: &Path) -> Result<u64, String> {
    use std::mem::MaybeUninit;
    use std::os::unix::ffi::OsStrExt;

    let c_path = std::ffi::CString::new(path.as_os_str().as_bytes()).map_err(|e| e.to_string())?;
    let mut stat = MaybeUninit::<libc::statvfs>::uninit();

    let result = unsafe { libc::statvfs(c_path.as_ptr(), stat.as_mut_ptr()) };

    if result == 0 {
        let stat = unsafe { stat.assume_init() };
        #[allow(clippy::unnecessary_cast)]
        Ok((stat.f_bavail as u64).saturating_mul(stat.f_frsize as u64))
    } else {
        Err(format!("statvfs failed for {}", path.display()))
    }
}

fn available_memory_percent() -> Option<f64> {
    let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
    parse_available_memory_percent(&meminfo)
}

fn parse_available_memory_percent(meminfo: &str) -> Option<f64> {
    let field = |key: &str| -> Option<f64> {
        meminfo
            .lines()
            .find(|l| l.starts_with(key))?
            .split_whitespace()
            .nth(1)?
            .parse()
            .ok()
    };
    let total = field("MemTotal:")?;
    let available = field("MemAvailable:")?;
    (total > 0.0).then(|| available / total * 100.0)
}

// ============================================================================
// Custom predicates
// ============================================================================

/// A named predicate for custom targets. `Err` carries the failure reason.
#[async_trait]
pub trait CustomCheck: Send + Sync {
    async fn evaluate(&self) -> Result<(), String>;
}

/// Adapts a plain closure into a predicate
pub struct FnCheck<F>(pub F);

impl<F> FnCheck<F>
where
    F: Fn() -> Result<(), String> + Send + Sync,
{
    pub fn new(check: F) -> Self {
        Self(check)
    }
}

#[async_trait]
impl<F> CustomCheck for FnCheck<F>
where
    F: Fn() -> Result<(), String> + Send + Sync,
{
    async fn evaluate(&self) -> Result<(), String> {
        (self.0)()
    }
}

/// `data_directory`: the configured path exists
pub struct PathExistsCheck {
    pub path: PathBuf,
}

#[async_trait]
impl CustomCheck for PathExistsCheck {
    async fn evaluate(&self) -> Result<(), String> {
        match tokio::fs::metadata(&self.path).await {
            Ok(_) => Ok(()),
            Err(e) => Err(format!("{} not accessible: {}", self.path.display(), e)),
        }
    }
}

/// `file_system`: the controller's working directories exist under `root`
pub struct FileSystemCheck {
    pub root: PathBuf,
    pub dirs: Vec<String>,
}

impl FileSystemCheck {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            dirs: vec!["data".to_string(), "backups".to_string(), "security".to_string()],
        }
    }
}

#[async_trait]
impl CustomCheck for FileSystemCheck {
    async fn evaluate(&self) -> Result<(), String> {
        let mut missing = Vec::new();
        for dir in &self.dirs {
            if tokio::fs::metadata(self.root.join(dir)).await.is_err() {
                missing.push(dir.as_str());
            }
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(format!("missing directories: {}", missing.join(", ")))
        }
    }
}

/// `disk_space`: free space above a floor
pub struct DiskSpaceCheck {
    pub path: PathBuf,
    pub min_free_bytes: u64,
}

#[async_trait]
impl CustomCheck for DiskSpaceCheck {
    async fn evaluate(&self) -> Result<(), String> {
        let path = self.path.clone();
        let free = tokio::task::spawn_blocking(move || check_disk_free(&path))
            .await
            .map_err(|e| e.to_string())??;
        if free > self.min_free_bytes {
            Ok(())
        } else {
            Err(format!("only {} MB disk free", free / 1_048_576))
        }
    }
}
