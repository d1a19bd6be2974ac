//! Backup archives: creation, extraction and the on-disk catalogue

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

use super::run::Backup;
use crate::collaborators::CommandRunner;
use crate::config::RecoveryConfig;

const ARCHIVE_EXTENSION: &str = ".tar.gz";
const ARCHIVE_NAME: &str = "emergency-backup.tar.gz";

pub struct Archiver {
    runner: Arc<dyn CommandRunner>,
    backup_dir: PathBuf,
    source_dir: PathBuf,
    restore_dir: PathBuf,
    excludes: Vec<String>,
}

impl Archiver {
    pub fn new(config: &RecoveryConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            backup_dir: absolutize(&config.backup_dir),
            source_dir: config.source_dir.clone(),
            restore_dir: config.restore_dir.clone(),
            excludes: config.archive_excludes.clone(),
        }
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Archive the source tree into `<backup_dir>/emergency-<run_id>/`
    pub async fn create(&self, run_id: Uuid) -> Result<Backup, String> {
        let dir = self.backup_dir.join(format!("emergency-{}", run_id));
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| format!("cannot create {}: {}", dir.display(), e))?;
        let path = dir.join(ARCHIVE_NAME);

        let mut args = vec!["-czf".to_string(), path.display().to_string()];
        args.extend(self.excludes.iter().map(|e| format!("--exclude={}", e)));
        args.push(".".to_string());

        let output = self
            .runner
            .run("tar", &args, &self.source_dir)
            .await
            .map_err(|e| e.to_string())?;
        if !output.success {
            return Err(format!(
                "tar exited with {}: {}",
                output.code.map_or_else(|| "signal".to_string(), |c| c.to_string()),
                output.stderr
            ));
        }

        let size = tokio::fs::metadata(&path).await.map(|m| m.len()).unwrap_or(0);
        Ok(Backup {
            name: format!("emergency-{}", run_id),
            path,
            size,
            created_at: Utc::now(),
        })
    }

    /// Unpack `backup` into the restore directory
    pub async fn extract(&self, backup: &Backup) -> Result<(), String> {
        tokio::fs::create_dir_all(&self.restore_dir)
            .await
            .map_err(|e| format!("cannot create {}: {}", self.restore_dir.display(), e))?;

        let args = vec![
            "-xzf".to_string(),
            backup.path.display().to_string(),
            "-C".to_string(),
            self.restore_dir.display().to_string(),
        ];
        let output = self
            .runner
            .run("tar", &args, Path::new("."))
            .await
            .map_err(|e| e.to_string())?;
        if output.success {
            Ok(())
        } else {
            Err(format!("tar extraction failed: {}", output.stderr))
        }
    }

    /// Every `*.tar.gz` under the backup directory, newest first
    pub async fn list(&self) -> std::io::Result<Vec<Backup>> {
        let mut found = Vec::new();
        let mut pending = vec![self.backup_dir.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };
            while let Some(entry) = entries.next_entry().await? {
                let meta = entry.metadata().await?;
                let path = entry.path();
                if meta.is_dir() {
                    pending.push(path);
                } else if path.to_string_lossy().ends_with(ARCHIVE_EXTENSION) {
                    let name = path
                        .strip_prefix(&self.backup_dir)
                        .unwrap_or(&path)
                        .display()
                        .to_string();
                    let created_at = meta
                        .modified()
                        .map(DateTime::<Utc>::from)
                        .unwrap_or_else(|_| Utc::now());
                    found.push(Backup {
                        name,
                        path,
                        size: meta.len(),
                        created_at,
                    });
                }
            }
        }

        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }
}

/// tar runs with the source tree as cwd, so archive paths must not be relative
fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{CommandError, CommandOutput};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingRunner {
        calls: Mutex<Vec<(String, Vec<String>, PathBuf)>>,
    }

    #[async_trait]
    impl CommandRunner for RecordingRunner {
        async fn run(&self, program: &str, args: &[String], cwd: &Path) -> Result<CommandOutput, CommandError> {
            self.calls
                .lock()
                .unwrap()
                .push((program.to_string(), args.to_vec(), cwd.to_path_buf()));
            Ok(CommandOutput { success: true, code: Some(0), stderr: String::new() })
        }
    }

    fn archiver(dir: &Path, runner: Arc<RecordingRunner>) -> Archiver {
        let config = RecoveryConfig {
            backup_dir: dir.join("backups"),
            source_dir: dir.to_path_buf(),
            restore_dir: dir.join("restore"),
            ..RecoveryConfig::default()
        };
        Archiver::new(&config, runner)
    }

    #[tokio::test]
    async fn test_create_builds_tar_command() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(RecordingRunner::default());
        let id = Uuid::new_v4();

        let backup = archiver(dir.path(), runner.clone()).create(id).await.unwrap();
        assert_eq!(backup.name, format!("emergency-{}", id));
        assert!(backup.path.ends_with(format!("emergency-{}/emergency-backup.tar.gz", id)));

        let calls = runner.calls.lock().unwrap();
        let (program, args, cwd) = &calls[0];
        assert_eq!(program, "tar");
        assert_eq!(args[0], "-czf");
        assert!(args.contains(&"--exclude=node_modules".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("."));
        assert_eq!(cwd, dir.path());
    }

    #[tokio::test]
    async fn test_list_finds_archives_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let a = archiver(dir.path(), Arc::new(RecordingRunner::default()));
        assert!(a.list().await.unwrap().is_empty());

        let older = dir.path().join("backups/emergency-1");
        let newer = dir.path().join("backups/emergency-2");
        std::fs::create_dir_all(&older).unwrap();
        std::fs::create_dir_all(&newer).unwrap();
        std::fs::write(older.join(ARCHIVE_NAME), b"old").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        std::fs::write(newer.join(ARCHIVE_NAME), b"newer").unwrap();
        std::fs::write(newer.join("notes.txt"), b"ignored").unwrap();

        let backups = a.list().await.unwrap();
        assert_eq!(backups.len(), 2);
        assert!(backups[0].name.starts_with("emergency-2"));
        assert_eq!(backups[0].size, 5);
    }

    #[tokio::test]
    async fn test_extract_targets_restore_dir() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(RecordingRunner::default());
        let a = archiver(dir.path(), runner.clone());
        let backup = Backup {
            name: "b".to_string(),
            path: dir.path().join("b.tar.gz"),
            size: 0,
            created_at: Utc::now(),
        };
        a.extract(&backup).await.unwrap();

        let calls = runner.calls.lock().unwrap();
        assert_eq!(calls[0].1[0], "-xzf");
        assert_eq!(calls[0].1[3], dir.path().join("restore").display().to_string());
        assert!(dir.path().join("restore").exists());
    }
}
