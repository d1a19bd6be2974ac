//! Process capability: run an external command to completion

use async_trait::async_trait;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stderr: String,
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args` in `cwd` and wait for it to exit
    async fn run(
        &self,
        program: &str,
        args: &[String],
        cwd: &Path,
    ) -> Result<CommandOutput, CommandError>;
}

/// Runs commands as child processes on the tokio blocking-aware process driver
#[derive(Debug, Clone, Default)]
pub struct SystemCommandRunner;

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        cwd: &Path,
    ) -> Result<CommandOutput, CommandError> {
        tracing::debug!(program, ?args, cwd = %cwd.display(), "Running external command");

        let output = tokio::process::Command::new(program)
            .args(args)
            .current_dir(cwd)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| CommandError::Spawn {
                program: program.to_string(),
                source,
            })?;

        Ok(CommandOutput {
            success: output.status.success(),
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_exit_status_reported() {
        let dir = tempfile::tempdir().unwrap();
        let runner = SystemCommandRunner;

        let ok = runner.run("true", &[], dir.path()).await.unwrap();
        assert!(ok.success);
        assert_eq!(ok.code, Some(0));

        let failed = runner.run("false", &[], dir.path()).await.unwrap();
        assert!(!failed.success);
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = SystemCommandRunner
            .run("warden-definitely-not-a-binary", &[], dir.path())
            .await;
        assert!(matches!(result, Err(CommandError::Spawn { .. })));
    }
}
