use crate::models::{ConversionResult, ConversionStatus};
use crate::services::resolver::ConversionTask;
use camino::{Utf8Path, Utf8PathBuf};
use std::future::Future;
use std::io;
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::watch;
use tokio::time::timeout;

/// Errors that make a single conversion fail.
///
/// These never abort a sync run; they end up in a [`ConversionResult`].
#[derive(Error, Debug)]
pub enum ConversionError {
    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Process error: {0}")]
    ProcessError(#[from] io::Error),

    #[error("Failed to check {path}: {source}")]
    Inspect {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to create directory {path}: {source}")]
    CreateDirectory {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Command exited with code {code}")]
    NonZeroExit { code: i32, stderr: String },

    #[error("Command succeeded but produced no output at {0}")]
    MissingOutput(Utf8PathBuf),

    #[error("Conversion cancelled")]
    Cancelled,
}

/// Exit status and captured stderr of an external command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stderr: String,
}

/// Capability to run a fully substituted conversion command.
///
/// The pipeline never spawns processes itself, so tests can substitute a
/// runner that records commands instead of executing them. Dropping the
/// returned future must stop the command.
pub trait CommandRunner: Send + Sync + 'static {
    fn run(&self, command: &str) -> impl Future<Output = io::Result<CommandOutput>> + Send;
}

/// Runs commands through the host shell (`sh -c`, or `cmd /C` on Windows)
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellRunner;

impl CommandRunner for ShellRunner {
    async fn run(&self, command: &str) -> io::Result<CommandOutput> {
        let mut cmd = if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", command]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", command]);
            c
        };

        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn()?;
        let output = child.wait_with_output().await?;

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

/// Resolves once `cancel` holds `true`; never resolves if the sender is gone
pub(crate) async fn cancelled(mut cancel: watch::Receiver<bool>) {
    if cancel.wait_for(|cancelled| *cancelled).await.is_err() {
        std::future::pending::<()>().await;
    }
}

enum Attempt {
    AlreadyConverted,
    Converted(CommandOutput),
}

/// Converts one resolved file: skip if present, create parents, run, verify.
#[derive(Debug, Clone)]
pub struct ConversionService<R = ShellRunner> {
    runner: R,
    timeout: Option<Duration>,
}

impl ConversionService<ShellRunner> {
    pub fn new() -> Self {
        Self::with_runner(ShellRunner)
    }
}

impl Default for ConversionService<ShellRunner> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: CommandRunner> ConversionService<R> {
    pub fn with_runner(runner: R) -> Self {
        Self {
            runner,
            timeout: None,
        }
    }

    /// Bound the runtime of every command; `None` waits indefinitely
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Convert a single file.
    ///
    /// Never fails: skips, failures and cancellation are reported through
    /// the returned [`ConversionResult`]. If the command is stopped by a
    /// timeout or cancellation, any partial output is deleted so the next
    /// run does not mistake it for a finished conversion.
    pub async fn convert(
        &self,
        task: &ConversionTask,
        cancel: watch::Receiver<bool>,
    ) -> ConversionResult {
        let start = Instant::now();
        let attempt = self.try_convert(task, cancel).await;
        let duration = start.elapsed();

        let (status, message, exit_code) = match attempt {
            Ok(Attempt::AlreadyConverted) => {
                tracing::info!(
                    "Skipping file {} because it has been converted already",
                    task.source_path
                );
                (
                    ConversionStatus::Skipped,
                    "Already converted".to_string(),
                    None,
                )
            }
            Ok(Attempt::Converted(output)) => {
                tracing::info!(
                    "Converted {} in {:.2}s",
                    task.source_path,
                    duration.as_secs_f32()
                );
                (
                    ConversionStatus::Converted,
                    format!("Converted to {}", task.destination_path),
                    Some(output.exit_code),
                )
            }
            Err(ConversionError::Cancelled) => {
                tracing::warn!("Conversion cancelled: {}", task.source_path);
                (
                    ConversionStatus::Cancelled,
                    "Cancelled".to_string(),
                    None,
                )
            }
            Err(ConversionError::NonZeroExit { code, stderr }) => {
                if stderr.is_empty() {
                    tracing::warn!("Converting {} failed with exit code {}", task.source_path, code);
                } else {
                    tracing::warn!(
                        "Converting {} failed with exit code {}: {}",
                        task.source_path,
                        code,
                        stderr
                    );
                }
                (
                    ConversionStatus::Failed,
                    format!("Command exited with code {}", code),
                    Some(code),
                )
            }
            Err(e) => {
                tracing::error!("Converting {} failed: {}", task.source_path, e);
                (ConversionStatus::Failed, e.to_string(), None)
            }
        };

        ConversionResult {
            source_path: task.source_path.clone(),
            destination_path: task.destination_path.clone(),
            status,
            message,
            duration,
            exit_code,
        }
    }

    async fn try_convert(
        &self,
        task: &ConversionTask,
        cancel: watch::Receiver<bool>,
    ) -> Result<Attempt, ConversionError> {
        let destination = &task.destination_path;

        if path_exists(destination).await? {
            return Ok(Attempt::AlreadyConverted);
        }

        // Concurrent workers may create the same parents; create_dir_all
        // treats an existing directory as success.
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| ConversionError::CreateDirectory {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        tracing::info!(
            "Converting file:\n\tSource: {}\n\tDestination: {}",
            task.source_path,
            destination
        );
        tracing::debug!("Executing: {}", task.command);

        let output = tokio::select! {
            result = self.run_command(&task.command) => match result {
                Ok(output) => output,
                Err(e) => {
                    if matches!(e, ConversionError::Timeout(_)) {
                        remove_partial_output(destination).await;
                    }
                    return Err(e);
                }
            },
            _ = cancelled(cancel) => {
                remove_partial_output(destination).await;
                return Err(ConversionError::Cancelled);
            }
        };

        if output.exit_code != 0 {
            return Err(ConversionError::NonZeroExit {
                code: output.exit_code,
                stderr: output.stderr,
            });
        }

        if !path_exists(destination).await? {
            return Err(ConversionError::MissingOutput(destination.clone()));
        }

        Ok(Attempt::Converted(output))
    }

    async fn run_command(&self, command: &str) -> Result<CommandOutput, ConversionError> {
        match self.timeout {
            Some(limit) => timeout(limit, self.runner.run(command))
                .await
                .map_err(|_| {
                    tracing::warn!("Command timed out after {:?}: {}", limit, command);
                    ConversionError::Timeout(limit)
                })?
                .map_err(ConversionError::from),
            None => self.runner.run(command).await.map_err(ConversionError::from),
        }
    }
}

async fn path_exists(path: &Utf8Path) -> Result<bool, ConversionError> {
    tokio::fs::try_exists(path)
        .await
        .map_err(|source| ConversionError::Inspect {
            path: path.to_path_buf(),
            source,
        })
}

async fn remove_partial_output(path: &Utf8Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::info!("Removed partial output {}", path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove partial output {}: {}", path, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    /// Records commands and writes the quoted destination like a converter would
    #[derive(Clone, Default)]
    struct TouchRunner {
        commands: Arc<Mutex<Vec<String>>>,
        exit_code: i32,
        output: Option<Utf8PathBuf>,
    }

    impl CommandRunner for TouchRunner {
        async fn run(&self, command: &str) -> io::Result<CommandOutput> {
            self.commands.lock().unwrap().push(command.to_string());
            if let Some(output) = &self.output {
                std::fs::write(output, "converted")?;
            }
            Ok(CommandOutput {
                exit_code: self.exit_code,
                stderr: String::new(),
            })
        }
    }

    struct HangingRunner;

    impl CommandRunner for HangingRunner {
        async fn run(&self, _command: &str) -> io::Result<CommandOutput> {
            std::future::pending().await
        }
    }

    fn task_in(root: &Utf8Path) -> ConversionTask {
        ConversionTask {
            source_path: root.join("src/a.flac"),
            extension: "flac".to_string(),
            destination_path: root.join("dst/artist/a.mp3"),
            command: "convert".to_string(),
        }
    }

    fn temp_root() -> (TempDir, Utf8PathBuf) {
        let temp_dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
        (temp_dir, root)
    }

    fn never_cancelled() -> (watch::Sender<bool>, watch::Receiver<bool>) {
        watch::channel(false)
    }

    #[tokio::test]
    async fn test_converts_and_creates_parent_directories() {
        let (_temp_dir, root) = temp_root();
        let task = task_in(&root);
        let runner = TouchRunner {
            output: Some(task.destination_path.clone()),
            ..Default::default()
        };
        let service = ConversionService::with_runner(runner.clone());
        let (_tx, rx) = never_cancelled();

        let result = service.convert(&task, rx).await;

        assert_eq!(result.status, ConversionStatus::Converted);
        assert_eq!(result.exit_code, Some(0));
        assert!(root.join("dst/artist").is_dir());
        assert_eq!(runner.commands.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_existing_destination_is_skipped() {
        let (_temp_dir, root) = temp_root();
        let task = task_in(&root);
        std::fs::create_dir_all(root.join("dst/artist")).unwrap();
        std::fs::write(&task.destination_path, "old").unwrap();

        let runner = TouchRunner::default();
        let service = ConversionService::with_runner(runner.clone());
        let (_tx, rx) = never_cancelled();

        let result = service.convert(&task, rx).await;

        assert_eq!(result.status, ConversionStatus::Skipped);
        assert!(runner.commands.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_a_failure() {
        let (_temp_dir, root) = temp_root();
        let task = task_in(&root);
        let runner = TouchRunner {
            exit_code: 3,
            ..Default::default()
        };
        let service = ConversionService::with_runner(runner);
        let (_tx, rx) = never_cancelled();

        let result = service.convert(&task, rx).await;

        assert_eq!(result.status, ConversionStatus::Failed);
        assert_eq!(result.exit_code, Some(3));
        assert!(result.counts_as_converted());
    }

    #[tokio::test]
    async fn test_success_without_output_is_a_failure() {
        let (_temp_dir, root) = temp_root();
        let task = task_in(&root);
        let service = ConversionService::with_runner(TouchRunner::default());
        let (_tx, rx) = never_cancelled();

        let result = service.convert(&task, rx).await;

        assert_eq!(result.status, ConversionStatus::Failed);
        assert!(result.message.contains("no output"));
    }

    #[tokio::test]
    async fn test_timeout_fails_the_file() {
        let (_temp_dir, root) = temp_root();
        let task = task_in(&root);
        let service = ConversionService::with_runner(HangingRunner)
            .with_timeout(Some(Duration::from_millis(20)));
        let (_tx, rx) = never_cancelled();

        let result = service.convert(&task, rx).await;

        assert_eq!(result.status, ConversionStatus::Failed);
        assert!(result.message.contains("Timeout"));
    }

    #[tokio::test]
    async fn test_cancellation_stops_running_command() {
        let (_temp_dir, root) = temp_root();
        let task = task_in(&root);
        let service = ConversionService::with_runner(HangingRunner);
        let (tx, rx) = watch::channel(false);

        let cancel = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            tx.send(true).unwrap();
            tx
        });

        let result = service.convert(&task, rx).await;
        let _tx = cancel.await.unwrap();

        assert_eq!(result.status, ConversionStatus::Cancelled);
        assert!(!result.counts_as_converted());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_runner_reports_exit_code_and_stderr() {
        let output = ShellRunner.run("echo oops >&2; exit 4").await.unwrap();

        assert_eq!(output.exit_code, 4);
        assert_eq!(output.stderr, "oops");
    }
}
