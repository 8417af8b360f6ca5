//! Sync orchestration: walk the source tree, convert tracked files on a
//! bounded pool of tokio tasks, then optionally reconcile the destination.
//!
//! # Concurrency
//!
//! One task is spawned per tracked file and every task races for a permit
//! from a semaphore sized to `threads`, so at most `threads` external
//! commands run at once. Each task returns its own [`ConversionResult`];
//! the converted set is built after all handles are joined, so workers never
//! share a mutable accumulator.
//!
//! Directory walks and removals are blocking and run on the blocking pool.
//!
//! # Destination collisions
//!
//! Two sources may resolve to the same destination (`a.flac` and `a.wav`
//! both converted to `a.mp3`). The first in sorted source order owns it; the
//! others are recorded as failed without running their command.
//!
//! # Cancellation
//!
//! A [`CancelHandle`] flips a `watch` channel. It is checked before each
//! submission, while a task waits for its permit, and while the external
//! command runs (the process is killed and its partial output removed).
//! A run counts as cancelled only if at least one file was actually
//! cancelled; such a run is never reconciled because its converted set is
//! incomplete.

use crate::metrics::Metrics;
use crate::models::{
    CleanReport, ConversionResult, ConversionStatus, ConvertedSet, RunSummary, SyncConfig,
    SyncReport,
};
use crate::services::converter::cancelled;
use crate::services::reconcile::{reconcile_listing, walk_destination};
use crate::services::{
    CommandRunner, ConversionService, ConversionTask, FormatResolver, ShellRunner, list_files,
};
use crate::state::{StateManager, SyncPhase};
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinHandle;

/// Requests cancellation of a running sync from any thread
#[derive(Debug, Clone)]
pub struct CancelHandle {
    cancel_tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        tracing::warn!("Cancellation requested");
        self.cancel_tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_tx.borrow()
    }
}

/// Runs the sync pipeline for one configuration
pub struct SyncService<R: CommandRunner = ShellRunner> {
    config: Arc<SyncConfig>,
    resolver: Arc<FormatResolver>,
    converter: Arc<ConversionService<R>>,
    state: Arc<StateManager>,
    metrics: Arc<Metrics>,
    cancel_tx: Arc<watch::Sender<bool>>,
}

impl SyncService<ShellRunner> {
    /// Create a service that runs commands through the host shell
    pub fn new(config: SyncConfig) -> Self {
        Self::with_runner(config, ShellRunner)
    }
}

impl<R: CommandRunner> SyncService<R> {
    pub fn with_runner(config: SyncConfig, runner: R) -> Self {
        let resolver = FormatResolver::new(&config);
        let converter =
            ConversionService::with_runner(runner).with_timeout(config.command_timeout());
        let (cancel_tx, _) = watch::channel(false);

        Self {
            config: Arc::new(config),
            resolver: Arc::new(resolver),
            converter: Arc::new(converter),
            state: Arc::new(StateManager::new()),
            metrics: Arc::new(Metrics::new()),
            cancel_tx: Arc::new(cancel_tx),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn state(&self) -> Arc<StateManager> {
        self.state.clone()
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    pub fn runner(&self) -> &R {
        self.converter.runner()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            cancel_tx: self.cancel_tx.clone(),
        }
    }

    pub fn request_cancel(&self) {
        self.cancel_handle().cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_tx.borrow()
    }

    /// Convert every tracked source file.
    ///
    /// Fails only if the source tree cannot be listed. Per-file failures are
    /// recorded in the returned report and never stop the remaining files.
    pub async fn sync(&self) -> Result<SyncReport> {
        let result = self.sync_phase().await;
        self.state.finish();
        result
    }

    /// Delete destination files that are not in `keep`, then prune empty
    /// directories (including the destination root if it ends up empty).
    ///
    /// Fails only if the destination tree cannot be listed.
    pub async fn clean(&self, keep: &ConvertedSet) -> Result<CleanReport> {
        let result = self.clean_phase(keep).await;
        self.state.finish();
        result
    }

    /// Sync, then clean if the config asks for it and the run was not
    /// cancelled.
    pub async fn run(&self) -> Result<RunSummary> {
        let sync = self.sync().await?;

        let clean = if !self.config.clean {
            None
        } else if sync.cancelled {
            tracing::warn!("Sync was cancelled, skipping cleanup of {}", self.config.destination);
            None
        } else if !self.config.destination.exists() {
            // Only reachable when nothing was converted, which leaves nothing to clean
            tracing::warn!(
                "Destination {} does not exist, skipping cleanup",
                self.config.destination
            );
            None
        } else {
            Some(self.clean(&sync.converted).await?)
        };

        self.metrics.log_summary();

        Ok(RunSummary { sync, clean })
    }

    async fn sync_phase(&self) -> Result<SyncReport> {
        let source = self.config.source.clone();

        self.state.set_phase(SyncPhase::WalkingSource);
        let root = source.clone();
        let files = tokio::task::spawn_blocking(move || list_files(&root))
            .await
            .context("Source walk task failed")?
            .with_context(|| format!("Failed to list source directory {}", source))?;

        let mut tasks = Vec::new();
        let mut collisions = Vec::new();
        // Destination -> the source file that produces it
        let mut claimed: IndexMap<Utf8PathBuf, Utf8PathBuf> = IndexMap::new();
        let mut ignored = 0;
        for file in &files {
            let Some(task) = self.resolver.resolve(file) else {
                tracing::debug!("Ignoring {} (no matching format)", file);
                ignored += 1;
                continue;
            };

            match claimed.get(&task.destination_path) {
                Some(owner) => collisions.push((task, owner.clone())),
                None => {
                    claimed.insert(task.destination_path.clone(), task.source_path.clone());
                    tasks.push(task);
                }
            }
        }
        self.metrics.record_ignored(ignored);

        tracing::info!(
            "Found {} files under {}: {} to convert, {} ignored (max concurrent: {})",
            files.len(),
            source,
            tasks.len(),
            ignored,
            self.config.threads
        );

        self.state.start_converting(tasks.len() + collisions.len());

        let mut results: Vec<ConversionResult> = collisions
            .iter()
            .map(|(task, owner)| collision_result(task, owner, &self.state, &self.metrics))
            .collect();
        results.extend(self.convert_all(tasks).await);
        // Sources were listed sorted; keep the report in that order
        results.sort_by(|a, b| a.source_path.cmp(&b.source_path));

        let mut report = SyncReport {
            total_files: files.len(),
            ignored,
            cancelled: results
                .iter()
                .any(|r| r.status == ConversionStatus::Cancelled),
            ..Default::default()
        };

        for result in results {
            if result.counts_as_converted() {
                report.converted.insert(result.destination_path.clone());
            }
            report.results.push(result);
        }

        if report.cancelled {
            self.state.mark_cancelled();
        }

        tracing::info!("Sync of {} finished: {}", source, report.summary());
        Ok(report)
    }

    /// Run every task on the bounded pool and return results in task order
    async fn convert_all(&self, tasks: Vec<ConversionTask>) -> Vec<ConversionResult> {
        let semaphore = Arc::new(Semaphore::new(self.config.threads));
        let cancel_rx = self.cancel_tx.subscribe();

        let mut handles = Vec::with_capacity(tasks.len());
        let mut results = Vec::with_capacity(tasks.len());

        for task in tasks {
            if *cancel_rx.borrow() {
                handles.push(Submission::Skipped(cancelled_result(
                    &task,
                    &self.state,
                    &self.metrics,
                )));
                continue;
            }

            let semaphore = semaphore.clone();
            let converter = self.converter.clone();
            let state = self.state.clone();
            let metrics = self.metrics.clone();
            let cancel = cancel_rx.clone();
            let source = task.source_path.clone();
            let destination = task.destination_path.clone();

            let handle = tokio::spawn(async move {
                let _permit = tokio::select! {
                    biased;
                    _ = cancelled(cancel.clone()) => {
                        return cancelled_result(&task, &state, &metrics);
                    }
                    permit = semaphore.acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => return cancelled_result(&task, &state, &metrics),
                    },
                };

                state.file_started(task.source_path.clone());

                let result = converter.convert(&task, cancel).await;

                metrics.record_conversion(&result);
                state.file_processed(
                    result.source_path.clone(),
                    result.status,
                    result.message.clone(),
                );

                result
                // Permit released here, letting the next queued task start
            });

            handles.push(Submission::Spawned {
                handle,
                source,
                destination,
            });
        }

        // Barrier: every submitted file is accounted for before returning
        for entry in handles {
            let result = match entry {
                Submission::Skipped(result) => result,
                Submission::Spawned {
                    handle,
                    source,
                    destination,
                } => match handle.await {
                    Ok(result) => result,
                    Err(e) => {
                        tracing::error!("Conversion task for {} panicked: {}", source, e);
                        let result = ConversionResult {
                            source_path: source,
                            destination_path: destination,
                            status: ConversionStatus::Failed,
                            message: format!("Task failed: {}", e),
                            duration: Duration::ZERO,
                            exit_code: None,
                        };
                        self.metrics.record_conversion(&result);
                        result
                    }
                },
            };
            results.push(result);
        }

        results
    }

    async fn clean_phase(&self, keep: &ConvertedSet) -> Result<CleanReport> {
        let destination = self.config.destination.clone();

        self.state.set_phase(SyncPhase::WalkingDestination);
        let root = destination.clone();
        let listing = tokio::task::spawn_blocking(move || walk_destination(&root))
            .await
            .context("Destination walk task failed")?
            .with_context(|| format!("Failed to list destination directory {}", destination))?;

        self.state.set_phase(SyncPhase::Reconciling);
        let keep = keep.clone();
        let state = self.state.clone();
        let report = tokio::task::spawn_blocking(move || {
            reconcile_listing(&destination, listing, &keep, |path| {
                state.file_removed(path.to_path_buf());
            })
        })
        .await
        .context("Reconcile task failed")?;

        self.metrics.record_clean(&report);
        Ok(report)
    }
}

enum Submission {
    Spawned {
        handle: JoinHandle<ConversionResult>,
        source: Utf8PathBuf,
        destination: Utf8PathBuf,
    },
    /// Never spawned because cancellation was already requested
    Skipped(ConversionResult),
}

fn cancelled_result(
    task: &ConversionTask,
    state: &StateManager,
    metrics: &Metrics,
) -> ConversionResult {
    tracing::debug!("Not converting {} (cancelled)", task.source_path);

    let result = ConversionResult {
        source_path: task.source_path.clone(),
        destination_path: task.destination_path.clone(),
        status: ConversionStatus::Cancelled,
        message: "Cancelled before starting".to_string(),
        duration: Duration::ZERO,
        exit_code: None,
    };

    metrics.record_conversion(&result);
    state.file_processed(
        result.source_path.clone(),
        result.status,
        result.message.clone(),
    );

    result
}

/// A later source resolved to a destination already claimed by `owner`
fn collision_result(
    task: &ConversionTask,
    owner: &Utf8Path,
    state: &StateManager,
    metrics: &Metrics,
) -> ConversionResult {
    tracing::warn!(
        "Not converting {}: destination {} is already produced by {}",
        task.source_path,
        task.destination_path,
        owner
    );

    let result = ConversionResult {
        source_path: task.source_path.clone(),
        destination_path: task.destination_path.clone(),
        status: ConversionStatus::Failed,
        message: format!("Destination already produced by {}", owner),
        duration: Duration::ZERO,
        exit_code: None,
    };

    metrics.record_conversion(&result);
    state.file_processed(
        result.source_path.clone(),
        result.status,
        result.message.clone(),
    );

    result
}
