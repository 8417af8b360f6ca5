// State management module
//
// Tracks the phase and progress of a sync run behind an RwLock and emits
// change events over a broadcast channel for anyone rendering progress.

use crate::models::ConversionStatus;
use camino::Utf8PathBuf;
use std::fmt;
use std::sync::{PoisonError, RwLock};
use tokio::sync::broadcast;

/// Phases of one sync invocation, in order
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SyncPhase {
    #[default]
    Idle,
    WalkingSource,
    Converting,
    WalkingDestination,
    Reconciling,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncPhase::Idle => "idle",
            SyncPhase::WalkingSource => "walking source",
            SyncPhase::Converting => "converting",
            SyncPhase::WalkingDestination => "walking destination",
            SyncPhase::Reconciling => "reconciling",
        };
        f.write_str(name)
    }
}

/// Snapshot of the current run
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncState {
    pub phase: SyncPhase,

    /// Tracked files submitted for conversion this run
    pub total_files: usize,
    pub processed: usize,
    pub current_file: Option<Utf8PathBuf>,
    pub cancelled: bool,
}

/// Change events emitted when state is modified
#[derive(Clone, Debug, PartialEq)]
pub enum SyncEvent {
    PhaseChanged {
        phase: SyncPhase,
    },

    ProgressUpdated {
        processed: usize,
        total: usize,
        current_file: Option<Utf8PathBuf>,
    },

    /// A source file finished converting, was skipped, failed or was cancelled
    FileProcessed {
        source: Utf8PathBuf,
        status: ConversionStatus,
        message: String,
    },

    /// The reconciler deleted an orphaned destination file
    FileRemoved {
        path: Utf8PathBuf,
    },

    Cancelled,
}

/// Thread-safe run state with event emission.
///
/// Reads go through [`read()`](Self::read) or [`snapshot()`](Self::snapshot);
/// every mutation goes through [`update()`](Self::update) so subscribers see
/// a consistent event stream.
pub struct StateManager {
    state: RwLock<SyncState>,
    state_tx: broadcast::Sender<SyncEvent>,
}

impl StateManager {
    /// Create a StateManager with a broadcast buffer of 100 events
    pub fn new() -> Self {
        let (state_tx, _) = broadcast::channel(100);
        Self {
            state: RwLock::new(SyncState::default()),
            state_tx,
        }
    }

    pub fn snapshot(&self) -> SyncState {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&SyncState) -> R,
    {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        f(&state)
    }

    /// Apply `update_fn`, then emit an event for every field group that changed
    pub fn update<F>(&self, update_fn: F) -> Vec<SyncEvent>
    where
        F: FnOnce(&mut SyncState),
    {
        let changes = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            let old_state = state.clone();
            update_fn(&mut state);
            Self::detect_changes(&old_state, &state)
        };

        for change in &changes {
            // No subscribers is fine
            let _ = self.state_tx.send(change.clone());
        }

        changes
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.state_tx.subscribe()
    }

    fn detect_changes(old: &SyncState, new: &SyncState) -> Vec<SyncEvent> {
        let mut changes = Vec::new();

        if old.phase != new.phase {
            changes.push(SyncEvent::PhaseChanged { phase: new.phase });
        }

        if old.processed != new.processed
            || old.total_files != new.total_files
            || old.current_file != new.current_file
        {
            changes.push(SyncEvent::ProgressUpdated {
                processed: new.processed,
                total: new.total_files,
                current_file: new.current_file.clone(),
            });
        }

        if !old.cancelled && new.cancelled {
            changes.push(SyncEvent::Cancelled);
        }

        changes
    }

    pub fn set_phase(&self, phase: SyncPhase) -> Vec<SyncEvent> {
        tracing::debug!("Sync phase: {}", phase);
        self.update(|state| state.phase = phase)
    }

    /// Reset progress for a new conversion pass
    pub fn start_converting(&self, total_files: usize) -> Vec<SyncEvent> {
        self.update(|state| {
            state.phase = SyncPhase::Converting;
            state.total_files = total_files;
            state.processed = 0;
            state.current_file = None;
            state.cancelled = false;
        })
    }

    pub fn file_started(&self, source: Utf8PathBuf) -> Vec<SyncEvent> {
        self.update(|state| state.current_file = Some(source))
    }

    pub fn file_processed(
        &self,
        source: Utf8PathBuf,
        status: ConversionStatus,
        message: String,
    ) -> Vec<SyncEvent> {
        let mut changes = self.update(|state| {
            state.processed += 1;
            if state.current_file.as_ref() == Some(&source) {
                state.current_file = None;
            }
        });

        let event = SyncEvent::FileProcessed {
            source,
            status,
            message,
        };
        let _ = self.state_tx.send(event.clone());
        changes.push(event);

        changes
    }

    pub fn file_removed(&self, path: Utf8PathBuf) {
        let _ = self.state_tx.send(SyncEvent::FileRemoved { path });
    }

    pub fn mark_cancelled(&self) -> Vec<SyncEvent> {
        self.update(|state| state.cancelled = true)
    }

    /// Return to [`SyncPhase::Idle`], keeping the counters for inspection
    pub fn finish(&self) -> Vec<SyncEvent> {
        self.update(|state| {
            state.phase = SyncPhase::Idle;
            state.current_file = None;
        })
    }
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_change_emits_event() {
        let state = StateManager::new();
        let mut rx = state.subscribe();

        let changes = state.set_phase(SyncPhase::WalkingSource);

        assert_eq!(
            changes,
            vec![SyncEvent::PhaseChanged {
                phase: SyncPhase::WalkingSource
            }]
        );
        assert_eq!(rx.try_recv().unwrap(), changes[0]);
    }

    #[test]
    fn test_file_processed_updates_progress() {
        let state = StateManager::new();
        state.start_converting(2);
        state.file_started(Utf8PathBuf::from("/src/a.flac"));

        let changes = state.file_processed(
            Utf8PathBuf::from("/src/a.flac"),
            ConversionStatus::Converted,
            "ok".to_string(),
        );

        let snapshot = state.snapshot();
        assert_eq!(snapshot.processed, 1);
        assert_eq!(snapshot.total_files, 2);
        assert_eq!(snapshot.current_file, None);
        assert!(matches!(
            changes.last(),
            Some(SyncEvent::FileProcessed {
                status: ConversionStatus::Converted,
                ..
            })
        ));
    }

    #[test]
    fn test_cancel_emitted_once() {
        let state = StateManager::new();
        assert_eq!(state.mark_cancelled(), vec![SyncEvent::Cancelled]);
        assert!(state.mark_cancelled().is_empty());
    }
}
