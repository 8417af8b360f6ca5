use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexSet;
use std::fmt;
use std::time::Duration;

/// Destination paths produced or confirmed during one sync run.
///
/// Used as the keep-list for reconciliation. Insertion order follows the
/// sorted source listing, not completion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConvertedSet {
    paths: IndexSet<Utf8PathBuf>,
}

impl ConvertedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the path was already present
    pub fn insert(&mut self, path: Utf8PathBuf) -> bool {
        self.paths.insert(path)
    }

    pub fn contains(&self, path: &Utf8Path) -> bool {
        self.paths.contains(path)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Utf8PathBuf> {
        self.paths.iter()
    }
}

impl FromIterator<Utf8PathBuf> for ConvertedSet {
    fn from_iter<I: IntoIterator<Item = Utf8PathBuf>>(iter: I) -> Self {
        Self {
            paths: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a ConvertedSet {
    type Item = &'a Utf8PathBuf;
    type IntoIter = indexmap::set::Iter<'a, Utf8PathBuf>;

    fn into_iter(self) -> Self::IntoIter {
        self.paths.iter()
    }
}

/// Outcome of processing a single source file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionStatus {
    /// The external command ran and produced the destination file
    Converted,
    /// The destination already existed
    Skipped,
    /// Directory creation, the command, or its output check failed
    Failed,
    /// The run was cancelled before or while converting this file
    Cancelled,
}

impl ConversionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversionStatus::Converted => "converted",
            ConversionStatus::Skipped => "skipped",
            ConversionStatus::Failed => "failed",
            ConversionStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ConversionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one conversion task
#[derive(Debug, Clone)]
pub struct ConversionResult {
    pub source_path: Utf8PathBuf,
    pub destination_path: Utf8PathBuf,
    pub status: ConversionStatus,
    pub message: String,
    pub duration: Duration,
    pub exit_code: Option<i32>,
}

impl ConversionResult {
    /// Whether the destination path belongs in the converted set.
    ///
    /// Failed conversions still count: their source exists, so whatever sits
    /// at the destination path is not orphaned.
    pub fn counts_as_converted(&self) -> bool {
        self.status != ConversionStatus::Cancelled
    }
}

/// Everything a sync pass did
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub converted: ConvertedSet,
    pub results: Vec<ConversionResult>,

    /// Source files whose extension is not tracked
    pub ignored: usize,

    /// Number of files found under the source root
    pub total_files: usize,

    pub cancelled: bool,
}

impl SyncReport {
    pub fn count(&self, status: ConversionStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &ConversionResult> {
        self.results
            .iter()
            .filter(|r| r.status == ConversionStatus::Failed)
    }

    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some()
    }

    pub fn summary(&self) -> String {
        let mut summary = format!(
            "{} converted, {} skipped, {} failed, {} ignored",
            self.count(ConversionStatus::Converted),
            self.count(ConversionStatus::Skipped),
            self.count(ConversionStatus::Failed),
            self.ignored
        );
        if self.cancelled {
            summary.push_str(&format!(
                " (cancelled, {} not processed)",
                self.count(ConversionStatus::Cancelled)
            ));
        }
        summary
    }
}

/// A file or directory the reconciler could not remove
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovalFailure {
    pub path: Utf8PathBuf,
    pub reason: String,
}

/// Everything a reconciliation pass did
#[derive(Debug, Clone, Default)]
pub struct CleanReport {
    pub removed_files: Vec<Utf8PathBuf>,
    pub removed_dirs: Vec<Utf8PathBuf>,
    pub failures: Vec<RemovalFailure>,
}

impl CleanReport {
    pub fn summary(&self) -> String {
        format!(
            "{} files removed, {} empty directories removed, {} failures",
            self.removed_files.len(),
            self.removed_dirs.len(),
            self.failures.len()
        )
    }
}

/// Sync pass plus the optional reconciliation pass
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub sync: SyncReport,
    pub clean: Option<CleanReport>,
}

impl RunSummary {
    pub fn has_failures(&self) -> bool {
        self.sync.has_failures()
            || self
                .clean
                .as_ref()
                .is_some_and(|clean| !clean.failures.is_empty())
    }
}
