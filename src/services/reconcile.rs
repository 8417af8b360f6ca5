//! Destination reconciliation: delete orphaned files, then prune empty directories.
//!
//! Only a missing or unreadable destination tree is fatal. Individual
//! removals that fail are recorded in the [`CleanReport`] and the pass
//! carries on.

use crate::models::{CleanReport, ConvertedSet, RemovalFailure};
use crate::services::walker::{FileWalker, TreeListing, WalkError};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use std::io;

/// Delete every file under `destination_root` that is not in `keep`, then
/// remove the directories left empty, including the root itself.
pub fn clean(destination_root: &Utf8Path, keep: &ConvertedSet) -> Result<CleanReport, WalkError> {
    clean_with(destination_root, keep, |_| {})
}

/// [`clean`] with a callback invoked for every removed file
pub fn clean_with<F>(
    destination_root: &Utf8Path,
    keep: &ConvertedSet,
    on_removed: F,
) -> Result<CleanReport, WalkError>
where
    F: FnMut(&Utf8Path),
{
    let listing = walk_destination(destination_root)?;
    Ok(reconcile_listing(destination_root, listing, keep, on_removed))
}

/// List a destination tree for reconciliation.
///
/// Symlinked directories are not descended, so nothing outside the
/// destination tree can be deleted.
pub fn walk_destination(destination_root: &Utf8Path) -> Result<TreeListing, WalkError> {
    FileWalker::new().follow_links(false).walk(destination_root)
}

/// Reconcile an already walked destination tree
pub fn reconcile_listing<F>(
    destination_root: &Utf8Path,
    listing: TreeListing,
    keep: &ConvertedSet,
    mut on_removed: F,
) -> CleanReport
where
    F: FnMut(&Utf8Path),
{
    let mut report = CleanReport::default();

    for file in listing.files {
        if keep.contains(&file) {
            continue;
        }

        tracing::info!("Removing file {}", file);
        match fs::remove_file(&file) {
            Ok(()) => {
                on_removed(&file);
                report.removed_files.push(file);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!("File already gone: {}", file);
            }
            Err(e) => {
                tracing::warn!("Failed to remove file {}: {}", file, e);
                report.failures.push(RemovalFailure {
                    path: file,
                    reason: e.to_string(),
                });
            }
        }
    }

    let (removed_dirs, failures) =
        prune_directories(destination_root, listing.directories, true);
    report.removed_dirs = removed_dirs;
    report.failures.extend(failures);

    tracing::info!("Reconciled {}: {}", destination_root, report.summary());
    report
}

/// Remove every empty directory under `root`, deepest first.
///
/// `root` itself is removed only when `remove_root` is set and it ends up
/// empty. A missing `root` is not an error.
pub fn remove_empty_dirs(
    root: &Utf8Path,
    remove_root: bool,
) -> Result<(Vec<Utf8PathBuf>, Vec<RemovalFailure>), WalkError> {
    let listing = match walk_destination(root) {
        Ok(listing) => listing,
        Err(WalkError::NotFound(_)) => return Ok((Vec::new(), Vec::new())),
        Err(e) => return Err(e),
    };

    Ok(prune_directories(root, listing.directories, remove_root))
}

fn prune_directories(
    root: &Utf8Path,
    mut directories: Vec<Utf8PathBuf>,
    remove_root: bool,
) -> (Vec<Utf8PathBuf>, Vec<RemovalFailure>) {
    // Deepest first, so a parent is checked after all of its children
    directories.sort_by_key(|dir| std::cmp::Reverse(dir.components().count()));
    if remove_root {
        directories.push(root.to_path_buf());
    }

    let mut removed = Vec::new();
    let mut failures = Vec::new();

    for dir in directories {
        match is_empty_dir(&dir) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => {
                tracing::warn!("Failed to read directory {}: {}", dir, e);
                failures.push(RemovalFailure {
                    path: dir,
                    reason: e.to_string(),
                });
                continue;
            }
        }

        tracing::info!("Removing empty directory: {}", dir);
        match fs::remove_dir(&dir) {
            Ok(()) => removed.push(dir),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!("Failed to remove directory {}: {}", dir, e);
                failures.push(RemovalFailure {
                    path: dir,
                    reason: e.to_string(),
                });
            }
        }
    }

    (removed, failures)
}

fn is_empty_dir(dir: &Utf8Path) -> io::Result<bool> {
    Ok(fs::read_dir(dir)?.next().is_none())
}
