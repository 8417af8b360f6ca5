//! Recursive directory listing on top of `walkdir`.
//!
//! Entries come back sorted by file name, so listings are stable between
//! calls. When symlinks are followed, a link pointing back to one of its
//! ancestors is reported by `walkdir` as a loop and skipped.

use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use std::io;
use thiserror::Error;
use walkdir::WalkDir;

/// Errors that abort a directory walk
#[derive(Error, Debug)]
pub enum WalkError {
    #[error("Directory not found: {0}")]
    NotFound(Utf8PathBuf),

    #[error("Not a directory: {0}")]
    NotADirectory(Utf8PathBuf),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },
}

impl WalkError {
    fn io(path: &Utf8Path, source: io::Error) -> Self {
        WalkError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn from_walkdir(root: &Utf8Path, err: walkdir::Error) -> Self {
        let path = err
            .path()
            .and_then(Utf8Path::from_path)
            .unwrap_or(root)
            .to_path_buf();
        WalkError::Io {
            path,
            source: err.into(),
        }
    }
}

/// Files and directories found under a root, both sorted
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeListing {
    pub files: Vec<Utf8PathBuf>,

    /// Every directory below the root (the root itself is not included)
    pub directories: Vec<Utf8PathBuf>,
}

/// Directory walker.
///
/// With `follow_links` enabled (the default) a symlink to a directory is
/// descended into; otherwise it is reported as a plain file entry.
#[derive(Debug, Clone, Copy)]
pub struct FileWalker {
    follow_links: bool,
}

impl FileWalker {
    pub fn new() -> Self {
        Self { follow_links: true }
    }

    pub fn follow_links(mut self, follow_links: bool) -> Self {
        self.follow_links = follow_links;
        self
    }

    /// List every file under `root`, sorted
    pub fn list_files(&self, root: &Utf8Path) -> Result<Vec<Utf8PathBuf>, WalkError> {
        Ok(self.walk(root)?.files)
    }

    /// Walk `root` depth-first and collect files and directories.
    ///
    /// Fails if `root` is missing, is not a directory, or any directory under
    /// it cannot be read. Entries with non-UTF-8 names are skipped, as are
    /// symlink loops and broken links when links are followed.
    pub fn walk(&self, root: &Utf8Path) -> Result<TreeListing, WalkError> {
        let root_metadata = fs::metadata(root).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                WalkError::NotFound(root.to_path_buf())
            } else {
                WalkError::io(root, e)
            }
        })?;

        if !root_metadata.is_dir() {
            return Err(WalkError::NotADirectory(root.to_path_buf()));
        }

        let mut listing = TreeListing::default();
        let mut entries = WalkDir::new(root)
            .min_depth(1)
            .follow_links(self.follow_links)
            .sort_by_file_name()
            .into_iter();

        while let Some(entry) = entries.next() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    if let Some(ancestor) = e.loop_ancestor() {
                        tracing::warn!(
                            "Skipping symlink loop at {} (points back to {})",
                            e.path().map(|p| p.display().to_string()).unwrap_or_default(),
                            ancestor.display()
                        );
                        continue;
                    }
                    if self.follow_links && is_broken_link(&e) {
                        tracing::warn!(
                            "Skipping broken symlink: {}",
                            e.path().map(|p| p.display().to_string()).unwrap_or_default()
                        );
                        continue;
                    }
                    return Err(WalkError::from_walkdir(root, e));
                }
            };

            let is_dir = entry.file_type().is_dir();
            let path = match Utf8PathBuf::try_from(entry.into_path()) {
                Ok(path) => path,
                Err(e) => {
                    tracing::warn!("Skipping non UTF-8 path: {}", e.into_path_buf().display());
                    if is_dir {
                        entries.skip_current_dir();
                    }
                    continue;
                }
            };

            if is_dir {
                listing.directories.push(path);
            } else {
                listing.files.push(path);
            }
        }

        tracing::debug!(
            "Walked {}: {} files, {} directories",
            root,
            listing.files.len(),
            listing.directories.len()
        );

        Ok(listing)
    }
}

impl Default for FileWalker {
    fn default() -> Self {
        Self::new()
    }
}

/// List every file under `root`, following symlinked directories
pub fn list_files(root: &Utf8Path) -> Result<Vec<Utf8PathBuf>, WalkError> {
    FileWalker::new().list_files(root)
}

/// A followed link whose target is gone: the link exists, its target does not
fn is_broken_link(err: &walkdir::Error) -> bool {
    let not_found = err
        .io_error()
        .is_some_and(|io| io.kind() == io::ErrorKind::NotFound);
    not_found
        && err
            .path()
            .is_some_and(|p| fs::symlink_metadata(p).is_ok_and(|m| m.file_type().is_symlink()))
}
