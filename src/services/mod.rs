//! Services module - the synchronization pipeline stages.
//!
//! The services have no knowledge of the CLI and take every input as an
//! explicit parameter, so each stage can be tested on its own.
//!
//! # Components
//!
//! - [`walker`]: sorted recursive listing of a directory tree on `walkdir`,
//!   skipping symlink loops
//! - [`resolver`]: decides whether a source file is tracked and computes its
//!   destination path and concrete command ([`ConversionTask`])
//! - [`converter`]: skip-or-convert for one task, through a [`CommandRunner`]
//!   ([`ShellRunner`] in production)
//! - [`reconcile`]: deletes destination files without a source and prunes the
//!   directories left empty
//!
//! # Usage Example
//!
//! ```ignore
//! use music_sync::services::{ConversionService, FormatResolver, list_files};
//!
//! let resolver = FormatResolver::new(&config);
//! let service = ConversionService::new();
//!
//! for file in list_files(&config.source)? {
//!     if let Some(task) = resolver.resolve(&file) {
//!         let result = service.convert(&task, cancel_rx.clone()).await;
//!         println!("{}: {}", result.source_path, result.status);
//!     }
//! }
//! ```

pub mod converter;
pub mod reconcile;
pub mod resolver;
pub mod walker;

pub use converter::{
    CommandOutput, CommandRunner, ConversionError, ConversionService, ShellRunner,
};
pub use reconcile::{clean, clean_with, reconcile_listing, remove_empty_dirs, walk_destination};
pub use resolver::{ConversionTask, FormatResolver, resolve};
pub use walker::{FileWalker, TreeListing, WalkError, list_files};
