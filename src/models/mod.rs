//! Data models for MusicSync.
//!
//! - [`SyncConfig`]: source/destination roots, per-extension [`FormatRule`]s and the worker count
//! - [`ConvertedSet`]: destination paths produced or confirmed by one sync run
//! - [`ConversionResult`], [`SyncReport`], [`CleanReport`]: per-file and per-run outcomes
//!
//! Per-file failures are modelled as values in the reports rather than errors,
//! so one bad file never stops the batch.

pub mod config;
pub mod report;

pub use config::{ConfigError, FormatRule, SyncConfig};
pub use report::{
    CleanReport, ConversionResult, ConversionStatus, ConvertedSet, RemovalFailure, RunSummary,
    SyncReport,
};
