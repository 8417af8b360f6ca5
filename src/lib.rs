// MusicSync - mirror a music library into a transcoded copy
//
// This is the library crate containing the sync pipeline and data structures.
// The binary crate (main.rs) provides the command line entry point.

pub mod config;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod services;
pub mod state;
pub mod sync;

// Re-export commonly used types for convenience
pub use config::ConfigManager;
pub use models::{ConvertedSet, FormatRule, RunSummary, SyncConfig, SyncReport};
pub use state::{StateManager, SyncEvent, SyncPhase};
pub use sync::{CancelHandle, SyncService};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
