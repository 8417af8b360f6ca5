use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Placeholder replaced by the quoted source path in a command template
pub const SOURCE_PLACEHOLDER: &str = "$source";

/// Placeholder replaced by the quoted destination path in a command template
pub const DESTINATION_PLACEHOLDER: &str = "$destination";

/// How files with one source extension are converted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatRule {
    /// Target extension, without a leading dot (e.g. `mp3`)
    pub convert_to: String,

    /// Shell command template containing `$source` and `$destination`
    pub command: String,
}

impl FormatRule {
    pub fn new(convert_to: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            convert_to: convert_to.into(),
            command: command.into(),
        }
    }
}

/// Sync configuration loaded from the YAML config file.
///
/// The four core keys (`source`, `destination`, `threads`, `formats`) are
/// required. `formats` keeps the order of the document so log output and
/// the generated default file stay predictable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub source: Utf8PathBuf,
    pub destination: Utf8PathBuf,
    pub threads: usize,
    pub formats: IndexMap<String, FormatRule>,

    /// Maximum runtime of a single conversion command, in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_timeout: Option<u64>,

    /// Remove destination files that no longer have a source after syncing
    #[serde(default)]
    pub clean: bool,
}

/// Structural problems found while validating a [`SyncConfig`]
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("threads must be at least 1")]
    ZeroThreads,

    #[error("format extension must not be empty")]
    EmptyExtension,

    #[error("format {0} has an empty convert_to extension")]
    EmptyTargetExtension(String),

    #[error("format extension {0} is configured more than once")]
    DuplicateExtension(String),

    #[error("source and destination are the same directory: {0}")]
    SameSourceAndDestination(Utf8PathBuf),

    #[error("source {source_dir} lies inside destination {destination}")]
    SourceInsideDestination {
        source_dir: Utf8PathBuf,
        destination: Utf8PathBuf,
    },
}

impl SyncConfig {
    /// Build a config with the optional settings at their defaults
    pub fn new(
        source: impl Into<Utf8PathBuf>,
        destination: impl Into<Utf8PathBuf>,
        threads: usize,
        formats: IndexMap<String, FormatRule>,
    ) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            threads,
            formats,
            command_timeout: None,
            clean: false,
        }
    }

    /// Look up the rule for a normalized extension
    pub fn format_for(&self, extension: &str) -> Option<&FormatRule> {
        self.formats.get(extension)
    }

    /// Tracked source extensions in configuration order
    pub fn tracked_extensions(&self) -> Vec<&str> {
        self.formats.keys().map(String::as_str).collect()
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout.map(Duration::from_secs)
    }

    /// Normalize extensions and check the structural invariants.
    ///
    /// Leading dots are stripped from format keys and `convert_to` values.
    pub fn normalized(mut self) -> Result<Self, ConfigError> {
        if self.threads == 0 {
            return Err(ConfigError::ZeroThreads);
        }

        let mut formats = IndexMap::with_capacity(self.formats.len());
        for (extension, mut rule) in self.formats {
            let extension = normalize_extension(&extension);
            if extension.is_empty() {
                return Err(ConfigError::EmptyExtension);
            }

            rule.convert_to = normalize_extension(&rule.convert_to);
            if rule.convert_to.is_empty() {
                return Err(ConfigError::EmptyTargetExtension(extension));
            }

            if !rule.command.contains(SOURCE_PLACEHOLDER)
                || !rule.command.contains(DESTINATION_PLACEHOLDER)
            {
                tracing::warn!(
                    "Command for format {} does not reference both {} and {}: {}",
                    extension,
                    SOURCE_PLACEHOLDER,
                    DESTINATION_PLACEHOLDER,
                    rule.command
                );
            }

            if formats.insert(extension.clone(), rule).is_some() {
                return Err(ConfigError::DuplicateExtension(extension));
            }
        }
        self.formats = formats;

        check_roots(&self.source, &self.destination)?;

        Ok(self)
    }
}

/// Strip surrounding whitespace and leading dots from an extension
pub fn normalize_extension(extension: &str) -> String {
    extension.trim().trim_start_matches('.').to_string()
}

fn check_roots(source: &Utf8Path, destination: &Utf8Path) -> Result<(), ConfigError> {
    if source == destination {
        return Err(ConfigError::SameSourceAndDestination(source.to_path_buf()));
    }

    // Reconciliation deletes anything under destination that was not produced
    // by this run, which would include the source tree.
    if source.starts_with(destination) {
        return Err(ConfigError::SourceInsideDestination {
            source_dir: source.to_path_buf(),
            destination: destination.to_path_buf(),
        });
    }

    if destination.starts_with(source) {
        tracing::warn!(
            "Destination {} lies inside source {}; converted files will be walked as source files",
            destination,
            source
        );
    }

    Ok(())
}
