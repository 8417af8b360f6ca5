use crate::models::{FormatRule, SyncConfig};
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use std::fs;

/// Default config file name, looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";

/// Configuration manager for loading and saving the YAML sync configuration.
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_path: Utf8PathBuf,
}

impl ConfigManager {
    /// Create a manager for the config file at `config_path`.
    ///
    /// Nothing is read until [`load`](Self::load) is called.
    pub fn new<P: AsRef<Utf8Path>>(config_path: P) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
        }
    }

    /// Load, normalize and validate the configuration.
    ///
    /// Unlike optional settings files, a missing sync config is fatal: there
    /// is no sensible default source or destination.
    pub fn load(&self) -> Result<SyncConfig> {
        let file_contents = fs::read_to_string(&self.config_path)
            .with_context(|| format!("Failed to read config: {}", self.config_path))?;

        let config = Self::parse(&file_contents)
            .with_context(|| format!("Invalid config: {}", self.config_path))?;

        tracing::info!(
            "Loaded config from {} - source: {}, destination: {}, threads: {}, formats: {}",
            self.config_path,
            config.source,
            config.destination,
            config.threads,
            config.tracked_extensions().join(", ")
        );
        Ok(config)
    }

    /// Parse a YAML document into a validated [`SyncConfig`]
    pub fn parse(yaml: &str) -> Result<SyncConfig> {
        let config: SyncConfig =
            serde_yaml_ng::from_str(yaml).context("Failed to parse config YAML")?;

        Ok(config.normalized()?)
    }

    /// Save the configuration file.
    pub fn save(&self, config: &SyncConfig) -> Result<()> {
        let yaml_string =
            serde_yaml_ng::to_string(config).context("Failed to serialize config to YAML")?;

        if let Some(parent) = self.config_path.parent().filter(|p| !p.as_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {}", parent))?;
        }

        fs::write(&self.config_path, yaml_string)
            .with_context(|| format!("Failed to write config: {}", self.config_path))?;

        tracing::info!("Saved config to {}", self.config_path);
        Ok(())
    }

    /// Write an example configuration if the file does not exist yet.
    ///
    /// Returns `true` if a file was written.
    pub fn write_default(&self) -> Result<bool> {
        if self.config_path.exists() {
            tracing::warn!(
                "Config file already exists at {}, leaving it untouched",
                self.config_path
            );
            return Ok(false);
        }

        self.save(&Self::default_config())?;
        Ok(true)
    }

    /// Example configuration converting FLAC to MP3 with ffmpeg
    pub fn default_config() -> SyncConfig {
        let mut formats = IndexMap::new();
        formats.insert(
            "flac".to_string(),
            FormatRule::new(
                "mp3",
                "ffmpeg -loglevel error -i $source -codec:a libmp3lame -qscale:a 2 $destination",
            ),
        );

        SyncConfig::new("/path/to/music", "/path/to/converted", 4, formats)
    }

    pub fn config_path(&self) -> &Utf8Path {
        &self.config_path
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIG_FILE)
    }
}
