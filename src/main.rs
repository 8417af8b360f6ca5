//! MusicSync - command line entry point.
//!
//! # Execution Flow
//!
//! 1. Parse arguments and initialize logging (console, plus rotating files with `--log-dir`)
//! 2. Load `config.yaml` (or `--config`) and apply command line overrides
//! 3. Wire Ctrl-C to the sync cancel handle
//! 4. Sync the source tree into the destination, then reconcile if cleaning is enabled
//! 5. Print the run summary; exit non-zero if any file failed
//!
//! `music-sync init` writes an example config instead of syncing.

use anyhow::Result;
use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use music_sync::config::DEFAULT_CONFIG_FILE;
use music_sync::models::ConversionStatus;
use music_sync::{APP_NAME, ConfigManager, RunSummary, SyncService, VERSION};
use std::process::ExitCode;

/// Mirror a music library, converting tracked formats with an external command.
#[derive(Parser)]
#[clap(name = "music-sync", version, about)]
struct Cli {
    /// Path to the YAML config file
    #[clap(long, short, default_value = DEFAULT_CONFIG_FILE, global = true)]
    config: Utf8PathBuf,

    /// Override the number of concurrent conversions
    #[clap(long, short)]
    threads: Option<usize>,

    /// Delete destination files that no longer have a source
    #[clap(long)]
    clean: bool,

    /// Enable debug logging
    #[clap(long, global = true)]
    debug: bool,

    /// Also write rotating log files to this directory
    #[clap(long, global = true)]
    log_dir: Option<Utf8PathBuf>,

    #[clap(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert the source tree into the destination (default)
    Sync,
    /// Write an example config file if none exists
    Init,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let _guard = music_sync::logging::setup_logging(cli.debug, cli.log_dir.as_deref())?;

    tracing::info!("Starting {} v{}", APP_NAME, VERSION);

    let manager = ConfigManager::new(&cli.config);

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Init => {
            if manager.write_default()? {
                println!("Wrote example config to {}", manager.config_path());
            } else {
                println!("Config already exists at {}", manager.config_path());
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Sync => {
            let mut config = manager.load()?;
            if let Some(threads) = cli.threads {
                config.threads = threads;
            }
            config.clean |= cli.clean;
            // Re-validate after overrides
            let config = config.normalized()?;

            let service = SyncService::new(config);

            let cancel = service.cancel_handle();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Interrupted - cancelling pending conversions...");
                    cancel.cancel();
                }
            });

            let summary = service.run().await?;
            print_summary(&summary);

            if summary.has_failures() || summary.sync.cancelled {
                Ok(ExitCode::FAILURE)
            } else {
                Ok(ExitCode::SUCCESS)
            }
        }
    }
}

fn print_summary(summary: &RunSummary) {
    println!("Sync: {}", summary.sync.summary());

    for failure in summary.sync.failures() {
        println!("  failed: {} ({})", failure.source_path, failure.message);
    }

    if let Some(clean) = &summary.clean {
        println!("Clean: {}", clean.summary());
        for failure in &clean.failures {
            println!("  not removed: {} ({})", failure.path, failure.reason);
        }
    }

    let converted = summary.sync.count(ConversionStatus::Converted);
    if converted > 0 {
        println!("{} new files in the destination", converted);
    }
}
