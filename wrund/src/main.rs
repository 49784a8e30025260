//! wrun server daemon.
//!
//! Serves one settings file: runs executables from its `executable_path` on
//! behalf of `wrun` callers, one connection at a time.

#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{info, warn};
use wrun_common::{
    ConfigError, EnvParser, ErrorEntry, LoggingError, ServerHandle, ServerSettings, Service,
    ServiceError, WrunService, init_logging,
};

#[derive(Parser)]
#[command(name = "wrund")]
#[command(author, version, about = "wrun server - remote executable runner")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve requests until interrupted
    Run {
        /// Settings file (TOML)
        settings: PathBuf,
    },

    /// Validate a settings file and print the effective settings as JSON
    ///
    /// `WRUN_*` environment overrides are applied first. The shared secret
    /// is masked.
    Check {
        /// Settings file (TOML)
        settings: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run { settings } => run(&settings, cli.verbose).await,
        Commands::Check { settings } => check(&settings),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:?}");
            if let Some(entry) = catalog_entry(&e) {
                eprint!("\n{}", entry.format_full());
            }
            ExitCode::FAILURE
        }
    }
}

/// Catalog entry for failures that carry an error code.
fn catalog_entry(error: &anyhow::Error) -> Option<ErrorEntry> {
    let code = if let Some(e) = error.downcast_ref::<ConfigError>() {
        e.code()
    } else if let Some(e) = error.downcast_ref::<ServiceError>() {
        e.code()
    } else if let Some(e) = error.downcast_ref::<LoggingError>() {
        e.code()
    } else {
        return None;
    };
    Some(code.entry())
}

fn check(path: &Path) -> Result<()> {
    let settings = load_settings(path)?;
    println!("{}", serde_json::to_string_pretty(&settings.redacted())?);
    Ok(())
}

/// Load, apply environment overrides, validate.
fn load_settings(path: &Path) -> Result<ServerSettings> {
    let mut settings = ServerSettings::load(path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    settings.apply_env(&mut EnvParser::new())?;
    settings.validate()?;
    Ok(settings)
}

async fn run(path: &Path, verbose: bool) -> Result<()> {
    let settings = load_settings(path)?;

    let mut log_config = settings.log_config();
    if verbose {
        log_config = log_config.with_level("debug");
    }
    let _logging_guards = init_logging(&log_config)?;

    info!(
        settings = %path.display(),
        base_dir = %settings.executable_path.display(),
        "Starting wrun server..."
    );

    let mut service = WrunService::new(settings);
    service.start().await?;
    if let Some(handle) = service.stop_handle() {
        spawn_signal_handlers(handle);
    }

    service.run().await?;
    info!("wrun server stopped");
    Ok(())
}

fn spawn_signal_handlers(handle: ServerHandle) {
    let ctrl_c_handle = handle.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C; stopping after the current request");
            ctrl_c_handle.stop();
        }
    });

    #[cfg(unix)]
    {
        let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(stream) => stream,
            Err(err) => {
                warn!("Failed to install SIGTERM handler: {}", err);
                return;
            }
        };
        tokio::spawn(async move {
            if sigterm.recv().await.is_some() {
                info!("Received SIGTERM; stopping after the current request");
                handle.stop();
            }
        });
    }
}
