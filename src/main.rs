//! poolsync - Content-Addressed Filesystem Synchronizer
//!
//! Entry point for the CLI application.

use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use poolsync::config::{CliArgs, SyncConfig};
use poolsync::fs::{DirSource, FileSystem, PoolFs};
use poolsync::progress::{print_header, print_summary};
use poolsync::sync::SyncCoordinator;
use poolsync::PathFilter;
use tracing::error;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let args = CliArgs::parse();

    setup_logging(args.verbose)?;

    let config = SyncConfig::from_args(args).context("Invalid configuration")?;

    if config.show_summary {
        print_header(
            &config.source.display().to_string(),
            &config.dest.display().to_string(),
            config.jobs,
        );
    }

    let source: Arc<dyn FileSystem> =
        Arc::new(DirSource::new(&config.source).context("Failed to open source")?);
    let dest: Arc<dyn FileSystem> =
        Arc::new(PoolFs::new(&config.dest).context("Failed to open destination")?);

    let filter = match &config.include_file {
        Some(path) => PathFilter::from_file(path).context("Failed to load include file")?,
        None => PathFilter::accept_all(),
    };

    let coordinator = SyncCoordinator::new(config.sync_options(), source, dest, filter);

    // Graceful shutdown: first Ctrl+C stops the walk between
    // directories, a second one force-exits
    let shutdown_flag = coordinator.shutdown_flag();
    let ctrl_c_count = Arc::new(std::sync::atomic::AtomicU32::new(0));
    let ctrl_c_count_handler = Arc::clone(&ctrl_c_count);
    ctrlc::set_handler(move || {
        let count = ctrl_c_count_handler.fetch_add(1, Ordering::SeqCst);
        if count == 0 {
            eprintln!("\nInterrupt received, finishing in-flight copies...");
            eprintln!("Press Ctrl+C again to force exit immediately.");
            shutdown_flag.store(true, Ordering::SeqCst);
        } else {
            eprintln!("\nForced exit!");
            std::process::exit(130);
        }
    })
    .context("Failed to set signal handler")?;

    let result = coordinator.run().context("Synchronization failed")?;

    if config.show_summary {
        print_summary(&result.stats, result.duration, result.gc_reclaimed);
    }

    Ok(())
}

fn setup_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("poolsync=debug,warn")
    } else {
        EnvFilter::new("poolsync=info,warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    Ok(())
}
