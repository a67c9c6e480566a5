//! Configuration types for poolsync
//!
//! This module defines:
//! - CLI argument parsing using clap derive macros
//! - Runtime configuration with validation

use std::path::PathBuf;

use clap::Parser;

use crate::error::ConfigError;
use crate::sync::SyncOptions;

/// Maximum reasonable copy worker count
const MAX_WORKERS: usize = 512;

/// Minimum copy queue capacity
const MIN_QUEUE_SIZE: usize = 1;

/// Content-addressed filesystem synchronizer
#[derive(Parser, Debug, Clone)]
#[command(
    name = "poolsync",
    version,
    about = "Content-addressed filesystem synchronizer with hardlink deduplication",
    long_about = "Reconciles a source directory tree onto a destination whose regular files\n\
                  are deduplicated into a content-addressed pool. Every user-visible path in\n\
                  the destination is a hardlink into the pool; repeated runs copy only what\n\
                  changed and prune what the source removed.",
    after_help = "EXAMPLES:\n    \
        poolsync /data/src /data/mirror\n    \
        poolsync /data/src /data/mirror -j 8\n    \
        poolsync /data/src /data/mirror --include-file paths.txt\n    \
        poolsync /data/src /data/mirror --fsck --gc"
)]
pub struct CliArgs {
    /// Source directory to synchronize from
    #[arg(value_name = "SOURCE")]
    pub source: PathBuf,

    /// Destination root holding the tree and its content pool
    #[arg(value_name = "DEST")]
    pub dest: PathBuf,

    /// Number of parallel copy workers (0 copies inline)
    #[arg(short = 'j', long, default_value_t = default_jobs(), value_name = "NUM")]
    pub jobs: usize,

    /// Copy queue capacity (controls walker backpressure)
    #[arg(long, default_value = "1024", value_name = "NUM")]
    pub queue_size: usize,

    /// Subdirectory to synchronize instead of the whole tree
    #[arg(long, default_value = "", value_name = "PATH")]
    pub base: String,

    /// File listing the paths to include (default: everything)
    #[arg(long, value_name = "FILE")]
    pub include_file: Option<PathBuf>,

    /// Rewrite destination files whose contents no longer match their
    /// recorded fingerprint
    #[arg(long)]
    pub fsck: bool,

    /// Garbage-collect unreferenced pool entries after the sync
    #[arg(long)]
    pub gc: bool,

    /// Number of retry attempts for failed copies
    #[arg(long, default_value = "3", value_name = "NUM")]
    pub retries: u32,

    /// Quiet mode - suppress the summary output
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Verbose output (show skipped entries and worker chatter)
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

fn default_jobs() -> usize {
    num_cpus::get()
}

/// Validated runtime configuration
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Source tree root
    pub source: PathBuf,

    /// Destination root
    pub dest: PathBuf,

    /// Copy worker count (0 = inline)
    pub jobs: usize,

    /// Copy queue capacity
    pub queue_size: usize,

    /// Base directory of the walk, relative to both roots
    pub base: String,

    /// Optional include-file restricting the walk
    pub include_file: Option<PathBuf>,

    /// Repair mode
    pub fsck: bool,

    /// Garbage-collect after the sync
    pub gc: bool,

    /// Copy retry count
    pub retries: u32,

    /// Print header and summary
    pub show_summary: bool,

    /// Verbose logging
    pub verbose: bool,
}

impl SyncConfig {
    /// Create and validate configuration from CLI arguments
    pub fn from_args(args: CliArgs) -> Result<Self, ConfigError> {
        if args.jobs > MAX_WORKERS {
            return Err(ConfigError::InvalidWorkerCount {
                count: args.jobs,
                max: MAX_WORKERS,
            });
        }

        if args.queue_size < MIN_QUEUE_SIZE {
            return Err(ConfigError::InvalidQueueSize {
                size: args.queue_size,
                min: MIN_QUEUE_SIZE,
            });
        }

        if !args.source.is_dir() {
            return Err(ConfigError::InvalidSource {
                path: args.source,
                reason: "not an existing directory".to_string(),
            });
        }

        if let Some(include_file) = &args.include_file {
            if !include_file.is_file() {
                return Err(ConfigError::InvalidFilterFile {
                    path: include_file.clone(),
                    reason: "not an existing file".to_string(),
                });
            }
        }

        // The destination root is created on demand; only its parent
        // must already exist
        if let Some(parent) = args.dest.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                let reason = format!("parent directory '{}' does not exist", parent.display());
                return Err(ConfigError::InvalidDestination {
                    path: args.dest,
                    reason,
                });
            }
        }

        Ok(Self {
            source: args.source,
            dest: args.dest,
            jobs: args.jobs,
            queue_size: args.queue_size,
            base: args.base.trim_matches('/').to_string(),
            include_file: args.include_file,
            fsck: args.fsck,
            gc: args.gc,
            retries: args.retries,
            show_summary: !args.quiet,
            verbose: args.verbose,
        })
    }

    /// Engine-level options derived from this configuration
    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            base: self.base.clone(),
            jobs: self.jobs,
            queue_size: self.queue_size,
            retries: self.retries,
            fsck: self.fsck,
            gc: self.gc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn args(source: PathBuf, dest: PathBuf) -> CliArgs {
        CliArgs {
            source,
            dest,
            jobs: 2,
            queue_size: 64,
            base: String::new(),
            include_file: None,
            fsck: false,
            gc: false,
            retries: 3,
            quiet: false,
            verbose: false,
        }
    }

    #[test]
    fn test_valid_config() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        let config =
            SyncConfig::from_args(args(src.path().to_path_buf(), dst.path().join("mirror")))
                .unwrap();
        assert_eq!(config.jobs, 2);
        assert!(config.show_summary);
    }

    #[test]
    fn test_missing_source_rejected() {
        let dst = TempDir::new().unwrap();
        let result = SyncConfig::from_args(args(
            PathBuf::from("/no/such/source"),
            dst.path().to_path_buf(),
        ));
        assert!(matches!(result, Err(ConfigError::InvalidSource { .. })));
    }

    #[test]
    fn test_worker_count_bound() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        let mut a = args(src.path().to_path_buf(), dst.path().to_path_buf());
        a.jobs = 100_000;
        assert!(matches!(
            SyncConfig::from_args(a),
            Err(ConfigError::InvalidWorkerCount { .. })
        ));
    }

    #[test]
    fn test_queue_size_bound() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        let mut a = args(src.path().to_path_buf(), dst.path().to_path_buf());
        a.queue_size = 0;
        assert!(matches!(
            SyncConfig::from_args(a),
            Err(ConfigError::InvalidQueueSize { .. })
        ));
    }

    #[test]
    fn test_base_is_normalized() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        let mut a = args(src.path().to_path_buf(), dst.path().to_path_buf());
        a.base = "/sub/dir/".to_string();
        let config = SyncConfig::from_args(a).unwrap();
        assert_eq!(config.base, "sub/dir");
    }

    #[test]
    fn test_missing_include_file_rejected() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        let mut a = args(src.path().to_path_buf(), dst.path().to_path_buf());
        a.include_file = Some(PathBuf::from("/no/such/list"));
        assert!(matches!(
            SyncConfig::from_args(a),
            Err(ConfigError::InvalidFilterFile { .. })
        ));
    }
}
