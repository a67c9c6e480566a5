//! Error types for poolsync
//!
//! This module defines the error hierarchy that covers:
//! - Filesystem backend errors (source and destination)
//! - Configuration and CLI errors
//! - Copy worker errors
//!
//! Design philosophy:
//! - Use thiserror for structured error types in library code
//! - Errors should be actionable - include the path or identifier involved
//! - Source-side errors are usually recoverable (skip the entry);
//!   destination-side mutation errors are fatal to the run

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for the poolsync application
#[derive(Error, Debug)]
pub enum SyncError {
    /// Filesystem backend errors
    #[error("Filesystem error: {0}")]
    Fs(#[from] FsError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Worker/concurrency errors
    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    /// I/O errors (filter file reading, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Interrupted by signal
    #[error("Synchronization interrupted by signal")]
    Interrupted,

    /// Copy queue closed unexpectedly
    #[error("Copy queue closed unexpectedly")]
    QueueClosed,
}

/// Filesystem backend errors
#[derive(Error, Debug, Clone)]
pub enum FsError {
    /// Path does not exist
    #[error("Path not found: '{path}'")]
    NotFound { path: String },

    /// Permission denied
    #[error("Permission denied: '{path}'")]
    PermissionDenied { path: String },

    /// Path already exists (mkdir on an existing directory)
    #[error("Path already exists: '{path}'")]
    AlreadyExists { path: String },

    /// Operation is not implemented by this backend (read-only source)
    #[error("Operation '{op}' not supported by this backend")]
    Unsupported { op: &'static str },

    /// Directory listing failed
    #[error("Failed to list directory '{path}': {reason}")]
    ListFailed { path: String, reason: String },

    /// Stat failed
    #[error("Failed to stat '{path}': {reason}")]
    StatFailed { path: String, reason: String },

    /// Reading a pool entry or source file failed
    #[error("Failed to read '{ident}': {reason}")]
    ReadFailed { ident: String, reason: String },

    /// Writing a pool entry failed
    #[error("Failed to write '{ident}': {reason}")]
    WriteFailed { ident: String, reason: String },

    /// Creating a file or directory failed
    #[error("Failed to create '{path}': {reason}")]
    CreateFailed { path: String, reason: String },

    /// Unlink or rmdir failed
    #[error("Failed to remove '{path}': {reason}")]
    RemoveFailed { path: String, reason: String },

    /// Hardlinking a user path onto a pool entry failed
    #[error("Failed to link '{path}' -> '{ident}': {reason}")]
    LinkFailed {
        path: String,
        ident: String,
        reason: String,
    },

    /// Symlink creation failed
    #[error("Failed to symlink '{path}' -> '{target}': {reason}")]
    SymlinkFailed {
        path: String,
        target: String,
        reason: String,
    },

    /// Applying ownership or permissions failed
    #[error("Failed to set metadata on '{path}': {reason}")]
    SetMetaFailed { path: String, reason: String },

    /// Entry has a file type the synchronizer cannot handle
    #[error("Unknown file type for '{path}' (mode {mode:o})")]
    UnknownFileType { path: String, mode: u32 },
}

impl FsError {
    /// Check if this error is recoverable (skip the entry and continue)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            FsError::NotFound { .. }
                | FsError::PermissionDenied { .. }
                | FsError::ListFailed { .. }
                | FsError::StatFailed { .. }
        )
    }

    /// Classify an I/O error against a user path
    pub fn from_io(err: &std::io::Error, path: &str) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => FsError::NotFound {
                path: path.to_string(),
            },
            std::io::ErrorKind::PermissionDenied => FsError::PermissionDenied {
                path: path.to_string(),
            },
            std::io::ErrorKind::AlreadyExists => FsError::AlreadyExists {
                path: path.to_string(),
            },
            _ => FsError::StatFailed {
                path: path.to_string(),
                reason: err.to_string(),
            },
        }
    }
}

/// Configuration and CLI errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Invalid worker count
    #[error("Invalid worker count {count}: must be at most {max}")]
    InvalidWorkerCount { count: usize, max: usize },

    /// Invalid queue size
    #[error("Invalid queue size {size}: must be at least {min}")]
    InvalidQueueSize { size: usize, min: usize },

    /// Source directory missing or not a directory
    #[error("Invalid source '{path}': {reason}")]
    InvalidSource { path: PathBuf, reason: String },

    /// Destination root cannot be used
    #[error("Invalid destination '{path}': {reason}")]
    InvalidDestination { path: PathBuf, reason: String },

    /// Filter file missing or unreadable
    #[error("Invalid filter file '{path}': {reason}")]
    InvalidFilterFile { path: PathBuf, reason: String },
}

/// Copy worker errors
#[derive(Error, Debug)]
pub enum WorkerError {
    /// Worker thread could not be spawned
    #[error("Failed to start worker {id}: {reason}")]
    SpawnFailed { id: usize, reason: String },

    /// Worker panicked
    #[error("Worker {id} panicked")]
    Panicked { id: usize },

    /// Copy queue send failed (all receivers gone)
    #[error("Failed to enqueue copy job: queue closed")]
    QueueSendFailed,
}

/// Result type alias for SyncError
pub type Result<T> = std::result::Result<T, SyncError>;

/// Result type alias for FsError
pub type FsResult<T> = std::result::Result<T, FsError>;
