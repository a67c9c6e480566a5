//! poolsync - Content-Addressed Filesystem Synchronizer
//!
//! Reconciles a source directory tree onto a destination whose regular
//! files are deduplicated by their content+metadata fingerprint. Every
//! user-visible path in the destination is a hardlink into a
//! content-addressed pool, so identical files are stored exactly once
//! and repeated runs copy only what changed.
//!
//! # Features
//!
//! - **Minimum-delta updates**: both sides of every directory are
//!   walked as a sorted two-pointer merge; only differing entries are
//!   touched and entries the source dropped are pruned.
//!
//! - **Hardlink deduplication**: regular files live in a pool keyed by
//!   content fingerprint plus metadata digest. An atomic create-if-
//!   absent (`touch`) makes each pool entry's copy at-most-once, even
//!   across concurrent runs.
//!
//! - **Parallel copies**: the walker enqueues copy jobs on a bounded
//!   queue consumed by a fixed worker pool; an in-flight gauge gates
//!   shutdown.
//!
//! - **Consistency repair**: with `--fsck`, destination files whose
//!   bytes no longer hash to their recorded fingerprint are rewritten
//!   exactly once.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   listings    ┌──────────────────────────────┐
//! │    source    ├──────────────▶│         Synchronizer         │
//! │   backend    │    stats      │   sorted two-pointer merge   │
//! └──────────────┘               └──────┬────────────┬──────────┘
//!                                       │ mkdir/link │ CopyJob
//!                                       │ unlink/... ▼
//! ┌──────────────┐               ┌──────▼─────┐ ┌───────────────┐
//! │ destination  │◀──────────────┤  backend   │ │   CopyQueue   │
//! │ content pool │   touch/link  │  calls     │ │  (crossbeam)  │
//! └──────────────┘               └────────────┘ └──────┬────────┘
//!                                                      │
//!                                       ┌──────────────┼─────────┐
//!                                  ┌────▼────┐    ┌────▼────┐   ...
//!                                  │ worker 0│    │ worker 1│
//!                                  └─────────┘    └─────────┘
//! ```
//!
//! # Example
//!
//! ```bash
//! # Mirror a tree with 8 copy workers
//! poolsync /data/src /data/mirror -j 8
//!
//! # Restrict the walk to an include list and collect garbage
//! poolsync /data/src /data/mirror --include-file paths.txt --gc
//! ```

pub mod config;
pub mod content;
pub mod error;
pub mod filter;
pub mod fs;
pub mod progress;
pub mod stats;
pub mod sync;

pub use config::{CliArgs, SyncConfig};
pub use content::Fingerprint;
pub use error::{FsError, Result, SyncError};
pub use filter::{DirListing, PathFilter};
pub use fs::{DirSource, FileAttrs, FileKind, FileSystem, MemoryFs, PoolFs};
pub use stats::{StatsSnapshot, SyncStats};
pub use sync::{SyncCoordinator, SyncOptions, SyncResult};
