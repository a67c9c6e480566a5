//! Synchronization engine and its supporting machinery
//!
//! # Architecture
//!
//! ```text
//!                  ┌──────────────────────────┐
//!                  │     SyncCoordinator      │
//!                  │  - seeds the walk stack  │
//!                  │  - drains + joins pool   │
//!                  └───────────┬──────────────┘
//!                              │
//!                  ┌───────────▼──────────────┐
//!                  │      Synchronizer        │
//!                  │  merge walk per directory│
//!                  │  touch / link / prune    │
//!                  └───────────┬──────────────┘
//!                              │ CopyJob
//!                  ┌───────────▼──────────────┐
//!                  │  CopyQueue (crossbeam)   │
//!                  └───────────┬──────────────┘
//!        ┌─────────────┬───────┴──────┬─────────────┐
//!  ┌─────▼─────┐ ┌─────▼─────┐ ┌─────▼─────┐ ┌─────▼─────┐
//!  │  Worker 0 │ │  Worker 1 │ │  Worker 2 │ │  Worker N │
//!  │ copy+stats│ │   copy    │ │   copy    │ │   copy    │
//!  └───────────┘ └───────────┘ └───────────┘ └───────────┘
//! ```

pub mod coordinator;
pub mod engine;
pub mod fsck;
pub mod queue;
pub mod worker;

pub use coordinator::{SyncCoordinator, SyncOptions, SyncResult};
pub use engine::{Synchronizer, WalkFrame};
pub use fsck::FsckLock;
pub use queue::{CopyJob, CopyQueue, InFlight};
pub use worker::{copy_file, CopyWorker, COPY_BUFFER_SIZE};
