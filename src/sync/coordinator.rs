//! Run driver - orchestrates one synchronization run
//!
//! The coordinator is responsible for:
//! - Setting up the copy queue and spawning the worker pool
//! - Seeding and driving the walk engine
//! - Draining in-flight copies before shutdown
//! - Worker termination and joining
//! - Final statistics and the optional pool garbage collection

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::error::Result;
use crate::filter::PathFilter;
use crate::fs::FileSystem;
use crate::stats::{StatsSnapshot, SyncStats};
use crate::sync::engine::Synchronizer;
use crate::sync::queue::{CopyJob, CopyQueue, InFlight};
use crate::sync::worker::CopyWorker;

/// Runtime options for one synchronization run
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Directory to synchronize, relative to both roots ("" = whole tree)
    pub base: String,

    /// Copy worker count; 0 copies inline on the walker thread
    pub jobs: usize,

    /// Copy queue capacity (only meaningful with jobs > 0)
    pub queue_size: usize,

    /// Retries per failed copy
    pub retries: u32,

    /// Rewrite destination files whose bytes have drifted from their
    /// recorded fingerprint
    pub fsck: bool,

    /// Run the destination garbage collector after a successful sync
    pub gc: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            base: String::new(),
            jobs: 0,
            queue_size: 1024,
            retries: 0,
            fsck: false,
            gc: false,
        }
    }
}

/// Result of a completed run
#[derive(Debug, Clone)]
pub struct SyncResult {
    /// Final counter values
    pub stats: StatsSnapshot,

    /// Wall-clock duration of the run
    pub duration: Duration,

    /// Pool entries reclaimed by garbage collection, when it ran
    pub gc_reclaimed: Option<u64>,
}

/// Coordinates one synchronization run
pub struct SyncCoordinator {
    options: SyncOptions,
    src: Arc<dyn FileSystem>,
    dst: Arc<dyn FileSystem>,
    filter: PathFilter,
    shutdown: Arc<AtomicBool>,
}

impl SyncCoordinator {
    pub fn new(
        options: SyncOptions,
        src: Arc<dyn FileSystem>,
        dst: Arc<dyn FileSystem>,
        filter: PathFilter,
    ) -> Self {
        Self {
            options,
            src,
            dst,
            filter,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Get a clone of the shutdown flag (for signal handlers)
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Run the synchronization to completion
    pub fn run(self) -> Result<SyncResult> {
        let start = Instant::now();
        let started_at: DateTime<Utc> = Utc::now();
        let stats = Arc::new(SyncStats::new());
        let in_flight = Arc::new(InFlight::new());

        info!(
            base = %self.options.base,
            jobs = self.options.jobs,
            fsck = self.options.fsck,
            started = %started_at.to_rfc3339(),
            "Starting synchronization"
        );

        // Queue and workers exist only in parallel mode
        let queue = if self.options.jobs > 0 {
            Some(CopyQueue::new(self.options.queue_size))
        } else {
            None
        };

        let mut workers = Vec::new();
        if let Some(queue) = &queue {
            for id in 0..self.options.jobs {
                workers.push(CopyWorker::spawn(
                    id,
                    Arc::clone(&self.src),
                    Arc::clone(&self.dst),
                    queue.receiver(),
                    Arc::clone(&stats),
                    Arc::clone(&in_flight),
                    self.options.retries,
                )?);
            }
            info!(count = workers.len(), "Copy workers spawned");
        }

        let sync_result = {
            let mut engine = Synchronizer::new(
                &*self.src,
                &*self.dst,
                &self.filter,
                &stats,
                queue.as_ref().map(|q| q.sender()),
                Arc::clone(&in_flight),
                self.options.fsck,
                self.options.retries,
                Arc::clone(&self.shutdown),
            );
            engine.push_dir(&self.options.base, true);
            engine.run()
        };

        // Enqueued copies finish regardless of how the walk ended
        in_flight.wait_idle();

        if let Some(queue) = &queue {
            let sender = queue.sender();
            for _ in 0..workers.len() {
                if sender.send(CopyJob::Terminate).is_err() {
                    break;
                }
            }
        }
        for worker in workers {
            if let Err(e) = worker.join() {
                warn!(error = %e, "Worker failed to join cleanly");
            }
        }

        sync_result?;

        let gc_reclaimed = if self.options.gc {
            let gc_start = Instant::now();
            info!("Running pool garbage collection");
            let reclaimed = self.dst.garbage_collect()?;
            info!(
                reclaimed,
                elapsed_secs = gc_start.elapsed().as_secs(),
                "Garbage collection finished"
            );
            Some(reclaimed)
        } else {
            None
        };

        let snapshot = stats.snapshot();
        let duration = start.elapsed();
        info!(
            duration_secs = duration.as_secs(),
            "Synchronization finished: {}",
            snapshot.render()
        );

        Ok(SyncResult {
            stats: snapshot,
            duration,
            gc_reclaimed,
        })
    }
}
