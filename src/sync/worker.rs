//! Copy worker pool
//!
//! Each worker owns one loop: dequeue a job, copy the bytes from the
//! source identifier onto the destination pool identifier, update the
//! counters, decrement the in-flight gauge. A failed copy is logged and
//! shows up only as a missing files-copied increment; it never stops
//! the pool. Worker 0 additionally prints a statistics snapshot roughly
//! every ten seconds.

use std::io::{Read, Write};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::{FsError, FsResult, WorkerError};
use crate::fs::FileSystem;
use crate::stats::SyncStats;
use crate::sync::queue::{CopyJob, CopyReceiver, InFlight, RecvTimeoutError};

/// Chunk size for streaming a file between backends
pub const COPY_BUFFER_SIZE: usize = 1024 * 1024;

/// How often worker 0 prints the statistics snapshot
const STATS_INTERVAL: Duration = Duration::from_secs(10);

/// Poll granularity for worker 0's periodic print while idle
const IDLE_TICK: Duration = Duration::from_secs(1);

/// Stream one file from the source to a destination pool entry.
///
/// The handle protocol: open both sides, shuttle `COPY_BUFFER_SIZE`
/// chunks until the source reports a zero-byte read, then commit the
/// destination handle to publish the bytes.
pub fn copy_file(
    src: &dyn FileSystem,
    src_ident: &str,
    dst: &dyn FileSystem,
    dst_ident: &str,
    stats: &SyncStats,
) -> FsResult<()> {
    let mut reader = src.open_read(src_ident)?;
    let mut writer = dst.open_write(dst_ident)?;

    let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
    let mut transferred = 0u64;
    loop {
        let n = reader.read(&mut buffer).map_err(|e| FsError::ReadFailed {
            ident: src_ident.to_string(),
            reason: e.to_string(),
        })?;
        if n == 0 {
            break;
        }
        writer
            .write_all(&buffer[..n])
            .map_err(|e| FsError::WriteFailed {
                ident: dst_ident.to_string(),
                reason: e.to_string(),
            })?;
        transferred += n as u64;
    }
    writer.commit()?;

    stats.add_bytes_copied(transferred);
    Ok(())
}

/// Copy with a bounded number of retries on failure
pub fn copy_with_retries(
    src: &dyn FileSystem,
    src_ident: &str,
    dst: &dyn FileSystem,
    dst_ident: &str,
    stats: &SyncStats,
    retries: u32,
) -> FsResult<()> {
    let mut attempt = 0;
    loop {
        match copy_file(src, src_ident, dst, dst_ident, stats) {
            Ok(()) => return Ok(()),
            Err(e) if attempt < retries => {
                attempt += 1;
                warn!(
                    src = src_ident,
                    attempt,
                    retries,
                    error = %e,
                    "Copy failed, retrying"
                );
            }
            Err(e) => return Err(e),
        }
    }
}

/// One copy worker thread
pub struct CopyWorker {
    id: usize,
    handle: Option<JoinHandle<()>>,
}

impl CopyWorker {
    /// Spawn a worker consuming from the copy queue
    pub fn spawn(
        id: usize,
        src: Arc<dyn FileSystem>,
        dst: Arc<dyn FileSystem>,
        receiver: CopyReceiver,
        stats: Arc<SyncStats>,
        in_flight: Arc<InFlight>,
        retries: u32,
    ) -> Result<Self, WorkerError> {
        let handle = thread::Builder::new()
            .name(format!("copy-{id}"))
            .spawn(move || {
                worker_loop(id, &*src, &*dst, &receiver, &stats, &in_flight, retries);
            })
            .map_err(|e| WorkerError::SpawnFailed {
                id,
                reason: e.to_string(),
            })?;

        Ok(Self {
            id,
            handle: Some(handle),
        })
    }

    /// Worker id
    pub fn id(&self) -> usize {
        self.id
    }

    /// Wait for the worker to exit
    pub fn join(mut self) -> Result<(), WorkerError> {
        if let Some(handle) = self.handle.take() {
            handle.join().map_err(|_| WorkerError::Panicked { id: self.id })?;
        }
        Ok(())
    }
}

fn worker_loop(
    id: usize,
    src: &dyn FileSystem,
    dst: &dyn FileSystem,
    receiver: &CopyReceiver,
    stats: &SyncStats,
    in_flight: &InFlight,
    retries: u32,
) {
    debug!(worker = id, "Copy worker starting");
    let mut last_print = Instant::now();

    loop {
        // Worker 0 keeps a timeout on the queue so the periodic
        // statistics print also happens while the pool is idle
        let job = if id == 0 {
            if last_print.elapsed() >= STATS_INTERVAL {
                info!("{}", stats.snapshot().render());
                last_print = Instant::now();
            }
            match receiver.recv_timeout(IDLE_TICK) {
                Ok(job) => job,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        } else {
            match receiver.recv() {
                Some(job) => job,
                None => break,
            }
        };

        match job {
            CopyJob::Terminate => break,
            CopyJob::Copy {
                src: src_ident,
                dst: dst_ident,
            } => {
                match copy_with_retries(src, &src_ident, dst, &dst_ident, stats, retries) {
                    Ok(()) => stats.inc_files_copied(),
                    Err(e) => {
                        warn!(
                            worker = id,
                            src = %src_ident,
                            dst = %dst_ident,
                            error = %e,
                            "Copy failed"
                        );
                    }
                }
                in_flight.done();
            }
        }
    }

    debug!(worker = id, "Copy worker shutting down");
}
