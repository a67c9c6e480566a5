//! Copy queue between the walker and the worker pool
//!
//! A bounded crossbeam channel with one producer (the walker) and N
//! consumers (the copy workers). Termination is in-band: the driver
//! sends one `Terminate` per worker once the in-flight gauge drains.
//!
//! The in-flight gauge counts jobs enqueued but not yet completed and
//! is the shutdown gate: the driver blocks on it instead of polling.

use crossbeam_channel::{bounded, Receiver, Sender};
pub use crossbeam_channel::RecvTimeoutError;
use parking_lot::{Condvar, Mutex};

use crate::error::WorkerError;

/// One unit of work for the copy pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyJob {
    /// Copy the bytes behind a source identifier onto a destination
    /// pool identifier
    Copy { src: String, dst: String },

    /// Worker shutdown sentinel
    Terminate,
}

/// Bounded single-producer multi-consumer copy queue
pub struct CopyQueue {
    sender: Sender<CopyJob>,
    receiver: Receiver<CopyJob>,
    capacity: usize,
}

impl CopyQueue {
    /// Create a queue with the given capacity; the walker blocks on
    /// send once the queue is full
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity);
        Self {
            sender,
            receiver,
            capacity,
        }
    }

    /// Producer handle for the walker
    pub fn sender(&self) -> CopySender {
        CopySender {
            sender: self.sender.clone(),
        }
    }

    /// Consumer handle, one clone per worker
    pub fn receiver(&self) -> CopyReceiver {
        CopyReceiver {
            receiver: self.receiver.clone(),
        }
    }

    /// Queue capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of jobs currently queued
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

/// Handle for enqueueing copy jobs
#[derive(Clone)]
pub struct CopySender {
    sender: Sender<CopyJob>,
}

impl CopySender {
    /// Send a job, blocking while the queue is full
    pub fn send(&self, job: CopyJob) -> Result<(), WorkerError> {
        self.sender
            .send(job)
            .map_err(|_| WorkerError::QueueSendFailed)
    }
}

/// Handle for dequeueing copy jobs
#[derive(Clone)]
pub struct CopyReceiver {
    receiver: Receiver<CopyJob>,
}

impl CopyReceiver {
    /// Receive a job, blocking until one is available.
    ///
    /// Returns None when the queue is disconnected.
    pub fn recv(&self) -> Option<CopyJob> {
        self.receiver.recv().ok()
    }

    /// Receive with a timeout, so an idle worker can run periodic work
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<CopyJob, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

/// Count of copy jobs enqueued but not yet completed
#[derive(Debug, Default)]
pub struct InFlight {
    count: Mutex<u64>,
    drained: Condvar,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a job handed to the pool
    pub fn add(&self) {
        *self.count.lock() += 1;
    }

    /// Record a job leaving the pool (completed or failed)
    pub fn done(&self) {
        let mut count = self.count.lock();
        debug_assert!(*count > 0, "in-flight gauge underflow");
        *count -= 1;
        if *count == 0 {
            self.drained.notify_all();
        }
    }

    /// Current number of in-flight jobs
    pub fn current(&self) -> u64 {
        *self.count.lock()
    }

    /// Block until every enqueued job has completed
    pub fn wait_idle(&self) {
        let mut count = self.count.lock();
        while *count > 0 {
            self.drained.wait(&mut count);
        }
    }
}
