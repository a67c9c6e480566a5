//! Repair-claim registry
//!
//! `touch` already makes plain copies at-most-once, but repair mode
//! rewrites pool entries that exist and have drifted, so a second gate
//! is needed to decide which thread rewrites a given file. Claims are
//! keyed by destination inode number and last for one run.

use std::collections::HashSet;

use parking_lot::Mutex;

/// Set of destination inodes already claimed for rewrite in this run
#[derive(Debug, Default)]
pub struct FsckLock {
    claimed: Mutex<HashSet<u64>>,
}

impl FsckLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim an inode for rewrite. Returns true exactly once per inode
    /// per run; the winner performs the rewrite.
    pub fn claim(&self, inode: u64) -> bool {
        self.claimed.lock().insert(inode)
    }
}
