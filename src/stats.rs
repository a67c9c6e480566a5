//! Run statistics
//!
//! Six counters shared between the walker thread and the copy workers.
//! All counters are lock-free atomics; a consistent-enough snapshot is
//! taken for periodic printing and the final summary.

use std::sync::atomic::{AtomicU64, Ordering};

use humansize::{format_size, BINARY};

/// Counters collected over one synchronization run
#[derive(Debug, Default)]
pub struct SyncStats {
    /// Bytes transferred from the source to the destination
    bytes_copied: AtomicU64,

    /// Files transferred from the source to the destination
    files_copied: AtomicU64,

    /// File system entries processed in the source
    src_entries: AtomicU64,

    /// File system entries processed in the destination
    dst_entries: AtomicU64,

    /// Files not copied thanks to deduplication
    deduped_files: AtomicU64,

    /// Bytes not copied thanks to deduplication
    deduped_bytes: AtomicU64,
}

impl SyncStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_bytes_copied(&self, bytes: u64) {
        self.bytes_copied.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn inc_files_copied(&self) {
        self.files_copied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_src_entries(&self) {
        self.src_entries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_dst_entries(&self) {
        self.dst_entries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_deduped_files(&self) {
        self.deduped_files.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_deduped_bytes(&self, bytes: u64) {
        self.deduped_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Take a snapshot of all counters
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            bytes_copied: self.bytes_copied.load(Ordering::Relaxed),
            files_copied: self.files_copied.load(Ordering::Relaxed),
            src_entries: self.src_entries.load(Ordering::Relaxed),
            dst_entries: self.dst_entries.load(Ordering::Relaxed),
            deduped_files: self.deduped_files.load(Ordering::Relaxed),
            deduped_bytes: self.deduped_bytes.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the run counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub bytes_copied: u64,
    pub files_copied: u64,
    pub src_entries: u64,
    pub dst_entries: u64,
    pub deduped_files: u64,
    pub deduped_bytes: u64,
}

impl StatsSnapshot {
    /// One-line rendering used for the periodic progress print
    pub fn render(&self) -> String {
        format!(
            "copied {} files ({}), deduped {} files ({}), src entries {}, dst entries {}",
            self.files_copied,
            format_size(self.bytes_copied, BINARY),
            self.deduped_files,
            format_size(self.deduped_bytes, BINARY),
            self.src_entries,
            self.dst_entries,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let stats = SyncStats::new();

        stats.add_bytes_copied(1024);
        stats.inc_files_copied();
        stats.inc_src_entries();
        stats.inc_src_entries();
        stats.inc_dst_entries();
        stats.inc_deduped_files();
        stats.add_deduped_bytes(512);

        let snap = stats.snapshot();
        assert_eq!(snap.bytes_copied, 1024);
        assert_eq!(snap.files_copied, 1);
        assert_eq!(snap.src_entries, 2);
        assert_eq!(snap.dst_entries, 1);
        assert_eq!(snap.deduped_files, 1);
        assert_eq!(snap.deduped_bytes, 512);
    }

    #[test]
    fn test_render_mentions_counts() {
        let snap = StatsSnapshot {
            bytes_copied: 5,
            files_copied: 1,
            ..Default::default()
        };
        let line = snap.render();
        assert!(line.contains("copied 1 files"));
    }
}
