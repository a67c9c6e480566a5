//! Recursive synchronization engine
//!
//! The engine reconciles one directory at a time: both sides are listed
//! and sorted, then walked as a two-pointer merge. Source-only and
//! differing entries are materialised on the destination; destination-
//! only entries are pruned. Directories needing descent are pushed onto
//! an explicit walk stack, including the prune of a removed directory's
//! subtree, so the engine itself never recurses.
//!
//! Regular files go through the pool protocol: `touch` decides
//! at-most-once whether the pool entry must be filled (by an enqueued
//! copy job or an inline copy), and `link` materialises the user path
//! as a hardlink either way.

use std::cmp::Ordering;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::error::{FsError, Result, SyncError};
use crate::filter::{join_path, DirListing, PathFilter};
use crate::fs::{attrs_equal, FileAttrs, FileKind, FileSystem};
use crate::stats::SyncStats;
use crate::sync::fsck::FsckLock;
use crate::sync::queue::{CopyJob, CopySender, InFlight};
use crate::sync::worker::copy_with_retries;

/// One unit of pending traversal work
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalkFrame {
    /// Reconcile a directory against the source
    Sync { dir: String, recursive: bool },

    /// Remove everything below a destination-only directory
    Prune { dir: String },

    /// Remove a destination-only directory once its subtree is gone
    Rmdir { dir: String },
}

/// The walk engine for one run
pub struct Synchronizer<'a> {
    src: &'a dyn FileSystem,
    dst: &'a dyn FileSystem,
    filter: &'a PathFilter,
    stats: &'a SyncStats,
    fsck_lock: FsckLock,
    queue: Option<CopySender>,
    in_flight: Arc<InFlight>,
    do_fsck: bool,
    retries: u32,
    shutdown: Arc<AtomicBool>,
    stack: Vec<WalkFrame>,
}

impl<'a> Synchronizer<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        src: &'a dyn FileSystem,
        dst: &'a dyn FileSystem,
        filter: &'a PathFilter,
        stats: &'a SyncStats,
        queue: Option<CopySender>,
        in_flight: Arc<InFlight>,
        do_fsck: bool,
        retries: u32,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            src,
            dst,
            filter,
            stats,
            fsck_lock: FsckLock::new(),
            queue,
            in_flight,
            do_fsck,
            retries,
            shutdown,
            stack: Vec::new(),
        }
    }

    /// Queue a directory for synchronization
    pub fn push_dir(&mut self, dir: &str, recursive: bool) {
        self.stack.push(WalkFrame::Sync {
            dir: dir.to_string(),
            recursive,
        });
    }

    /// Drive the walk stack until it drains.
    ///
    /// Seeds the stack with the tree root if nothing was queued. Any
    /// fatal directory failure aborts the run.
    pub fn run(&mut self) -> Result<()> {
        if self.stack.is_empty() {
            self.stack.push(WalkFrame::Sync {
                dir: String::new(),
                recursive: true,
            });
        }

        while let Some(frame) = self.stack.pop() {
            if self.shutdown.load(AtomicOrdering::Relaxed) {
                warn!("Shutdown requested, aborting walk");
                return Err(SyncError::Interrupted);
            }

            match frame {
                WalkFrame::Sync { dir, recursive } => {
                    if let Err(e) = self.sync_dir(&dir, recursive, false) {
                        error!(dir = %dir, error = %e, "Directory failed to synchronize");
                        return Err(e);
                    }
                }
                WalkFrame::Prune { dir } => {
                    if let Err(e) = self.sync_dir(&dir, true, true) {
                        error!(dir = %dir, error = %e, "Directory failed to prune");
                        return Err(e);
                    }
                }
                WalkFrame::Rmdir { dir } => {
                    if let Err(e) = self.dst.rmdir(&dir) {
                        error!(dir = %dir, error = %e, "Failed to remove directory");
                        return Err(e.into());
                    }
                }
            }
        }
        Ok(())
    }

    /// Next source entry at or after `pos`: filtered, stat'd with hash,
    /// counted. Entries whose stat fails are skipped.
    fn next_src(
        &self,
        dir: &str,
        names: &[String],
        pos: &mut usize,
    ) -> Option<(String, FileAttrs)> {
        while *pos < names.len() {
            let name = &names[*pos];
            *pos += 1;
            let path = join_path(dir, name);
            if !self.filter.is_match(&path) {
                continue;
            }
            match self.src.stat(&path, true) {
                Ok(attrs) => {
                    self.stats.inc_src_entries();
                    return Some((path, attrs));
                }
                Err(e) => {
                    debug!(path = %path, error = %e, "Skipping unreadable source entry");
                }
            }
        }
        None
    }

    /// Next destination entry; the stat requests the recorded hash only
    /// in repair mode
    fn next_dst(
        &self,
        dir: &str,
        names: &[String],
        pos: &mut usize,
        want_hash: bool,
    ) -> Option<(String, FileAttrs)> {
        while *pos < names.len() {
            let name = &names[*pos];
            *pos += 1;
            let path = join_path(dir, name);
            match self.dst.stat(&path, want_hash) {
                Ok(attrs) => {
                    self.stats.inc_dst_entries();
                    return Some((path, attrs));
                }
                Err(e) => {
                    debug!(path = %path, error = %e, "Skipping unreadable destination entry");
                }
            }
        }
        None
    }

    /// Reconcile one directory. With `prune_only` the source side is
    /// treated as empty, which removes the whole destination subtree.
    fn sync_dir(&mut self, dir: &str, recursive: bool, prune_only: bool) -> Result<()> {
        let src_names: Vec<String> = if prune_only {
            Vec::new()
        } else {
            match self.filter.list_dir(dir) {
                DirListing::Explicit(names) => names,
                DirListing::ReadFs => match self.src.list_dir(dir) {
                    Ok(mut names) => {
                        names.sort();
                        names
                    }
                    Err(e) => {
                        warn!(dir = %dir, error = %e, "Failed to list source directory");
                        Vec::new()
                    }
                },
            }
        };

        let dst_names: Vec<String> = match self.dst.list_dir(dir) {
            Ok(mut names) => {
                names.sort();
                names
            }
            // A directory just created on the destination has nothing
            // to list yet
            Err(FsError::NotFound { .. }) => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        let want_dst_hash = self.do_fsck && !prune_only;

        let mut src_pos = 0usize;
        let mut dst_pos = 0usize;
        let mut src_cur: Option<(String, FileAttrs)> = None;
        let mut dst_cur: Option<(String, FileAttrs)> = None;
        let mut cmp = Ordering::Equal;

        loop {
            if cmp != Ordering::Greater {
                src_cur = self.next_src(dir, &src_names, &mut src_pos);
            }
            if cmp != Ordering::Less {
                dst_cur = self.next_dst(dir, &dst_names, &mut dst_pos, want_dst_hash);
            } else {
                // The destination gains an entry at this position
                self.stats.inc_dst_entries();
            }

            cmp = match (&src_cur, &dst_cur) {
                (None, None) => break,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some((s, _)), Some((d, _))) => s.as_str().cmp(d.as_str()),
            };

            if cmp != Ordering::Greater {
                let (path, attrs) = src_cur.as_ref().expect("source side present");

                if cmp == Ordering::Equal {
                    let (_, dst_attrs) = dst_cur.as_ref().expect("destination side present");
                    // Besides attribute equality, a recorded hash must
                    // still describe the pool entry's bytes
                    let pool_ok = dst_attrs.fingerprint.is_none()
                        || matches!(self.dst.is_hash_consistent(dst_attrs), Ok(true));
                    if pool_ok && attrs_equal(attrs, dst_attrs, self.dst) {
                        if attrs.kind().is_dir() && recursive {
                            let dir = path.clone();
                            self.stack.push(WalkFrame::Sync { dir, recursive });
                        }
                        continue;
                    }
                }

                match attrs.kind() {
                    FileKind::File => {
                        let dst_attrs = if cmp == Ordering::Equal {
                            dst_cur.as_ref().map(|(_, a)| a)
                        } else {
                            None
                        };
                        self.handle_file(path, attrs, dst_attrs)?;
                    }
                    FileKind::Dir => {
                        self.handle_dir(path, attrs)?;
                        if recursive {
                            let dir = path.clone();
                            self.stack.push(WalkFrame::Sync { dir, recursive });
                        }
                    }
                    FileKind::Symlink => {
                        let target = attrs.symlink.as_deref().unwrap_or_default();
                        if let Err(e) = self.dst.symlink(path, target, attrs) {
                            error!(path = %path, target = %target, error = %e, "Failed to create symlink");
                            return Err(e.into());
                        }
                    }
                    _ => {
                        error!(path = %path, mode = attrs.mode, "Unknown source file type");
                        return Err(FsError::UnknownFileType {
                            path: path.clone(),
                            mode: attrs.mode,
                        }
                        .into());
                    }
                }
            } else {
                // Destination holds something the source does not
                let (path, attrs) = dst_cur.as_ref().expect("destination side present");
                match attrs.kind() {
                    FileKind::File | FileKind::Symlink => {
                        if let Err(e) = self.dst.unlink(path) {
                            error!(path = %path, error = %e, "Failed to unlink stale entry");
                            return Err(e.into());
                        }
                    }
                    FileKind::Dir => {
                        // Contents go first, the rmdir frame runs after
                        // the prune frame has emptied the subtree
                        self.stack.push(WalkFrame::Rmdir { dir: path.clone() });
                        self.stack.push(WalkFrame::Prune { dir: path.clone() });
                    }
                    _ => {
                        error!(path = %path, mode = attrs.mode, "Unknown destination file type");
                        return Err(FsError::UnknownFileType {
                            path: path.clone(),
                            mode: attrs.mode,
                        }
                        .into());
                    }
                }
            }
        }
        Ok(())
    }

    /// Bring one regular file up to date on the destination
    fn handle_file(
        &self,
        path: &str,
        src_attrs: &FileAttrs,
        dst_attrs: Option<&FileAttrs>,
    ) -> Result<()> {
        let dst_ident = self.dst.identifier(src_attrs);

        // touch is the atomic gate: across all walkers exactly one sees
        // the entry as newly created and owns the copy
        let mut needs_copy = self.dst.touch(src_attrs)?;

        if !needs_copy && self.do_fsck {
            if let Some(dst_attrs) = dst_attrs {
                if dst_attrs.fingerprint.is_some()
                    && matches!(self.dst.is_hash_consistent(dst_attrs), Ok(false))
                    && self.fsck_lock.claim(dst_attrs.inode)
                {
                    needs_copy = true;
                }
            }
        }

        if needs_copy {
            let src_ident = self.src.identifier(src_attrs);
            match &self.queue {
                Some(sender) => {
                    self.in_flight.add();
                    if let Err(e) = sender.send(CopyJob::Copy {
                        src: src_ident,
                        dst: dst_ident.clone(),
                    }) {
                        self.in_flight.done();
                        return Err(e.into());
                    }
                }
                None => {
                    if let Err(e) = copy_with_retries(
                        self.src,
                        &src_ident,
                        self.dst,
                        &dst_ident,
                        self.stats,
                        self.retries,
                    ) {
                        error!(src = %src_ident, dst = %dst_ident, error = %e, "Failed to copy file");
                        return Err(e.into());
                    }
                    self.stats.inc_files_copied();
                }
            }
        } else {
            self.stats.inc_deduped_files();
            self.stats.add_deduped_bytes(src_attrs.size);
        }

        // Materialise the user-visible path. With workers running this
        // precedes the copy; touch has already created the pool entry,
        // and commit-by-rename keeps readers away from partial bytes.
        if let Err(e) = self.dst.link(path, &dst_ident) {
            error!(path = %path, ident = %dst_ident, error = %e, "Failed to link path onto pool entry");
            return Err(e.into());
        }
        Ok(())
    }

    /// Create or update one directory on the destination
    fn handle_dir(&self, path: &str, attrs: &FileAttrs) -> Result<()> {
        match self.dst.mkdir(path, attrs) {
            Ok(()) => Ok(()),
            Err(FsError::AlreadyExists { .. }) => {
                if let Err(e) = self.dst.set_meta(path, attrs) {
                    error!(path = %path, error = %e, "Failed to update directory metadata");
                    return Err(e.into());
                }
                Ok(())
            }
            Err(e) => {
                error!(path = %path, error = %e, "Failed to create directory");
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemoryFs;
    use crate::stats::StatsSnapshot;

    fn run_sync(src: &MemoryFs, dst: &MemoryFs, do_fsck: bool) -> StatsSnapshot {
        let filter = PathFilter::accept_all();
        run_filtered(src, dst, do_fsck, &filter)
    }

    fn run_filtered(
        src: &MemoryFs,
        dst: &MemoryFs,
        do_fsck: bool,
        filter: &PathFilter,
    ) -> StatsSnapshot {
        let stats = SyncStats::new();
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut engine = Synchronizer::new(
            src,
            dst,
            filter,
            &stats,
            None,
            Arc::new(InFlight::new()),
            do_fsck,
            0,
            shutdown,
        );
        engine.run().unwrap();
        stats.snapshot()
    }

    #[test]
    fn test_single_file_copied_and_linked() {
        let src = MemoryFs::new();
        src.add_file("a", b"hello");
        let dst = MemoryFs::new();

        let snap = run_sync(&src, &dst, false);

        assert_eq!(dst.read_path("a").unwrap(), b"hello");
        assert_eq!(dst.pool_len(), 1);
        assert_eq!(snap.files_copied, 1);
        assert_eq!(snap.bytes_copied, 5);
    }

    #[test]
    fn test_equal_files_share_one_pool_entry() {
        let src = MemoryFs::new();
        src.add_file("a", b"xy");
        src.add_file("b", b"xy");
        let dst = MemoryFs::new();

        let snap = run_sync(&src, &dst, false);

        assert_eq!(dst.pool_len(), 1);
        assert_eq!(dst.path_ino("a"), dst.path_ino("b"));
        assert_eq!(snap.files_copied, 1);
        assert_eq!(snap.deduped_files, 1);
        assert_eq!(snap.deduped_bytes, 2);
    }

    #[test]
    fn test_stale_destination_file_pruned() {
        let src = MemoryFs::new();
        src.add_file("a", b"keep");
        let dst = MemoryFs::new();
        dst.add_file("a", b"keep");
        dst.add_file("stale", b"bye");

        run_sync(&src, &dst, false);

        assert!(dst.contains_path("a"));
        assert!(!dst.contains_path("stale"));
    }

    #[test]
    fn test_destination_only_subtree_removed() {
        let src = MemoryFs::new();
        let dst = MemoryFs::new();
        dst.add_file("d/x", b"1");
        dst.add_file("d/y", b"2");
        dst.add_file("d/e/deep", b"3");

        run_sync(&src, &dst, false);

        assert!(!dst.contains_path("d/x"));
        assert!(!dst.contains_path("d/y"));
        assert!(!dst.contains_path("d/e/deep"));
        assert!(!dst.contains_path("d/e"));
        assert!(!dst.contains_path("d"));
    }

    #[test]
    fn test_nested_tree_mirrored() {
        let src = MemoryFs::new();
        src.add_file("top.txt", b"t");
        src.add_file("sub/inner/file", b"f");
        src.add_symlink("sub/lnk", "inner/file");
        let dst = MemoryFs::new();

        run_sync(&src, &dst, false);

        assert_eq!(dst.read_path("top.txt").unwrap(), b"t");
        assert_eq!(dst.read_path("sub/inner/file").unwrap(), b"f");
        let attrs = dst.stat("sub/lnk", false).unwrap();
        assert_eq!(attrs.symlink.as_deref(), Some("inner/file"));
    }

    #[test]
    fn test_second_run_is_all_dedup() {
        let src = MemoryFs::new();
        src.add_file("a", b"one");
        src.add_file("d/b", b"two");
        let dst = MemoryFs::new();

        let first = run_sync(&src, &dst, false);
        assert_eq!(first.files_copied, 2);

        let second = run_sync(&src, &dst, false);
        assert_eq!(second.files_copied, 0);
        assert_eq!(second.deduped_files, 2);
    }

    #[test]
    fn test_changed_content_replaces_link() {
        let src = MemoryFs::new();
        src.add_file("a", b"old");
        let dst = MemoryFs::new();

        run_sync(&src, &dst, false);
        assert_eq!(dst.read_path("a").unwrap(), b"old");

        // Source changes: same path, new bytes
        src.add_file("a", b"new!");
        let snap = run_sync(&src, &dst, false);

        assert_eq!(dst.read_path("a").unwrap(), b"new!");
        assert_eq!(snap.files_copied, 1);
    }

    #[test]
    fn test_symlink_target_change() {
        let src = MemoryFs::new();
        src.add_symlink("lnk", "one");
        let dst = MemoryFs::new();
        dst.add_symlink("lnk", "two");

        run_sync(&src, &dst, false);
        let attrs = dst.stat("lnk", false).unwrap();
        assert_eq!(attrs.symlink.as_deref(), Some("one"));
    }

    #[test]
    fn test_filter_restricts_and_prunes() {
        let src = MemoryFs::new();
        src.add_file("keep/file", b"k");
        src.add_file("skip/file", b"s");
        let dst = MemoryFs::new();
        dst.add_file("skip/file", b"s");

        let filter = PathFilter::parse("keep/*\n");
        run_filtered(&src, &dst, false, &filter);

        assert_eq!(dst.read_path("keep/file").unwrap(), b"k");
        // Entries outside the filter are stale on the destination
        assert!(!dst.contains_path("skip/file"));
        assert!(!dst.contains_path("skip"));
    }

    #[test]
    fn test_fsck_rewrites_drifted_entry_inline() {
        let src = MemoryFs::new();
        src.add_file("a", b"hello");
        let dst = MemoryFs::new();

        run_sync(&src, &dst, false);
        assert!(dst.clobber_path("a", b"HELLO"));

        // Without repair mode the entry is not rewritten: touch sees it
        // already exists
        let snap = run_sync(&src, &dst, false);
        assert_eq!(snap.files_copied, 0);
        assert_eq!(dst.read_path("a").unwrap(), b"HELLO");

        let snap = run_sync(&src, &dst, true);
        assert_eq!(snap.files_copied, 1);
        assert_eq!(dst.read_path("a").unwrap(), b"hello");
    }

    #[test]
    fn test_dedup_counters_track_sizes() {
        let src = MemoryFs::new();
        src.add_file("a", b"abcd");
        let dst = MemoryFs::new();

        run_sync(&src, &dst, false);
        let snap = run_sync(&src, &dst, false);
        assert_eq!(snap.deduped_files, 1);
        assert_eq!(snap.deduped_bytes, 4);
    }
}
