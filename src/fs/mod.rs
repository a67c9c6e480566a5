//! Filesystem backend abstraction
//!
//! A backend is anything that can play the role of a synchronization
//! side: the read side lists, stats and opens entries; the write side
//! additionally maintains a content-addressed pool of regular files
//! that user-visible paths hardlink into.
//!
//! Reference implementations:
//! - [`DirSource`] - read-only plain directory tree (source)
//! - [`PoolFs`] - POSIX destination with an on-disk pool
//! - [`MemoryFs`] - in-memory backend used by the engine tests

pub mod memory;
pub mod pool;
pub mod source;
pub mod types;

pub use memory::MemoryFs;
pub use pool::PoolFs;
pub use source::DirSource;
pub use types::{attrs_equal, pool_identifier, FileAttrs, FileKind, ATTR_VERSION};

use std::io::{Read, Write};

use crate::error::{FsError, FsResult};

/// Handle for writing one pool entry
///
/// Bytes become visible to readers of the pool entry only after
/// `commit` returns; an uncommitted handle leaves the entry untouched.
pub trait WriteHandle: Write + Send {
    /// Publish the written bytes as the pool entry's contents
    fn commit(self: Box<Self>) -> FsResult<()>;
}

/// Capability set a filesystem exposes to the synchronizer
///
/// A read-only source implements the listing half and keeps the default
/// `Unsupported` implementations for everything that mutates. A
/// destination implements the full set.
pub trait FileSystem: Send + Sync {
    /// List the names of a directory's entries (unsorted)
    fn list_dir(&self, dir: &str) -> FsResult<Vec<String>>;

    /// Stat one entry. `want_hash` requests the content fingerprint of
    /// regular files; skipping it avoids hashing on the fast path.
    fn stat(&self, path: &str, want_hash: bool) -> FsResult<FileAttrs>;

    /// Derive the identifier under which this backend stores or reads
    /// the file described by `attrs`
    fn identifier(&self, attrs: &FileAttrs) -> String;

    /// Open the bytes behind an identifier for reading
    fn open_read(&self, ident: &str) -> FsResult<Box<dyn Read + Send>>;

    /// Open the pool entry behind an identifier for writing
    fn open_write(&self, _ident: &str) -> FsResult<Box<dyn WriteHandle>> {
        Err(FsError::Unsupported { op: "open_write" })
    }

    /// Create a directory carrying the given attributes
    fn mkdir(&self, _path: &str, _attrs: &FileAttrs) -> FsResult<()> {
        Err(FsError::Unsupported { op: "mkdir" })
    }

    /// Apply ownership and permissions to an existing entry
    fn set_meta(&self, _path: &str, _attrs: &FileAttrs) -> FsResult<()> {
        Err(FsError::Unsupported { op: "set_meta" })
    }

    /// Remove an empty directory
    fn rmdir(&self, _path: &str) -> FsResult<()> {
        Err(FsError::Unsupported { op: "rmdir" })
    }

    /// Remove a file or symlink
    fn unlink(&self, _path: &str) -> FsResult<()> {
        Err(FsError::Unsupported { op: "unlink" })
    }

    /// Create (or replace) a symlink carrying the given attributes
    fn symlink(&self, _path: &str, _target: &str, _attrs: &FileAttrs) -> FsResult<()> {
        Err(FsError::Unsupported { op: "symlink" })
    }

    /// Atomically create the pool entry for these attributes if absent.
    ///
    /// Returns true iff this call created the entry. Concurrent callers
    /// with equal attributes see exactly one `true`; this is the gate
    /// that makes copies at-most-once.
    fn touch(&self, _attrs: &FileAttrs) -> FsResult<bool> {
        Err(FsError::Unsupported { op: "touch" })
    }

    /// Hardlink a user-visible path onto a pool entry.
    ///
    /// Idempotent when the path already points at the entry; a stale
    /// link is replaced atomically.
    fn link(&self, _path: &str, _ident: &str) -> FsResult<()> {
        Err(FsError::Unsupported { op: "link" })
    }

    /// Verify that the pool entry for these attributes still hashes to
    /// the fingerprint it advertises
    fn is_hash_consistent(&self, _attrs: &FileAttrs) -> FsResult<bool> {
        Err(FsError::Unsupported {
            op: "is_hash_consistent",
        })
    }

    /// Remove pool entries no user-visible path links to.
    ///
    /// Returns the number of entries reclaimed.
    fn garbage_collect(&self) -> FsResult<u64> {
        Err(FsError::Unsupported {
            op: "garbage_collect",
        })
    }
}
