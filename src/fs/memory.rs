//! In-memory filesystem backend
//!
//! Implements the full capability set over plain maps: a node table for
//! the user-visible tree and a pool keyed by identifier. Hardlink
//! semantics are modelled by nodes referencing pool entries, which own
//! the shared inode number and metadata.
//!
//! `MemoryFs` backs the synchronizer tests on both sides of a run, and
//! is the second reference implementation the `FileSystem` trait was
//! shaped against.

use std::collections::{BTreeMap, HashMap};
use std::io::{Cursor, Read, Write};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::content::Fingerprint;
use crate::error::{FsError, FsResult};
use crate::fs::types::{pool_identifier, FileAttrs, FileKind, ATTR_VERSION};
use crate::fs::{FileSystem, WriteHandle};

const DEFAULT_FILE_MODE: u32 = 0o100644;
const DEFAULT_DIR_MODE: u32 = 0o040755;
const SYMLINK_MODE: u32 = 0o120777;

#[derive(Debug, Clone)]
struct Node {
    mode: u32,
    uid: u32,
    gid: u32,
    ino: u64,

    /// Pool identifier this node hardlinks to (regular files)
    ident: Option<String>,

    /// Symlink target (symlinks)
    target: Option<String>,
}

#[derive(Debug)]
struct PoolEntry {
    data: Vec<u8>,
    ino: u64,
    mode: u32,
    uid: u32,
    gid: u32,
}

#[derive(Debug, Default)]
struct Inner {
    nodes: BTreeMap<String, Node>,
    pool: HashMap<String, PoolEntry>,
    next_ino: u64,
}

impl Inner {
    fn bump_ino(&mut self) -> u64 {
        self.next_ino += 1;
        self.next_ino
    }
}

fn parent_of(path: &str) -> &str {
    match path.rsplit_once('/') {
        Some((dir, _)) => dir,
        None => "",
    }
}

fn name_of(path: &str) -> &str {
    match path.rsplit_once('/') {
        Some((_, name)) => name,
        None => path,
    }
}

/// In-memory backend; clones share the same state
#[derive(Clone, Default)]
pub struct MemoryFs {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a regular file (creating parent directories), contents
    /// deduplicated into the pool
    pub fn add_file(&self, path: &str, data: &[u8]) {
        let fp = Fingerprint::from_bytes(data);
        let attrs = FileAttrs {
            version: ATTR_VERSION,
            size: data.len() as u64,
            mode: DEFAULT_FILE_MODE,
            uid: 0,
            gid: 0,
            inode: 0,
            fingerprint: Some(fp),
            symlink: None,
            name: None,
        };
        let key = pool_identifier(&attrs);

        let mut inner = self.inner.lock();
        self.ensure_parents(&mut inner, path);
        let ino = match inner.pool.get(&key) {
            Some(entry) => entry.ino,
            None => {
                let ino = inner.bump_ino();
                inner.pool.insert(
                    key.clone(),
                    PoolEntry {
                        data: data.to_vec(),
                        ino,
                        mode: DEFAULT_FILE_MODE,
                        uid: 0,
                        gid: 0,
                    },
                );
                ino
            }
        };
        inner.nodes.insert(
            path.to_string(),
            Node {
                mode: DEFAULT_FILE_MODE,
                uid: 0,
                gid: 0,
                ino,
                ident: Some(key),
                target: None,
            },
        );
    }

    /// Insert a directory (creating parents)
    pub fn add_dir(&self, path: &str) {
        let mut inner = self.inner.lock();
        self.ensure_parents(&mut inner, path);
        let ino = inner.bump_ino();
        inner.nodes.entry(path.to_string()).or_insert(Node {
            mode: DEFAULT_DIR_MODE,
            uid: 0,
            gid: 0,
            ino,
            ident: None,
            target: None,
        });
    }

    /// Insert a symlink (creating parents)
    pub fn add_symlink(&self, path: &str, target: &str) {
        let mut inner = self.inner.lock();
        self.ensure_parents(&mut inner, path);
        let ino = inner.bump_ino();
        inner.nodes.insert(
            path.to_string(),
            Node {
                mode: SYMLINK_MODE,
                uid: 0,
                gid: 0,
                ino,
                ident: None,
                target: Some(target.to_string()),
            },
        );
    }

    fn ensure_parents(&self, inner: &mut Inner, path: &str) {
        let mut dir = parent_of(path);
        let mut missing = Vec::new();
        while !dir.is_empty() && !inner.nodes.contains_key(dir) {
            missing.push(dir.to_string());
            dir = parent_of(dir);
        }
        for dir in missing.into_iter().rev() {
            let ino = inner.bump_ino();
            inner.nodes.insert(
                dir,
                Node {
                    mode: DEFAULT_DIR_MODE,
                    uid: 0,
                    gid: 0,
                    ino,
                    ident: None,
                    target: None,
                },
            );
        }
    }

    /// Read the bytes a user path resolves to
    pub fn read_path(&self, path: &str) -> Option<Vec<u8>> {
        let inner = self.inner.lock();
        let node = inner.nodes.get(path)?;
        let ident = node.ident.as_ref()?;
        inner.pool.get(ident).map(|entry| entry.data.clone())
    }

    /// Inode number of a user path
    pub fn path_ino(&self, path: &str) -> Option<u64> {
        self.inner.lock().nodes.get(path).map(|node| node.ino)
    }

    /// Whether a user path exists at all
    pub fn contains_path(&self, path: &str) -> bool {
        self.inner.lock().nodes.contains_key(path)
    }

    /// Number of pool entries currently stored
    pub fn pool_len(&self) -> usize {
        self.inner.lock().pool.len()
    }

    /// Overwrite a path's pool bytes in place without updating the
    /// identifier (simulates content drift for repair scenarios)
    pub fn clobber_path(&self, path: &str, data: &[u8]) -> bool {
        let mut inner = self.inner.lock();
        let Some(ident) = inner.nodes.get(path).and_then(|n| n.ident.clone()) else {
            return false;
        };
        match inner.pool.get_mut(&ident) {
            Some(entry) => {
                entry.data = data.to_vec();
                true
            }
            None => false,
        }
    }
}

impl FileSystem for MemoryFs {
    fn list_dir(&self, dir: &str) -> FsResult<Vec<String>> {
        let inner = self.inner.lock();
        if !dir.is_empty() {
            let node = inner.nodes.get(dir).ok_or_else(|| FsError::NotFound {
                path: dir.to_string(),
            })?;
            if !FileKind::from_mode(node.mode).is_dir() {
                return Err(FsError::ListFailed {
                    path: dir.to_string(),
                    reason: "not a directory".to_string(),
                });
            }
        }
        Ok(inner
            .nodes
            .keys()
            .filter(|path| parent_of(path) == dir && !path.is_empty())
            .map(|path| name_of(path).to_string())
            .collect())
    }

    fn stat(&self, path: &str, want_hash: bool) -> FsResult<FileAttrs> {
        let inner = self.inner.lock();
        let node = inner.nodes.get(path).ok_or_else(|| FsError::NotFound {
            path: path.to_string(),
        })?;

        let attrs = match (&node.ident, &node.target) {
            (Some(ident), _) => {
                let entry = inner.pool.get(ident).ok_or_else(|| FsError::StatFailed {
                    path: path.to_string(),
                    reason: "dangling pool reference".to_string(),
                })?;
                // The recorded fingerprint is the one embedded in the
                // identifier, not a rehash of the bytes
                let fingerprint = if want_hash {
                    ident
                        .get(..crate::content::FINGERPRINT_HEX_LEN)
                        .and_then(Fingerprint::from_hex)
                } else {
                    None
                };
                FileAttrs {
                    version: ATTR_VERSION,
                    size: entry.data.len() as u64,
                    mode: entry.mode,
                    uid: entry.uid,
                    gid: entry.gid,
                    inode: entry.ino,
                    fingerprint,
                    symlink: None,
                    name: Some(path.to_string()),
                }
            }
            (None, Some(target)) => FileAttrs {
                version: ATTR_VERSION,
                size: target.len() as u64,
                mode: node.mode,
                uid: node.uid,
                gid: node.gid,
                inode: node.ino,
                fingerprint: None,
                symlink: Some(target.clone()),
                name: Some(path.to_string()),
            },
            (None, None) => FileAttrs {
                version: ATTR_VERSION,
                size: 0,
                mode: node.mode,
                uid: node.uid,
                gid: node.gid,
                inode: node.ino,
                fingerprint: None,
                symlink: None,
                name: Some(path.to_string()),
            },
        };
        Ok(attrs)
    }

    fn identifier(&self, attrs: &FileAttrs) -> String {
        pool_identifier(attrs)
    }

    fn open_read(&self, ident: &str) -> FsResult<Box<dyn Read + Send>> {
        let inner = self.inner.lock();
        let entry = inner.pool.get(ident).ok_or_else(|| FsError::ReadFailed {
            ident: ident.to_string(),
            reason: "no such pool entry".to_string(),
        })?;
        Ok(Box::new(Cursor::new(entry.data.clone())))
    }

    fn open_write(&self, ident: &str) -> FsResult<Box<dyn WriteHandle>> {
        Ok(Box::new(MemWriter {
            buf: Vec::new(),
            ident: ident.to_string(),
            inner: Arc::clone(&self.inner),
        }))
    }

    fn mkdir(&self, path: &str, attrs: &FileAttrs) -> FsResult<()> {
        let mut inner = self.inner.lock();
        if inner.nodes.contains_key(path) {
            return Err(FsError::AlreadyExists {
                path: path.to_string(),
            });
        }
        let ino = inner.bump_ino();
        inner.nodes.insert(
            path.to_string(),
            Node {
                mode: attrs.mode,
                uid: attrs.uid,
                gid: attrs.gid,
                ino,
                ident: None,
                target: None,
            },
        );
        Ok(())
    }

    fn set_meta(&self, path: &str, attrs: &FileAttrs) -> FsResult<()> {
        let mut inner = self.inner.lock();
        let Some(node) = inner.nodes.get(path).cloned() else {
            return Err(FsError::NotFound {
                path: path.to_string(),
            });
        };
        match node.ident {
            Some(ident) => {
                // Hardlinked file: metadata lives on the pool entry
                let entry = inner.pool.get_mut(&ident).ok_or_else(|| {
                    FsError::SetMetaFailed {
                        path: path.to_string(),
                        reason: "dangling pool reference".to_string(),
                    }
                })?;
                entry.mode = attrs.mode;
                entry.uid = attrs.uid;
                entry.gid = attrs.gid;
            }
            None => {
                let node = inner.nodes.get_mut(path).expect("checked above");
                node.mode = attrs.mode;
                node.uid = attrs.uid;
                node.gid = attrs.gid;
            }
        }
        Ok(())
    }

    fn rmdir(&self, path: &str) -> FsResult<()> {
        let mut inner = self.inner.lock();
        let node = inner.nodes.get(path).ok_or_else(|| FsError::NotFound {
            path: path.to_string(),
        })?;
        if !FileKind::from_mode(node.mode).is_dir() {
            return Err(FsError::RemoveFailed {
                path: path.to_string(),
                reason: "not a directory".to_string(),
            });
        }
        let has_children = inner
            .nodes
            .keys()
            .any(|p| parent_of(p) == path && !p.is_empty());
        if has_children {
            return Err(FsError::RemoveFailed {
                path: path.to_string(),
                reason: "directory not empty".to_string(),
            });
        }
        inner.nodes.remove(path);
        Ok(())
    }

    fn unlink(&self, path: &str) -> FsResult<()> {
        let mut inner = self.inner.lock();
        let node = inner.nodes.get(path).ok_or_else(|| FsError::NotFound {
            path: path.to_string(),
        })?;
        if FileKind::from_mode(node.mode).is_dir() {
            return Err(FsError::RemoveFailed {
                path: path.to_string(),
                reason: "is a directory".to_string(),
            });
        }
        inner.nodes.remove(path);
        Ok(())
    }

    fn symlink(&self, path: &str, target: &str, attrs: &FileAttrs) -> FsResult<()> {
        let mut inner = self.inner.lock();
        let ino = inner.bump_ino();
        inner.nodes.insert(
            path.to_string(),
            Node {
                mode: SYMLINK_MODE,
                uid: attrs.uid,
                gid: attrs.gid,
                ino,
                ident: None,
                target: Some(target.to_string()),
            },
        );
        Ok(())
    }

    fn touch(&self, attrs: &FileAttrs) -> FsResult<bool> {
        let key = pool_identifier(attrs);
        let mut inner = self.inner.lock();
        if inner.pool.contains_key(&key) {
            return Ok(false);
        }
        let ino = inner.bump_ino();
        inner.pool.insert(
            key,
            PoolEntry {
                data: Vec::new(),
                ino,
                mode: attrs.mode,
                uid: attrs.uid,
                gid: attrs.gid,
            },
        );
        Ok(true)
    }

    fn link(&self, path: &str, ident: &str) -> FsResult<()> {
        let mut inner = self.inner.lock();
        let Some(entry) = inner.pool.get(ident) else {
            return Err(FsError::LinkFailed {
                path: path.to_string(),
                ident: ident.to_string(),
                reason: "no such pool entry".to_string(),
            });
        };
        let node = Node {
            mode: entry.mode,
            uid: entry.uid,
            gid: entry.gid,
            ino: entry.ino,
            ident: Some(ident.to_string()),
            target: None,
        };
        inner.nodes.insert(path.to_string(), node);
        Ok(())
    }

    fn is_hash_consistent(&self, attrs: &FileAttrs) -> FsResult<bool> {
        let Some(expect) = attrs.fingerprint else {
            return Ok(false);
        };
        let key = pool_identifier(attrs);
        let inner = self.inner.lock();
        Ok(match inner.pool.get(&key) {
            Some(entry) => Fingerprint::from_bytes(&entry.data) == expect,
            None => false,
        })
    }

    fn garbage_collect(&self) -> FsResult<u64> {
        let mut inner = self.inner.lock();
        let live: std::collections::HashSet<String> = inner
            .nodes
            .values()
            .filter_map(|node| node.ident.clone())
            .collect();
        let before = inner.pool.len();
        inner.pool.retain(|key, _| live.contains(key));
        Ok((before - inner.pool.len()) as u64)
    }
}

struct MemWriter {
    buf: Vec<u8>,
    ident: String,
    inner: Arc<Mutex<Inner>>,
}

impl Write for MemWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl WriteHandle for MemWriter {
    fn commit(self: Box<Self>) -> FsResult<()> {
        let MemWriter { buf, ident, inner } = *self;
        let mut inner = inner.lock();
        match inner.pool.get_mut(&ident) {
            Some(entry) => {
                entry.data = buf;
                Ok(())
            }
            None => Err(FsError::WriteFailed {
                ident,
                reason: "pool entry was not created".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_file_creates_parents() {
        let fs = MemoryFs::new();
        fs.add_file("a/b/c.txt", b"data");

        let mut names = fs.list_dir("").unwrap();
        names.sort();
        assert_eq!(names, vec!["a"]);
        assert_eq!(fs.list_dir("a").unwrap(), vec!["b"]);
        assert_eq!(fs.list_dir("a/b").unwrap(), vec!["c.txt"]);
        assert_eq!(fs.read_path("a/b/c.txt").unwrap(), b"data");
    }

    #[test]
    fn test_equal_contents_share_pool_entry() {
        let fs = MemoryFs::new();
        fs.add_file("a", b"same");
        fs.add_file("b", b"same");

        assert_eq!(fs.pool_len(), 1);
        assert_eq!(fs.path_ino("a"), fs.path_ino("b"));
    }

    #[test]
    fn test_touch_once() {
        let fs = MemoryFs::new();
        let attrs = FileAttrs {
            version: ATTR_VERSION,
            size: 2,
            mode: DEFAULT_FILE_MODE,
            uid: 0,
            gid: 0,
            inode: 0,
            fingerprint: Some(Fingerprint::from_bytes(b"xy")),
            symlink: None,
            name: Some("a".into()),
        };
        assert!(fs.touch(&attrs).unwrap());
        assert!(!fs.touch(&attrs).unwrap());
    }

    #[test]
    fn test_write_commit_and_consistency() {
        let fs = MemoryFs::new();
        let attrs = FileAttrs {
            version: ATTR_VERSION,
            size: 5,
            mode: DEFAULT_FILE_MODE,
            uid: 0,
            gid: 0,
            inode: 0,
            fingerprint: Some(Fingerprint::from_bytes(b"hello")),
            symlink: None,
            name: Some("a".into()),
        };
        fs.touch(&attrs).unwrap();
        let ident = fs.identifier(&attrs);

        // Empty entry does not hash to the fingerprint yet
        assert!(!fs.is_hash_consistent(&attrs).unwrap());

        let mut w = fs.open_write(&ident).unwrap();
        w.write_all(b"hello").unwrap();
        w.commit().unwrap();
        assert!(fs.is_hash_consistent(&attrs).unwrap());

        fs.link("a", &ident).unwrap();
        assert_eq!(fs.read_path("a").unwrap(), b"hello");
    }

    #[test]
    fn test_rmdir_refuses_non_empty() {
        let fs = MemoryFs::new();
        fs.add_file("d/x", b"1");
        assert!(fs.rmdir("d").is_err());
        fs.unlink("d/x").unwrap();
        fs.rmdir("d").unwrap();
        assert!(!fs.contains_path("d"));
    }

    #[test]
    fn test_garbage_collect() {
        let fs = MemoryFs::new();
        fs.add_file("a", b"live");
        let attrs = FileAttrs {
            version: ATTR_VERSION,
            size: 6,
            mode: DEFAULT_FILE_MODE,
            uid: 0,
            gid: 0,
            inode: 0,
            fingerprint: Some(Fingerprint::from_bytes(b"orphan")),
            symlink: None,
            name: None,
        };
        fs.touch(&attrs).unwrap();

        assert_eq!(fs.pool_len(), 2);
        assert_eq!(fs.garbage_collect().unwrap(), 1);
        assert_eq!(fs.pool_len(), 1);
        assert_eq!(fs.read_path("a").unwrap(), b"live");
    }

    #[test]
    fn test_clobber_simulates_drift() {
        let fs = MemoryFs::new();
        fs.add_file("a", b"hello");
        let attrs = fs.stat("a", true).unwrap();
        assert!(fs.is_hash_consistent(&attrs).unwrap());

        assert!(fs.clobber_path("a", b"HELLO"));
        assert!(!fs.is_hash_consistent(&attrs).unwrap());
        assert_eq!(fs.read_path("a").unwrap(), b"HELLO");
    }
}
