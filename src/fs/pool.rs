//! POSIX destination backend with an on-disk content-addressed pool
//!
//! Layout under the destination root:
//!
//! ```text
//! <root>/                   user-visible tree (hardlinks + dirs + symlinks)
//! <root>/.pool/<aa>/<rest>  pool entries, named by identifier
//! ```
//!
//! Every regular file in the user-visible tree is a hardlink onto a pool
//! entry. `touch` creates entries with `O_CREAT|O_EXCL`, which is the
//! atomicity primitive the synchronizer's at-most-once copy rests on.
//! Writers fill a staging name next to the entry and rename over it on
//! commit, so readers of an already-linked path never observe a partial
//! copy.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::content::{Fingerprint, FINGERPRINT_HEX_LEN};
use crate::error::{FsError, FsResult};
use crate::fs::types::{pool_identifier, FileAttrs, ATTR_VERSION};
use crate::fs::{FileSystem, WriteHandle};

/// Name of the pool directory under the destination root
pub const POOL_DIR_NAME: &str = ".pool";

/// Suffix of in-flight staging files inside the pool
const STAGE_SUFFIX: &str = ".stage";

type InoIndex = Arc<Mutex<Option<HashMap<u64, String>>>>;

/// POSIX content-pool destination
pub struct PoolFs {
    root: PathBuf,
    pool_dir: PathBuf,

    /// Lazily built inode -> identifier map over the pool; how a stat of
    /// a user path recovers the fingerprint its hardlink advertises
    ino_index: InoIndex,
}

impl PoolFs {
    /// Open (creating if necessary) a destination rooted at `root`
    pub fn new(root: &Path) -> FsResult<Self> {
        let pool_dir = root.join(POOL_DIR_NAME);
        fs::create_dir_all(&pool_dir).map_err(|e| FsError::CreateFailed {
            path: pool_dir.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            root: root.to_path_buf(),
            pool_dir,
            ino_index: Arc::new(Mutex::new(None)),
        })
    }

    fn abs(&self, path: &str) -> PathBuf {
        if path.is_empty() {
            self.root.clone()
        } else {
            self.root.join(path)
        }
    }

    fn pool_path(&self, ident: &str) -> PathBuf {
        if ident.len() > 2 {
            self.pool_dir.join(&ident[..2]).join(&ident[2..])
        } else {
            self.pool_dir.join(ident)
        }
    }

    /// Walk the pool once and map each entry's inode to its identifier
    fn scan_pool(&self) -> FsResult<HashMap<u64, String>> {
        let mut index = HashMap::new();
        let prefixes = match fs::read_dir(&self.pool_dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(index),
            Err(e) => {
                return Err(FsError::ListFailed {
                    path: self.pool_dir.display().to_string(),
                    reason: e.to_string(),
                })
            }
        };

        for prefix in prefixes {
            let prefix = prefix.map_err(|e| FsError::ListFailed {
                path: self.pool_dir.display().to_string(),
                reason: e.to_string(),
            })?;
            if !prefix.path().is_dir() {
                continue;
            }
            let prefix_name = prefix.file_name().to_string_lossy().into_owned();

            let entries = fs::read_dir(prefix.path()).map_err(|e| FsError::ListFailed {
                path: prefix.path().display().to_string(),
                reason: e.to_string(),
            })?;
            for entry in entries {
                let entry = entry.map_err(|e| FsError::ListFailed {
                    path: prefix.path().display().to_string(),
                    reason: e.to_string(),
                })?;
                let name = entry.file_name().to_string_lossy().into_owned();
                if name.ends_with(STAGE_SUFFIX) {
                    continue;
                }
                let meta = entry.metadata().map_err(|e| FsError::StatFailed {
                    path: entry.path().display().to_string(),
                    reason: e.to_string(),
                })?;
                index.insert(meta.ino(), format!("{prefix_name}{name}"));
            }
        }
        Ok(index)
    }

    /// Fingerprint recorded for an inode, recovered from the pool index
    fn recorded_fingerprint(&self, ino: u64) -> FsResult<Option<Fingerprint>> {
        let mut guard = self.ino_index.lock();
        if guard.is_none() {
            *guard = Some(self.scan_pool()?);
        }
        let index = guard.as_ref().expect("index built above");
        Ok(index
            .get(&ino)
            .and_then(|ident| ident.get(..FINGERPRINT_HEX_LEN))
            .and_then(Fingerprint::from_hex))
    }
}

impl FileSystem for PoolFs {
    fn list_dir(&self, dir: &str) -> FsResult<Vec<String>> {
        let abs = self.abs(dir);
        let entries = fs::read_dir(&abs).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => FsError::NotFound {
                path: dir.to_string(),
            },
            std::io::ErrorKind::PermissionDenied => FsError::PermissionDenied {
                path: dir.to_string(),
            },
            _ => FsError::ListFailed {
                path: dir.to_string(),
                reason: e.to_string(),
            },
        })?;

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| FsError::ListFailed {
                path: dir.to_string(),
                reason: e.to_string(),
            })?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if dir.is_empty() && name == POOL_DIR_NAME {
                continue;
            }
            names.push(name);
        }
        Ok(names)
    }

    fn stat(&self, path: &str, want_hash: bool) -> FsResult<FileAttrs> {
        let abs = self.abs(path);
        let meta = fs::symlink_metadata(&abs).map_err(|e| FsError::from_io(&e, path))?;

        let symlink = if meta.file_type().is_symlink() {
            let target = fs::read_link(&abs).map_err(|e| FsError::StatFailed {
                path: path.to_string(),
                reason: e.to_string(),
            })?;
            Some(target.to_string_lossy().into_owned())
        } else {
            None
        };

        let fingerprint = if want_hash && meta.is_file() {
            self.recorded_fingerprint(meta.ino())?
        } else {
            None
        };

        Ok(FileAttrs {
            version: ATTR_VERSION,
            size: meta.len(),
            mode: meta.mode(),
            uid: meta.uid(),
            gid: meta.gid(),
            inode: meta.ino(),
            fingerprint,
            symlink,
            name: Some(path.to_string()),
        })
    }

    fn identifier(&self, attrs: &FileAttrs) -> String {
        pool_identifier(attrs)
    }

    fn open_read(&self, ident: &str) -> FsResult<Box<dyn Read + Send>> {
        let file = File::open(self.pool_path(ident)).map_err(|e| FsError::ReadFailed {
            ident: ident.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Box::new(file))
    }

    fn open_write(&self, ident: &str) -> FsResult<Box<dyn WriteHandle>> {
        let target = self.pool_path(ident);
        let mut stage = target.clone();
        let mut stage_name = stage
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        stage_name.push_str(STAGE_SUFFIX);
        stage.set_file_name(stage_name);

        if let Some(parent) = stage.parent() {
            fs::create_dir_all(parent).map_err(|e| FsError::WriteFailed {
                ident: ident.to_string(),
                reason: e.to_string(),
            })?;
        }
        let file = File::create(&stage).map_err(|e| FsError::WriteFailed {
            ident: ident.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Box::new(PoolWriter {
            file,
            stage,
            target,
            ident: ident.to_string(),
            ino_index: Arc::clone(&self.ino_index),
        }))
    }

    fn mkdir(&self, path: &str, attrs: &FileAttrs) -> FsResult<()> {
        fs::create_dir(self.abs(path)).map_err(|e| {
            if e.kind() == std::io::ErrorKind::AlreadyExists {
                FsError::AlreadyExists {
                    path: path.to_string(),
                }
            } else {
                FsError::CreateFailed {
                    path: path.to_string(),
                    reason: e.to_string(),
                }
            }
        })?;
        self.set_meta(path, attrs)
    }

    fn set_meta(&self, path: &str, attrs: &FileAttrs) -> FsResult<()> {
        let abs = self.abs(path);
        fs::set_permissions(&abs, fs::Permissions::from_mode(attrs.mode & 0o7777)).map_err(
            |e| FsError::SetMetaFailed {
                path: path.to_string(),
                reason: e.to_string(),
            },
        )?;
        std::os::unix::fs::chown(&abs, Some(attrs.uid), Some(attrs.gid)).map_err(|e| {
            FsError::SetMetaFailed {
                path: path.to_string(),
                reason: e.to_string(),
            }
        })
    }

    fn rmdir(&self, path: &str) -> FsResult<()> {
        fs::remove_dir(self.abs(path)).map_err(|e| FsError::RemoveFailed {
            path: path.to_string(),
            reason: e.to_string(),
        })
    }

    fn unlink(&self, path: &str) -> FsResult<()> {
        fs::remove_file(self.abs(path)).map_err(|e| FsError::RemoveFailed {
            path: path.to_string(),
            reason: e.to_string(),
        })
    }

    fn symlink(&self, path: &str, target: &str, attrs: &FileAttrs) -> FsResult<()> {
        let abs = self.abs(path);
        match fs::remove_file(&abs) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(FsError::SymlinkFailed {
                    path: path.to_string(),
                    target: target.to_string(),
                    reason: e.to_string(),
                })
            }
        }
        std::os::unix::fs::symlink(target, &abs).map_err(|e| FsError::SymlinkFailed {
            path: path.to_string(),
            target: target.to_string(),
            reason: e.to_string(),
        })?;
        std::os::unix::fs::lchown(&abs, Some(attrs.uid), Some(attrs.gid)).map_err(|e| {
            FsError::SymlinkFailed {
                path: path.to_string(),
                target: target.to_string(),
                reason: e.to_string(),
            }
        })
    }

    fn touch(&self, attrs: &FileAttrs) -> FsResult<bool> {
        let ident = self.identifier(attrs);
        let path = self.pool_path(&ident);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| FsError::CreateFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        }

        let file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => {
                return Err(FsError::CreateFailed {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })
            }
        };

        // The entry carries the file's metadata; hardlinks share it and
        // commit() copies it onto rewritten bytes
        file.set_permissions(fs::Permissions::from_mode(attrs.mode & 0o7777))
            .map_err(|e| FsError::CreateFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        std::os::unix::fs::chown(&path, Some(attrs.uid), Some(attrs.gid)).map_err(|e| {
            FsError::CreateFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            }
        })?;

        let ino = file
            .metadata()
            .map_err(|e| FsError::StatFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?
            .ino();
        if let Some(index) = self.ino_index.lock().as_mut() {
            index.insert(ino, ident);
        }
        Ok(true)
    }

    fn link(&self, path: &str, ident: &str) -> FsResult<()> {
        let target = self.abs(path);
        let entry = self.pool_path(ident);

        if let (Ok(t), Ok(e)) = (fs::symlink_metadata(&target), fs::metadata(&entry)) {
            if t.ino() == e.ino() {
                return Ok(());
            }
        }

        // Link to a temporary name, then rename: replacing a stale link
        // must be atomic for readers of the user path
        let file_name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| FsError::LinkFailed {
                path: path.to_string(),
                ident: ident.to_string(),
                reason: "path has no file name".to_string(),
            })?;
        let tmp = target.with_file_name(format!(".{file_name}.lnk"));
        let _ = fs::remove_file(&tmp);

        fs::hard_link(&entry, &tmp).map_err(|e| FsError::LinkFailed {
            path: path.to_string(),
            ident: ident.to_string(),
            reason: e.to_string(),
        })?;
        fs::rename(&tmp, &target).map_err(|e| FsError::LinkFailed {
            path: path.to_string(),
            ident: ident.to_string(),
            reason: e.to_string(),
        })
    }

    fn is_hash_consistent(&self, attrs: &FileAttrs) -> FsResult<bool> {
        let Some(expect) = attrs.fingerprint else {
            return Ok(false);
        };
        let ident = self.identifier(attrs);
        let mut file = match File::open(self.pool_path(&ident)) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => {
                return Err(FsError::ReadFailed {
                    ident,
                    reason: e.to_string(),
                })
            }
        };
        let actual = Fingerprint::from_reader(&mut file).map_err(|e| FsError::ReadFailed {
            ident,
            reason: e.to_string(),
        })?;
        Ok(actual == expect)
    }

    fn garbage_collect(&self) -> FsResult<u64> {
        let mut reclaimed = 0u64;
        let prefixes = match fs::read_dir(&self.pool_dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(FsError::ListFailed {
                    path: self.pool_dir.display().to_string(),
                    reason: e.to_string(),
                })
            }
        };

        for prefix in prefixes.flatten() {
            if !prefix.path().is_dir() {
                continue;
            }
            let entries = fs::read_dir(prefix.path()).map_err(|e| FsError::ListFailed {
                path: prefix.path().display().to_string(),
                reason: e.to_string(),
            })?;
            for entry in entries.flatten() {
                let meta = match entry.metadata() {
                    Ok(meta) => meta,
                    Err(_) => continue,
                };
                // nlink == 1 means only the pool itself holds the entry
                if meta.nlink() == 1 {
                    fs::remove_file(entry.path()).map_err(|e| FsError::RemoveFailed {
                        path: entry.path().display().to_string(),
                        reason: e.to_string(),
                    })?;
                    reclaimed += 1;
                }
            }
        }

        *self.ino_index.lock() = None;
        Ok(reclaimed)
    }
}

/// Staged writer for one pool entry
struct PoolWriter {
    file: File,
    stage: PathBuf,
    target: PathBuf,
    ident: String,
    ino_index: InoIndex,
}

impl Write for PoolWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}

impl WriteHandle for PoolWriter {
    fn commit(self: Box<Self>) -> FsResult<()> {
        let PoolWriter {
            mut file,
            stage,
            target,
            ident,
            ino_index,
        } = *self;

        file.flush().map_err(|e| FsError::WriteFailed {
            ident: ident.clone(),
            reason: e.to_string(),
        })?;
        drop(file);

        // Carry over the metadata touch() put on the entry; the rename
        // below would otherwise replace it with the staging default
        if let Ok(meta) = fs::metadata(&target) {
            fs::set_permissions(&stage, meta.permissions()).map_err(|e| {
                FsError::WriteFailed {
                    ident: ident.clone(),
                    reason: e.to_string(),
                }
            })?;
            std::os::unix::fs::chown(&stage, Some(meta.uid()), Some(meta.gid())).map_err(
                |e| FsError::WriteFailed {
                    ident: ident.clone(),
                    reason: e.to_string(),
                },
            )?;
        }

        fs::rename(&stage, &target).map_err(|e| FsError::WriteFailed {
            ident: ident.clone(),
            reason: e.to_string(),
        })?;

        if let Ok(meta) = fs::metadata(&target) {
            if let Some(index) = ino_index.lock().as_mut() {
                index.insert(meta.ino(), ident);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::FileKind;
    use tempfile::TempDir;

    fn attrs_for(data: &[u8], mode: u32) -> FileAttrs {
        FileAttrs {
            version: ATTR_VERSION,
            size: data.len() as u64,
            mode,
            uid: current_uid(),
            gid: current_gid(),
            inode: 0,
            fingerprint: Some(Fingerprint::from_bytes(data)),
            symlink: None,
            name: Some("a".into()),
        }
    }

    fn current_uid() -> u32 {
        fs::metadata("/proc/self").map(|m| m.uid()).unwrap_or(0)
    }

    fn current_gid() -> u32 {
        fs::metadata("/proc/self").map(|m| m.gid()).unwrap_or(0)
    }

    fn write_entry(pool: &PoolFs, ident: &str, data: &[u8]) {
        let mut w = pool.open_write(ident).unwrap();
        w.write_all(data).unwrap();
        w.commit().unwrap();
    }

    #[test]
    fn test_touch_is_create_once() {
        let dir = TempDir::new().unwrap();
        let pool = PoolFs::new(dir.path()).unwrap();
        let attrs = attrs_for(b"hello", 0o100644);

        assert!(pool.touch(&attrs).unwrap());
        assert!(!pool.touch(&attrs).unwrap());
    }

    #[test]
    fn test_write_and_link() {
        let dir = TempDir::new().unwrap();
        let pool = PoolFs::new(dir.path()).unwrap();
        let attrs = attrs_for(b"hello", 0o100644);
        let ident = pool.identifier(&attrs);

        pool.touch(&attrs).unwrap();
        write_entry(&pool, &ident, b"hello");
        pool.link("a", &ident).unwrap();

        assert_eq!(fs::read(dir.path().join("a")).unwrap(), b"hello");

        // Linking again is idempotent
        pool.link("a", &ident).unwrap();

        // Second path shares the inode
        pool.link("b", &ident).unwrap();
        let ia = fs::metadata(dir.path().join("a")).unwrap().ino();
        let ib = fs::metadata(dir.path().join("b")).unwrap().ino();
        assert_eq!(ia, ib);
    }

    #[test]
    fn test_link_replaces_stale_target() {
        let dir = TempDir::new().unwrap();
        let pool = PoolFs::new(dir.path()).unwrap();

        fs::write(dir.path().join("a"), b"old").unwrap();

        let attrs = attrs_for(b"new", 0o100644);
        let ident = pool.identifier(&attrs);
        pool.touch(&attrs).unwrap();
        write_entry(&pool, &ident, b"new");
        pool.link("a", &ident).unwrap();

        assert_eq!(fs::read(dir.path().join("a")).unwrap(), b"new");
    }

    #[test]
    fn test_stat_recovers_recorded_fingerprint() {
        let dir = TempDir::new().unwrap();
        let pool = PoolFs::new(dir.path()).unwrap();
        let fp = Fingerprint::from_bytes(b"hello");
        let attrs = attrs_for(b"hello", 0o100644);
        let ident = pool.identifier(&attrs);

        pool.touch(&attrs).unwrap();
        write_entry(&pool, &ident, b"hello");
        pool.link("a", &ident).unwrap();

        let got = pool.stat("a", true).unwrap();
        assert_eq!(got.kind(), FileKind::File);
        assert_eq!(got.fingerprint, Some(fp));

        // Without hash the fingerprint is not recovered
        let got = pool.stat("a", false).unwrap();
        assert!(got.fingerprint.is_none());
    }

    #[test]
    fn test_is_hash_consistent_detects_drift() {
        let dir = TempDir::new().unwrap();
        let pool = PoolFs::new(dir.path()).unwrap();
        let attrs = attrs_for(b"hello", 0o100644);
        let ident = pool.identifier(&attrs);

        assert!(!pool.is_hash_consistent(&attrs).unwrap());

        pool.touch(&attrs).unwrap();
        write_entry(&pool, &ident, b"hello");
        assert!(pool.is_hash_consistent(&attrs).unwrap());

        // Clobber the pool entry behind the synchronizer's back
        fs::write(pool.pool_path(&ident), b"HELLO").unwrap();
        assert!(!pool.is_hash_consistent(&attrs).unwrap());
    }

    #[test]
    fn test_list_dir_hides_pool() {
        let dir = TempDir::new().unwrap();
        let pool = PoolFs::new(dir.path()).unwrap();
        fs::write(dir.path().join("visible"), b"x").unwrap();

        let names = pool.list_dir("").unwrap();
        assert_eq!(names, vec!["visible"]);
    }

    #[test]
    fn test_garbage_collect_reclaims_unlinked_entries() {
        let dir = TempDir::new().unwrap();
        let pool = PoolFs::new(dir.path()).unwrap();

        let kept = attrs_for(b"kept", 0o100644);
        let kept_ident = pool.identifier(&kept);
        pool.touch(&kept).unwrap();
        write_entry(&pool, &kept_ident, b"kept");
        pool.link("kept", &kept_ident).unwrap();

        let orphan = attrs_for(b"orphan", 0o100644);
        pool.touch(&orphan).unwrap();

        assert_eq!(pool.garbage_collect().unwrap(), 1);
        assert!(pool.is_hash_consistent(&kept).unwrap());
        assert!(!pool.is_hash_consistent(&orphan).unwrap());
    }

    #[test]
    fn test_mkdir_reports_existing() {
        let dir = TempDir::new().unwrap();
        let pool = PoolFs::new(dir.path()).unwrap();
        let mut attrs = attrs_for(b"", 0o040755);
        attrs.fingerprint = None;

        pool.mkdir("d", &attrs).unwrap();
        assert!(matches!(
            pool.mkdir("d", &attrs),
            Err(FsError::AlreadyExists { .. })
        ));
    }
}
