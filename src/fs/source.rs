//! Read-only source backend over a plain directory tree
//!
//! The source side of a synchronization only needs to be listed, stat'd
//! and read. `DirSource` serves a local directory: identifiers are the
//! entries' logical names (their paths relative to the root), and the
//! content fingerprint is computed on demand when a stat requests it.

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::content::Fingerprint;
use crate::error::{FsError, FsResult};
use crate::fs::types::{FileAttrs, ATTR_VERSION};
use crate::fs::FileSystem;

/// Read-only directory tree source
pub struct DirSource {
    root: PathBuf,
}

impl DirSource {
    /// Open a source rooted at an existing directory
    pub fn new(root: &Path) -> FsResult<Self> {
        let meta = fs::metadata(root).map_err(|e| FsError::from_io(&e, &root.display().to_string()))?;
        if !meta.is_dir() {
            return Err(FsError::NotFound {
                path: root.display().to_string(),
            });
        }
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    fn abs(&self, path: &str) -> PathBuf {
        if path.is_empty() {
            self.root.clone()
        } else {
            self.root.join(path)
        }
    }
}

impl FileSystem for DirSource {
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
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        Ok(names)
    }

    fn stat(&self, path: &str, want_hash: bool) -> FsResult<FileAttrs> {
        use std::os::unix::fs::MetadataExt;

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
            let mut file = File::open(&abs).map_err(|e| FsError::StatFailed {
                path: path.to_string(),
                reason: e.to_string(),
            })?;
            Some(
                Fingerprint::from_reader(&mut file).map_err(|e| FsError::StatFailed {
                    path: path.to_string(),
                    reason: e.to_string(),
                })?,
            )
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
        // Source files are addressed by their logical name
        attrs.name.clone().unwrap_or_default()
    }

    fn open_read(&self, ident: &str) -> FsResult<Box<dyn Read + Send>> {
        let file = File::open(self.abs(ident)).map_err(|e| FsError::ReadFailed {
            ident: ident.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Box::new(file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::FileKind;
    use tempfile::TempDir;

    #[test]
    fn test_list_and_stat() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let src = DirSource::new(dir.path()).unwrap();
        let mut names = src.list_dir("").unwrap();
        names.sort();
        assert_eq!(names, vec!["a.txt", "sub"]);

        let attrs = src.stat("a.txt", true).unwrap();
        assert_eq!(attrs.kind(), FileKind::File);
        assert_eq!(attrs.size, 5);
        assert_eq!(
            attrs.fingerprint,
            Some(Fingerprint::from_bytes(b"hello"))
        );
        assert_eq!(attrs.name.as_deref(), Some("a.txt"));

        let attrs = src.stat("sub", false).unwrap();
        assert_eq!(attrs.kind(), FileKind::Dir);
        assert!(attrs.fingerprint.is_none());
    }

    #[test]
    fn test_stat_without_hash_skips_fingerprint() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a"), b"x").unwrap();

        let src = DirSource::new(dir.path()).unwrap();
        let attrs = src.stat("a", false).unwrap();
        assert!(attrs.fingerprint.is_none());
    }

    #[test]
    fn test_symlink_target() {
        let dir = TempDir::new().unwrap();
        std::os::unix::fs::symlink("a.txt", dir.path().join("lnk")).unwrap();

        let src = DirSource::new(dir.path()).unwrap();
        let attrs = src.stat("lnk", true).unwrap();
        assert_eq!(attrs.kind(), FileKind::Symlink);
        assert_eq!(attrs.symlink.as_deref(), Some("a.txt"));
    }

    #[test]
    fn test_open_read_by_identifier() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("f"), b"data").unwrap();

        let src = DirSource::new(dir.path()).unwrap();
        let attrs = src.stat("f", true).unwrap();
        let ident = src.identifier(&attrs);
        assert_eq!(ident, "f");

        let mut buf = Vec::new();
        src.open_read(&ident).unwrap().read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"data");
    }

    #[test]
    fn test_mutations_unsupported() {
        let dir = TempDir::new().unwrap();
        let src = DirSource::new(dir.path()).unwrap();
        assert!(matches!(
            src.unlink("x"),
            Err(FsError::Unsupported { .. })
        ));
        assert!(matches!(
            src.garbage_collect(),
            Err(FsError::Unsupported { .. })
        ));
    }

    #[test]
    fn test_missing_root_rejected() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        assert!(DirSource::new(&missing).is_err());
    }
}
