//! Filesystem entry attributes and the source/destination comparator
//!
//! `FileAttrs` is the unit of comparison between the two sides of a
//! synchronization: the logical stat of an entry plus, for regular
//! files, its content fingerprint. Extended attributes are not part of
//! the record and are never compared.

use crate::content::Fingerprint;
use crate::fs::FileSystem;

/// Version of the attribute record itself
pub const ATTR_VERSION: u32 = 1;

/// File-type bits of a Unix mode
pub(crate) const S_IFMT: u32 = 0o170000;

/// Type of filesystem entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    /// Regular file
    File,
    /// Directory
    Dir,
    /// Symbolic link
    Symlink,
    /// Block device
    BlockDevice,
    /// Character device
    CharDevice,
    /// Named pipe (FIFO)
    Fifo,
    /// Unix socket
    Socket,
    /// Unknown type
    Unknown,
}

impl FileKind {
    /// Derive the kind from mode bits
    pub fn from_mode(mode: u32) -> Self {
        match mode & S_IFMT {
            0o100000 => FileKind::File,
            0o040000 => FileKind::Dir,
            0o120000 => FileKind::Symlink,
            0o060000 => FileKind::BlockDevice,
            0o020000 => FileKind::CharDevice,
            0o010000 => FileKind::Fifo,
            0o140000 => FileKind::Socket,
            _ => FileKind::Unknown,
        }
    }

    /// Check if this is a regular file
    pub fn is_file(&self) -> bool {
        *self == FileKind::File
    }

    /// Check if this is a directory
    pub fn is_dir(&self) -> bool {
        *self == FileKind::Dir
    }

    /// Check if this is a symbolic link
    pub fn is_symlink(&self) -> bool {
        *self == FileKind::Symlink
    }
}

/// Logical attributes of one filesystem entry
#[derive(Debug, Clone)]
pub struct FileAttrs {
    /// Version of this record
    pub version: u32,

    /// Size in bytes
    pub size: u64,

    /// Mode (type + permission bits)
    pub mode: u32,

    /// Owner user id
    pub uid: u32,

    /// Owner group id
    pub gid: u32,

    /// Inode number in the backing filesystem
    pub inode: u64,

    /// Content fingerprint (regular files, when requested)
    pub fingerprint: Option<Fingerprint>,

    /// Symlink target (symlinks only)
    pub symlink: Option<String>,

    /// Logical name of the entry (its path within the tree)
    pub name: Option<String>,
}

impl FileAttrs {
    /// Kind derived from the mode bits
    pub fn kind(&self) -> FileKind {
        FileKind::from_mode(self.mode)
    }
}

/// Derive the pool identifier both reference destinations use:
/// `<content-fingerprint-hex>-<metadata-digest-hex>`.
///
/// The metadata digest covers mode, uid and gid, so the same bytes with
/// different ownership or permissions occupy distinct pool entries.
pub fn pool_identifier(attrs: &FileAttrs) -> String {
    let fp_hex = match &attrs.fingerprint {
        Some(fp) => fp.to_hex(),
        // Entries without a fingerprint cannot collide with real content
        None => "0".repeat(crate::content::FINGERPRINT_HEX_LEN),
    };

    let mut hasher = blake3::Hasher::new();
    hasher.update(&attrs.mode.to_le_bytes());
    hasher.update(&attrs.uid.to_le_bytes());
    hasher.update(&attrs.gid.to_le_bytes());
    let digest = hasher.finalize();
    let meta = &digest.as_bytes()[..8];

    let mut ident = fp_hex;
    ident.push('-');
    for b in meta {
        ident.push_str(&format!("{b:02x}"));
    }
    ident
}

/// Equality predicate between a source entry and a destination entry.
///
/// Two entries agree when version, size, type, permissions, ownership,
/// content fingerprint and logical name all line up. When the
/// destination has no recorded fingerprint, the destination backend is
/// asked to confirm that the pool entry for the source's fingerprint is
/// hash-consistent instead.
pub fn attrs_equal(src: &FileAttrs, dst: &FileAttrs, dst_fs: &dyn FileSystem) -> bool {
    if src.version != dst.version || src.size != dst.size {
        return false;
    }

    if (src.mode & S_IFMT) != (dst.mode & S_IFMT) {
        return false;
    }
    let kind = src.kind();
    if !kind.is_symlink() && src.mode != dst.mode {
        return false;
    }

    if !kind.is_symlink() && (src.uid != dst.uid || src.gid != dst.gid) {
        return false;
    }

    if kind.is_file() {
        if let Some(src_fp) = &src.fingerprint {
            match &dst.fingerprint {
                Some(dst_fp) => {
                    if dst_fp != src_fp {
                        return false;
                    }
                }
                None => {
                    if !matches!(dst_fs.is_hash_consistent(src), Ok(true)) {
                        return false;
                    }
                }
            }
        }
    }

    if kind.is_symlink() && src.symlink != dst.symlink {
        return false;
    }

    // Logical names must agree in nullity and value
    src.name == dst.name
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemoryFs;

    fn file_attrs(size: u64, mode: u32, data: &[u8]) -> FileAttrs {
        FileAttrs {
            version: ATTR_VERSION,
            size,
            mode,
            uid: 0,
            gid: 0,
            inode: 1,
            fingerprint: Some(Fingerprint::from_bytes(data)),
            symlink: None,
            name: Some("a".into()),
        }
    }

    #[test]
    fn test_kind_from_mode() {
        assert_eq!(FileKind::from_mode(0o100644), FileKind::File);
        assert_eq!(FileKind::from_mode(0o040755), FileKind::Dir);
        assert_eq!(FileKind::from_mode(0o120777), FileKind::Symlink);
        assert_eq!(FileKind::from_mode(0o010644), FileKind::Fifo);
        assert_eq!(FileKind::from_mode(0), FileKind::Unknown);
    }

    #[test]
    fn test_pool_identifier_separates_metadata() {
        let a = file_attrs(5, 0o100644, b"hello");
        let mut b = a.clone();
        b.mode = 0o100755;

        assert_ne!(pool_identifier(&a), pool_identifier(&b));

        let c = a.clone();
        assert_eq!(pool_identifier(&a), pool_identifier(&c));
    }

    #[test]
    fn test_attrs_equal_matching_files() {
        let dst_fs = MemoryFs::new();
        let a = file_attrs(5, 0o100644, b"hello");
        let b = a.clone();
        assert!(attrs_equal(&a, &b, &dst_fs));
    }

    #[test]
    fn test_attrs_equal_rejects_size_and_mode() {
        let dst_fs = MemoryFs::new();
        let a = file_attrs(5, 0o100644, b"hello");

        let mut b = a.clone();
        b.size = 6;
        assert!(!attrs_equal(&a, &b, &dst_fs));

        let mut b = a.clone();
        b.mode = 0o100600;
        assert!(!attrs_equal(&a, &b, &dst_fs));

        let mut b = a.clone();
        b.mode = 0o040644;
        assert!(!attrs_equal(&a, &b, &dst_fs));
    }

    #[test]
    fn test_attrs_equal_rejects_fingerprint_mismatch() {
        let dst_fs = MemoryFs::new();
        let a = file_attrs(5, 0o100644, b"hello");
        let mut b = a.clone();
        b.fingerprint = Some(Fingerprint::from_bytes(b"HELLO"));
        assert!(!attrs_equal(&a, &b, &dst_fs));
    }

    #[test]
    fn test_attrs_equal_consults_backend_without_recorded_hash() {
        // Destination stat without hash: the backend must vouch for the
        // pool entry instead
        let dst_fs = MemoryFs::new();
        let a = file_attrs(5, 0o100644, b"hello");
        let mut b = a.clone();
        b.fingerprint = None;

        // No pool entry yet: not consistent
        assert!(!attrs_equal(&a, &b, &dst_fs));

        dst_fs.touch(&a).unwrap();
        let ident = dst_fs.identifier(&a);
        let mut w = dst_fs.open_write(&ident).unwrap();
        std::io::Write::write_all(&mut w, b"hello").unwrap();
        w.commit().unwrap();

        assert!(attrs_equal(&a, &b, &dst_fs));
    }

    #[test]
    fn test_attrs_equal_symlinks_compare_targets() {
        let dst_fs = MemoryFs::new();
        let mut a = file_attrs(3, 0o120777, b"");
        a.fingerprint = None;
        a.symlink = Some("tgt".into());
        let mut b = a.clone();
        assert!(attrs_equal(&a, &b, &dst_fs));

        b.symlink = Some("other".into());
        assert!(!attrs_equal(&a, &b, &dst_fs));
    }

    #[test]
    fn test_attrs_equal_name_nullity() {
        let dst_fs = MemoryFs::new();
        let a = file_attrs(5, 0o100644, b"hello");
        let mut b = a.clone();
        b.name = None;
        assert!(!attrs_equal(&a, &b, &dst_fs));
    }
}
