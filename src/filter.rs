//! Path filter for restricting which source entries are synchronized
//!
//! A `PathFilter` is a prefix tree over `/`-separated path components.
//! The default filter accepts every path and always defers directory
//! enumeration to the source backend. A filter parsed from an include
//! file restricts the walk to the listed paths: the walker asks the
//! filter for directory listings first and only falls back to the
//! backend below wildcard nodes.
//!
//! Include file grammar (one pattern per line):
//! - `dir/file`   include this entry and its ancestors
//! - `dir/*`      include everything below `dir` (enumeration from the
//!   filesystem)
//! - blank lines and lines starting with `#` are ignored

use std::collections::BTreeMap;
use std::path::Path;

use crate::error::ConfigError;

/// Result of asking the filter for a directory listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirListing {
    /// The filter enumerates exactly these children; the walker trusts
    /// the list verbatim and does not consult the backend
    Explicit(Vec<String>),

    /// The filter places no restriction here; enumerate via the backend
    ReadFs,
}

#[derive(Debug, Default)]
struct Node {
    children: BTreeMap<String, Node>,

    /// Everything below this node is included
    wildcard: bool,
}

impl Node {
    fn insert(&mut self, components: &[&str], wildcard: bool) {
        match components.split_first() {
            None => {
                if wildcard {
                    self.wildcard = true;
                }
            }
            Some((head, rest)) => {
                self.children
                    .entry((*head).to_string())
                    .or_default()
                    .insert(rest, wildcard);
            }
        }
    }
}

/// Prefix tree deciding which paths take part in the synchronization
#[derive(Debug)]
pub struct PathFilter {
    root: Node,
}

impl PathFilter {
    /// Filter that matches every path and defers all enumeration to the
    /// filesystem
    pub fn accept_all() -> Self {
        Self {
            root: Node {
                children: BTreeMap::new(),
                wildcard: true,
            },
        }
    }

    /// Parse a filter from include-file text
    pub fn parse(text: &str) -> Self {
        let mut root = Node::default();

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let line = line.trim_start_matches('/').trim_end_matches('/');
            let (path, wildcard) = match line.strip_suffix("/*") {
                Some(base) => (base, true),
                None => (line, line == "*"),
            };
            if path == "*" {
                root.wildcard = true;
                continue;
            }
            if path.is_empty() {
                continue;
            }

            let components: Vec<&str> = path.split('/').collect();
            root.insert(&components, wildcard);
        }

        Self { root }
    }

    /// Load a filter from an include file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text =
            std::fs::read_to_string(path).map_err(|e| ConfigError::InvalidFilterFile {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        Ok(Self::parse(&text))
    }

    fn lookup(&self, path: &str) -> Option<&Node> {
        let mut node = &self.root;
        if path.is_empty() {
            return Some(node);
        }
        for component in path.split('/') {
            if node.wildcard {
                return Some(node);
            }
            node = node.children.get(component)?;
        }
        Some(node)
    }

    /// Check whether a path is included in the walk
    pub fn is_match(&self, path: &str) -> bool {
        self.lookup(path).is_some()
    }

    /// List the included children of a directory
    ///
    /// Below a wildcard node enumeration falls back to the filesystem;
    /// elsewhere the explicitly listed children are returned, sorted.
    pub fn list_dir(&self, dir: &str) -> DirListing {
        match self.lookup(dir) {
            None => DirListing::Explicit(Vec::new()),
            Some(node) if node.wildcard => DirListing::ReadFs,
            Some(node) => DirListing::Explicit(node.children.keys().cloned().collect()),
        }
    }
}

/// Join a directory path and an entry name
///
/// The walk root is the empty string, so `join_path("", "a")` is `"a"`
/// and `join_path("a", "b")` is `"a/b"`.
pub fn join_path(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accept_all() {
        let filter = PathFilter::accept_all();
        assert!(filter.is_match(""));
        assert!(filter.is_match("a"));
        assert!(filter.is_match("deep/nested/path"));
        assert_eq!(filter.list_dir(""), DirListing::ReadFs);
        assert_eq!(filter.list_dir("any/dir"), DirListing::ReadFs);
    }

    #[test]
    fn test_explicit_paths() {
        let filter = PathFilter::parse("a/b\na/c\nd\n");

        assert!(filter.is_match("a"));
        assert!(filter.is_match("a/b"));
        assert!(filter.is_match("a/c"));
        assert!(filter.is_match("d"));
        assert!(!filter.is_match("a/x"));
        assert!(!filter.is_match("e"));
        assert!(!filter.is_match("a/b/below"));

        assert_eq!(
            filter.list_dir(""),
            DirListing::Explicit(vec!["a".into(), "d".into()])
        );
        assert_eq!(
            filter.list_dir("a"),
            DirListing::Explicit(vec!["b".into(), "c".into()])
        );
        assert_eq!(filter.list_dir("a/b"), DirListing::Explicit(Vec::new()));
    }

    #[test]
    fn test_wildcard_subtree() {
        let filter = PathFilter::parse("sw/pkg/*\n");

        assert!(filter.is_match("sw"));
        assert!(filter.is_match("sw/pkg"));
        assert!(filter.is_match("sw/pkg/anything/below"));
        assert!(!filter.is_match("sw/other"));

        assert_eq!(
            filter.list_dir("sw"),
            DirListing::Explicit(vec!["pkg".into()])
        );
        assert_eq!(filter.list_dir("sw/pkg"), DirListing::ReadFs);
        assert_eq!(filter.list_dir("sw/pkg/deep"), DirListing::ReadFs);
    }

    #[test]
    fn test_comments_and_blank_lines() {
        let filter = PathFilter::parse("# include list\n\na\n");
        assert!(filter.is_match("a"));
        assert!(!filter.is_match("#"));
    }

    #[test]
    fn test_global_wildcard_line() {
        let filter = PathFilter::parse("*\n");
        assert!(filter.is_match("anything"));
        assert_eq!(filter.list_dir("x/y"), DirListing::ReadFs);
    }

    #[test]
    fn test_unmatched_directory_lists_empty() {
        let filter = PathFilter::parse("a/b\n");
        assert_eq!(filter.list_dir("z"), DirListing::Explicit(Vec::new()));
    }

    #[test]
    fn test_join_path() {
        assert_eq!(join_path("", "a"), "a");
        assert_eq!(join_path("a", "b"), "a/b");
        assert_eq!(join_path("a/b", "c"), "a/b/c");
    }
}
