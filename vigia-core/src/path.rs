//! Root-relative tree paths.
//!
//! Every event and projection row is keyed by a path relative to the watched
//! root, forward-slash separated. `TreePath` is the validation boundary:
//! input containing `..`, a leading separator, or a drive prefix never makes
//! it into an event.

use std::fmt;
use std::path::{Component, Path};

use serde::{Deserialize, Serialize};

use crate::error::{Result, VigiaError};

/// A validated path relative to the watched root.
///
/// Invariants: non-empty, forward-slash separated, no `.`/`..` segments,
/// no leading separator, no empty segments.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TreePath(String);

impl TreePath {
    pub fn new(raw: impl AsRef<str>) -> Result<Self> {
        let normalized = raw.as_ref().replace('\\', "/");

        if normalized.is_empty() {
            return Err(VigiaError::InvalidPath("empty path".into()));
        }
        if normalized.starts_with('/') {
            return Err(VigiaError::InvalidPath(format!(
                "absolute path not allowed: {normalized}"
            )));
        }
        for segment in normalized.split('/') {
            match segment {
                "" => {
                    return Err(VigiaError::InvalidPath(format!(
                        "empty segment in: {normalized}"
                    )));
                }
                "." | ".." => {
                    return Err(VigiaError::InvalidPath(format!(
                        "relative traversal not allowed: {normalized}"
                    )));
                }
                seg if seg.contains(':') => {
                    return Err(VigiaError::InvalidPath(format!(
                        "drive-qualified segment not allowed: {normalized}"
                    )));
                }
                _ => {}
            }
        }

        Ok(Self(normalized))
    }

    /// Strip `root` from an absolute filesystem path observed by the scanner
    /// or watcher and validate the remainder.
    pub fn from_absolute(root: &Path, absolute: &Path) -> Result<Self> {
        let rel = absolute.strip_prefix(root).map_err(|_| {
            VigiaError::InvalidPath(format!(
                "{} is outside the watched root {}",
                absolute.display(),
                root.display()
            ))
        })?;

        let mut parts = Vec::new();
        for component in rel.components() {
            match component {
                Component::Normal(seg) => parts.push(seg.to_string_lossy().into_owned()),
                Component::CurDir => {}
                _ => {
                    return Err(VigiaError::InvalidPath(format!(
                        "unsupported component in: {}",
                        absolute.display()
                    )));
                }
            }
        }

        Self::new(parts.join("/"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Basename (final segment).
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Number of separators; 0 for root-level entries.
    pub fn depth(&self) -> u32 {
        self.0.matches('/').count() as u32
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    /// Full containing path, `None` at root level.
    pub fn parent_path(&self) -> Option<&str> {
        self.0.rsplit_once('/').map(|(parent, _)| parent)
    }

    /// Immediate containing folder name, `None` at root level.
    pub fn parent_name(&self) -> Option<&str> {
        self.parent_path()
            .map(|parent| parent.rsplit('/').next().unwrap_or(parent))
    }

    /// True when `self` is `dir` itself or lives somewhere below it.
    pub fn starts_with_dir(&self, dir: &str) -> bool {
        self.0 == dir || self.0.starts_with(&format!("{dir}/"))
    }
}

impl fmt::Display for TreePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for TreePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TreePath({})", self.0)
    }
}

impl TryFrom<String> for TreePath {
    type Error = VigiaError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<TreePath> for String {
    fn from(path: TreePath) -> Self {
        path.0
    }
}

impl AsRef<str> for TreePath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn accepts_plain_relative_paths() {
        let path = TreePath::new("MAIN-TYPE-1/SUB/PUMP_revA.par").unwrap();
        assert_eq!(path.as_str(), "MAIN-TYPE-1/SUB/PUMP_revA.par");
        assert_eq!(path.file_name(), "PUMP_revA.par");
        assert_eq!(path.depth(), 2);
        assert_eq!(path.parent_path(), Some("MAIN-TYPE-1/SUB"));
        assert_eq!(path.parent_name(), Some("SUB"));
    }

    #[test]
    fn normalizes_backslashes() {
        let path = TreePath::new(r"A\B\c.txt").unwrap();
        assert_eq!(path.as_str(), "A/B/c.txt");
    }

    #[test]
    fn rejects_traversal_and_absolute_input() {
        assert!(TreePath::new("../etc/passwd").is_err());
        assert!(TreePath::new("a/../b").is_err());
        assert!(TreePath::new("/etc/passwd").is_err());
        assert!(TreePath::new(r"C:\windows").is_err());
        assert!(TreePath::new("").is_err());
        assert!(TreePath::new("a//b").is_err());
    }

    #[test]
    fn root_level_entries_have_no_parent() {
        let path = TreePath::new("readme.txt").unwrap();
        assert_eq!(path.depth(), 0);
        assert_eq!(path.parent_path(), None);
        assert_eq!(path.parent_name(), None);
    }

    #[test]
    fn strips_the_watched_root() {
        let root = PathBuf::from("/srv/drawings");
        let abs = root.join("A/B/file.par");
        let path = TreePath::from_absolute(&root, &abs).unwrap();
        assert_eq!(path.as_str(), "A/B/file.par");

        assert!(TreePath::from_absolute(&root, Path::new("/srv/other/f")).is_err());
    }

    #[test]
    fn prefix_check_does_not_match_sibling_names() {
        let path = TreePath::new("A/BC/file.txt").unwrap();
        assert!(path.starts_with_dir("A"));
        assert!(path.starts_with_dir("A/BC"));
        assert!(!path.starts_with_dir("A/B"));
    }
}
