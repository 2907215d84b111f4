//! Filesystem mutation events.
//!
//! Events are the only writes the system makes: observation (scan, watch)
//! and reconciliation all funnel into this closed set of variants, which the
//! projector chain folds into the derived tables. Variants are matched
//! exhaustively; adding one is a compile-time visible change.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::path::TreePath;

/// Provenance of an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventOrigin {
    /// From a full initial scan.
    Initial,
    /// From the live watcher.
    RealTime,
    /// Synthesized by the reconciler to correct drift.
    Reconciled,
}

impl EventOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventOrigin::Initial => "initial",
            EventOrigin::RealTime => "real-time",
            EventOrigin::Reconciled => "reconciled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "initial" => Some(EventOrigin::Initial),
            "real-time" => Some(EventOrigin::RealTime),
            "reconciled" => Some(EventOrigin::Reconciled),
            _ => None,
        }
    }
}

impl fmt::Display for EventOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether an event concerns a file or a directory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::File => "file",
            EntryKind::Directory => "directory",
        }
    }
}

/// A single recorded filesystem mutation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FileSystemEvent {
    FileCreated {
        path: TreePath,
        origin: EventOrigin,
        hash: Option<String>,
        modified_at: Option<DateTime<Utc>>,
        size: Option<u64>,
    },
    FileModified {
        path: TreePath,
        origin: EventOrigin,
        hash: Option<String>,
        modified_at: Option<DateTime<Utc>>,
        size: Option<u64>,
        previous_hash: Option<String>,
    },
    FileDeleted {
        path: TreePath,
        origin: EventOrigin,
    },
    FileRenamed {
        path: TreePath,
        old_path: TreePath,
        origin: EventOrigin,
        hash: Option<String>,
        modified_at: Option<DateTime<Utc>>,
        size: Option<u64>,
    },
    DirectoryCreated {
        path: TreePath,
        origin: EventOrigin,
    },
    DirectoryDeleted {
        path: TreePath,
        origin: EventOrigin,
    },
    DirectoryRenamed {
        path: TreePath,
        old_path: TreePath,
        origin: EventOrigin,
    },
}

impl FileSystemEvent {
    /// Stable tag used as the `event_type` column and in log output.
    pub fn type_name(&self) -> &'static str {
        match self {
            FileSystemEvent::FileCreated { .. } => "file_created",
            FileSystemEvent::FileModified { .. } => "file_modified",
            FileSystemEvent::FileDeleted { .. } => "file_deleted",
            FileSystemEvent::FileRenamed { .. } => "file_renamed",
            FileSystemEvent::DirectoryCreated { .. } => "directory_created",
            FileSystemEvent::DirectoryDeleted { .. } => "directory_deleted",
            FileSystemEvent::DirectoryRenamed { .. } => "directory_renamed",
        }
    }

    pub fn path(&self) -> &TreePath {
        match self {
            FileSystemEvent::FileCreated { path, .. }
            | FileSystemEvent::FileModified { path, .. }
            | FileSystemEvent::FileDeleted { path, .. }
            | FileSystemEvent::FileRenamed { path, .. }
            | FileSystemEvent::DirectoryCreated { path, .. }
            | FileSystemEvent::DirectoryDeleted { path, .. }
            | FileSystemEvent::DirectoryRenamed { path, .. } => path,
        }
    }

    pub fn origin(&self) -> EventOrigin {
        match self {
            FileSystemEvent::FileCreated { origin, .. }
            | FileSystemEvent::FileModified { origin, .. }
            | FileSystemEvent::FileDeleted { origin, .. }
            | FileSystemEvent::FileRenamed { origin, .. }
            | FileSystemEvent::DirectoryCreated { origin, .. }
            | FileSystemEvent::DirectoryDeleted { origin, .. }
            | FileSystemEvent::DirectoryRenamed { origin, .. } => *origin,
        }
    }

    pub fn entry_kind(&self) -> EntryKind {
        match self {
            FileSystemEvent::FileCreated { .. }
            | FileSystemEvent::FileModified { .. }
            | FileSystemEvent::FileDeleted { .. }
            | FileSystemEvent::FileRenamed { .. } => EntryKind::File,
            FileSystemEvent::DirectoryCreated { .. }
            | FileSystemEvent::DirectoryDeleted { .. }
            | FileSystemEvent::DirectoryRenamed { .. } => EntryKind::Directory,
        }
    }

    pub fn is_deletion(&self) -> bool {
        matches!(
            self,
            FileSystemEvent::FileDeleted { .. } | FileSystemEvent::DirectoryDeleted { .. }
        )
    }

    pub fn hash(&self) -> Option<&str> {
        match self {
            FileSystemEvent::FileCreated { hash, .. }
            | FileSystemEvent::FileModified { hash, .. }
            | FileSystemEvent::FileRenamed { hash, .. } => hash.as_deref(),
            _ => None,
        }
    }

    pub fn previous_hash(&self) -> Option<&str> {
        match self {
            FileSystemEvent::FileModified { previous_hash, .. } => previous_hash.as_deref(),
            _ => None,
        }
    }

    pub fn old_path(&self) -> Option<&TreePath> {
        match self {
            FileSystemEvent::FileRenamed { old_path, .. }
            | FileSystemEvent::DirectoryRenamed { old_path, .. } => Some(old_path),
            _ => None,
        }
    }

    pub fn modified_at(&self) -> Option<DateTime<Utc>> {
        match self {
            FileSystemEvent::FileCreated { modified_at, .. }
            | FileSystemEvent::FileModified { modified_at, .. }
            | FileSystemEvent::FileRenamed { modified_at, .. } => *modified_at,
            _ => None,
        }
    }

    pub fn size(&self) -> Option<u64> {
        match self {
            FileSystemEvent::FileCreated { size, .. }
            | FileSystemEvent::FileModified { size, .. }
            | FileSystemEvent::FileRenamed { size, .. } => *size,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(raw: &str) -> TreePath {
        TreePath::new(raw).unwrap()
    }

    #[test]
    fn origin_round_trips_through_strings() {
        for origin in [
            EventOrigin::Initial,
            EventOrigin::RealTime,
            EventOrigin::Reconciled,
        ] {
            assert_eq!(EventOrigin::parse(origin.as_str()), Some(origin));
        }
        assert_eq!(EventOrigin::parse("bogus"), None);
    }

    #[test]
    fn common_accessors_cover_every_variant() {
        let created = FileSystemEvent::FileCreated {
            path: path("a/b.txt"),
            origin: EventOrigin::Initial,
            hash: Some("abc".into()),
            modified_at: None,
            size: Some(12),
        };
        assert_eq!(created.type_name(), "file_created");
        assert_eq!(created.entry_kind(), EntryKind::File);
        assert_eq!(created.hash(), Some("abc"));
        assert_eq!(created.size(), Some(12));
        assert!(!created.is_deletion());

        let deleted = FileSystemEvent::DirectoryDeleted {
            path: path("a"),
            origin: EventOrigin::Reconciled,
        };
        assert_eq!(deleted.entry_kind(), EntryKind::Directory);
        assert!(deleted.is_deletion());
        assert_eq!(deleted.hash(), None);
    }

    #[test]
    fn renames_expose_the_old_path() {
        let renamed = FileSystemEvent::FileRenamed {
            path: path("a/new.txt"),
            old_path: path("a/old.txt"),
            origin: EventOrigin::RealTime,
            hash: None,
            modified_at: None,
            size: None,
        };
        assert_eq!(renamed.old_path().unwrap().as_str(), "a/old.txt");
    }
}
