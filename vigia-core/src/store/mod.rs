//! Storage ports.
//!
//! The event log and the three derived tables are consumed through traits so
//! the projector chain, watcher, and reconciler stay storage-agnostic. The
//! Postgres implementations back the CLI; the in-memory implementations back
//! tests and ad-hoc tooling.

use std::collections::HashMap;
use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::event::{EntryKind, EventOrigin, FileSystemEvent};
use crate::path::TreePath;

pub mod memory;
pub mod postgres;

pub use memory::{MemoryEventStore, MemoryFileStore, MemoryMasterStore, MemoryPartStore};
pub use postgres::PostgresDatabase;

/// An event as persisted: the domain event plus its append-time metadata.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredEvent {
    /// Monotonically increasing sequence id assigned at append.
    pub id: i64,
    /// Storage timestamp assigned at append.
    pub recorded_at: DateTime<Utc>,
    pub event: FileSystemEvent,
}

/// Append-only, ordered event log.
///
/// `append` is the single point of atomicity in the system; everything else
/// is derived. Replay order is append order, total and never reordered.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn append(&self, event: &FileSystemEvent) -> Result<StoredEvent>;

    /// Events with id strictly greater than `after_id`, ascending, capped.
    async fn events_since(&self, after_id: i64, limit: i64) -> Result<Vec<StoredEvent>>;

    /// The newest `limit` events, ascending by id.
    async fn latest(&self, limit: i64) -> Result<Vec<StoredEvent>>;

    /// The most recent event per path (ties broken by store order, newest
    /// wins). This is the reconciler's timeline view.
    async fn latest_per_path(&self) -> Result<HashMap<TreePath, StoredEvent>>;

    /// Highest assigned id, 0 when the log is empty.
    async fn max_id(&self) -> Result<i64>;
}

/// Row of the `files` projection.
#[derive(Clone, Debug, PartialEq)]
pub struct FileRecord {
    pub path: TreePath,
    pub name: String,
    pub file_type: EntryKind,
    pub extension: Option<String>,
    pub revision: Option<String>,
    pub part_name: Option<String>,
    pub core_name: Option<String>,
    pub product_main_type: Option<String>,
    pub product_sub_type: Option<String>,
    pub parent: Option<String>,
    pub parent_path: Option<String>,
    pub depth: i32,
    pub origin: EventOrigin,
    pub content_hash: Option<String>,
    pub size: Option<i64>,
    pub modified_at: Option<DateTime<Utc>>,
}

/// Row of the `masters` projection. Exists only while the master file has a
/// matching slave in the same folder.
#[derive(Clone, Debug, PartialEq)]
pub struct MasterRecord {
    pub path: TreePath,
    pub part_name: Option<String>,
    pub extension: Option<String>,
    pub parent_path: Option<String>,
    pub master_revision: Option<String>,
    pub content_hash: Option<String>,
    pub modified_at: Option<DateTime<Utc>>,
    pub slave_path: TreePath,
    pub slave_revision: Option<String>,
}

/// Row of the `parts` projection.
#[derive(Clone, Debug, PartialEq)]
pub struct PartRecord {
    pub path: TreePath,
    pub part_name: Option<String>,
    pub core_name: Option<String>,
    pub parent: Option<String>,
    pub parent_path: Option<String>,
    pub extension: Option<String>,
    pub master_path: Option<TreePath>,
    pub master_revision: Option<String>,
    pub slave_path: Option<TreePath>,
    pub slave_revision: Option<String>,
    pub content_hash: Option<String>,
    pub content_as_master: bool,
    pub modified_at: Option<DateTime<Utc>>,
}

/// `files` table, keyed by unique path.
#[async_trait]
pub trait FileStore: Send + Sync {
    async fn upsert(&self, record: FileRecord) -> Result<()>;

    async fn get(&self, path: &TreePath) -> Result<Option<FileRecord>>;

    async fn delete(&self, path: &TreePath) -> Result<()>;

    /// Delete the directory row and every row below it.
    async fn delete_tree(&self, dir: &TreePath) -> Result<()>;

    /// Rows in `parent_path` sharing `part_name` whose extension is in
    /// `extensions`, ordered by revision descending (greatest first).
    async fn siblings_with_part_name(
        &self,
        parent_path: Option<&str>,
        part_name: &str,
        extensions: &HashSet<String>,
    ) -> Result<Vec<FileRecord>>;

    /// Rows in `parent_path` whose extension is in `extensions`.
    async fn in_folder_with_extensions(
        &self,
        parent_path: Option<&str>,
        extensions: &HashSet<String>,
    ) -> Result<Vec<FileRecord>>;

    /// `path -> content_hash` for every file row that has a hash. Used to
    /// seed the watcher's modification cache at startup.
    async fn content_hashes(&self) -> Result<HashMap<TreePath, String>>;

    async fn all(&self) -> Result<Vec<FileRecord>>;
}

/// `masters` table, keyed by unique path.
#[async_trait]
pub trait MasterStore: Send + Sync {
    async fn upsert(&self, record: MasterRecord) -> Result<()>;

    async fn get(&self, path: &TreePath) -> Result<Option<MasterRecord>>;

    async fn delete(&self, path: &TreePath) -> Result<()>;

    /// Delete any row whose `path` or `slave_path` equals `path`.
    async fn delete_by_path_or_slave(&self, path: &TreePath) -> Result<()>;

    /// Delete any row whose `path` or `slave_path` lives under `dir`.
    async fn delete_tree(&self, dir: &TreePath) -> Result<()>;

    /// Best master candidate for a part: matching `part_name` or identical
    /// `content_hash`, preferring the greatest `slave_revision`.
    async fn find_for_part(
        &self,
        part_name: &str,
        content_hash: Option<&str>,
    ) -> Result<Option<MasterRecord>>;

    async fn all(&self) -> Result<Vec<MasterRecord>>;
}

/// `parts` table, keyed by unique path.
#[async_trait]
pub trait PartStore: Send + Sync {
    async fn upsert(&self, record: PartRecord) -> Result<()>;

    async fn get(&self, path: &TreePath) -> Result<Option<PartRecord>>;

    async fn delete(&self, path: &TreePath) -> Result<()>;

    /// Delete every row whose path lives under `dir`.
    async fn delete_tree(&self, dir: &TreePath) -> Result<()>;

    /// Paths of existing part rows sharing `part_name`.
    async fn paths_with_part_name(&self, part_name: &str) -> Result<Vec<TreePath>>;

    async fn all(&self) -> Result<Vec<PartRecord>>;
}
