//! In-memory store implementations.
//!
//! Backing for tests and ad-hoc tooling; semantics mirror the Postgres
//! implementations (same ordering, same null handling) so the projector
//! chain behaves identically over either.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::event::FileSystemEvent;
use crate::path::TreePath;

use super::{
    EventStore, FileRecord, FileStore, MasterRecord, MasterStore, PartRecord, PartStore,
    StoredEvent,
};

/// Compare optional revisions with `Some > None`, mirroring
/// `ORDER BY revision DESC NULLS LAST`.
fn revision_desc(a: Option<&str>, b: Option<&str>) -> std::cmp::Ordering {
    match (a, b) {
        (Some(a), Some(b)) => b.cmp(a),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    }
}

#[derive(Debug, Default)]
pub struct MemoryEventStore {
    next_id: AtomicI64,
    events: RwLock<Vec<StoredEvent>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn append(&self, event: &FileSystemEvent) -> Result<StoredEvent> {
        let stored = StoredEvent {
            id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            recorded_at: Utc::now(),
            event: event.clone(),
        };
        self.events.write().await.push(stored.clone());
        Ok(stored)
    }

    async fn events_since(&self, after_id: i64, limit: i64) -> Result<Vec<StoredEvent>> {
        let events = self.events.read().await;
        Ok(events
            .iter()
            .filter(|stored| stored.id > after_id)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn latest(&self, limit: i64) -> Result<Vec<StoredEvent>> {
        let events = self.events.read().await;
        let skip = events.len().saturating_sub(limit.max(0) as usize);
        Ok(events[skip..].to_vec())
    }

    async fn latest_per_path(&self) -> Result<HashMap<TreePath, StoredEvent>> {
        let events = self.events.read().await;
        let mut timeline: HashMap<TreePath, StoredEvent> = HashMap::new();
        for stored in events.iter() {
            // iteration is in append order, so a plain insert keeps the newest
            timeline.insert(stored.event.path().clone(), stored.clone());
        }
        Ok(timeline)
    }

    async fn max_id(&self) -> Result<i64> {
        Ok(self.next_id.load(Ordering::SeqCst))
    }
}

#[derive(Debug, Default)]
pub struct MemoryFileStore {
    rows: RwLock<BTreeMap<TreePath, FileRecord>>,
}

impl MemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FileStore for MemoryFileStore {
    async fn upsert(&self, record: FileRecord) -> Result<()> {
        self.rows.write().await.insert(record.path.clone(), record);
        Ok(())
    }

    async fn get(&self, path: &TreePath) -> Result<Option<FileRecord>> {
        Ok(self.rows.read().await.get(path).cloned())
    }

    async fn delete(&self, path: &TreePath) -> Result<()> {
        self.rows.write().await.remove(path);
        Ok(())
    }

    async fn delete_tree(&self, dir: &TreePath) -> Result<()> {
        self.rows
            .write()
            .await
            .retain(|path, _| !path.starts_with_dir(dir.as_str()));
        Ok(())
    }

    async fn siblings_with_part_name(
        &self,
        parent_path: Option<&str>,
        part_name: &str,
        extensions: &HashSet<String>,
    ) -> Result<Vec<FileRecord>> {
        let rows = self.rows.read().await;
        let mut found: Vec<FileRecord> = rows
            .values()
            .filter(|row| {
                row.parent_path.as_deref() == parent_path
                    && row.part_name.as_deref() == Some(part_name)
                    && crate::config::extension_in(row.extension.as_deref(), extensions)
            })
            .cloned()
            .collect();
        found.sort_by(|a, b| revision_desc(a.revision.as_deref(), b.revision.as_deref()));
        Ok(found)
    }

    async fn in_folder_with_extensions(
        &self,
        parent_path: Option<&str>,
        extensions: &HashSet<String>,
    ) -> Result<Vec<FileRecord>> {
        let rows = self.rows.read().await;
        Ok(rows
            .values()
            .filter(|row| {
                row.parent_path.as_deref() == parent_path
                    && crate::config::extension_in(row.extension.as_deref(), extensions)
            })
            .cloned()
            .collect())
    }

    async fn content_hashes(&self) -> Result<HashMap<TreePath, String>> {
        let rows = self.rows.read().await;
        Ok(rows
            .values()
            .filter_map(|row| {
                row.content_hash
                    .as_ref()
                    .map(|hash| (row.path.clone(), hash.clone()))
            })
            .collect())
    }

    async fn all(&self) -> Result<Vec<FileRecord>> {
        Ok(self.rows.read().await.values().cloned().collect())
    }
}

#[derive(Debug, Default)]
pub struct MemoryMasterStore {
    rows: RwLock<BTreeMap<TreePath, MasterRecord>>,
}

impl MemoryMasterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MasterStore for MemoryMasterStore {
    async fn upsert(&self, record: MasterRecord) -> Result<()> {
        self.rows.write().await.insert(record.path.clone(), record);
        Ok(())
    }

    async fn get(&self, path: &TreePath) -> Result<Option<MasterRecord>> {
        Ok(self.rows.read().await.get(path).cloned())
    }

    async fn delete(&self, path: &TreePath) -> Result<()> {
        self.rows.write().await.remove(path);
        Ok(())
    }

    async fn delete_by_path_or_slave(&self, path: &TreePath) -> Result<()> {
        self.rows
            .write()
            .await
            .retain(|row_path, row| row_path != path && row.slave_path != *path);
        Ok(())
    }

    async fn delete_tree(&self, dir: &TreePath) -> Result<()> {
        self.rows.write().await.retain(|path, row| {
            !path.starts_with_dir(dir.as_str()) && !row.slave_path.starts_with_dir(dir.as_str())
        });
        Ok(())
    }

    async fn find_for_part(
        &self,
        part_name: &str,
        content_hash: Option<&str>,
    ) -> Result<Option<MasterRecord>> {
        let rows = self.rows.read().await;
        let mut candidates: Vec<&MasterRecord> = rows
            .values()
            .filter(|row| {
                row.part_name.as_deref() == Some(part_name)
                    || (content_hash.is_some() && row.content_hash.as_deref() == content_hash)
            })
            .collect();
        candidates
            .sort_by(|a, b| revision_desc(a.slave_revision.as_deref(), b.slave_revision.as_deref()));
        Ok(candidates.first().map(|row| (*row).clone()))
    }

    async fn all(&self) -> Result<Vec<MasterRecord>> {
        Ok(self.rows.read().await.values().cloned().collect())
    }
}

#[derive(Debug, Default)]
pub struct MemoryPartStore {
    rows: RwLock<BTreeMap<TreePath, PartRecord>>,
}

impl MemoryPartStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PartStore for MemoryPartStore {
    async fn upsert(&self, record: PartRecord) -> Result<()> {
        self.rows.write().await.insert(record.path.clone(), record);
        Ok(())
    }

    async fn get(&self, path: &TreePath) -> Result<Option<PartRecord>> {
        Ok(self.rows.read().await.get(path).cloned())
    }

    async fn delete(&self, path: &TreePath) -> Result<()> {
        self.rows.write().await.remove(path);
        Ok(())
    }

    async fn delete_tree(&self, dir: &TreePath) -> Result<()> {
        self.rows
            .write()
            .await
            .retain(|path, _| !path.starts_with_dir(dir.as_str()));
        Ok(())
    }

    async fn paths_with_part_name(&self, part_name: &str) -> Result<Vec<TreePath>> {
        let rows = self.rows.read().await;
        Ok(rows
            .values()
            .filter(|row| row.part_name.as_deref() == Some(part_name))
            .map(|row| row.path.clone())
            .collect())
    }

    async fn all(&self) -> Result<Vec<PartRecord>> {
        Ok(self.rows.read().await.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventOrigin;

    fn path(raw: &str) -> TreePath {
        TreePath::new(raw).unwrap()
    }

    fn file_event(raw: &str) -> FileSystemEvent {
        FileSystemEvent::FileCreated {
            path: path(raw),
            origin: EventOrigin::Initial,
            hash: None,
            modified_at: None,
            size: None,
        }
    }

    #[tokio::test]
    async fn append_assigns_increasing_ids() {
        let store = MemoryEventStore::new();
        let first = store.append(&file_event("a.txt")).await.unwrap();
        let second = store.append(&file_event("b.txt")).await.unwrap();
        assert!(second.id > first.id);
        assert_eq!(store.max_id().await.unwrap(), second.id);
    }

    #[tokio::test]
    async fn latest_per_path_keeps_the_newest_event() {
        let store = MemoryEventStore::new();
        store.append(&file_event("a.txt")).await.unwrap();
        let deleted = FileSystemEvent::FileDeleted {
            path: path("a.txt"),
            origin: EventOrigin::RealTime,
        };
        store.append(&deleted).await.unwrap();

        let timeline = store.latest_per_path().await.unwrap();
        assert_eq!(timeline.len(), 1);
        assert!(timeline[&path("a.txt")].event.is_deletion());
    }

    #[tokio::test]
    async fn events_since_respects_the_marker() {
        let store = MemoryEventStore::new();
        let first = store.append(&file_event("a.txt")).await.unwrap();
        store.append(&file_event("b.txt")).await.unwrap();

        let rest = store.events_since(first.id, 100).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].event.path().as_str(), "b.txt");
    }

    #[tokio::test]
    async fn delete_tree_only_removes_the_subtree() {
        let store = MemoryFileStore::new();
        for raw in ["A/B/c.txt", "A/B", "A/BC/d.txt", "A"] {
            store
                .upsert(FileRecord {
                    path: path(raw),
                    name: raw.into(),
                    file_type: crate::event::EntryKind::File,
                    extension: None,
                    revision: None,
                    part_name: None,
                    core_name: None,
                    product_main_type: None,
                    product_sub_type: None,
                    parent: None,
                    parent_path: None,
                    depth: 0,
                    origin: EventOrigin::Initial,
                    content_hash: None,
                    size: None,
                    modified_at: None,
                })
                .await
                .unwrap();
        }

        store.delete_tree(&path("A/B")).await.unwrap();
        let remaining: Vec<String> = store
            .all()
            .await
            .unwrap()
            .into_iter()
            .map(|row| row.path.as_str().to_string())
            .collect();
        assert_eq!(remaining, vec!["A".to_string(), "A/BC/d.txt".to_string()]);
    }

    #[tokio::test]
    async fn master_lookup_prefers_greatest_slave_revision() {
        let store = MemoryMasterStore::new();
        for (raw, slave_rev) in [("m/PART_rev1.par", "rev1"), ("m/PART_rev2.par", "rev2")] {
            store
                .upsert(MasterRecord {
                    path: path(raw),
                    part_name: Some("PART".into()),
                    extension: Some("par".into()),
                    parent_path: Some("m".into()),
                    master_revision: None,
                    content_hash: None,
                    modified_at: None,
                    slave_path: path("m/PART.pdf"),
                    slave_revision: Some(slave_rev.into()),
                })
                .await
                .unwrap();
        }

        let found = store.find_for_part("PART", None).await.unwrap().unwrap();
        assert_eq!(found.slave_revision.as_deref(), Some("rev2"));
    }
}
