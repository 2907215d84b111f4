//! Part projection: part files resolved against their best master.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::config::{MasterRules, PartRules, extension_in, path_is_omitted};
use crate::error::Result;
use crate::event::FileSystemEvent;
use crate::naming;
use crate::path::TreePath;
use crate::store::{FileStore, MasterStore, PartRecord, PartStore, StoredEvent};

use super::Projector;

pub struct PartProjector {
    files: Arc<dyn FileStore>,
    masters: Arc<dyn MasterStore>,
    parts: Arc<dyn PartStore>,
    part_extensions: HashSet<String>,
    // omit and slave rules are shared with the master projection
    master_rules: MasterRules,
}

impl fmt::Debug for PartProjector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartProjector")
            .field("part_extensions", &self.part_extensions)
            .finish()
    }
}

impl PartProjector {
    pub fn new(
        files: Arc<dyn FileStore>,
        masters: Arc<dyn MasterStore>,
        parts: Arc<dyn PartStore>,
        rules: PartRules,
        master_rules: MasterRules,
    ) -> Self {
        Self {
            files,
            masters,
            parts,
            part_extensions: rules.part_extensions(),
            master_rules,
        }
    }

    fn skip_path(&self, path: &TreePath) -> bool {
        path_is_omitted(
            path,
            &self.master_rules.omit_directories,
            &self.master_rules.omit_directory_prefixes,
        )
    }

    fn is_part_ext(&self, ext: Option<&str>) -> bool {
        extension_in(ext, &self.part_extensions)
    }

    fn is_slave_ext(&self, ext: Option<&str>) -> bool {
        extension_in(ext, &self.master_rules.slave_extensions)
    }

    /// A touched part refreshes itself; a touched slave refreshes every
    /// part row sharing its part name (the slave may re-link all of them).
    async fn dispatch_refreshes(&self, path: &TreePath) -> Result<()> {
        if self.skip_path(path) {
            return Ok(());
        }

        let Some(file) = self.files.get(path).await? else {
            debug!(path = %path, "part refresh skipped, no file row");
            return Ok(());
        };

        if self.is_part_ext(file.extension.as_deref()) {
            self.refresh_for_path(path).await?;
        }

        if self.is_slave_ext(file.extension.as_deref()) {
            if let Some(part_name) = file.part_name.as_deref() {
                self.refresh_by_part_name(part_name).await?;
            }
        }

        Ok(())
    }

    async fn refresh_by_part_name(&self, part_name: &str) -> Result<()> {
        for path in self.parts.paths_with_part_name(part_name).await? {
            self.refresh_for_path(&path).await?;
        }
        Ok(())
    }

    async fn refresh_for_path(&self, path: &TreePath) -> Result<()> {
        let Some(file) = self.files.get(path).await? else {
            return Ok(());
        };
        if !self.is_part_ext(file.extension.as_deref()) {
            return Ok(());
        }

        let master = match file.part_name.as_deref() {
            Some(part_name) => {
                self.masters
                    .find_for_part(part_name, file.content_hash.as_deref())
                    .await?
            }
            None => None,
        };

        let content_as_master = match (&master, &file.content_hash) {
            (Some(master), Some(hash)) => master.content_hash.as_deref() == Some(hash.as_str()),
            _ => false,
        };

        self.parts
            .upsert(PartRecord {
                path: file.path.clone(),
                part_name: file.part_name.clone(),
                core_name: file.core_name.clone(),
                parent: file.parent.clone(),
                parent_path: file.parent_path.clone(),
                extension: file.extension.clone(),
                master_path: master.as_ref().map(|m| m.path.clone()),
                master_revision: master.as_ref().and_then(|m| m.master_revision.clone()),
                slave_path: master.as_ref().map(|m| m.slave_path.clone()),
                slave_revision: master.as_ref().and_then(|m| m.slave_revision.clone()),
                content_hash: file.content_hash.clone(),
                content_as_master,
                modified_at: file.modified_at,
            })
            .await
    }
}

#[async_trait]
impl Projector for PartProjector {
    fn name(&self) -> &'static str {
        "parts"
    }

    fn weight(&self) -> u8 {
        3
    }

    async fn apply(&self, stored: &StoredEvent) -> Result<()> {
        match &stored.event {
            FileSystemEvent::FileCreated { path, .. }
            | FileSystemEvent::FileModified { path, .. } => self.dispatch_refreshes(path).await,
            FileSystemEvent::FileRenamed { path, old_path, .. } => {
                self.parts.delete(old_path).await?;
                self.dispatch_refreshes(path).await
            }
            FileSystemEvent::FileDeleted { path, .. } => {
                self.parts.delete(path).await?;

                // the file row is already gone; classify from the name so a
                // vanished slave still unlinks its parts
                let (stem, extension) = naming::split_name_ext(path.file_name());
                if self.is_slave_ext(extension) {
                    self.refresh_by_part_name(naming::extract_part_name(stem))
                        .await?;
                }
                Ok(())
            }
            FileSystemEvent::DirectoryDeleted { path, .. } => self.parts.delete_tree(path).await,
            FileSystemEvent::DirectoryRenamed { old_path, .. } => {
                self.parts.delete_tree(old_path).await
            }
            FileSystemEvent::DirectoryCreated { .. } => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FilesystemRules;
    use crate::event::EventOrigin;
    use crate::projectors::{FileProjector, MasterProjector};
    use crate::store::{MemoryFileStore, MemoryMasterStore, MemoryPartStore};
    use chrono::Utc;

    struct Fixture {
        parts: Arc<MemoryPartStore>,
        chain: Vec<Box<dyn Projector>>,
        next_id: i64,
    }

    impl Fixture {
        fn new() -> Self {
            let files = Arc::new(MemoryFileStore::new());
            let masters = Arc::new(MemoryMasterStore::new());
            let parts = Arc::new(MemoryPartStore::new());

            let chain: Vec<Box<dyn Projector>> = vec![
                Box::new(FileProjector::new(files.clone(), FilesystemRules::default())),
                Box::new(MasterProjector::new(
                    files.clone(),
                    masters.clone(),
                    MasterRules::default(),
                )),
                Box::new(PartProjector::new(
                    files.clone(),
                    masters.clone(),
                    parts.clone(),
                    PartRules::default(),
                    MasterRules::default(),
                )),
            ];

            Self {
                parts,
                chain,
                next_id: 0,
            }
        }

        async fn feed(&mut self, event: FileSystemEvent) {
            self.next_id += 1;
            let stored = StoredEvent {
                id: self.next_id,
                recorded_at: Utc::now(),
                event,
            };
            for projector in &self.chain {
                projector.apply(&stored).await.unwrap();
            }
        }

        async fn created(&mut self, raw: &str, hash: &str) {
            self.feed(FileSystemEvent::FileCreated {
                path: TreePath::new(raw).unwrap(),
                origin: EventOrigin::Initial,
                hash: Some(hash.into()),
                modified_at: None,
                size: Some(1),
            })
            .await;
        }

        async fn modified(&mut self, raw: &str, hash: &str, previous: &str) {
            self.feed(FileSystemEvent::FileModified {
                path: TreePath::new(raw).unwrap(),
                origin: EventOrigin::RealTime,
                hash: Some(hash.into()),
                modified_at: None,
                size: Some(1),
                previous_hash: Some(previous.into()),
            })
            .await;
        }
    }

    fn path(raw: &str) -> TreePath {
        TreePath::new(raw).unwrap()
    }

    #[tokio::test]
    async fn part_links_to_its_master_and_tracks_content() {
        let mut fx = Fixture::new();

        // master + slave in folder M, part uses the same content
        fx.created("M/PART_rev1.par", "hash-1").await;
        fx.created("M/PART_rev1.pdf", "hash-pdf").await;

        let row = fx.parts.get(&path("M/PART_rev1.par")).await.unwrap().unwrap();
        assert_eq!(row.master_path.as_ref().unwrap().as_str(), "M/PART_rev1.par");
        assert_eq!(row.slave_path.as_ref().unwrap().as_str(), "M/PART_rev1.pdf");
        assert_eq!(row.master_revision.as_deref(), Some("rev1"));
        assert!(row.content_as_master);
    }

    #[tokio::test]
    async fn content_flag_flips_when_part_diverges_from_master() {
        let mut fx = Fixture::new();

        // qualified master in M; a same-named part elsewhere shares content
        fx.created("M/PART_rev1.par", "hash-1").await;
        fx.created("M/PART_rev1.pdf", "pdf").await;
        fx.created("N/PART_rev1.par", "hash-1").await;

        let row = fx.parts.get(&path("N/PART_rev1.par")).await.unwrap().unwrap();
        assert_eq!(row.master_path.as_ref().unwrap().as_str(), "M/PART_rev1.par");
        assert!(row.content_as_master);

        // the part's content changes while the master stays put
        fx.modified("N/PART_rev1.par", "hash-2", "hash-1").await;
        let row = fx.parts.get(&path("N/PART_rev1.par")).await.unwrap().unwrap();
        assert_eq!(row.master_path.as_ref().unwrap().as_str(), "M/PART_rev1.par");
        assert!(!row.content_as_master);
    }

    #[tokio::test]
    async fn part_without_master_has_no_link() {
        let mut fx = Fixture::new();
        fx.created("M/LONELY_rev1.par", "h").await;

        let row = fx.parts.get(&path("M/LONELY_rev1.par")).await.unwrap().unwrap();
        assert!(row.master_path.is_none());
        assert!(!row.content_as_master);
    }

    #[tokio::test]
    async fn same_content_part_in_other_folder_matches_by_hash() {
        let mut fx = Fixture::new();

        fx.created("M/PART_rev1.par", "shared").await;
        fx.created("M/PART_rev1.pdf", "pdf").await;
        // a copy with a different name elsewhere, same content
        fx.created("N/COPY_rev9.par", "shared").await;

        let row = fx.parts.get(&path("N/COPY_rev9.par")).await.unwrap().unwrap();
        assert_eq!(row.master_path.as_ref().unwrap().as_str(), "M/PART_rev1.par");
        assert!(row.content_as_master);

        // and when the copy's content diverges, the hash match (and the
        // content flag) go away
        fx.modified("N/COPY_rev9.par", "diverged", "shared").await;
        let row = fx.parts.get(&path("N/COPY_rev9.par")).await.unwrap().unwrap();
        assert!(row.master_path.is_none());
        assert!(!row.content_as_master);
    }

    #[tokio::test]
    async fn deleting_the_slave_unlinks_parts() {
        let mut fx = Fixture::new();

        fx.created("M/PART_rev1.par", "h").await;
        fx.created("M/PART_rev1.pdf", "p").await;
        assert!(
            fx.parts
                .get(&path("M/PART_rev1.par"))
                .await
                .unwrap()
                .unwrap()
                .master_path
                .is_some()
        );

        fx.feed(FileSystemEvent::FileDeleted {
            path: path("M/PART_rev1.pdf"),
            origin: EventOrigin::RealTime,
        })
        .await;

        let row = fx.parts.get(&path("M/PART_rev1.par")).await.unwrap().unwrap();
        assert!(row.master_path.is_none());
        assert!(!row.content_as_master);
    }

    #[tokio::test]
    async fn directory_delete_purges_part_rows() {
        let mut fx = Fixture::new();
        fx.created("M/PART_rev1.par", "h").await;
        fx.created("M/PART_rev1.pdf", "p").await;

        fx.feed(FileSystemEvent::DirectoryDeleted {
            path: path("M"),
            origin: EventOrigin::Reconciled,
        })
        .await;
        assert!(fx.parts.all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn deleting_a_part_file_removes_its_row() {
        let mut fx = Fixture::new();
        fx.created("M/PART_rev1.par", "h").await;
        assert_eq!(fx.parts.all().await.unwrap().len(), 1);

        fx.feed(FileSystemEvent::FileDeleted {
            path: path("M/PART_rev1.par"),
            origin: EventOrigin::RealTime,
        })
        .await;
        assert!(fx.parts.all().await.unwrap().is_empty());
    }
}
