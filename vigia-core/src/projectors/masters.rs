//! Master projection: master-extension files that currently have a matching
//! slave document in the same folder.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::config::{MasterRules, extension_in, path_is_omitted};
use crate::error::Result;
use crate::event::FileSystemEvent;
use crate::path::TreePath;
use crate::store::{FileRecord, FileStore, MasterRecord, MasterStore, StoredEvent};

use super::Projector;

pub struct MasterProjector {
    files: Arc<dyn FileStore>,
    masters: Arc<dyn MasterStore>,
    rules: MasterRules,
}

impl fmt::Debug for MasterProjector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterProjector")
            .field("rules", &self.rules)
            .finish()
    }
}

impl MasterProjector {
    pub fn new(
        files: Arc<dyn FileStore>,
        masters: Arc<dyn MasterStore>,
        rules: MasterRules,
    ) -> Self {
        Self {
            files,
            masters,
            rules,
        }
    }

    fn skip_path(&self, path: &TreePath) -> bool {
        path_is_omitted(
            path,
            &self.rules.omit_directories,
            &self.rules.omit_directory_prefixes,
        )
    }

    async fn refresh_for_path(&self, path: &TreePath) -> Result<()> {
        let Some(file) = self.files.get(path).await? else {
            // file row not committed yet; the next event for this path
            // catches up
            debug!(path = %path, "master refresh skipped, no file row");
            return Ok(());
        };

        if extension_in(file.extension.as_deref(), &self.rules.master_extensions) {
            self.evaluate_master(&file).await?;
        }

        if extension_in(file.extension.as_deref(), &self.rules.slave_extensions) {
            // a new or changed slave may qualify masters in the same folder
            if let Some(part_name) = file.part_name.as_deref() {
                let candidates = self
                    .files
                    .siblings_with_part_name(
                        file.parent_path.as_deref(),
                        part_name,
                        &self.rules.master_extensions,
                    )
                    .await?;
                for candidate in candidates {
                    self.evaluate_master(&candidate).await?;
                }
            }
        }

        Ok(())
    }

    /// Re-check whether `master` qualifies (has a slave alongside) and
    /// upsert or delete its row accordingly.
    async fn evaluate_master(&self, master: &FileRecord) -> Result<()> {
        match self.locate_slave(master).await? {
            Some(slave) => {
                self.masters
                    .upsert(MasterRecord {
                        path: master.path.clone(),
                        part_name: master.part_name.clone(),
                        extension: master.extension.clone(),
                        parent_path: master.parent_path.clone(),
                        master_revision: master.revision.clone(),
                        content_hash: master.content_hash.clone(),
                        modified_at: master.modified_at,
                        slave_path: slave.path.clone(),
                        slave_revision: slave.revision.clone(),
                    })
                    .await
            }
            None => self.masters.delete(&master.path).await,
        }
    }

    /// The slave with the greatest revision sharing the folder and part
    /// name, if any.
    async fn locate_slave(&self, master: &FileRecord) -> Result<Option<FileRecord>> {
        let Some(part_name) = master.part_name.as_deref() else {
            return Ok(None);
        };
        let mut slaves = self
            .files
            .siblings_with_part_name(
                master.parent_path.as_deref(),
                part_name,
                &self.rules.slave_extensions,
            )
            .await?;
        Ok(if slaves.is_empty() {
            None
        } else {
            Some(slaves.remove(0))
        })
    }

    /// A deleted slave may invalidate other masters in its folder.
    async fn refresh_folder(&self, deleted: &TreePath) -> Result<()> {
        let candidates = self
            .files
            .in_folder_with_extensions(deleted.parent_path(), &self.rules.master_extensions)
            .await?;
        for candidate in candidates {
            self.evaluate_master(&candidate).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Projector for MasterProjector {
    fn name(&self) -> &'static str {
        "masters"
    }

    fn weight(&self) -> u8 {
        2
    }

    async fn apply(&self, stored: &StoredEvent) -> Result<()> {
        match &stored.event {
            FileSystemEvent::FileCreated { path, .. }
            | FileSystemEvent::FileModified { path, .. } => {
                if self.skip_path(path) {
                    return Ok(());
                }
                self.refresh_for_path(path).await
            }
            FileSystemEvent::FileRenamed {
                path, old_path, ..
            } => {
                self.masters.delete_by_path_or_slave(old_path).await?;
                self.refresh_folder(old_path).await?;
                if self.skip_path(path) {
                    return Ok(());
                }
                self.refresh_for_path(path).await
            }
            FileSystemEvent::FileDeleted { path, .. } => {
                // the vanished file may have been a master or a slave
                self.masters.delete_by_path_or_slave(path).await?;
                self.refresh_folder(path).await
            }
            FileSystemEvent::DirectoryDeleted { path, .. } => self.masters.delete_tree(path).await,
            FileSystemEvent::DirectoryRenamed { old_path, .. } => {
                self.masters.delete_tree(old_path).await
            }
            FileSystemEvent::DirectoryCreated { .. } => Ok(()),
        }
    }
}
