//! File projection: the base table every other projection reads.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::{FilesystemRules, extension_in, path_is_omitted};
use crate::error::Result;
use crate::event::{EntryKind, EventOrigin, FileSystemEvent};
use crate::naming;
use crate::path::TreePath;
use crate::store::{FileRecord, FileStore, StoredEvent};

use super::Projector;

pub struct FileProjector {
    files: Arc<dyn FileStore>,
    rules: FilesystemRules,
}

impl std::fmt::Debug for FileProjector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileProjector")
            .field("rules", &self.rules)
            .finish()
    }
}

impl FileProjector {
    pub fn new(files: Arc<dyn FileStore>, rules: FilesystemRules) -> Self {
        Self { files, rules }
    }

    fn skip_path(&self, path: &TreePath) -> bool {
        path_is_omitted(
            path,
            &self.rules.omit_directories,
            &self.rules.omit_directory_prefixes,
        )
    }

    async fn upsert(
        &self,
        path: &TreePath,
        kind: EntryKind,
        origin: EventOrigin,
        hash: Option<&str>,
        modified_at: Option<DateTime<Utc>>,
        size: Option<u64>,
    ) -> Result<()> {
        if self.skip_path(path) {
            return Ok(());
        }

        let (stem, extension) = naming::split_name_ext(path.file_name());
        let is_file = kind == EntryKind::File;

        if is_file && extension_in(extension, &self.rules.omit_extensions) {
            return Ok(());
        }

        let record = FileRecord {
            path: path.clone(),
            name: stem.to_string(),
            file_type: kind,
            extension: if is_file {
                extension.map(str::to_string)
            } else {
                None
            },
            revision: is_file
                .then(|| naming::extract_revision(stem).map(str::to_string))
                .flatten(),
            part_name: is_file.then(|| naming::extract_part_name(stem).to_string()),
            core_name: is_file.then(|| naming::extract_core_name(stem).to_string()),
            product_main_type: Some(naming::product_main_type(path).to_string()),
            product_sub_type: naming::product_sub_type(path).map(str::to_string),
            parent: path.parent_name().map(str::to_string),
            parent_path: path.parent_path().map(str::to_string),
            depth: path.depth() as i32,
            origin,
            content_hash: hash.map(str::to_string),
            size: size.map(|s| s as i64),
            modified_at,
        };

        self.files.upsert(record).await
    }
}

#[async_trait]
impl Projector for FileProjector {
    fn name(&self) -> &'static str {
        "files"
    }

    fn weight(&self) -> u8 {
        1
    }

    async fn apply(&self, stored: &StoredEvent) -> Result<()> {
        match &stored.event {
            FileSystemEvent::FileCreated {
                path,
                origin,
                hash,
                modified_at,
                size,
            }
            | FileSystemEvent::FileModified {
                path,
                origin,
                hash,
                modified_at,
                size,
                ..
            } => {
                self.upsert(
                    path,
                    EntryKind::File,
                    *origin,
                    hash.as_deref(),
                    *modified_at,
                    *size,
                )
                .await
            }
            FileSystemEvent::FileRenamed {
                path,
                old_path,
                origin,
                hash,
                modified_at,
                size,
            } => {
                self.files.delete(old_path).await?;
                self.upsert(
                    path,
                    EntryKind::File,
                    *origin,
                    hash.as_deref(),
                    *modified_at,
                    *size,
                )
                .await
            }
            FileSystemEvent::DirectoryCreated { path, origin } => {
                self.upsert(path, EntryKind::Directory, *origin, None, None, None)
                    .await
            }
            FileSystemEvent::FileDeleted { path, .. } => self.files.delete(path).await,
            FileSystemEvent::DirectoryDeleted { path, .. } => self.files.delete_tree(path).await,
            FileSystemEvent::DirectoryRenamed {
                path,
                old_path,
                origin,
            } => {
                // children under the old prefix are purged; the renamed
                // subtree is repopulated by reconciliation
                self.files.delete_tree(old_path).await?;
                self.upsert(path, EntryKind::Directory, *origin, None, None, None)
                    .await
            }
        }
    }
}
