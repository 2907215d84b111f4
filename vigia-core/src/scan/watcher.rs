//! Live filesystem watcher.
//!
//! Bridges native change notifications into the event pipeline. Raw notify
//! events cross into tokio over a bounded channel; the async loop handles
//! one notification at a time, so each recorded event is folded through the
//! whole projector chain before the next notification is taken.
//!
//! The watcher keeps a `path -> hash` cache to suppress no-op modification
//! notifications (touched mtime, unchanged content). The cache is seeded
//! from the file projection at startup - starting empty would report a
//! false modification for every file touched after a restart.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use notify::event::{CreateKind, EventKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Config as NotifyConfig, RecommendedWatcher, RecursiveMode, Watcher as _};
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant, sleep_until};
use tracing::{debug, info, warn};

use crate::config::WatcherSettings;
use crate::error::{Result, VigiaError};
use crate::event::{EventOrigin, FileSystemEvent};
use crate::hash;
use crate::path::TreePath;
use crate::pipeline::Pipeline;
use crate::store::FileStore;

/// Run options: how long to watch and how large the notify bridge is.
#[derive(Clone, Debug, Default)]
pub struct WatcherOptions {
    /// Stop automatically after this long; `None` runs until cancelled.
    pub timeout: Option<Duration>,
    pub settings: WatcherSettings,
}

enum WatchMessage {
    Event(notify::Event),
    Error(String),
}

pub struct Watcher {
    root: PathBuf,
    pipeline: Arc<Pipeline>,
    files: Arc<dyn FileStore>,
    options: WatcherOptions,
    hashes: HashMap<TreePath, String>,
}

impl fmt::Debug for Watcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watcher")
            .field("root", &self.root)
            .field("cached_hashes", &self.hashes.len())
            .field("options", &self.options)
            .finish()
    }
}

impl Watcher {
    pub fn new(
        root: impl Into<PathBuf>,
        pipeline: Arc<Pipeline>,
        files: Arc<dyn FileStore>,
        options: WatcherOptions,
    ) -> Self {
        Self {
            root: root.into(),
            pipeline,
            files,
            options,
            hashes: HashMap::new(),
        }
    }

    /// Watch the root until `shutdown` resolves or the configured timeout
    /// elapses. Per-notification failures are logged and never terminate
    /// the loop.
    pub async fn run(mut self, shutdown: impl Future<Output = ()> + Send) -> Result<()> {
        if !self.root.exists() {
            return Err(VigiaError::NotFound(format!(
                "watch root does not exist: {}",
                self.root.display()
            )));
        }
        if !self.root.is_dir() {
            return Err(VigiaError::NotADirectory(self.root.display().to_string()));
        }

        self.hashes = self.files.content_hashes().await?;
        info!(
            root = %self.root.display(),
            seeded_hashes = self.hashes.len(),
            "starting filesystem watcher"
        );

        let (tx, mut rx) = mpsc::channel::<WatchMessage>(self.options.settings.channel_capacity);
        let mut watcher = RecommendedWatcher::new(
            move |res: std::result::Result<notify::Event, notify::Error>| {
                let message = match res {
                    Ok(event) => WatchMessage::Event(event),
                    Err(err) => WatchMessage::Error(err.to_string()),
                };
                if tx.blocking_send(message).is_err() {
                    // receiver gone; the loop is shutting down
                }
            },
            NotifyConfig::default(),
        )
        .map_err(|err| VigiaError::Watch(format!("failed to create watcher: {err}")))?;

        watcher
            .watch(&self.root, RecursiveMode::Recursive)
            .map_err(|err| {
                VigiaError::Watch(format!("failed to watch {}: {err}", self.root.display()))
            })?;

        let deadline = self.options.timeout.map(|timeout| Instant::now() + timeout);
        tokio::pin!(shutdown);

        loop {
            let message = tokio::select! {
                _ = &mut shutdown => {
                    info!("watcher received stop signal");
                    break;
                }
                _ = async {
                    match deadline {
                        Some(deadline) => sleep_until(deadline).await,
                        None => std::future::pending().await,
                    }
                } => {
                    info!("watcher timeout reached");
                    break;
                }
                message = rx.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };

            match message {
                WatchMessage::Event(event) => {
                    if let Err(err) = self.handle_notify(event).await {
                        warn!(error = %err, "error handling filesystem notification");
                    }
                }
                WatchMessage::Error(error) => {
                    warn!(error, "watch backend error");
                }
            }
        }

        // dropping the watcher stops the notify stream
        drop(watcher);
        info!("filesystem watcher stopped");
        Ok(())
    }

    async fn handle_notify(&mut self, event: notify::Event) -> Result<()> {
        match event.kind {
            EventKind::Create(kind) => {
                for path in &event.paths {
                    self.handle_created(path, kind).await?;
                }
                Ok(())
            }
            EventKind::Modify(ModifyKind::Name(mode)) => self.handle_rename(&event, mode).await,
            EventKind::Modify(_) => {
                for path in &event.paths {
                    // directories emit modify noise on child changes
                    if path.is_file() {
                        self.handle_file_updated(path).await?;
                    }
                }
                Ok(())
            }
            EventKind::Remove(kind) => {
                for path in &event.paths {
                    self.handle_removed(path, kind).await?;
                }
                Ok(())
            }
            EventKind::Access(_) | EventKind::Any | EventKind::Other => Ok(()),
        }
    }

    async fn handle_created(&mut self, path: &Path, kind: CreateKind) -> Result<()> {
        let is_dir = match kind {
            CreateKind::Folder => true,
            CreateKind::File => false,
            _ => path.is_dir(),
        };
        if is_dir {
            self.handle_dir_created(path).await
        } else {
            self.handle_file_created(path).await
        }
    }

    async fn handle_file_created(&mut self, path: &Path) -> Result<()> {
        let tree_path = TreePath::from_absolute(&self.root, path)?;

        if !path.exists() {
            warn!(path = %path.display(), "creation notification for a vanished file");
            return Ok(());
        }

        let file_hash = hash::fingerprint(path);
        let (modified_at, size) = stat(path);

        if let Some(hash) = &file_hash {
            self.hashes.insert(tree_path.clone(), hash.clone());
        }

        debug!(path = %tree_path, "file created");
        self.pipeline
            .record(FileSystemEvent::FileCreated {
                path: tree_path,
                origin: EventOrigin::RealTime,
                hash: file_hash,
                modified_at,
                size,
            })
            .await?;
        Ok(())
    }

    async fn handle_file_updated(&mut self, path: &Path) -> Result<()> {
        let tree_path = TreePath::from_absolute(&self.root, path)?;

        if !path.exists() {
            warn!(path = %path.display(), "update notification for a vanished file");
            return Ok(());
        }

        let new_hash = hash::fingerprint(path);
        let previous = self.hashes.get(&tree_path).cloned();

        // mtime-only touches produce the same hash; suppress them
        if new_hash == previous {
            debug!(path = %tree_path, "suppressing no-op modification");
            return Ok(());
        }

        match &new_hash {
            Some(hash) => {
                self.hashes.insert(tree_path.clone(), hash.clone());
            }
            None => {
                self.hashes.remove(&tree_path);
            }
        }

        let (modified_at, size) = stat(path);
        debug!(path = %tree_path, "file modified");
        self.pipeline
            .record(FileSystemEvent::FileModified {
                path: tree_path,
                origin: EventOrigin::RealTime,
                hash: new_hash,
                modified_at,
                size,
                previous_hash: previous,
            })
            .await?;
        Ok(())
    }

    async fn handle_removed(&mut self, path: &Path, kind: RemoveKind) -> Result<()> {
        let tree_path = TreePath::from_absolute(&self.root, path)?;
        let is_dir = match kind {
            RemoveKind::Folder => true,
            RemoveKind::File => false,
            // the entry is gone; infer from what we knew about it
            _ => {
                !self.hashes.contains_key(&tree_path)
                    && self
                        .hashes
                        .keys()
                        .any(|cached| cached.starts_with_dir(tree_path.as_str()))
            }
        };

        if is_dir {
            self.handle_dir_deleted(&tree_path).await
        } else {
            self.handle_file_deleted(&tree_path).await
        }
    }

    async fn handle_file_deleted(&mut self, tree_path: &TreePath) -> Result<()> {
        self.hashes.remove(tree_path);
        debug!(path = %tree_path, "file deleted");
        self.pipeline
            .record(FileSystemEvent::FileDeleted {
                path: tree_path.clone(),
                origin: EventOrigin::RealTime,
            })
            .await?;
        Ok(())
    }

    async fn handle_dir_created(&mut self, path: &Path) -> Result<()> {
        let tree_path = TreePath::from_absolute(&self.root, path)?;
        debug!(path = %tree_path, "directory created");
        self.pipeline
            .record(FileSystemEvent::DirectoryCreated {
                path: tree_path,
                origin: EventOrigin::RealTime,
            })
            .await?;
        Ok(())
    }

    async fn handle_dir_deleted(&mut self, tree_path: &TreePath) -> Result<()> {
        self.hashes
            .retain(|cached, _| !cached.starts_with_dir(tree_path.as_str()));
        debug!(path = %tree_path, "directory deleted");
        self.pipeline
            .record(FileSystemEvent::DirectoryDeleted {
                path: tree_path.clone(),
                origin: EventOrigin::RealTime,
            })
            .await?;
        Ok(())
    }

    async fn handle_rename(&mut self, event: &notify::Event, mode: RenameMode) -> Result<()> {
        match mode {
            RenameMode::Both => {
                let (Some(from), Some(to)) = (event.paths.first(), event.paths.get(1)) else {
                    return Ok(());
                };
                let old_path = TreePath::from_absolute(&self.root, from)?;
                let new_path = TreePath::from_absolute(&self.root, to)?;

                if to.is_dir() {
                    self.rekey_tree(&old_path, &new_path);
                    debug!(from = %old_path, to = %new_path, "directory renamed");
                    self.pipeline
                        .record(FileSystemEvent::DirectoryRenamed {
                            path: new_path,
                            old_path,
                            origin: EventOrigin::RealTime,
                        })
                        .await?;
                } else {
                    let file_hash = match self.hashes.remove(&old_path) {
                        Some(hash) => Some(hash),
                        None => hash::fingerprint(to),
                    };
                    if let Some(hash) = &file_hash {
                        self.hashes.insert(new_path.clone(), hash.clone());
                    }
                    let (modified_at, size) = stat(to);
                    debug!(from = %old_path, to = %new_path, "file renamed");
                    self.pipeline
                        .record(FileSystemEvent::FileRenamed {
                            path: new_path,
                            old_path,
                            origin: EventOrigin::RealTime,
                            hash: file_hash,
                            modified_at,
                            size,
                        })
                        .await?;
                }
                Ok(())
            }
            // unpaired halves of a rename; fold them as delete / create
            RenameMode::From => {
                if let Some(path) = event.paths.first() {
                    let tree_path = TreePath::from_absolute(&self.root, path)?;
                    if self.hashes.contains_key(&tree_path) {
                        self.handle_file_deleted(&tree_path).await?;
                    } else {
                        self.handle_dir_deleted(&tree_path).await?;
                    }
                }
                Ok(())
            }
            RenameMode::To => {
                if let Some(path) = event.paths.first() {
                    self.handle_created(path, CreateKind::Any).await?;
                }
                Ok(())
            }
            RenameMode::Any | RenameMode::Other => Ok(()),
        }
    }

    fn rekey_tree(&mut self, old_dir: &TreePath, new_dir: &TreePath) {
        let moved: Vec<(TreePath, String)> = self
            .hashes
            .iter()
            .filter(|(cached, _)| cached.starts_with_dir(old_dir.as_str()))
            .map(|(cached, hash)| (cached.clone(), hash.clone()))
            .collect();
        for (cached, hash) in moved {
            self.hashes.remove(&cached);
            let suffix = &cached.as_str()[old_dir.as_str().len()..];
            if let Ok(rekeyed) = TreePath::new(format!("{}{suffix}", new_dir.as_str())) {
                self.hashes.insert(rekeyed, hash);
            }
        }
    }

    #[cfg(test)]
    fn cached_hash(&self, path: &TreePath) -> Option<&String> {
        self.hashes.get(path)
    }
}

fn stat(path: &Path) -> (Option<DateTime<Utc>>, Option<u64>) {
    match std::fs::metadata(path) {
        Ok(meta) => (
            meta.modified().ok().map(DateTime::<Utc>::from),
            Some(meta.len()),
        ),
        Err(_) => (None, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FilesystemRules, MasterRules, PartRules};
    use crate::projectors::{FileProjector, MasterProjector, PartProjector, ProjectorChain};
    use crate::store::{
        EventStore, MemoryEventStore, MemoryFileStore, MemoryMasterStore, MemoryPartStore,
    };
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        tmp: TempDir,
        store: Arc<MemoryEventStore>,
        files: Arc<MemoryFileStore>,
        watcher: Watcher,
    }

    impl Fixture {
        fn new() -> Self {
            let tmp = TempDir::new().unwrap();
            let store = Arc::new(MemoryEventStore::new());
            let files = Arc::new(MemoryFileStore::new());
            let masters = Arc::new(MemoryMasterStore::new());
            let parts = Arc::new(MemoryPartStore::new());
            let chain = ProjectorChain::new(vec![
                Arc::new(FileProjector::new(files.clone(), FilesystemRules::default())),
                Arc::new(MasterProjector::new(
                    files.clone(),
                    masters.clone(),
                    MasterRules::default(),
                )),
                Arc::new(PartProjector::new(
                    files.clone(),
                    masters,
                    parts,
                    PartRules::default(),
                    MasterRules::default(),
                )),
            ]);
            let pipeline = Arc::new(Pipeline::new(store.clone(), chain));
            let watcher = Watcher::new(
                tmp.path(),
                pipeline,
                files.clone(),
                WatcherOptions::default(),
            );
            Self {
                tmp,
                store,
                files,
                watcher,
            }
        }

        fn abs(&self, raw: &str) -> PathBuf {
            self.tmp.path().join(raw)
        }
    }

    fn path(raw: &str) -> TreePath {
        TreePath::new(raw).unwrap()
    }

    #[tokio::test]
    async fn file_creation_hashes_and_records() {
        let mut fx = Fixture::new();
        let target = fx.abs("new.par");
        fs::write(&target, b"content").unwrap();

        fx.watcher.handle_file_created(&target).await.unwrap();

        let events = fx.store.events_since(0, 10).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.type_name(), "file_created");
        assert_eq!(events[0].event.origin(), EventOrigin::RealTime);
        assert!(fx.watcher.cached_hash(&path("new.par")).is_some());
    }

    #[tokio::test]
    async fn unchanged_content_is_suppressed() {
        let mut fx = Fixture::new();
        let target = fx.abs("f.par");
        fs::write(&target, b"same").unwrap();
        fx.watcher.handle_file_created(&target).await.unwrap();

        // touch without content change
        fx.watcher.handle_file_updated(&target).await.unwrap();
        assert_eq!(fx.store.max_id().await.unwrap(), 1);

        // real change gets through, carrying the previous hash
        let old_hash = fx.watcher.cached_hash(&path("f.par")).cloned().unwrap();
        fs::write(&target, b"different").unwrap();
        fx.watcher.handle_file_updated(&target).await.unwrap();

        let events = fx.store.events_since(1, 10).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.type_name(), "file_modified");
        assert_eq!(events[0].event.previous_hash(), Some(old_hash.as_str()));
    }

    #[tokio::test]
    async fn deletion_evicts_the_cache() {
        let mut fx = Fixture::new();
        let target = fx.abs("gone.par");
        fs::write(&target, b"x").unwrap();
        fx.watcher.handle_file_created(&target).await.unwrap();

        fx.watcher
            .handle_file_deleted(&path("gone.par"))
            .await
            .unwrap();
        assert!(fx.watcher.cached_hash(&path("gone.par")).is_none());

        let events = fx.store.events_since(1, 10).await.unwrap();
        assert_eq!(events[0].event.type_name(), "file_deleted");
    }

    #[tokio::test]
    async fn directory_deletion_evicts_the_subtree() {
        let mut fx = Fixture::new();
        fs::create_dir(fx.abs("D")).unwrap();
        let inner = fx.abs("D/a.par");
        let other = fx.abs("other.par");
        fs::write(&inner, b"a").unwrap();
        fs::write(&other, b"o").unwrap();
        fx.watcher.handle_file_created(&inner).await.unwrap();
        fx.watcher.handle_file_created(&other).await.unwrap();

        fx.watcher.handle_dir_deleted(&path("D")).await.unwrap();
        assert!(fx.watcher.cached_hash(&path("D/a.par")).is_none());
        assert!(fx.watcher.cached_hash(&path("other.par")).is_some());
    }

    #[tokio::test]
    async fn startup_seeds_the_cache_from_the_file_projection() {
        let fx = Fixture::new();
        fx.files
            .upsert(crate::store::FileRecord {
                path: path("seeded.par"),
                name: "seeded".into(),
                file_type: crate::event::EntryKind::File,
                extension: Some("par".into()),
                revision: None,
                part_name: Some("seeded".into()),
                core_name: Some("seeded".into()),
                product_main_type: Some("seeded.par".into()),
                product_sub_type: None,
                parent: None,
                parent_path: None,
                depth: 0,
                origin: EventOrigin::Initial,
                content_hash: Some("known-hash".into()),
                size: Some(1),
                modified_at: None,
            })
            .await
            .unwrap();

        let watcher = fx.watcher;
        let handle = tokio::spawn(watcher.run(async {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }));
        handle.await.unwrap().unwrap();
        // run() consumed the watcher; seeding is observable through the
        // suppression behavior exercised above and the info log. The main
        // assertion here is that a short watch over a quiet tempdir starts,
        // seeds, and stops cleanly.
    }

    #[tokio::test]
    async fn missing_root_is_fatal() {
        let fx = Fixture::new();
        let missing = fx.abs("nope");
        let pipeline = Arc::new(Pipeline::new(
            fx.store.clone(),
            ProjectorChain::new(vec![]),
        ));
        let watcher = Watcher::new(
            missing,
            pipeline,
            fx.files.clone(),
            WatcherOptions::default(),
        );
        let result = watcher.run(std::future::pending()).await;
        assert!(matches!(result, Err(VigiaError::NotFound(_))));
    }
}
