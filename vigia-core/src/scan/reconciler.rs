//! Drift reconciliation.
//!
//! Compares a fresh crawl of the filesystem against the event log's
//! latest-event-per-path view and records corrective `reconciled` events for
//! every discrepancy. The filesystem and the log are read unsynchronised; a
//! file changing mid-crawl yields a slightly stale picture that the next
//! reconciliation pass corrects.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{Result, VigiaError};
use crate::event::{EntryKind, EventOrigin, FileSystemEvent};
use crate::hash;
use crate::path::TreePath;
use crate::pipeline::Pipeline;
use crate::store::StoredEvent;

/// Outcome counters returned to the caller even when some corrective
/// emissions failed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Items found on the filesystem.
    pub scanned: u64,
    /// Mismatches between filesystem and event log.
    pub discrepancies: u64,
    /// Corrective events successfully recorded.
    pub events_created: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DiscrepancyReason {
    /// Recorded as existing, absent from the filesystem.
    MissingFromFilesystem,
    /// Exists on the filesystem, never recorded.
    MissingEvent,
    /// Recreated after its latest event marked it deleted.
    DeletedButExists,
    /// File mtime is strictly later than its latest event.
    ModifiedAfterEvent,
}

#[derive(Debug)]
struct CurrentEntry {
    kind: EntryKind,
    modified_at: Option<DateTime<Utc>>,
    size: Option<u64>,
    hash: Option<String>,
}

#[derive(Debug)]
struct Discrepancy {
    path: TreePath,
    kind: EntryKind,
    reason: DiscrepancyReason,
    current: Option<CurrentEntry>,
    latest: Option<StoredEvent>,
}

#[derive(Debug, Clone)]
pub struct Reconciler {
    root: PathBuf,
    /// Skip content hashing during the crawl (faster, metadata-only).
    skip_hashes: bool,
}

impl Reconciler {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            skip_hashes: false,
        }
    }

    pub fn with_skip_hashes(mut self, skip: bool) -> Self {
        self.skip_hashes = skip;
        self
    }

    pub async fn reconcile(&self, pipeline: &Pipeline) -> Result<ReconcileReport> {
        if !self.root.exists() {
            return Err(VigiaError::NotFound(format!(
                "reconcile root does not exist: {}",
                self.root.display()
            )));
        }
        if !self.root.is_dir() {
            return Err(VigiaError::NotADirectory(self.root.display().to_string()));
        }

        info!(root = %self.root.display(), "starting filesystem reconciliation");

        let current = self.crawl();
        let timeline = pipeline.store().latest_per_path().await?;

        let mut discrepancies = Vec::new();
        self.find_vanished(&current, &timeline, &mut discrepancies);
        self.find_existing(&current, &timeline, &mut discrepancies);

        let found = discrepancies.len() as u64;
        let created = self.emit_corrections(pipeline, discrepancies).await;

        let report = ReconcileReport {
            scanned: current.len() as u64,
            discrepancies: found,
            events_created: created,
        };
        info!(
            scanned = report.scanned,
            discrepancies = report.discrepancies,
            events_created = report.events_created,
            "reconciliation completed"
        );
        Ok(report)
    }

    fn crawl(&self) -> HashMap<TreePath, CurrentEntry> {
        let mut current = HashMap::new();

        for entry in WalkDir::new(&self.root).follow_links(true) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(error = %err, "error crawling directory");
                    continue;
                }
            };
            if entry.depth() == 0 {
                continue;
            }
            let path = match TreePath::from_absolute(&self.root, entry.path()) {
                Ok(path) => path,
                Err(err) => {
                    warn!(path = %entry.path().display(), error = %err, "skipping entry");
                    continue;
                }
            };

            let is_dir = entry.file_type().is_dir();
            let (modified_at, size) = match entry.metadata() {
                Ok(meta) => (
                    meta.modified().ok().map(DateTime::<Utc>::from),
                    (!is_dir).then(|| meta.len()),
                ),
                Err(_) => (None, None),
            };
            let hash = if is_dir || self.skip_hashes {
                None
            } else {
                hash::fingerprint(entry.path())
            };

            current.insert(
                path,
                CurrentEntry {
                    kind: if is_dir {
                        EntryKind::Directory
                    } else {
                        EntryKind::File
                    },
                    modified_at,
                    size,
                    hash,
                },
            );
        }

        current
    }

    /// Phase 1: paths the log believes exist that are gone from disk.
    fn find_vanished(
        &self,
        current: &HashMap<TreePath, CurrentEntry>,
        timeline: &HashMap<TreePath, StoredEvent>,
        out: &mut Vec<Discrepancy>,
    ) {
        for (path, stored) in timeline {
            if stored.event.is_deletion() {
                continue;
            }
            if !current.contains_key(path) {
                out.push(Discrepancy {
                    path: path.clone(),
                    kind: stored.event.entry_kind(),
                    reason: DiscrepancyReason::MissingFromFilesystem,
                    current: None,
                    latest: Some(stored.clone()),
                });
            }
        }
    }

    /// Phase 2: checks for paths that exist on disk.
    fn find_existing(
        &self,
        current: &HashMap<TreePath, CurrentEntry>,
        timeline: &HashMap<TreePath, StoredEvent>,
        out: &mut Vec<Discrepancy>,
    ) {
        for (path, entry) in current {
            match timeline.get(path) {
                None => out.push(Discrepancy {
                    path: path.clone(),
                    kind: entry.kind,
                    reason: DiscrepancyReason::MissingEvent,
                    current: Some(CurrentEntry {
                        kind: entry.kind,
                        modified_at: entry.modified_at,
                        size: entry.size,
                        hash: entry.hash.clone(),
                    }),
                    latest: None,
                }),
                Some(stored) if stored.event.is_deletion() => out.push(Discrepancy {
                    path: path.clone(),
                    kind: entry.kind,
                    reason: DiscrepancyReason::DeletedButExists,
                    current: Some(CurrentEntry {
                        kind: entry.kind,
                        modified_at: entry.modified_at,
                        size: entry.size,
                        hash: entry.hash.clone(),
                    }),
                    latest: Some(stored.clone()),
                }),
                Some(stored) => {
                    if entry.kind == EntryKind::File
                        && entry
                            .modified_at
                            .is_some_and(|mtime| mtime > stored.recorded_at)
                    {
                        out.push(Discrepancy {
                            path: path.clone(),
                            kind: EntryKind::File,
                            reason: DiscrepancyReason::ModifiedAfterEvent,
                            current: Some(CurrentEntry {
                                kind: entry.kind,
                                modified_at: entry.modified_at,
                                size: entry.size,
                                hash: entry.hash.clone(),
                            }),
                            latest: Some(stored.clone()),
                        });
                    }
                }
            }
        }
    }

    /// Order corrective events so directory deletions apply children before
    /// parents, then record them. Emission failures are logged and excluded
    /// from the returned count.
    async fn emit_corrections(
        &self,
        pipeline: &Pipeline,
        mut discrepancies: Vec<Discrepancy>,
    ) -> u64 {
        discrepancies.sort_by(|a, b| {
            let a_del = a.reason == DiscrepancyReason::MissingFromFilesystem;
            let b_del = b.reason == DiscrepancyReason::MissingFromFilesystem;
            match (a_del, b_del) {
                // deletions first, deepest paths before their parents,
                // reverse-lexicographic at equal depth
                (true, true) => b
                    .path
                    .depth()
                    .cmp(&a.path.depth())
                    .then_with(|| b.path.as_str().cmp(a.path.as_str())),
                (true, false) => std::cmp::Ordering::Less,
                (false, true) => std::cmp::Ordering::Greater,
                (false, false) => std::cmp::Ordering::Equal,
            }
        });

        let mut created = 0u64;
        for discrepancy in discrepancies {
            let event = match self.correction_for(&discrepancy) {
                Some(event) => event,
                None => continue,
            };
            debug!(
                path = %discrepancy.path,
                reason = ?discrepancy.reason,
                "recording reconciliation event"
            );
            match pipeline.record(event).await {
                Ok(_) => created += 1,
                Err(err) => {
                    warn!(
                        path = %discrepancy.path,
                        error = %err,
                        "failed to record reconciliation event"
                    );
                }
            }
        }
        created
    }

    fn correction_for(&self, discrepancy: &Discrepancy) -> Option<FileSystemEvent> {
        let path = discrepancy.path.clone();
        match discrepancy.reason {
            DiscrepancyReason::MissingFromFilesystem => Some(match discrepancy.kind {
                EntryKind::Directory => FileSystemEvent::DirectoryDeleted {
                    path,
                    origin: EventOrigin::Reconciled,
                },
                EntryKind::File => FileSystemEvent::FileDeleted {
                    path,
                    origin: EventOrigin::Reconciled,
                },
            }),
            DiscrepancyReason::MissingEvent | DiscrepancyReason::DeletedButExists => {
                Some(match discrepancy.kind {
                    EntryKind::Directory => FileSystemEvent::DirectoryCreated {
                        path,
                        origin: EventOrigin::Reconciled,
                    },
                    EntryKind::File => {
                        let current = discrepancy.current.as_ref()?;
                        FileSystemEvent::FileCreated {
                            path,
                            origin: EventOrigin::Reconciled,
                            hash: current.hash.clone(),
                            modified_at: current.modified_at,
                            size: current.size,
                        }
                    }
                })
            }
            DiscrepancyReason::ModifiedAfterEvent => {
                let current = discrepancy.current.as_ref()?;
                Some(FileSystemEvent::FileModified {
                    path,
                    origin: EventOrigin::Reconciled,
                    hash: current.hash.clone(),
                    modified_at: current.modified_at,
                    size: current.size,
                    previous_hash: discrepancy
                        .latest
                        .as_ref()
                        .and_then(|stored| stored.event.hash().map(str::to_string)),
                })
            }
        }
    }
}
