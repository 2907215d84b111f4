//! Initial filesystem scan.
//!
//! One-shot recursive crawl that turns everything under the root into
//! `initial`-origin creation events. Two passes: a counting pass for
//! progress reporting, then a top-down traversal (directories before their
//! contents) that records an event per entry.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::error::{Result, VigiaError};
use crate::event::{EventOrigin, FileSystemEvent};
use crate::hash;
use crate::path::TreePath;
use crate::pipeline::Pipeline;

/// Counters exposed after (and during) a scan.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub directories: u64,
    pub files: u64,
    pub total_bytes: u64,
    pub errors: u64,
}

impl ScanStats {
    pub fn total_items(&self) -> u64 {
        self.directories + self.files
    }
}

/// Progress callback: (processed items, total items, current path).
pub type ProgressFn<'a> = &'a mut dyn FnMut(u64, u64, &Path);

#[derive(Debug, Clone)]
pub struct Scanner {
    root: PathBuf,
    follow_links: bool,
}

impl Scanner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            // the document tree uses symlinked product folders; traversal
            // visits their targets
            follow_links: true,
        }
    }

    pub fn with_follow_links(mut self, follow: bool) -> Self {
        self.follow_links = follow;
        self
    }

    /// Crawl the root and record a creation event for every entry found.
    ///
    /// Per-item failures (unreadable entries, paths that vanish mid-scan)
    /// are counted and skipped; only a missing or non-directory root aborts.
    pub async fn scan(
        &self,
        pipeline: &Pipeline,
        mut progress: Option<ProgressFn<'_>>,
    ) -> Result<ScanStats> {
        if !self.root.exists() {
            return Err(VigiaError::NotFound(format!(
                "scan root does not exist: {}",
                self.root.display()
            )));
        }
        if !self.root.is_dir() {
            return Err(VigiaError::NotADirectory(self.root.display().to_string()));
        }

        info!(root = %self.root.display(), "starting initial filesystem scan");

        let total = self.count_entries();
        let mut stats = ScanStats::default();
        let mut processed = 0u64;

        for entry in self.walker() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(error = %err, "error walking directory");
                    stats.errors += 1;
                    continue;
                }
            };
            if entry.depth() == 0 {
                continue;
            }

            processed += 1;
            if let Some(report) = progress.as_mut() {
                report(processed, total, entry.path());
            }

            let path = match TreePath::from_absolute(&self.root, entry.path()) {
                Ok(path) => path,
                Err(err) => {
                    warn!(path = %entry.path().display(), error = %err, "skipping entry");
                    stats.errors += 1;
                    continue;
                }
            };

            let event = if entry.file_type().is_dir() {
                stats.directories += 1;
                FileSystemEvent::DirectoryCreated {
                    path,
                    origin: EventOrigin::Initial,
                }
            } else {
                let (modified_at, size) = match entry.metadata() {
                    Ok(meta) => (
                        meta.modified().ok().map(DateTime::<Utc>::from),
                        Some(meta.len()),
                    ),
                    Err(err) => {
                        warn!(path = %entry.path().display(), error = %err, "could not stat file");
                        (None, None)
                    }
                };
                stats.files += 1;
                stats.total_bytes += size.unwrap_or(0);
                FileSystemEvent::FileCreated {
                    path,
                    origin: EventOrigin::Initial,
                    hash: hash::fingerprint(entry.path()),
                    modified_at,
                    size,
                }
            };

            if let Err(err) = pipeline.record(event).await {
                warn!(path = %entry.path().display(), error = %err, "failed to record scan event");
                stats.errors += 1;
            }
        }

        info!(
            directories = stats.directories,
            files = stats.files,
            total_bytes = stats.total_bytes,
            errors = stats.errors,
            "filesystem scan completed"
        );

        Ok(stats)
    }

    /// Counting pass for progress totals. Walk errors here are ignored; the
    /// emitting pass accounts for them.
    fn count_entries(&self) -> u64 {
        self.walker()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.depth() > 0)
            .count() as u64
    }

    fn walker(&self) -> walkdir::IntoIter {
        WalkDir::new(&self.root)
            .follow_links(self.follow_links)
            .into_iter()
    }
}
