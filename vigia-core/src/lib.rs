//! # Vigia Core
//!
//! Event-sourced filesystem tracker for engineering document trees.
//!
//! Every mutation under a watched root (CAD master files, their slave PDFs,
//! and constituent parts) is recorded as an immutable event; derived,
//! queryable state is rebuilt from the log by an ordered chain of
//! projectors.
//!
//! ## Overview
//!
//! - **Observation**: [`scan::Scanner`] performs the initial crawl,
//!   [`scan::Watcher`] turns live change notifications into events.
//! - **Reconciliation**: [`scan::Reconciler`] detects drift between the
//!   filesystem and the recorded log and emits corrective events.
//! - **Projection**: [`projectors::FileProjector`],
//!   [`projectors::MasterProjector`] and [`projectors::PartProjector`] fold
//!   the log into the `files`, `masters` and `parts` tables, in that order.
//! - **Storage**: trait ports in [`store`] with Postgres and in-memory
//!   implementations.
//!
//! ## Pipeline
//!
//! [`pipeline::Pipeline`] couples the event store with the projector chain:
//! each recorded event is appended once and folded through every projector
//! before the next event is taken, which keeps dependent projections
//! consistent per event and makes full-log replay idempotent.

pub mod config;
pub mod error;
pub mod event;
pub mod hash;
pub mod naming;
pub mod path;
pub mod pipeline;
pub mod projectors;
pub mod scan;
pub mod store;

pub use config::VigiaConfig;
pub use error::{Result, VigiaError};
pub use event::{EntryKind, EventOrigin, FileSystemEvent};
pub use path::TreePath;
pub use pipeline::Pipeline;
pub use projectors::{FileProjector, MasterProjector, PartProjector, ProjectorChain};
pub use scan::{ReconcileReport, Reconciler, ScanStats, Scanner, Watcher, WatcherOptions};
pub use store::{PostgresDatabase, StoredEvent};

use std::sync::Arc;

/// Wire the standard projector chain over the given stores.
pub fn standard_chain(
    files: Arc<dyn store::FileStore>,
    masters: Arc<dyn store::MasterStore>,
    parts: Arc<dyn store::PartStore>,
    config: &VigiaConfig,
) -> ProjectorChain {
    ProjectorChain::new(vec![
        Arc::new(FileProjector::new(
            files.clone(),
            config.filesystem.clone(),
        )),
        Arc::new(MasterProjector::new(
            files.clone(),
            masters.clone(),
            config.masterfiles.clone(),
        )),
        Arc::new(PartProjector::new(
            files,
            masters,
            parts,
            config.parts.clone(),
            config.masterfiles.clone(),
        )),
    ])
}
