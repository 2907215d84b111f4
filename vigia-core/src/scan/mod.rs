//! Filesystem observation: initial crawl, live watch, drift reconciliation.

pub mod reconciler;
pub mod scanner;
pub mod watcher;

pub use reconciler::{ReconcileReport, Reconciler};
pub use scanner::{ScanStats, Scanner};
pub use watcher::{Watcher, WatcherOptions};
