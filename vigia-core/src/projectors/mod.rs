//! Projector chain.
//!
//! Each projector is an idempotent fold from the event stream into one
//! derived table. Projectors run in fixed weight order per event (files
//! before masters before parts) so a dependent projector always reads a
//! committed upstream row for the event it is handling. A dependent lookup
//! that finds nothing (the upstream row not yet written, e.g. during a
//! partial replay) is skipped, not failed; the next event for that path
//! catches it up.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::store::StoredEvent;

mod files;
mod masters;
mod parts;

pub use files::FileProjector;
pub use masters::MasterProjector;
pub use parts::PartProjector;

/// An idempotent fold over the event stream.
#[async_trait]
pub trait Projector: Send + Sync {
    fn name(&self) -> &'static str;

    /// Lower weights run first.
    fn weight(&self) -> u8;

    async fn apply(&self, stored: &StoredEvent) -> Result<()>;
}

/// Projectors sorted by weight, applied in order for every event.
pub struct ProjectorChain {
    projectors: Vec<Arc<dyn Projector>>,
}

impl ProjectorChain {
    pub fn new(mut projectors: Vec<Arc<dyn Projector>>) -> Self {
        projectors.sort_by_key(|projector| projector.weight());
        Self { projectors }
    }

    pub async fn apply(&self, stored: &StoredEvent) -> Result<()> {
        for projector in &self.projectors {
            projector.apply(stored).await?;
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.projectors.is_empty()
    }
}

impl std::fmt::Debug for ProjectorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.projectors.iter().map(|p| p.name()).collect();
        f.debug_struct("ProjectorChain")
            .field("projectors", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Recording {
        name: &'static str,
        weight: u8,
        order: Arc<std::sync::Mutex<Vec<&'static str>>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Projector for Recording {
        fn name(&self) -> &'static str {
            self.name
        }

        fn weight(&self) -> u8 {
            self.weight
        }

        async fn apply(&self, _stored: &StoredEvent) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.order.lock().unwrap().push(self.name);
            Ok(())
        }
    }

    #[tokio::test]
    async fn chain_runs_in_weight_order() {
        use crate::event::{EventOrigin, FileSystemEvent};
        use crate::path::TreePath;

        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let chain = ProjectorChain::new(vec![
            Arc::new(Recording {
                name: "parts",
                weight: 3,
                order: order.clone(),
                calls: AtomicUsize::new(0),
            }),
            Arc::new(Recording {
                name: "files",
                weight: 1,
                order: order.clone(),
                calls: AtomicUsize::new(0),
            }),
            Arc::new(Recording {
                name: "masters",
                weight: 2,
                order: order.clone(),
                calls: AtomicUsize::new(0),
            }),
        ]);

        let stored = StoredEvent {
            id: 1,
            recorded_at: chrono::Utc::now(),
            event: FileSystemEvent::FileDeleted {
                path: TreePath::new("a.txt").unwrap(),
                origin: EventOrigin::RealTime,
            },
        };
        chain.apply(&stored).await.unwrap();

        assert_eq!(*order.lock().unwrap(), vec!["files", "masters", "parts"]);
    }
}
