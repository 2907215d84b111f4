//! Event pipeline: append to the log, then fold through the projector chain.
//!
//! One event flows through the whole chain before the next one is taken, so
//! per-path application is serialised in log order and dependent projectors
//! always see the upstream rows committed for the event they are handling.

use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::event::FileSystemEvent;
use crate::projectors::ProjectorChain;
use crate::store::{EventStore, StoredEvent};

const REPLAY_BATCH: i64 = 512;

pub struct Pipeline {
    store: Arc<dyn EventStore>,
    chain: ProjectorChain,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline").field("chain", &self.chain).finish()
    }
}

impl Pipeline {
    pub fn new(store: Arc<dyn EventStore>, chain: ProjectorChain) -> Self {
        Self { store, chain }
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    /// Append `event` and apply the full projector chain for it.
    ///
    /// The append is the atomic step; if a projector then fails, the event is
    /// already durable and a later [`Pipeline::replay_since`] catches the
    /// projections up.
    pub async fn record(&self, event: FileSystemEvent) -> Result<StoredEvent> {
        let stored = self.store.append(&event).await?;
        self.chain.apply(&stored).await?;
        Ok(stored)
    }

    /// Fold every event after `after_id` through the chain, in log order.
    /// Returns the number of events applied.
    pub async fn replay_since(&self, mut after_id: i64) -> Result<u64> {
        let mut applied = 0u64;
        loop {
            let batch = self.store.events_since(after_id, REPLAY_BATCH).await?;
            if batch.is_empty() {
                return Ok(applied);
            }
            for stored in batch {
                self.chain.apply(&stored).await?;
                after_id = stored.id;
                applied += 1;
            }
        }
    }

    /// Fold the whole log from the beginning.
    pub async fn replay_all(&self) -> Result<u64> {
        self.replay_since(0).await
    }
}
