//! Scheduler. Logically a min-heap over pending `ScheduledEvent`s ordered
//! by `trigger_block_number`, backed entirely by the persistent store —
//! this module is a thin, typed wrapper over
//! `Storage::get_scheduled_events_due` so the event loop doesn't reach into
//! storage internals directly.

use std::sync::Arc;

use ms_common::types::ScheduledEvent;

use crate::storage::{Storage, StorageError};

pub struct Scheduler {
    storage: Arc<dyn Storage>,
}

impl Scheduler {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// All scheduled events with `trigger_block_number <= block`, ascending
    /// by `trigger_block_number`, ties by insertion order. Re-draining the
    /// same block after a restart is safe: the handlers that produced
    /// these events would re-upsert the identical tuples, a no-op.
    pub async fn due(&self, block: u64) -> Result<Vec<ScheduledEvent>, StorageError> {
        self.storage.get_scheduled_events_due(block).await
    }
}
