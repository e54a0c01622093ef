//! Persistence store. A single trait abstracts the backend, since this
//! service only has five entities to persist rather than a full chain's
//! worth of state.

mod sled_store;

use async_trait::async_trait;
use thiserror::Error;

use ms_common::ids::{ChannelKey, MonitorRequestKey};
use ms_common::{Channel, Hash32, MonitorRequest, ScheduledEvent};

use crate::domain::{BlockchainState, WaitingTransaction};

pub use sled_store::SledStorage;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("encoding error: {0}")]
    Encoding(#[from] Box<bincode::ErrorKind>),

    #[error("transaction aborted: {0}")]
    TransactionAborted(String),

    #[error("blockchain state not initialized")]
    StateUninitialized,
}

/// One mutation destined for the atomic per-tick commit. Writes from
/// different blocks are never interleaved in one transaction.
/// `MonitorRequest` upserts are deliberately absent: the ingester writes
/// that table outside of chain ticks, through
/// `Storage::upsert_monitor_request`, which is atomic on its own.
#[derive(Clone, Debug)]
pub enum WriteOp {
    UpsertChannel(Channel),
    UpsertScheduledEvent(ScheduledEvent),
    RemoveScheduledEvent(ScheduledEvent),
    AddWaitingTransaction(WaitingTransaction),
    RemoveWaitingTransaction(Hash32),
    UpdateState(BlockchainState),
}

#[async_trait]
pub trait Storage: Send + Sync {
    /// Applies every op atomically: either all land, or none do. This is
    /// the only write path for everything except `MonitorRequest`.
    async fn apply(&self, ops: Vec<WriteOp>) -> Result<(), StorageError>;

    async fn get_channel(&self, key: ChannelKey) -> Result<Option<Channel>, StorageError>;

    /// Replaces the stored request iff `mr.nonce > existing.nonce`;
    /// otherwise a silent no-op. Returns whether it was stored.
    async fn upsert_monitor_request(&self, mr: MonitorRequest) -> Result<bool, StorageError>;

    async fn get_monitor_request(
        &self,
        key: MonitorRequestKey,
    ) -> Result<Option<MonitorRequest>, StorageError>;

    /// All scheduled events with `trigger_block_number <= block`, ordered
    /// ascending by `trigger_block_number`, ties by insertion order.
    async fn get_scheduled_events_due(
        &self,
        block: u64,
    ) -> Result<Vec<ScheduledEvent>, StorageError>;

    async fn list_waiting_transactions(&self) -> Result<Vec<WaitingTransaction>, StorageError>;

    async fn get_state(&self) -> Result<Option<BlockchainState>, StorageError>;
}
