use async_trait::async_trait;
use ms_common::ids::{ChannelKey, MonitorRequestKey};
use ms_common::{Channel, Hash32, MonitorRequest, ScheduledEvent};
use sled::transaction::{ConflictableTransactionError, TransactionError, Transactional};

use crate::domain::{BlockchainState, WaitingTransaction};

use super::{Storage, StorageError, WriteOp};

const STATE_KEY: &[u8] = b"state";

fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    Ok(bincode::serialize(value)?)
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
    Ok(bincode::deserialize(bytes)?)
}

/// `sled`-backed `Storage`. A single embedded file on disk is enough to
/// hold the five entity trees this service needs.
pub struct SledStorage {
    db: sled::Db,
    channels: sled::Tree,
    monitor_requests: sled::Tree,
    scheduled_events: sled::Tree,
    waiting_tx: sled::Tree,
    state: sled::Tree,
}

impl SledStorage {
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        Ok(Self {
            channels: db.open_tree("channels")?,
            monitor_requests: db.open_tree("monitor_requests")?,
            scheduled_events: db.open_tree("scheduled_events")?,
            waiting_tx: db.open_tree("waiting_tx")?,
            state: db.open_tree("state")?,
            db,
        })
    }

    fn apply_sync(&self, ops: Vec<WriteOp>) -> Result<(), StorageError> {
        // scheduled-event insertion order needs a monotonic tie-break;
        // sled hands one out without us needing our own counter tree.
        let seqs: Vec<Option<u64>> = ops
            .iter()
            .map(|op| match op {
                WriteOp::UpsertScheduledEvent(_) => self.db.generate_id().ok(),
                _ => None,
            })
            .collect();

        let trees = (
            &self.channels,
            &self.scheduled_events,
            &self.waiting_tx,
            &self.state,
        );

        trees
            .transaction(|(channels, scheduled_events, waiting_tx, state)| {
                for (op, seq) in ops.iter().zip(seqs.iter()) {
                    match op {
                        WriteOp::UpsertChannel(channel) => {
                            let key = tx_encode(&channel.key())?;
                            channels.insert(key, tx_encode(channel)?)?;
                        }
                        WriteOp::UpsertScheduledEvent(se) => {
                            let key = tx_encode(se)?;
                            if scheduled_events.get(&key)?.is_none() {
                                let seq = seq.expect("seq generated for UpsertScheduledEvent");
                                scheduled_events.insert(key, seq.to_be_bytes().to_vec())?;
                            }
                        }
                        WriteOp::RemoveScheduledEvent(se) => {
                            let key = tx_encode(se)?;
                            scheduled_events.remove(key)?;
                        }
                        WriteOp::AddWaitingTransaction(wt) => {
                            waiting_tx.insert(wt.tx_hash.as_bytes(), tx_encode(wt)?)?;
                        }
                        WriteOp::RemoveWaitingTransaction(hash) => {
                            waiting_tx.remove(hash.as_bytes())?;
                        }
                        WriteOp::UpdateState(bs) => {
                            state.insert(STATE_KEY, tx_encode(bs)?)?;
                        }
                    }
                }
                Ok(())
            })
            .map_err(|e: TransactionError<StorageError>| match e {
                TransactionError::Abort(inner) => inner,
                TransactionError::Storage(e) => StorageError::Sled(e),
            })
    }
}

/// Encoding failures inside a transaction closure abort the whole
/// transaction rather than panicking.
fn tx_encode<T: serde::Serialize>(
    value: &T,
) -> Result<Vec<u8>, ConflictableTransactionError<StorageError>> {
    encode(value).map_err(ConflictableTransactionError::Abort)
}

#[async_trait]
impl Storage for SledStorage {
    async fn apply(&self, ops: Vec<WriteOp>) -> Result<(), StorageError> {
        self.apply_sync(ops)
    }

    async fn get_channel(&self, key: ChannelKey) -> Result<Option<Channel>, StorageError> {
        match self.channels.get(encode(&key)?)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn upsert_monitor_request(&self, mr: MonitorRequest) -> Result<bool, StorageError> {
        let key = MonitorRequestKey::new(mr.channel, mr.non_closing_signer);
        let key_bytes = encode(&key)?;
        if let Some(existing_bytes) = self.monitor_requests.get(&key_bytes)? {
            let existing: MonitorRequest = decode(&existing_bytes)?;
            if mr.nonce <= existing.nonce {
                return Ok(false);
            }
        }
        self.monitor_requests.insert(key_bytes, encode(&mr)?)?;
        Ok(true)
    }

    async fn get_monitor_request(
        &self,
        key: MonitorRequestKey,
    ) -> Result<Option<MonitorRequest>, StorageError> {
        match self.monitor_requests.get(encode(&key)?)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn get_scheduled_events_due(
        &self,
        block: u64,
    ) -> Result<Vec<ScheduledEvent>, StorageError> {
        let mut due: Vec<(ScheduledEvent, u64)> = Vec::new();
        for entry in self.scheduled_events.iter() {
            let (key_bytes, value_bytes) = entry?;
            let event: ScheduledEvent = decode(&key_bytes)?;
            if event.trigger_block_number <= block {
                let seq = u64::from_be_bytes(value_bytes.as_ref().try_into().map_err(|_| {
                    StorageError::TransactionAborted("malformed scheduled-event sequence".into())
                })?);
                due.push((event, seq));
            }
        }
        due.sort_by_key(|(event, seq)| (event.trigger_block_number, *seq));
        Ok(due.into_iter().map(|(event, _)| event).collect())
    }

    async fn list_waiting_transactions(&self) -> Result<Vec<WaitingTransaction>, StorageError> {
        let mut out = Vec::new();
        for entry in self.waiting_tx.iter() {
            let (_, value_bytes) = entry?;
            out.push(decode(&value_bytes)?);
        }
        Ok(out)
    }

    async fn get_state(&self) -> Result<Option<BlockchainState>, StorageError> {
        match self.state.get(STATE_KEY)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }
}
