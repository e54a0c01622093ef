//! Event loop: drains the chain and scheduled-action streams in lock-step,
//! committing each block atomically. This is the sole writer of
//! channel/scheduled-event/waiting-tx/blockchain-state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info};
use metrics::counter;
use tokio::sync::watch;
use tokio::time::sleep;

use ms_common::ids::ChannelKey;
use ms_common::Channel;

use crate::chain::{ChainAdapter, Event, ReceiptStatus};
use crate::domain::BlockchainState;
use crate::error::MonitoringError;
use crate::executor::Executor;
use crate::handlers::{self, HandlerContext};
use crate::scheduler::Scheduler;
use crate::storage::{Storage, StorageError, WriteOp};

pub struct EventLoopConfig {
    pub our_address: ms_common::Address,
    pub required_confirmations: u64,
    pub poll_interval: Duration,
    pub monitor_window_ratio: f64,
}

/// The event loop's shared, read-mostly context: constructed once in
/// `main`, held by `Arc`, never mutated after construction.
pub struct EventLoop<C: ChainAdapter> {
    storage: Arc<dyn Storage>,
    chain: Arc<C>,
    scheduler: Scheduler,
    executor: Executor<C>,
    config: EventLoopConfig,
}

impl<C: ChainAdapter> EventLoop<C> {
    pub fn new(
        storage: Arc<dyn Storage>,
        chain: Arc<C>,
        executor: Executor<C>,
        config: EventLoopConfig,
    ) -> Self {
        let scheduler = Scheduler::new(storage.clone());
        Self {
            storage,
            chain,
            scheduler,
            executor,
            config,
        }
    }

    /// Runs cycles until `shutdown` fires. A shutdown signal is observed
    /// between cycles only; in-flight RPC calls within a cycle are not
    /// cancelled.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), MonitoringError> {
        loop {
            if let Err(e) = self.run_once().await {
                error!("event loop cycle failed: {e}");
                if e.is_fatal() {
                    error!("fatal error, aborting event loop");
                    return Err(e);
                }
            }

            tokio::select! {
                _ = sleep(self.config.poll_interval) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("shutdown signal received, exiting event loop");
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn run_once(&self) -> Result<(), MonitoringError> {
        let state = self
            .storage
            .get_state()
            .await?
            .ok_or(StorageError::StateUninitialized)?;
        let cursor = state.latest_known_block;

        let head = self.chain.head_block().await?;
        let to_block = head.saturating_sub(self.config.required_confirmations);

        if cursor < to_block {
            let events = self.chain.poll(cursor + 1, to_block).await?;
            self.process_batch(state, cursor + 1, to_block, events)
                .await?;
        } else {
            debug!("no new confirmed blocks cursor={cursor} to_block={to_block}");
        }

        self.drain_scheduler(to_block.max(cursor)).await?;
        self.poll_waiting_transactions().await?;

        Ok(())
    }

    /// Processes every block in `[from_block, to_block]`, including blocks
    /// with no events, emitting a synthetic `UpdatedHeadBlock` for each so
    /// the cursor advances monotonically even across empty blocks.
    ///
    /// `pending_channels` tracks every `UpsertChannel` produced so far in
    /// this batch, since those writes aren't visible in `storage` until the
    /// owning block's `apply` commits — without it, two events on the same
    /// channel mined in the same block (e.g. a close immediately followed by
    /// a balance-proof update) would have the second handler look up the
    /// channel's pre-block state instead of the first handler's mutation.
    async fn process_batch(
        &self,
        mut state: BlockchainState,
        from_block: u64,
        to_block: u64,
        events: Vec<Event>,
    ) -> Result<(), MonitoringError> {
        let mut events = events.into_iter().peekable();
        let mut pending_channels: HashMap<ChannelKey, Channel> = HashMap::new();

        for block_number in from_block..=to_block {
            let mut ops = Vec::new();

            while matches!(events.peek(), Some(e) if e.block_number() == block_number) {
                let event = events.next().expect("peeked Some above");
                let channel_key = channel_key_of(&event);
                let existing_channel = match channel_key {
                    Some(key) => match pending_channels.get(&key) {
                        Some(channel) => Some(channel.clone()),
                        None => self.storage.get_channel(key).await?,
                    },
                    None => None,
                };

                let ctx = HandlerContext {
                    our_address: self.config.our_address,
                    latest_known_block: state.latest_known_block,
                    existing_channel: existing_channel.as_ref(),
                    monitor_window_ratio: self.config.monitor_window_ratio,
                };
                let outcome = handlers::dispatch(&event, &ctx);

                if let Some(channel) = outcome.channel {
                    pending_channels.insert(channel.key(), channel.clone());
                    ops.push(WriteOp::UpsertChannel(channel));
                }
                for scheduled_event in outcome.scheduled_events {
                    ops.push(WriteOp::UpsertScheduledEvent(scheduled_event));
                }
                counter!("monitoring_service_events_processed_total").increment(1);
            }

            state.latest_known_block = block_number;
            ops.push(WriteOp::UpdateState(state));
            self.storage.apply(ops).await?;
        }

        Ok(())
    }

    async fn drain_scheduler(&self, block: u64) -> Result<(), MonitoringError> {
        let due = self.scheduler.due(block).await?;
        for scheduled_event in due {
            self.executor.execute(scheduled_event.action).await?;
            self.storage
                .apply(vec![WriteOp::RemoveScheduledEvent(scheduled_event)])
                .await?;
            counter!("monitoring_service_scheduled_actions_drained_total").increment(1);
        }
        Ok(())
    }

    async fn poll_waiting_transactions(&self) -> Result<(), MonitoringError> {
        for waiting_tx in self.storage.list_waiting_transactions().await? {
            match self.chain.receipt_status(waiting_tx.tx_hash).await {
                Ok(ReceiptStatus::Confirmed) => {
                    info!(
                        "transaction confirmed tx_hash={:?} channel={:?}",
                        waiting_tx.tx_hash, waiting_tx.channel
                    );
                    self.storage
                        .apply(vec![WriteOp::RemoveWaitingTransaction(waiting_tx.tx_hash)])
                        .await?;
                }
                Ok(ReceiptStatus::Reverted) => {
                    error!(
                        "transaction reverted tx_hash={:?} channel={:?} (no automatic resubmission)",
                        waiting_tx.tx_hash, waiting_tx.channel
                    );
                    self.storage
                        .apply(vec![WriteOp::RemoveWaitingTransaction(waiting_tx.tx_hash)])
                        .await?;
                }
                Ok(ReceiptStatus::Pending) => {}
                Err(e) => {
                    error!(
                        "receipt lookup failed tx_hash={:?}: {e}",
                        waiting_tx.tx_hash
                    );
                }
            }
        }
        Ok(())
    }
}

/// The channel identity an event refers to, if any (`MonitorRewardClaimed`
/// and `UpdatedHeadBlock` carry none).
fn channel_key_of(event: &Event) -> Option<ChannelKey> {
    match event {
        Event::ChannelOpened {
            token_network_address,
            channel_identifier,
            ..
        }
        | Event::ChannelClosed {
            token_network_address,
            channel_identifier,
            ..
        }
        | Event::NonClosingBalanceProofUpdated {
            token_network_address,
            channel_identifier,
            ..
        }
        | Event::ChannelSettled {
            token_network_address,
            channel_identifier,
            ..
        }
        | Event::MonitorNewBalanceProof {
            token_network_address,
            channel_identifier,
            ..
        } => Some(ChannelKey::new(*token_network_address, *channel_identifier)),
        Event::MonitorRewardClaimed { .. } | Event::UpdatedHeadBlock { .. } => None,
    }
}
