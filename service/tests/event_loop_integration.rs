//! Drives the full event loop for one cycle against an in-memory
//! `ChainAdapter` mock and a real `sled` store opened in a temporary
//! directory, the way the storage-roundtrip unit tests do it but across
//! the whole chain-task pipeline rather than one module.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use ethers_core::types::{Address, U256};
use tokio::sync::watch;

use ms_common::ids::ChannelId;
use ms_common::Channel;

use monitoring_service::chain::{Call, ChainAdapter, ChainError, Event, ReceiptStatus};
use monitoring_service::domain::BlockchainState;
use monitoring_service::event_loop::{EventLoop, EventLoopConfig};
use monitoring_service::executor::{Executor, ExecutorConfig};
use monitoring_service::storage::{SledStorage, Storage, WriteOp};

fn addr(b: u8) -> Address {
    Address::from([b; 20])
}

/// Fixed script of events replayed once; records every submitted call.
struct MockChainAdapter {
    head_block: u64,
    events: Vec<Event>,
    sent: Mutex<Vec<Call>>,
}

#[async_trait]
impl ChainAdapter for MockChainAdapter {
    async fn poll(&self, from_block: u64, to_block: u64) -> Result<Vec<Event>, ChainError> {
        Ok(self
            .events
            .iter()
            .filter(|e| e.block_number() >= from_block && e.block_number() <= to_block)
            .cloned()
            .collect())
    }

    async fn head_block(&self) -> Result<u64, ChainError> {
        Ok(self.head_block)
    }

    async fn send_transaction(&self, call: Call) -> Result<ms_common::Hash32, ChainError> {
        self.sent.lock().unwrap().push(call);
        Ok(ms_common::Hash32::from_low_u64_be(1))
    }

    async fn receipt_status(&self, _tx_hash: ms_common::Hash32) -> Result<ReceiptStatus, ChainError> {
        Ok(ReceiptStatus::Pending)
    }

    async fn effective_balance(&self, _address: Address) -> Result<U256, ChainError> {
        Ok(U256::from(1_000_000u64))
    }
}

#[tokio::test]
async fn event_loop_opens_channel_and_schedules_monitor_on_close() {
    let dir = tempfile::tempdir().unwrap();
    let storage: std::sync::Arc<dyn Storage> = std::sync::Arc::new(SledStorage::open(dir.path()).unwrap());
    let token_network = addr(1);
    let channel_id = ChannelId::from(1u64);

    storage
        .apply(vec![WriteOp::UpdateState(BlockchainState::new(
            1337,
            token_network,
            addr(9),
            0,
        ))])
        .await
        .unwrap();

    let chain = std::sync::Arc::new(MockChainAdapter {
        head_block: 5,
        events: vec![
            Event::ChannelOpened {
                token_network_address: token_network,
                channel_identifier: channel_id,
                participant1: addr(2),
                participant2: addr(3),
                settle_timeout: 20,
                block_number: 2,
            },
            Event::ChannelClosed {
                token_network_address: token_network,
                channel_identifier: channel_id,
                closing_participant: addr(2),
                block_number: 4,
            },
        ],
        sent: Mutex::new(Vec::new()),
    });

    let executor = Executor::new(
        storage.clone(),
        chain.clone(),
        ExecutorConfig {
            our_address: addr(9),
            risk_factor: 2,
            min_reward: U256::from(1u64),
        },
    );

    let event_loop = EventLoop::new(
        storage.clone(),
        chain,
        executor,
        EventLoopConfig {
            our_address: addr(9),
            required_confirmations: 0,
            poll_interval: Duration::from_secs(3600),
            monitor_window_ratio: 0.8,
        },
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = shutdown_tx.send(true);
    });
    event_loop.run(shutdown_rx).await.unwrap();

    let key = ms_common::ids::ChannelKey::new(token_network, channel_id);
    let channel = storage.get_channel(key).await.unwrap().unwrap();
    assert_eq!(channel.state, ms_common::types::ChannelState::Closed);

    let due = storage.get_scheduled_events_due(4 + 16).await.unwrap();
    assert_eq!(due.len(), 1);

    let state = storage.get_state().await.unwrap().unwrap();
    assert_eq!(state.latest_known_block, 5);
}

/// Two `NonClosingBalanceProofUpdated` events for the same channel mined in
/// the same block: a higher nonce followed by a lower one. The second
/// handler must see the first handler's in-flight `update_status` write
/// (nonce 10) and reject its own lower nonce — if it instead looked up the
/// pre-block channel (no `update_status` yet), the rejection nonce check
/// would be skipped and the lower nonce would wrongly overwrite the higher
/// one.
#[tokio::test]
async fn event_loop_threads_same_block_writes_through_later_handlers() {
    let dir = tempfile::tempdir().unwrap();
    let storage: std::sync::Arc<dyn Storage> = std::sync::Arc::new(SledStorage::open(dir.path()).unwrap());
    let token_network = addr(1);
    let channel_id = ChannelId::from(1u64);
    let channel_key = ms_common::ids::ChannelKey::new(token_network, channel_id);

    storage
        .apply(vec![
            WriteOp::UpsertChannel(Channel::new(token_network, channel_id, addr(2), addr(3), 20)),
            WriteOp::UpdateState(BlockchainState::new(1337, token_network, addr(9), 0)),
        ])
        .await
        .unwrap();

    let chain = std::sync::Arc::new(MockChainAdapter {
        head_block: 4,
        events: vec![
            Event::NonClosingBalanceProofUpdated {
                token_network_address: token_network,
                channel_identifier: channel_id,
                closing_participant: addr(2),
                nonce: 10,
                block_number: 4,
            },
            Event::NonClosingBalanceProofUpdated {
                token_network_address: token_network,
                channel_identifier: channel_id,
                closing_participant: addr(2),
                nonce: 7,
                block_number: 4,
            },
        ],
        sent: Mutex::new(Vec::new()),
    });

    let executor = Executor::new(
        storage.clone(),
        chain.clone(),
        ExecutorConfig {
            our_address: addr(9),
            risk_factor: 2,
            min_reward: U256::from(1u64),
        },
    );

    let event_loop = EventLoop::new(
        storage.clone(),
        chain,
        executor,
        EventLoopConfig {
            our_address: addr(9),
            required_confirmations: 0,
            poll_interval: Duration::from_secs(3600),
            monitor_window_ratio: 0.8,
        },
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = shutdown_tx.send(true);
    });
    event_loop.run(shutdown_rx).await.unwrap();

    let channel = storage.get_channel(channel_key).await.unwrap().unwrap();
    let update_status = channel.update_status.expect("update_status set by first event");
    assert_eq!(update_status.nonce, 10);
    assert_eq!(update_status.update_sender_address, addr(3));
}
