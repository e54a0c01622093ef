//! Action executor. Handles `MONITOR` and `CLAIM_REWARD` scheduled
//! actions: eligibility gating, transaction submission, and recording the
//! result — load state, evaluate a gate, submit, record, with
//! `metrics::counter!` on each branch.

use std::sync::Arc;

use ethers_core::types::{Address, U256};
use log::{error, info, warn};
use metrics::counter;

use ms_common::ids::{ChannelKey, MonitorRequestKey};
use ms_common::types::{Channel, MonitorRequest, ScheduledAction};

use crate::chain::{Call, ChainAdapter};
use crate::ingester::is_pair_valid;
use crate::storage::{Storage, StorageError, WriteOp};

/// Multiplier applied to `reward_amount` that the requester's on-deposit
/// balance must cover before the MS risks its own gas on a `monitor` call.
pub const DEFAULT_RISK_FACTOR: u64 = 2;

#[derive(Clone, Debug)]
pub struct ExecutorConfig {
    pub our_address: Address,
    pub risk_factor: u64,
    pub min_reward: U256,
}

pub struct Executor<C: ChainAdapter> {
    storage: Arc<dyn Storage>,
    chain: Arc<C>,
    config: ExecutorConfig,
}

impl<C: ChainAdapter> Executor<C> {
    pub fn new(storage: Arc<dyn Storage>, chain: Arc<C>, config: ExecutorConfig) -> Self {
        Self {
            storage,
            chain,
            config,
        }
    }

    /// Dispatches one due `ScheduledEvent.action` to the matching gate.
    pub async fn execute(&self, action: ScheduledAction) -> Result<(), StorageError> {
        match action {
            ScheduledAction::Monitor {
                channel,
                non_closing_participant,
            } => self.execute_monitor(channel, non_closing_participant).await,
            ScheduledAction::ClaimReward {
                channel,
                non_closing_participant,
            } => {
                self.execute_claim_reward(channel, non_closing_participant)
                    .await
            }
        }
    }

    async fn execute_monitor(
        &self,
        channel_key: ChannelKey,
        non_closing_participant: Address,
    ) -> Result<(), StorageError> {
        info!("triggering channel monitoring channel={:?}", channel_key);

        let mr_key = MonitorRequestKey::new(channel_key, non_closing_participant);
        let mr = match self.storage.get_monitor_request(mr_key).await? {
            Some(mr) => mr,
            None => return Ok(()),
        };

        let channel = match self.storage.get_channel(channel_key).await? {
            Some(c) => c,
            None => return Ok(()),
        };

        if !is_pair_valid(&mr, &channel) {
            warn!(
                "monitor request no longer valid for channel at trigger time channel={:?}",
                channel_key
            );
            return Ok(());
        }

        let last_onchain_nonce = channel.update_status.as_ref().map(|s| s.nonce).unwrap_or(0);

        let user_deposit = match self.chain.effective_balance(non_closing_participant).await {
            Ok(balance) => balance,
            Err(e) => {
                error!("effective_balance lookup failed channel={:?}: {e}", channel_key);
                return Ok(());
            }
        };

        if mr.reward_amount < self.config.min_reward {
            info!(
                "monitor request not executed due to insufficient reward amount channel={:?} reward={} min_reward={}",
                channel_key, mr.reward_amount, self.config.min_reward
            );
        }

        let gate = channel.closing_tx_hash.is_none()
            && mr.nonce > last_onchain_nonce
            && user_deposit >= mr.reward_amount * U256::from(self.config.risk_factor)
            && mr.reward_amount >= self.config.min_reward;

        if !gate {
            counter!("monitoring_service_monitor_gate_rejected_total").increment(1);
            return Ok(());
        }

        self.submit_monitor(channel, mr).await
    }

    async fn submit_monitor(&self, channel: Channel, mr: MonitorRequest) -> Result<(), StorageError> {
        let call = Call::Monitor {
            signer: mr.signer,
            non_closing_signer: mr.non_closing_signer,
            balance_hash: mr.balance_hash,
            nonce: mr.nonce,
            additional_hash: mr.additional_hash,
            closing_signature: mr.closing_signature,
            non_closing_signature: mr.non_closing_signature,
            reward_amount: mr.reward_amount,
            token_network: channel.token_network_address,
            reward_proof_signature: mr.reward_proof_signature,
        };

        let channel_key = channel.key();
        match self.chain.send_transaction(call).await {
            Ok(tx_hash) => {
                info!(
                    "sent transaction calling `monitor` for channel={:?} tx_hash={:?}",
                    channel_key, tx_hash
                );
                counter!("monitoring_service_monitor_tx_sent_total").increment(1);

                let mut updated = channel;
                updated.closing_tx_hash = Some(tx_hash);
                self.storage
                    .apply(vec![
                        WriteOp::UpsertChannel(updated),
                        WriteOp::AddWaitingTransaction(crate::domain::WaitingTransaction {
                            tx_hash,
                            channel: channel_key,
                            kind: crate::domain::WaitingTxKind::Monitor,
                        }),
                    ])
                    .await
            }
            Err(e) => {
                error!("sending monitor tx failed channel={:?}: {e}", channel_key);
                counter!("monitoring_service_monitor_tx_failed_total").increment(1);
                Ok(())
            }
        }
    }

    async fn execute_claim_reward(
        &self,
        channel_key: ChannelKey,
        non_closing_participant: Address,
    ) -> Result<(), StorageError> {
        info!("triggering reward claim channel={:?}", channel_key);

        let mr_key = MonitorRequestKey::new(channel_key, non_closing_participant);
        let mr = match self.storage.get_monitor_request(mr_key).await? {
            Some(mr) => mr,
            None => return Ok(()),
        };

        let channel = match self.storage.get_channel(channel_key).await? {
            Some(c) => c,
            None => return Ok(()),
        };

        let can_claim = channel.claim_tx_hash.is_none()
            && channel
                .update_status
                .as_ref()
                .map(|s| s.update_sender_address == self.config.our_address)
                .unwrap_or(false);

        let has_reward = mr.reward_amount > U256::zero();
        if !has_reward {
            warn!(
                "monitor request has no reward, skipping reward claim channel={:?} reward_amount={}",
                channel_key, mr.reward_amount
            );
        }

        if !(can_claim && has_reward) {
            counter!("monitoring_service_claim_reward_gate_rejected_total").increment(1);
            return Ok(());
        }

        let call = Call::ClaimReward {
            channel_identifier: channel_key.channel_identifier,
            token_network: channel.token_network_address,
            signer: mr.signer,
            non_closing_signer: mr.non_closing_signer,
        };

        match self.chain.send_transaction(call).await {
            Ok(tx_hash) => {
                info!(
                    "sent transaction calling `claimReward` for channel={:?} tx_hash={:?}",
                    channel_key, tx_hash
                );
                counter!("monitoring_service_claim_reward_tx_sent_total").increment(1);

                let mut updated = channel;
                updated.claim_tx_hash = Some(tx_hash);
                self.storage
                    .apply(vec![
                        WriteOp::UpsertChannel(updated),
                        WriteOp::AddWaitingTransaction(crate::domain::WaitingTransaction {
                            tx_hash,
                            channel: channel_key,
                            kind: crate::domain::WaitingTxKind::ClaimReward,
                        }),
                    ])
                    .await
            }
            Err(e) => {
                error!("sending claimReward tx failed channel={:?}: {e}", channel_key);
                counter!("monitoring_service_claim_reward_tx_failed_total").increment(1);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use ms_common::crypto::Signature65;
    use ms_common::types::OnChainUpdateStatus;
    use ms_common::ChannelId;

    use crate::chain::{ChainError, Event, ReceiptStatus};
    use crate::storage::SledStorage;

    use super::*;

    struct MockChain {
        effective_balance: U256,
        sent: Mutex<Vec<Call>>,
    }

    impl MockChain {
        fn with_balance(balance: u64) -> Self {
            Self {
                effective_balance: U256::from(balance),
                sent: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChainAdapter for MockChain {
        async fn poll(&self, _from_block: u64, _to_block: u64) -> Result<Vec<Event>, ChainError> {
            Ok(Vec::new())
        }

        async fn head_block(&self) -> Result<u64, ChainError> {
            Ok(0)
        }

        async fn send_transaction(&self, call: Call) -> Result<ms_common::Hash32, ChainError> {
            self.sent.lock().unwrap().push(call);
            Ok(ms_common::Hash32::from_low_u64_be(1))
        }

        async fn receipt_status(&self, _tx_hash: ms_common::Hash32) -> Result<ReceiptStatus, ChainError> {
            Ok(ReceiptStatus::Pending)
        }

        async fn effective_balance(&self, _address: Address) -> Result<U256, ChainError> {
            Ok(self.effective_balance)
        }
    }

    fn addr(b: u8) -> Address {
        Address::from([b; 20])
    }

    fn opened_channel() -> Channel {
        Channel::new(addr(1), ChannelId::from(1u64), addr(2), addr(3), 20)
    }

    fn monitor_request(channel: ChannelKey, reward: u64, nonce: u64) -> MonitorRequest {
        MonitorRequest {
            channel,
            balance_hash: Default::default(),
            nonce,
            additional_hash: Default::default(),
            closing_signature: Signature65([0u8; 65]),
            non_closing_signature: Signature65([0u8; 65]),
            reward_amount: U256::from(reward),
            reward_proof_signature: Signature65([0u8; 65]),
            signer: addr(2),
            non_closing_signer: addr(3),
        }
    }

    /// Opens a fresh `sled` store, seeded with `channel` and `mr`, and an
    /// `Executor` wired to a `MockChain` reporting `effective_balance`.
    async fn harness(
        channel: Channel,
        mr: MonitorRequest,
        effective_balance: u64,
        config: ExecutorConfig,
    ) -> (tempfile::TempDir, Arc<dyn Storage>, Arc<MockChain>, Executor<MockChain>) {
        let dir = tempfile::tempdir().unwrap();
        let storage: Arc<dyn Storage> = Arc::new(SledStorage::open(dir.path()).unwrap());
        storage
            .apply(vec![WriteOp::UpsertChannel(channel)])
            .await
            .unwrap();
        storage.upsert_monitor_request(mr).await.unwrap();

        let chain = Arc::new(MockChain::with_balance(effective_balance));
        let executor = Executor::new(storage.clone(), chain.clone(), config);
        (dir, storage, chain, executor)
    }

    #[tokio::test]
    async fn monitor_gate_rejects_insufficient_effective_balance() {
        let channel = opened_channel();
        let mr = monitor_request(channel.key(), 10, 1);
        let (_dir, storage, chain, executor) = harness(
            channel.clone(),
            mr,
            19, // risk_factor=2 * reward=10 needs >= 20
            ExecutorConfig {
                our_address: addr(9),
                risk_factor: 2,
                min_reward: U256::from(1u64),
            },
        )
        .await;

        executor
            .execute(ScheduledAction::Monitor {
                channel: channel.key(),
                non_closing_participant: addr(3),
            })
            .await
            .unwrap();

        assert!(chain.sent.lock().unwrap().is_empty());
        let stored = storage.get_channel(channel.key()).await.unwrap().unwrap();
        assert!(stored.closing_tx_hash.is_none());
    }

    #[tokio::test]
    async fn monitor_gate_rejects_reward_below_min_reward() {
        let channel = opened_channel();
        let mr = monitor_request(channel.key(), 1, 1);
        let (_dir, _storage, chain, executor) = harness(
            channel.clone(),
            mr,
            1_000,
            ExecutorConfig {
                our_address: addr(9),
                risk_factor: 2,
                min_reward: U256::from(5u64),
            },
        )
        .await;

        executor
            .execute(ScheduledAction::Monitor {
                channel: channel.key(),
                non_closing_participant: addr(3),
            })
            .await
            .unwrap();

        assert!(chain.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn monitor_executes_and_records_waiting_transaction_when_gate_passes() {
        let channel = opened_channel();
        let mr = monitor_request(channel.key(), 10, 1);
        let (_dir, storage, chain, executor) = harness(
            channel.clone(),
            mr,
            1_000,
            ExecutorConfig {
                our_address: addr(9),
                risk_factor: 2,
                min_reward: U256::from(1u64),
            },
        )
        .await;

        executor
            .execute(ScheduledAction::Monitor {
                channel: channel.key(),
                non_closing_participant: addr(3),
            })
            .await
            .unwrap();

        assert_eq!(chain.sent.lock().unwrap().len(), 1);
        let stored = storage.get_channel(channel.key()).await.unwrap().unwrap();
        assert!(stored.closing_tx_hash.is_some());
        assert_eq!(storage.list_waiting_transactions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn monitor_skipped_once_a_monitor_tx_is_already_pending() {
        let mut channel = opened_channel();
        channel.closing_tx_hash = Some(ms_common::Hash32::from_low_u64_be(42));
        let mr = monitor_request(channel.key(), 10, 1);
        let (_dir, _storage, chain, executor) = harness(
            channel.clone(),
            mr,
            1_000,
            ExecutorConfig {
                our_address: addr(9),
                risk_factor: 2,
                min_reward: U256::from(1u64),
            },
        )
        .await;

        executor
            .execute(ScheduledAction::Monitor {
                channel: channel.key(),
                non_closing_participant: addr(3),
            })
            .await
            .unwrap();

        assert!(chain.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn claim_reward_skipped_when_already_claimed() {
        let mut channel = opened_channel();
        channel.claim_tx_hash = Some(ms_common::Hash32::from_low_u64_be(7));
        channel.update_status = Some(OnChainUpdateStatus {
            update_sender_address: addr(9),
            nonce: 3,
        });
        let mr = monitor_request(channel.key(), 10, 3);
        let (_dir, _storage, chain, executor) = harness(
            channel.clone(),
            mr,
            1_000,
            ExecutorConfig {
                our_address: addr(9),
                risk_factor: 2,
                min_reward: U256::from(1u64),
            },
        )
        .await;

        executor
            .execute(ScheduledAction::ClaimReward {
                channel: channel.key(),
                non_closing_participant: addr(3),
            })
            .await
            .unwrap();

        assert!(chain.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn claim_reward_skipped_when_update_sender_is_not_us() {
        let mut channel = opened_channel();
        channel.update_status = Some(OnChainUpdateStatus {
            update_sender_address: addr(50),
            nonce: 3,
        });
        let mr = monitor_request(channel.key(), 10, 3);
        let (_dir, _storage, chain, executor) = harness(
            channel.clone(),
            mr,
            1_000,
            ExecutorConfig {
                our_address: addr(9),
                risk_factor: 2,
                min_reward: U256::from(1u64),
            },
        )
        .await;

        executor
            .execute(ScheduledAction::ClaimReward {
                channel: channel.key(),
                non_closing_participant: addr(3),
            })
            .await
            .unwrap();

        assert!(chain.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn claim_reward_executes_when_we_sent_the_latest_update() {
        let mut channel = opened_channel();
        channel.update_status = Some(OnChainUpdateStatus {
            update_sender_address: addr(9),
            nonce: 3,
        });
        let mr = monitor_request(channel.key(), 10, 3);
        let (_dir, storage, chain, executor) = harness(
            channel.clone(),
            mr,
            1_000,
            ExecutorConfig {
                our_address: addr(9),
                risk_factor: 2,
                min_reward: U256::from(1u64),
            },
        )
        .await;

        executor
            .execute(ScheduledAction::ClaimReward {
                channel: channel.key(),
                non_closing_participant: addr(3),
            })
            .await
            .unwrap();

        assert_eq!(chain.sent.lock().unwrap().len(), 1);
        let stored = storage.get_channel(channel.key()).await.unwrap().unwrap();
        assert!(stored.claim_tx_hash.is_some());
    }
}
