//! Off-chain request ingester. Validates a `RequestMonitoring` message's
//! two independent signatures against the balance-proof and reward-proof
//! digests, checks it against the stored channel, and upserts the
//! resulting `MonitorRequest`.
//!
//! `is_pair_valid` is consulted both here, at insertion, and again by the
//! action executor at trigger time, as defense in depth against a channel
//! mutating between the two.

use std::sync::Arc;

use ethers_core::types::U256;
use log::{info, warn};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use ms_common::crypto::{self, MessageType};
use ms_common::ids::ChannelKey;
use ms_common::types::{Channel, ChannelState, MonitorRequest};
use ms_common::{Address, CryptoError, Hash32, Signature65};

use crate::storage::{Storage, StorageError};

/// True iff both recovered signers are the channel's participant pair and
/// distinct from each other.
pub fn is_pair_valid(mr: &MonitorRequest, channel: &Channel) -> bool {
    mr.is_valid_for(channel)
}

/// Wire representation of the `RequestMonitoring` off-chain message, with
/// snake_case field names. This struct only carries the inputs to the
/// validation pipeline, not the already-recovered `MonitorRequest`.
#[derive(Clone, Debug)]
pub struct RequestMonitoring {
    pub chain_id: u64,
    pub token_network_address: Address,
    pub channel_identifier: ms_common::ChannelId,
    pub balance_hash: Hash32,
    pub nonce: u64,
    pub additional_hash: Hash32,
    pub closing_signature: Signature65,
    pub non_closing_signature: Signature65,
    pub reward_amount: U256,
    pub reward_proof_signature: Signature65,
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("signature recovery failed: {0}")]
    Crypto(#[from] CryptoError),

    #[error("chain id mismatch: message has {message}, we are on {ours}")]
    ChainIdMismatch { message: u64, ours: u64 },

    #[error("unknown channel {0:?}")]
    UnknownChannel(ChannelKey),

    #[error("channel {0:?} is not OPENED")]
    ChannelNotOpen(ChannelKey),

    #[error("recovered signers are not this channel's participant pair")]
    ParticipantMismatch,

    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub struct Ingester {
    our_chain_id: u64,
    min_reward: U256,
}

impl Ingester {
    pub fn new(our_chain_id: u64, min_reward: U256) -> Self {
        Self {
            our_chain_id,
            min_reward,
        }
    }

    /// Runs the full validation pipeline and, if accepted, stores the request.
    /// Returns whether it replaced the stored request (see
    /// `Storage::upsert_monitor_request`); `Ok(false)` means the message was
    /// valid but superseded by an already-stored, equal-or-newer nonce.
    pub async fn ingest(
        &self,
        storage: &dyn Storage,
        request: RequestMonitoring,
    ) -> Result<bool, IngestError> {
        if request.chain_id != self.our_chain_id {
            return Err(IngestError::ChainIdMismatch {
                message: request.chain_id,
                ours: self.our_chain_id,
            });
        }

        let balance_proof_digest = crypto::balance_proof_digest(
            request.token_network_address,
            request.chain_id,
            MessageType::BalanceProof,
            request.channel_identifier.0,
            request.balance_hash,
            request.nonce,
            request.additional_hash,
        );
        let signer = crypto::recover_signer(balance_proof_digest, &request.closing_signature)?;

        let non_closing_digest =
            crypto::non_closing_digest(balance_proof_digest, &request.closing_signature);
        let non_closing_signer =
            crypto::recover_signer(non_closing_digest, &request.non_closing_signature)?;

        let reward_proof_digest = crypto::reward_proof_digest(
            request.chain_id,
            request.token_network_address,
            non_closing_signer,
            request.reward_amount,
            request.channel_identifier.0,
            request.nonce,
        );
        let reward_proof_signer =
            crypto::recover_signer(reward_proof_digest, &request.reward_proof_signature)?;
        if reward_proof_signer != non_closing_signer {
            return Err(CryptoError::RewardProofSignerMismatch.into());
        }

        let channel_key = ChannelKey::new(request.token_network_address, request.channel_identifier);
        let channel = storage
            .get_channel(channel_key)
            .await?
            .ok_or(IngestError::UnknownChannel(channel_key))?;

        if channel.state != ChannelState::Opened {
            return Err(IngestError::ChannelNotOpen(channel_key));
        }

        let mr = MonitorRequest {
            channel: channel_key,
            balance_hash: request.balance_hash,
            nonce: request.nonce,
            additional_hash: request.additional_hash,
            closing_signature: request.closing_signature,
            non_closing_signature: request.non_closing_signature,
            reward_amount: request.reward_amount,
            reward_proof_signature: request.reward_proof_signature,
            signer,
            non_closing_signer,
        };

        if !is_pair_valid(&mr, &channel) {
            warn!("MR signed by unknown or duplicate party channel={:?}", channel_key);
            return Err(IngestError::ParticipantMismatch);
        }

        if mr.reward_amount < self.min_reward {
            info!(
                "storing monitor request below min_reward (informational only) channel={:?} reward={} min_reward={}",
                channel_key, mr.reward_amount, self.min_reward
            );
        }

        let stored = storage.upsert_monitor_request(mr).await?;
        Ok(stored)
    }
}

/// One inbound `RequestMonitoring` plus a reply channel for the caller
/// waiting on the accept/reject decision. The actual pub/sub transport is
/// an external collaborator; this is the boundary it hands messages
/// across.
pub type IngestJob = (RequestMonitoring, oneshot::Sender<Result<bool, IngestError>>);

/// Runs the off-chain ingester as its own cooperating task (see the
/// concurrency model): drains `receiver` and writes only to the
/// `MonitorRequest` table, never touching channel or scheduler state.
pub async fn run_ingester_task(
    ingester: Ingester,
    storage: Arc<dyn Storage>,
    mut receiver: mpsc::Receiver<IngestJob>,
) {
    while let Some((request, reply)) = receiver.recv().await {
        let result = ingester.ingest(storage.as_ref(), request).await;
        if let Err(e) = &result {
            warn!("rejected off-chain RequestMonitoring: {e}");
        }
        let _ = reply.send(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ms_common::types::OnChainUpdateStatus;

    fn addr(b: u8) -> Address {
        Address::from([b; 20])
    }

    #[test]
    fn is_pair_valid_rejects_non_participant() {
        let channel = Channel::new(addr(1), ms_common::ChannelId::from(1u64), addr(2), addr(3), 20);
        let mr = MonitorRequest {
            channel: channel.key(),
            balance_hash: Hash32::zero(),
            nonce: 1,
            additional_hash: Hash32::zero(),
            closing_signature: Signature65([0u8; 65]),
            non_closing_signature: Signature65([0u8; 65]),
            reward_amount: U256::from(1),
            reward_proof_signature: Signature65([0u8; 65]),
            signer: addr(99),
            non_closing_signer: addr(3),
        };
        assert!(!is_pair_valid(&mr, &channel));
    }

    #[test]
    fn is_pair_valid_rejects_same_signer_both_roles() {
        let channel = Channel::new(addr(1), ms_common::ChannelId::from(1u64), addr(2), addr(3), 20);
        let mr = MonitorRequest {
            channel: channel.key(),
            balance_hash: Hash32::zero(),
            nonce: 1,
            additional_hash: Hash32::zero(),
            closing_signature: Signature65([0u8; 65]),
            non_closing_signature: Signature65([0u8; 65]),
            reward_amount: U256::from(1),
            reward_proof_signature: Signature65([0u8; 65]),
            signer: addr(2),
            non_closing_signer: addr(2),
        };
        assert!(!is_pair_valid(&mr, &channel));
    }

    #[test]
    fn is_pair_valid_accepts_channel_participant_pair() {
        let mut channel = Channel::new(addr(1), ms_common::ChannelId::from(1u64), addr(2), addr(3), 20);
        channel.update_status = Some(OnChainUpdateStatus {
            update_sender_address: addr(2),
            nonce: 3,
        });
        let mr = MonitorRequest {
            channel: channel.key(),
            balance_hash: Hash32::zero(),
            nonce: 4,
            additional_hash: Hash32::zero(),
            closing_signature: Signature65([0u8; 65]),
            non_closing_signature: Signature65([0u8; 65]),
            reward_amount: U256::from(1),
            reward_proof_signature: Signature65([0u8; 65]),
            signer: addr(2),
            non_closing_signer: addr(3),
        };
        assert!(is_pair_valid(&mr, &channel));
    }
}
