//! Core channel, monitor-request and scheduled-action entities. Plain data,
//! no I/O — persistence lives in the `service` crate's `storage` module,
//! which treats these as values to serialize.

use ethers_core::types::U256;
use serde::{Deserialize, Serialize};

use crate::crypto::Signature65;
use crate::ids::{ChannelId, ChannelKey, TokenNetworkAddress};
use crate::{Address, Hash32};

/// A channel's lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelState {
    Opened,
    Closed,
    Settled,
}

/// The latest known on-chain balance-proof update for a channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnChainUpdateStatus {
    pub update_sender_address: Address,
    pub nonce: u64,
}

/// A payment channel. Created by `ChannelOpened`; mutated by every other chain
/// event handler and by the action executor's transaction submissions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub token_network_address: TokenNetworkAddress,
    pub identifier: ChannelId,
    pub participant1: Address,
    pub participant2: Address,
    pub settle_timeout: u64,
    pub state: ChannelState,
    pub closing_block: Option<u64>,
    pub closing_participant: Option<Address>,
    pub update_status: Option<OnChainUpdateStatus>,
    pub closing_tx_hash: Option<Hash32>,
    pub claim_tx_hash: Option<Hash32>,
}

impl Channel {
    pub fn new(
        token_network_address: TokenNetworkAddress,
        identifier: ChannelId,
        participant1: Address,
        participant2: Address,
        settle_timeout: u64,
    ) -> Self {
        Self {
            token_network_address,
            identifier,
            participant1,
            participant2,
            settle_timeout,
            state: ChannelState::Opened,
            closing_block: None,
            closing_participant: None,
            update_status: None,
            closing_tx_hash: None,
            claim_tx_hash: None,
        }
    }

    pub fn key(&self) -> ChannelKey {
        ChannelKey::new(self.token_network_address, self.identifier)
    }

    pub fn participants(&self) -> [Address; 2] {
        [self.participant1, self.participant2]
    }

    /// The counterparty of `participant`, if `participant` actually is one
    /// of this channel's two participants.
    pub fn other_participant(&self, participant: Address) -> Option<Address> {
        if participant == self.participant1 {
            Some(self.participant2)
        } else if participant == self.participant2 {
            Some(self.participant1)
        } else {
            None
        }
    }
}

/// A monitor request. Identity is `MonitorRequestKey` (in `ids.rs`); the
/// owning channel is addressed by `channel`, not embedded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorRequest {
    pub channel: ChannelKey,
    pub balance_hash: Hash32,
    pub nonce: u64,
    pub additional_hash: Hash32,
    pub closing_signature: Signature65,
    pub non_closing_signature: Signature65,
    pub reward_amount: U256,
    pub reward_proof_signature: Signature65,
    /// Recovered from `closing_signature` over the balance-proof digest.
    pub signer: Address,
    /// Recovered from `reward_proof_signature` over the reward-proof digest;
    /// also the key's `non_closing_signer`.
    pub non_closing_signer: Address,
}

impl MonitorRequest {
    /// Insertion invariant: both recovered addresses are channel
    /// participants, together equal to the full pair, and distinct.
    pub fn is_valid_for(&self, channel: &Channel) -> bool {
        let participants = channel.participants();
        participants.contains(&self.signer)
            && participants.contains(&self.non_closing_signer)
            && self.signer != self.non_closing_signer
    }
}

/// The action a scheduled event will run once its trigger block arrives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduledAction {
    Monitor {
        channel: ChannelKey,
        non_closing_participant: Address,
    },
    ClaimReward {
        channel: ChannelKey,
        non_closing_participant: Address,
    },
}

impl ScheduledAction {
    pub fn channel(&self) -> ChannelKey {
        match self {
            ScheduledAction::Monitor { channel, .. } => *channel,
            ScheduledAction::ClaimReward { channel, .. } => *channel,
        }
    }

    pub fn non_closing_participant(&self) -> Address {
        match self {
            ScheduledAction::Monitor {
                non_closing_participant,
                ..
            } => *non_closing_participant,
            ScheduledAction::ClaimReward {
                non_closing_participant,
                ..
            } => *non_closing_participant,
        }
    }
}

/// A scheduled action pending a future block. Uniqueness key is the full
/// `(trigger_block_number, action)` tuple; re-insertion is idempotent, so
/// at most one `Monitor` and one `ClaimReward` can ever be pending per
/// channel/non-closing-participant pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledEvent {
    pub trigger_block_number: u64,
    pub action: ScheduledAction,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(byte: u8) -> Address {
        Address::from([byte; 20])
    }

    #[test]
    fn other_participant_returns_counterparty() {
        let c = Channel::new(addr(1), ChannelId::from(1u64), addr(2), addr(3), 100);
        assert_eq!(c.other_participant(addr(2)), Some(addr(3)));
        assert_eq!(c.other_participant(addr(3)), Some(addr(2)));
        assert_eq!(c.other_participant(addr(9)), None);
    }
}
