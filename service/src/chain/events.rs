//! Chain events decoded from raw logs. Event ordering
//! mirrors on-chain log order within a block, strictly ascending across
//! blocks; `UpdatedHeadBlock` is synthesized by the event loop after a
//! batch, not decoded from a log.

use ethers_core::types::{Address, U256};

use ms_common::ids::ChannelId;
use ms_common::Hash32;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    ChannelOpened {
        token_network_address: Address,
        channel_identifier: ChannelId,
        participant1: Address,
        participant2: Address,
        settle_timeout: u64,
        block_number: u64,
    },
    ChannelClosed {
        token_network_address: Address,
        channel_identifier: ChannelId,
        closing_participant: Address,
        block_number: u64,
    },
    NonClosingBalanceProofUpdated {
        token_network_address: Address,
        channel_identifier: ChannelId,
        closing_participant: Address,
        nonce: u64,
        block_number: u64,
    },
    ChannelSettled {
        token_network_address: Address,
        channel_identifier: ChannelId,
        block_number: u64,
    },
    MonitorNewBalanceProof {
        token_network_address: Address,
        channel_identifier: ChannelId,
        reward_amount: U256,
        nonce: u64,
        ms_address: Address,
        raiden_node_address: Address,
        block_number: u64,
    },
    MonitorRewardClaimed {
        ms_address: Address,
        amount: U256,
        reward_identifier: Hash32,
        block_number: u64,
    },
    /// Synthetic; emitted once per `poll` batch after its real events.
    UpdatedHeadBlock { head_block_number: u64 },
}

impl Event {
    pub fn block_number(&self) -> u64 {
        match self {
            Event::ChannelOpened { block_number, .. }
            | Event::ChannelClosed { block_number, .. }
            | Event::NonClosingBalanceProofUpdated { block_number, .. }
            | Event::ChannelSettled { block_number, .. }
            | Event::MonitorNewBalanceProof { block_number, .. }
            | Event::MonitorRewardClaimed { block_number, .. } => *block_number,
            Event::UpdatedHeadBlock { head_block_number } => *head_block_number,
        }
    }
}
