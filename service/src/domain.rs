//! The remaining entities that are specific to this service's runtime
//! (not shared with other potential consumers of `ms-common`).

use ms_common::{Address, Hash32};
use serde::{Deserialize, Serialize};

use ms_common::ids::ChannelKey;

/// Persisted synchronizer cursor and chain identity. Read back at startup so the chain
/// synchronizer resumes at `latest_known_block + 1` after a restart.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockchainState {
    pub latest_known_block: u64,
    pub latest_committed_block: u64,
    pub chain_id: u64,
    pub token_network_registry_address: Address,
    pub monitor_contract_address: Address,
}

impl BlockchainState {
    pub fn new(
        chain_id: u64,
        token_network_registry_address: Address,
        monitor_contract_address: Address,
        sync_start_block: u64,
    ) -> Self {
        Self {
            latest_known_block: sync_start_block,
            latest_committed_block: sync_start_block,
            chain_id,
            token_network_registry_address,
            monitor_contract_address,
        }
    }
}

/// What a waiting transaction was submitted for — used only for logging and
/// metrics when a receipt comes back, never to re-derive eligibility.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaitingTxKind {
    Monitor,
    ClaimReward,
}

/// A transaction hash awaiting confirmation, tagged with what it was for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitingTransaction {
    pub tx_hash: Hash32,
    pub channel: ChannelKey,
    pub kind: WaitingTxKind,
}
