use async_trait::async_trait;
use ethers_core::types::{Address, U256};

use ms_common::ids::ChannelId;
use ms_common::{Hash32, Signature65};

use super::error::ChainError;
use super::events::Event;

/// One of the two on-chain calls the action executor submits.
#[derive(Clone, Debug)]
pub enum Call {
    Monitor {
        signer: Address,
        non_closing_signer: Address,
        balance_hash: Hash32,
        nonce: u64,
        additional_hash: Hash32,
        closing_signature: Signature65,
        non_closing_signature: Signature65,
        reward_amount: U256,
        token_network: Address,
        reward_proof_signature: Signature65,
    },
    ClaimReward {
        channel_identifier: ChannelId,
        token_network: Address,
        signer: Address,
        non_closing_signer: Address,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReceiptStatus {
    Pending,
    Confirmed,
    Reverted,
}

/// Confirmed-block iterator, transaction submitter and receipt tracker.
/// The only part of the service that talks to an RPC endpoint; `service`
/// provides `EthersChainAdapter`, but the rest of the crate only depends
/// on this trait.
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    /// Decoded events in `[from_block, to_block]`, in chain log order
    /// within a block, strictly ascending across blocks. Does not include
    /// the synthetic `UpdatedHeadBlock` — the event loop emits that
    /// itself once the batch is committed.
    async fn poll(&self, from_block: u64, to_block: u64) -> Result<Vec<Event>, ChainError>;

    /// Current chain head, before subtracting `required_confirmations`.
    async fn head_block(&self) -> Result<u64, ChainError>;

    /// Submits an MS-signed transaction, returning its hash immediately;
    /// does not wait for a receipt.
    async fn send_transaction(&self, call: Call) -> Result<Hash32, ChainError>;

    async fn receipt_status(&self, tx_hash: Hash32) -> Result<ReceiptStatus, ChainError>;

    /// `view` call on the user-deposit contract.
    async fn effective_balance(&self, address: Address) -> Result<U256, ChainError>;
}
