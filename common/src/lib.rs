pub mod crypto;
pub mod error;
pub mod ids;
pub mod types;

pub use crypto::{keccak256, recover_signer, Signature65};
pub use error::CryptoError;
pub use ids::{ChannelId, TokenNetworkAddress};
pub use types::{
    Channel, ChannelState, MonitorRequest, OnChainUpdateStatus, ScheduledAction, ScheduledEvent,
};

/// Ethereum-style 20-byte account/contract address.
pub type Address = ethers_core::types::Address;

/// A 32-byte keccak hash, used both for block/tx hashes and for balance/reward hashes.
pub type Hash32 = ethers_core::types::H256;
