use ethers_core::types::{Address, H256};
use thiserror::Error;

/// Chain-adapter errors.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("rpc error: {0}")]
    Provider(#[from] ethers::providers::ProviderError),

    #[error("abi error: {0}")]
    Abi(#[from] ethers_core::abi::Error),

    #[error("invalid private key: {0}")]
    Wallet(#[from] ethers::signers::WalletError),

    #[error("unknown log topic {0:#x} from contract {1:?}")]
    UnknownTopic(H256, Address),

    #[error("malformed log: {0}")]
    MalformedLog(String),

    #[error("transaction submission failed: {0}")]
    Submission(String),

    #[error("transaction {0:?} reverted")]
    Reverted(H256),
}
