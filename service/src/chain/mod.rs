//! Chain adapter: confirmed-block iterator, log decoder, transaction
//! submitter and receipt tracker.

mod error;
mod ethers_adapter;

pub mod adapter;
pub mod events;

pub use adapter::{Call, ChainAdapter, ReceiptStatus};
pub use error::ChainError;
pub use ethers_adapter::EthersChainAdapter;
pub use events::Event;
