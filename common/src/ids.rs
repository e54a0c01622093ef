//! Identity keys for the core entities. Kept as plain tuples of value types
//! rather than opaque handles: every cross-reference between `Channel`,
//! `MonitorRequest` and `ScheduledEvent` is by identity, looked up through
//! the persistence store, never by in-memory reference.

use ethers_core::types::U256;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::Address;

pub type TokenNetworkAddress = Address;

/// On-chain channel identifier (a `uint256` in the token network contract).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChannelId(#[serde(with = "u256_serde")] pub U256);

impl From<u64> for ChannelId {
    fn from(value: u64) -> Self {
        ChannelId(U256::from(value))
    }
}

impl fmt::Debug for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChannelId({})", self.0)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a `Channel`: `(token_network_address, channel_identifier)`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct ChannelKey {
    pub token_network_address: TokenNetworkAddress,
    pub channel_identifier: ChannelId,
}

impl ChannelKey {
    pub fn new(token_network_address: TokenNetworkAddress, channel_identifier: ChannelId) -> Self {
        Self {
            token_network_address,
            channel_identifier,
        }
    }
}

/// Identity of a `MonitorRequest`: `(token_network_address,
/// channel_identifier, non_closing_signer)`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct MonitorRequestKey {
    pub channel: ChannelKey,
    pub non_closing_signer: Address,
}

impl MonitorRequestKey {
    pub fn new(channel: ChannelKey, non_closing_signer: Address) -> Self {
        Self {
            channel,
            non_closing_signer,
        }
    }
}

mod u256_serde {
    use ethers_core::types::U256;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        let mut buf = [0u8; 32];
        value.to_big_endian(&mut buf);
        serializer.serialize_str(&hex::encode(buf))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(s).map_err(serde::de::Error::custom)?;
        Ok(U256::from_big_endian(&bytes))
    }
}
