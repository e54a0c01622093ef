//! Digest construction and ECDSA signature recovery for balance proofs and
//! reward proofs. Kept as a small, dependency-light module with no chain
//! I/O of its own — everything here is pure functions over bytes.

use ethers_core::types::{RecoveryMessage, Signature, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CryptoError;
use crate::{Address, Hash32};

pub use ethers_core::utils::keccak256;

/// Message type discriminants used in the balance-proof and reward-proof
/// digests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    BalanceProof = 1,
    BalanceProofUpdate = 2,
    RewardProof = 3,
}

fn u256_be(value: impl Into<U256>) -> [u8; 32] {
    let mut buf = [0u8; 32];
    value.into().to_big_endian(&mut buf);
    buf
}

/// `keccak256(token_network ‖ chain_id ‖ msg_type ‖ channel_id ‖
/// balance_hash ‖ nonce ‖ additional_hash)`, bit-exact with the on-chain
/// contract's digest.
#[allow(clippy::too_many_arguments)]
pub fn balance_proof_digest(
    token_network_address: Address,
    chain_id: u64,
    msg_type: MessageType,
    channel_identifier: U256,
    balance_hash: Hash32,
    nonce: u64,
    additional_hash: Hash32,
) -> Hash32 {
    let mut buf = Vec::with_capacity(20 + 32 * 5 + 32);
    buf.extend_from_slice(token_network_address.as_bytes());
    buf.extend_from_slice(&u256_be(U256::from(chain_id)));
    buf.extend_from_slice(&u256_be(U256::from(msg_type as u8)));
    buf.extend_from_slice(&u256_be(channel_identifier));
    buf.extend_from_slice(balance_hash.as_bytes());
    buf.extend_from_slice(&u256_be(U256::from(nonce)));
    buf.extend_from_slice(additional_hash.as_bytes());
    Hash32::from(keccak256(&buf))
}

/// The non-closing signature is computed over `digest ‖ closing_signature`.
pub fn non_closing_digest(balance_proof_digest: Hash32, closing_signature: &Signature65) -> Hash32 {
    let mut buf = Vec::with_capacity(32 + 65);
    buf.extend_from_slice(balance_proof_digest.as_bytes());
    buf.extend_from_slice(&closing_signature.0);
    Hash32::from(keccak256(&buf))
}

/// `keccak256(chain_id ‖ msg_type=3 ‖ token_network ‖ non_closing_participant
/// ‖ reward_amount ‖ channel_id ‖ nonce)`.
pub fn reward_proof_digest(
    chain_id: u64,
    token_network_address: Address,
    non_closing_participant: Address,
    reward_amount: U256,
    channel_identifier: U256,
    nonce: u64,
) -> Hash32 {
    let mut buf = Vec::with_capacity(32 * 5 + 20 * 2);
    buf.extend_from_slice(&u256_be(U256::from(chain_id)));
    buf.extend_from_slice(&u256_be(U256::from(MessageType::RewardProof as u8)));
    buf.extend_from_slice(token_network_address.as_bytes());
    buf.extend_from_slice(non_closing_participant.as_bytes());
    buf.extend_from_slice(&u256_be(reward_amount));
    buf.extend_from_slice(&u256_be(channel_identifier));
    buf.extend_from_slice(&u256_be(U256::from(nonce)));
    Hash32::from(keccak256(&buf))
}

/// Recovers the signer address from a raw digest and a 65-byte (r, s, v)
/// signature. Uses `RecoveryMessage::Hash` rather than `RecoveryMessage::Data`
/// so the digest is recovered as-is, without the EIP-191
/// `"\x19Ethereum Signed Message\n32"` prefix `ethers` applies to raw bytes.
pub fn recover_signer(digest: Hash32, signature: &Signature65) -> Result<Address, CryptoError> {
    let sig = Signature::try_from(signature.0.as_slice())?;
    let address = sig.recover(RecoveryMessage::Hash(digest))?;
    Ok(address)
}

/// A 65-byte `(r, s, v)` ECDSA signature, serialized as a `0x`-prefixed hex
/// string at the JSON boundary of the `RequestMonitoring` message.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature65(pub [u8; 65]);

impl fmt::Debug for Signature65 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature65(0x{})", hex::encode(self.0))
    }
}

impl TryFrom<&[u8]> for Signature65 {
    type Error = CryptoError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        if bytes.len() != 65 {
            return Err(CryptoError::MalformedSignature(bytes.len()));
        }
        let mut buf = [0u8; 65];
        buf.copy_from_slice(bytes);
        Ok(Signature65(buf))
    }
}

impl Serialize for Signature65 {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(self.0)))
    }
}

impl<'de> Deserialize<'de> for Signature65 {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let trimmed = s.strip_prefix("0x").unwrap_or(&s);
        let bytes = hex::decode(trimmed).map_err(serde::de::Error::custom)?;
        Signature65::try_from(bytes.as_slice()).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers_core::types::U256;

    #[test]
    fn signature_hex_roundtrip() {
        let sig = Signature65([7u8; 65]);
        let json = serde_json::to_string(&sig).unwrap();
        let back: Signature65 = serde_json::from_str(&json).unwrap();
        assert_eq!(sig, back);
    }

    #[test]
    fn digest_is_deterministic() {
        let tn = Address::zero();
        let d1 = balance_proof_digest(
            tn,
            1,
            MessageType::BalanceProof,
            U256::from(42),
            Hash32::zero(),
            5,
            Hash32::zero(),
        );
        let d2 = balance_proof_digest(
            tn,
            1,
            MessageType::BalanceProof,
            U256::from(42),
            Hash32::zero(),
            5,
            Hash32::zero(),
        );
        assert_eq!(d1, d2);
    }
}
