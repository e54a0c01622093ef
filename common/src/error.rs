use thiserror::Error;

/// Failures from signature recovery and digest handling, scoped to the
/// crypto primitives shared by the ingester and the channel state machine.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("malformed signature: expected 65 bytes, got {0}")]
    MalformedSignature(usize),

    #[error("signature recovery failed: {0}")]
    RecoveryFailed(#[from] ethers_core::types::SignatureError),

    #[error("reward-proof signer does not match the non-closing signer")]
    RewardProofSignerMismatch,
}
