//! Error types for attestation signing.

use thiserror::Error;
use zkutxo_common::{Address, UtxoError};

#[derive(Debug, Error)]
pub enum SignerError {
    /// No authorized key configured for this process.
    #[error("attestor key unavailable")]
    KeyUnavailable,

    #[error("invalid attestor key: {0}")]
    InvalidKey(String),

    /// Our key is not the one the ledger trusts.
    #[error("signer {actual} is not the trusted attestor {expected}")]
    UntrustedSigner { expected: Address, actual: Address },

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("signature recovery failed: {0}")]
    Recovery(String),

    #[error("nonce space exhausted")]
    NonceExhausted,
}

impl From<SignerError> for UtxoError {
    fn from(err: SignerError) -> Self {
        UtxoError::Signing(err.to_string())
    }
}
