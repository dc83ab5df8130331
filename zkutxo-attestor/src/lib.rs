//! zkutxo-attestor
//!
//! Produces the signed attestations every state-changing ledger call carries.
//! A single authorized secp256k1 key signs `(operation, dataHash, nonce,
//! timestamp)`; the nonce is sequenced against the ledger's last consumed value
//! inside an exclusive signing window.

pub mod error;
pub mod keys;
pub mod nonce;
pub mod signer;

pub use error::SignerError;
pub use keys::{recover_address, AttestorKey};
pub use nonce::{NonceSequencer, NonceSource};
pub use signer::{
    attestation_digest, verify_attestation, AttestationSigner, SignatureScheme, SigningGuard,
};
