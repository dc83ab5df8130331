//! Attestation signing.

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};
use zkutxo_common::{
    current_timestamp, Address, Attestation, CanonicalHasher, Operation, UtxoError, H256,
};

use crate::keys::{recover_address, AttestorKey};
use crate::nonce::{NonceSequencer, NonceSource};
use crate::SignerError;

/// How the attestation message hash is turned into the signed digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureScheme {
    /// EIP-191 `"\x19Ethereum Signed Message:\n32"` prefix.
    #[default]
    PersonalMessage,
    /// The message hash itself.
    RawDigest,
}

impl SignatureScheme {
    pub fn digest(&self, message_hash: &H256) -> H256 {
        match self {
            SignatureScheme::PersonalMessage => {
                CanonicalHasher::personal_message_digest(message_hash)
            }
            SignatureScheme::RawDigest => *message_hash,
        }
    }
}

/// Digest the attestor signs for `attestation`'s fields.
pub fn attestation_digest(
    scheme: SignatureScheme,
    operation: Operation,
    data_hash: &H256,
    nonce: u64,
    timestamp: u64,
) -> H256 {
    let message = CanonicalHasher::attestation_message(operation, data_hash, nonce, timestamp);
    scheme.digest(&message)
}

/// Checks that `attestation` was signed by `trusted` and that its claimed
/// signer matches the recovered one.
pub fn verify_attestation(
    attestation: &Attestation,
    trusted: &Address,
    scheme: SignatureScheme,
) -> Result<(), SignerError> {
    let digest = attestation_digest(
        scheme,
        attestation.operation,
        &attestation.data_hash,
        attestation.nonce,
        attestation.timestamp,
    );
    let recovered = recover_address(&digest, &attestation.signature)?;
    if recovered != *trusted || attestation.signer_address != recovered {
        return Err(SignerError::UntrustedSigner {
            expected: *trusted,
            actual: recovered,
        });
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// SIGNER
// ═══════════════════════════════════════════════════════════════════════════════

/// Holds the sole authorized key and its nonce sequencer.
///
/// Nonces are only handed out through a [`SigningGuard`], which keeps the
/// signing window exclusive until the caller has seen the transaction land.
#[derive(Debug)]
pub struct AttestationSigner {
    key: Option<AttestorKey>,
    trusted_signer: Address,
    scheme: SignatureScheme,
    sequencer: Mutex<NonceSequencer>,
}

impl AttestationSigner {
    pub fn new(key: Option<AttestorKey>, trusted_signer: Address, scheme: SignatureScheme) -> Self {
        if let Some(key) = &key {
            if key.address() != trusted_signer {
                warn!(
                    signer = %key.address(),
                    trusted = %trusted_signer,
                    "attestor key does not match the ledger's trusted signer"
                );
            }
        }
        Self {
            key,
            trusted_signer,
            scheme,
            sequencer: Mutex::new(NonceSequencer::new()),
        }
    }

    pub fn trusted_signer(&self) -> Address {
        self.trusted_signer
    }

    pub fn scheme(&self) -> SignatureScheme {
        self.scheme
    }

    pub fn address(&self) -> Result<Address, SignerError> {
        self.key
            .as_ref()
            .map(AttestorKey::address)
            .ok_or(SignerError::KeyUnavailable)
    }

    /// Opens the exclusive signing window.
    pub async fn begin(&self) -> SigningGuard<'_> {
        SigningGuard {
            signer: self,
            sequencer: self.sequencer.lock().await,
        }
    }

    /// Signs fixed fields without touching the sequencer.
    pub fn sign_with_nonce(
        &self,
        operation: Operation,
        data_hash: H256,
        nonce: u64,
        timestamp: u64,
    ) -> Result<Attestation, SignerError> {
        let key = self.key.as_ref().ok_or(SignerError::KeyUnavailable)?;
        let digest = attestation_digest(self.scheme, operation, &data_hash, nonce, timestamp);
        let signature = key.sign_digest(&digest)?;

        let recovered = recover_address(&digest, &signature)?;
        if recovered != self.trusted_signer {
            return Err(SignerError::UntrustedSigner {
                expected: self.trusted_signer,
                actual: recovered,
            });
        }

        Ok(Attestation {
            operation,
            data_hash,
            nonce,
            timestamp,
            signature,
            signer_address: recovered,
        })
    }
}

/// Exclusive access to the signer's nonce sequence.
pub struct SigningGuard<'a> {
    signer: &'a AttestationSigner,
    sequencer: MutexGuard<'a, NonceSequencer>,
}

impl<'a> SigningGuard<'a> {
    /// Queries the ledger's last nonce, reserves the next one and signs.
    pub async fn sign<N>(
        &mut self,
        source: &N,
        operation: Operation,
        data_hash: H256,
    ) -> Result<Attestation, UtxoError>
    where
        N: NonceSource + ?Sized,
    {
        let remote_last = source.last_nonce().await?;
        let nonce = self.sequencer.reserve(remote_last)?;
        match self
            .signer
            .sign_with_nonce(operation, data_hash, nonce, current_timestamp())
        {
            Ok(attestation) => {
                debug!(%operation, nonce, data_hash = %data_hash, "attestation signed");
                Ok(attestation)
            }
            Err(err) => {
                self.sequencer.release(nonce);
                Err(err.into())
            }
        }
    }

    /// The attestation was never submitted or was rejected; give its nonce back.
    pub fn release(&mut self, nonce: u64) {
        self.sequencer.release(nonce);
    }

    /// Outcome unknown; the next reservation trusts the ledger's value only.
    pub fn forget(&mut self) {
        self.sequencer.forget();
    }

    pub fn last_reserved(&self) -> Option<u64> {
        self.sequencer.last_reserved()
    }
}
