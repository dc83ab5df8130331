//! Attestation nonce sequencing.
//!
//! The ledger accepts an attestation only when its nonce equals the last
//! consumed nonce plus one. Reading that value and landing the transaction
//! are separate round trips, so the sequencer keeps a local high-water mark
//! and the signer only hands it out inside an exclusive signing window.

use async_trait::async_trait;
use tracing::debug;
use zkutxo_common::UtxoError;

use crate::SignerError;

/// Anything that can report the ledger's last consumed attestation nonce.
#[async_trait]
pub trait NonceSource: Send + Sync {
    async fn last_nonce(&self) -> Result<u64, UtxoError>;
}

/// Local reservation state for one signer.
#[derive(Debug, Default)]
pub struct NonceSequencer {
    last: Option<u64>,
}

impl NonceSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next nonce: one past the larger of the ledger's and our own last value.
    pub fn reserve(&mut self, remote_last: u64) -> Result<u64, SignerError> {
        let base = self.last.map_or(remote_last, |local| local.max(remote_last));
        let nonce = base.checked_add(1).ok_or(SignerError::NonceExhausted)?;
        debug!(remote_last, local_last = ?self.last, nonce, "reserved attestation nonce");
        self.last = Some(nonce);
        Ok(nonce)
    }

    /// Rolls back an abandoned reservation. Only the newest reservation can be released.
    pub fn release(&mut self, nonce: u64) {
        if self.last == Some(nonce) {
            debug!(nonce, "released attestation nonce");
            self.last = nonce.checked_sub(1);
        }
    }

    /// Drops the local mark so the next reservation trusts the ledger alone.
    pub fn forget(&mut self) {
        debug!(local_last = ?self.last, "forgetting local nonce mark");
        self.last = None;
    }

    pub fn last_reserved(&self) -> Option<u64> {
        self.last
    }
}
