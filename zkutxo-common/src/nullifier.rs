//! Nullifier derivation.
//!
//! Nullifiers bind a commitment to a secret only the owner holds, so they are
//! neither linkable to the owner's public address nor guessable from chain
//! data. Split outputs additionally mix in the parent nullifier, the output
//! index and the recipient.

use std::fmt;
use std::str::FromStr;

use crate::address::strip_hex_prefix;
use crate::{keccak256_concat, Address, Commitment, NullifierHash, UtxoError, H256};

pub const NULLIFIER_DOMAIN: &[u8] = b"zkutxo/nullifier/v1";
pub const DERIVED_NULLIFIER_DOMAIN: &[u8] = b"zkutxo/nullifier/derived/v1";

/// 32-byte owner secret. `Debug` is redacted.
#[derive(Clone, PartialEq, Eq)]
pub struct OwnerKeyMaterial([u8; 32]);

impl OwnerKeyMaterial {
    pub fn new(secret: [u8; 32]) -> Result<Self, UtxoError> {
        if secret == [0u8; 32] {
            return Err(UtxoError::Derivation("owner secret is all zero".into()));
        }
        Ok(Self(secret))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl FromStr for OwnerKeyMaterial {
    type Err = UtxoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(strip_hex_prefix(s.trim()))
            .map_err(|e| UtxoError::Derivation(format!("owner secret is not hex: {e}")))?;
        let secret: [u8; 32] = bytes
            .try_into()
            .map_err(|_| UtxoError::Derivation("owner secret must be 32 bytes".into()))?;
        Self::new(secret)
    }
}

impl fmt::Debug for OwnerKeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("OwnerKeyMaterial(<redacted>)")
    }
}

/// Derives nullifiers for one owner session.
#[derive(Debug, Clone)]
pub struct NullifierDeriver {
    material: Option<OwnerKeyMaterial>,
}

impl NullifierDeriver {
    pub fn new(material: Option<OwnerKeyMaterial>) -> Self {
        Self { material }
    }

    fn secret(&self) -> Result<&[u8; 32], UtxoError> {
        self.material
            .as_ref()
            .map(OwnerKeyMaterial::as_bytes)
            .ok_or_else(|| UtxoError::Derivation("owner key material is absent".into()))
    }

    /// Nullifier for a freshly deposited commitment.
    pub fn derive(&self, commitment: &Commitment) -> Result<NullifierHash, UtxoError> {
        let secret = self.secret()?;
        Ok(H256(keccak256_concat(&[
            NULLIFIER_DOMAIN,
            &commitment.x,
            &commitment.y,
            secret,
        ])))
    }

    /// Nullifier for output `index` of a split or transfer of `parent`.
    pub fn derive_output(
        &self,
        commitment: &Commitment,
        parent: &NullifierHash,
        index: u32,
        recipient: &Address,
    ) -> Result<NullifierHash, UtxoError> {
        let secret = self.secret()?;
        Ok(H256(keccak256_concat(&[
            DERIVED_NULLIFIER_DOMAIN,
            &commitment.x,
            &commitment.y,
            secret,
            &parent.0,
            &index.to_be_bytes(),
            recipient.as_bytes(),
        ])))
    }
}
