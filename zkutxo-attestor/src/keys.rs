//! The attestor's secp256k1 key and address recovery.

use std::fmt;
use std::str::FromStr;

use ethers::signers::{LocalWallet, Signer};
use ethers::types::{RecoveryMessage, Signature, U256};
use zkutxo_common::{Address, Signature65, H256};

use crate::SignerError;

/// secp256k1 group order divided by two. Signatures with a larger `s` are malleable.
const HALF_ORDER: [u8; 32] = [
    0x7f, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0x5d, 0x57, 0x6e, 0x73, 0x57, 0xa4, 0x50, 0x1d, 0xdf, 0xe9, 0x2f, 0x46, 0x68, 0x1b, 0x20, 0xa0,
];

/// Authorized signing key. `Debug` never prints key material.
#[derive(Clone)]
pub struct AttestorKey {
    wallet: LocalWallet,
}

impl AttestorKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SignerError> {
        let wallet =
            LocalWallet::from_bytes(bytes).map_err(|e| SignerError::InvalidKey(e.to_string()))?;
        Ok(Self { wallet })
    }

    pub fn address(&self) -> Address {
        self.wallet.address().into()
    }

    /// Recoverable low-S signature over a 32-byte digest, `v` in {27, 28}.
    pub fn sign_digest(&self, digest: &H256) -> Result<Signature65, SignerError> {
        let signature = self
            .wallet
            .sign_hash((*digest).into())
            .map_err(|e| SignerError::Signing(e.to_string()))?;
        if is_high_s(&signature) {
            return Err(SignerError::Signing("signer produced a high-s signature".into()));
        }
        let bytes: [u8; 65] = signature
            .to_vec()
            .try_into()
            .map_err(|_| SignerError::Signing("signature is not 65 bytes".into()))?;
        Ok(Signature65(bytes))
    }
}

impl FromStr for AttestorKey {
    type Err = SignerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        let bytes = hex::decode(digits).map_err(|e| SignerError::InvalidKey(e.to_string()))?;
        Self::from_bytes(&bytes)
    }
}

impl fmt::Debug for AttestorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttestorKey")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

fn is_high_s(signature: &Signature) -> bool {
    signature.s > U256::from_big_endian(&HALF_ORDER)
}

/// Address that produced `signature` over `digest` (`ecrecover` semantics).
///
/// High-S signatures are rejected, matching ledgers that enforce EIP-2.
pub fn recover_address(digest: &H256, signature: &Signature65) -> Result<Address, SignerError> {
    let v = signature.v();
    if !matches!(v, 0 | 1 | 27 | 28) {
        return Err(SignerError::Recovery(format!("invalid v {v}")));
    }
    let sig = Signature::try_from(&signature.0[..])
        .map_err(|e| SignerError::Recovery(e.to_string()))?;
    if is_high_s(&sig) {
        return Err(SignerError::Recovery("signature s is not in the lower half order".into()));
    }
    sig.recover(RecoveryMessage::Hash((*digest).into()))
        .map(Address::from)
        .map_err(|e| SignerError::Recovery(e.to_string()))
}
