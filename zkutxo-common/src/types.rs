//! Data model: operations, UTXO records and attestations.

use std::fmt;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::{abi, decimal, keccak256, Address, BlindingFactor, Commitment, UtxoError, H256};

pub type UtxoId = H256;
pub type NullifierHash = H256;
pub type TxHash = H256;

// ═══════════════════════════════════════════════════════════════════════════════
// ENUMS
// ═══════════════════════════════════════════════════════════════════════════════

/// State-changing ledger operations that require an attestation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    Deposit,
    Split,
    Transfer,
    Withdraw,
}

impl Operation {
    pub const ALL: [Operation; 4] = [
        Operation::Deposit,
        Operation::Split,
        Operation::Transfer,
        Operation::Withdraw,
    ];

    /// Name hashed into the attestation message.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Deposit => "DEPOSIT",
            Operation::Split => "SPLIT",
            Operation::Transfer => "TRANSFER",
            Operation::Withdraw => "WITHDRAW",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How a UTXO came into existence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UtxoKind {
    Deposit,
    Split,
    Transfer,
}

/// Local lifecycle state of a UTXO.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UtxoStatus {
    /// Submitted, receipt not observed yet.
    PendingConfirm,
    Unspent,
    Spent,
    /// Spendable again through an administrative override.
    Recovered,
}

// ═══════════════════════════════════════════════════════════════════════════════
// PRIVATE UTXO
// ═══════════════════════════════════════════════════════════════════════════════

/// Reconciliation bookkeeping attached to a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationMeta {
    #[serde(with = "decimal")]
    pub last_checked_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// Transaction submitted for this record whose receipt was never observed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_tx_hash: Option<TxHash>,
}

/// A private UTXO as held in the owner's encrypted store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivateUtxo {
    pub id: UtxoId,
    pub owner: Address,
    pub token_address: Address,
    #[serde(with = "decimal")]
    pub value: u64,
    pub commitment: Commitment,
    pub blinding_factor: BlindingFactor,
    pub nullifier_hash: NullifierHash,
    pub is_spent: bool,
    pub status: UtxoStatus,
    #[serde(default)]
    pub parent_id: Option<UtxoId>,
    pub kind: UtxoKind,
    #[serde(with = "decimal")]
    pub created_at: u64,
    #[serde(default)]
    pub confirmed_tx_hash: Option<TxHash>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconciliation: Option<ReconciliationMeta>,
}

impl PrivateUtxo {
    /// Ledger id: `keccak256(abi.encode(bytes32 nullifier, uint256 cx, uint256 cy))`.
    pub fn compute_id(nullifier: &NullifierHash, commitment: &Commitment) -> UtxoId {
        H256(keccak256(&abi::encode(&[
            abi::token::bytes32(nullifier),
            abi::token::uint_word(&commitment.x),
            abi::token::uint_word(&commitment.y),
        ])))
    }

    pub fn is_spendable(&self) -> bool {
        !self.is_spent && matches!(self.status, UtxoStatus::Unspent | UtxoStatus::Recovered)
    }

    /// Record-level invariants checked before every write.
    pub fn validate(&self) -> Result<(), UtxoError> {
        if self.id != Self::compute_id(&self.nullifier_hash, &self.commitment) {
            return Err(UtxoError::InvalidInput(format!(
                "utxo {} id does not match its nullifier and commitment",
                self.id
            )));
        }
        if self.is_spent != (self.status == UtxoStatus::Spent) {
            return Err(UtxoError::InvalidInput(format!(
                "utxo {} spent flag disagrees with status {:?}",
                self.id, self.status
            )));
        }
        if self.is_spent && self.confirmed_tx_hash.is_none() {
            return Err(UtxoError::InvalidInput(format!(
                "utxo {} is spent without a confirming transaction",
                self.id
            )));
        }
        Ok(())
    }

    pub fn mark_spent(&mut self, tx_hash: TxHash) {
        self.is_spent = true;
        self.status = UtxoStatus::Spent;
        self.confirmed_tx_hash = Some(tx_hash);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ATTESTATION
// ═══════════════════════════════════════════════════════════════════════════════

/// 65-byte recoverable ECDSA signature `r || s || v`.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature65(pub [u8; 65]);

impl Signature65 {
    pub fn r(&self) -> [u8; 32] {
        let mut r = [0u8; 32];
        r.copy_from_slice(&self.0[..32]);
        r
    }

    pub fn s(&self) -> [u8; 32] {
        let mut s = [0u8; 32];
        s.copy_from_slice(&self.0[32..64]);
        s
    }

    pub fn v(&self) -> u8 {
        self.0[64]
    }
}

impl fmt::Debug for Signature65 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature65(0x{})", hex::encode(self.0))
    }
}

impl Serialize for Signature65 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(self.0)))
    }
}

impl<'de> Deserialize<'de> for Signature65 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        let bytes = hex::decode(crate::address::strip_hex_prefix(&raw)).map_err(de::Error::custom)?;
        let sig: [u8; 65] = bytes
            .try_into()
            .map_err(|_| de::Error::custom("signature must be 65 bytes"))?;
        Ok(Signature65(sig))
    }
}

/// Signed authorization for one ledger operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attestation {
    pub operation: Operation,
    pub data_hash: H256,
    #[serde(with = "decimal")]
    pub nonce: u64,
    #[serde(with = "decimal")]
    pub timestamp: u64,
    pub signature: Signature65,
    pub signer_address: Address,
}
