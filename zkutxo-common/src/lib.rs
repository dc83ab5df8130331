//! zkutxo-common
//!
//! Shared building blocks for the private UTXO engine: account addresses and
//! 32-byte words, `ethers` ABI helpers for every ledger-facing hash, the UTXO
//! data model, Pedersen commitments, nullifier derivation and the canonical
//! per-operation hasher.

use sha3::{Digest, Keccak256};

pub mod abi;
pub mod address;
pub mod commitment;
pub mod error;
pub mod hasher;
pub mod nullifier;
pub mod types;

pub use address::{Address, H256};
pub use commitment::{BlindingFactor, Commitment, CommitmentEngine};
pub use error::{PreValidationCode, UtxoError};
pub use hasher::{CanonicalHasher, DepositFields, SplitFields, TransferFields, WithdrawFields};
pub use nullifier::{NullifierDeriver, OwnerKeyMaterial};
pub use types::{
    Attestation, NullifierHash, Operation, PrivateUtxo, ReconciliationMeta, Signature65, TxHash,
    UtxoId, UtxoKind, UtxoStatus,
};

/// Largest value a single UTXO may carry (the ledger's 64-bit range proof bound).
pub const MAX_UTXO_VALUE: u128 = u64::MAX as u128;

/// Keccak-256 of `data`.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    ethers_core::utils::keccak256(data)
}

/// Keccak-256 over several byte slices, hashed back to back.
pub fn keccak256_concat(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Current unix timestamp in seconds.
pub fn current_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Serde helpers for integers persisted as decimal strings.
pub mod decimal {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse::<u64>()
            .map_err(|e| de::Error::custom(format!("invalid decimal integer '{raw}': {e}")))
    }

    /// 256-bit big-endian words as decimal strings.
    pub mod word {
        use num_bigint::BigUint;
        use serde::{de, Deserialize, Deserializer, Serializer};

        pub fn to_decimal(word: &[u8; 32]) -> String {
            BigUint::from_bytes_be(word).to_str_radix(10)
        }

        pub fn from_decimal(raw: &str) -> Option<[u8; 32]> {
            let num = BigUint::parse_bytes(raw.as_bytes(), 10)?;
            let bytes = num.to_bytes_be();
            if bytes.len() > 32 {
                return None;
            }
            let mut word = [0u8; 32];
            word[32 - bytes.len()..].copy_from_slice(&bytes);
            Some(word)
        }

        pub fn serialize<S: Serializer>(word: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
            serializer.serialize_str(&to_decimal(word))
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
            let raw = String::deserialize(deserializer)?;
            from_decimal(&raw)
                .ok_or_else(|| de::Error::custom(format!("invalid 256-bit decimal '{raw}'")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keccak_of_empty_input_matches_known_vector() {
        assert_eq!(
            hex::encode(keccak256(b"")),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn concat_hash_equals_hash_of_concatenation() {
        assert_eq!(keccak256_concat(&[b"ab", b"cd"]), keccak256(b"abcd"));
    }

    #[test]
    fn decimal_word_conversion() {
        let mut word = [0u8; 32];
        word[31] = 0xff;
        word[30] = 0x01;
        assert_eq!(decimal::word::to_decimal(&word), "511");
        assert_eq!(decimal::word::from_decimal("511"), Some(word));
        assert_eq!(decimal::word::to_decimal(&[0u8; 32]), "0");
        assert!(decimal::word::from_decimal("not a number").is_none());
        let too_big = format!("1{}", "0".repeat(80));
        assert!(decimal::word::from_decimal(&too_big).is_none());
    }
}
