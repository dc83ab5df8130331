//! 20-byte account addresses and 32-byte words.
//!
//! Addresses are parsed case-insensitively; mixed-case input must carry a
//! valid EIP-55 checksum. Whatever casing the caller used, the bytes that end
//! up in a canonical hash are the same. Both types convert to and from the
//! `ethers` primitives used at the contract boundary.

use std::fmt;
use std::str::FromStr;

use ethers_core::types as eth;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::UtxoError;

// ═══════════════════════════════════════════════════════════════════════════════
// ADDRESS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub const ZERO: Address = Address([0u8; 20]);

    pub fn from_slice(bytes: &[u8]) -> Result<Self, UtxoError> {
        let raw: [u8; 20] = bytes.try_into().map_err(|_| {
            UtxoError::InvalidInput(format!("address must be 20 bytes, got {}", bytes.len()))
        })?;
        Ok(Address(raw))
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Left-padded ABI word.
    pub fn to_word(&self) -> [u8; 32] {
        let mut word = [0u8; 32];
        word[12..].copy_from_slice(&self.0);
        word
    }

    /// `0x`-prefixed lower-case hex. Used as the store partition key.
    pub fn to_lower_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// EIP-55 mixed-case checksum encoding.
    pub fn to_checksum(&self) -> String {
        ethers_core::utils::to_checksum(&eth::Address::from(*self), None)
    }
}

impl From<eth::Address> for Address {
    fn from(address: eth::Address) -> Self {
        Address(address.0)
    }
}

impl From<Address> for eth::Address {
    fn from(address: Address) -> Self {
        eth::Address::from(address.0)
    }
}

impl FromStr for Address {
    type Err = UtxoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = strip_hex_prefix(s.trim());
        if digits.len() != 40 {
            return Err(UtxoError::InvalidInput(format!(
                "address must be 40 hex digits, got {}",
                digits.len()
            )));
        }
        let address: Address = eth::Address::from_str(digits)
            .map_err(|e| UtxoError::InvalidInput(format!("invalid address hex: {e}")))?
            .into();

        let has_lower = digits.chars().any(|c| c.is_ascii_lowercase());
        let has_upper = digits.chars().any(|c| c.is_ascii_uppercase());
        if has_lower && has_upper && address.to_checksum()[2..] != *digits {
            return Err(UtxoError::InvalidInput(format!(
                "address {s} fails EIP-55 checksum"
            )));
        }
        Ok(address)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_checksum())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_checksum())
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_checksum())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// H256
// ═══════════════════════════════════════════════════════════════════════════════

/// A 32-byte word: hashes, UTXO ids, nullifiers.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct H256(pub [u8; 32]);

impl H256 {
    pub const ZERO: H256 = H256([0u8; 32]);

    pub fn from_slice(bytes: &[u8]) -> Result<Self, UtxoError> {
        let raw: [u8; 32] = bytes.try_into().map_err(|_| {
            UtxoError::InvalidInput(format!("expected 32 bytes, got {}", bytes.len()))
        })?;
        Ok(H256(raw))
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Bare lower-case hex without prefix.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl From<[u8; 32]> for H256 {
    fn from(raw: [u8; 32]) -> Self {
        H256(raw)
    }
}

impl From<eth::H256> for H256 {
    fn from(word: eth::H256) -> Self {
        H256(word.0)
    }
}

impl From<H256> for eth::H256 {
    fn from(word: H256) -> Self {
        eth::H256(word.0)
    }
}

impl FromStr for H256 {
    type Err = UtxoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(strip_hex_prefix(s.trim()))
            .map_err(|e| UtxoError::InvalidInput(format!("invalid hex word: {e}")))?;
        H256::from_slice(&bytes)
    }
}

impl fmt::Display for H256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for H256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl Serialize for H256 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for H256 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

pub(crate) fn strip_hex_prefix(s: &str) -> &str {
    s.strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    // EIP-55 reference vectors
    const CHECKSUMMED: [&str; 4] = [
        "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed",
        "0xfB6916095ca1df60bB79Ce92cE3Ea74c37c5d359",
        "0xdbF03B407c01E7cD3CBea99509d93f8DDDC8C6FB",
        "0xD1220A0cf47c7B9Be7A2E6BA89F429762e7b9aDb",
    ];

    #[test]
    fn checksum_matches_reference_vectors() {
        for expected in CHECKSUMMED {
            let parsed: Address = expected.to_lowercase().parse().unwrap();
            assert_eq!(parsed.to_checksum(), expected);
        }
    }

    #[test]
    fn casing_does_not_change_bytes() {
        let a: Address = CHECKSUMMED[0].parse().unwrap();
        let b: Address = CHECKSUMMED[0].to_lowercase().parse().unwrap();
        let c: Address = CHECKSUMMED[0][2..].to_uppercase().parse().unwrap();
        assert_eq!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn bad_mixed_case_checksum_rejected() {
        let mut broken = CHECKSUMMED[0].to_string();
        // flip casing of one letter
        broken.replace_range(3..4, "A");
        assert!(broken.parse::<Address>().is_err());
    }

    #[test]
    fn wrong_length_rejected() {
        assert!("0x1234".parse::<Address>().is_err());
        assert!("0x1234".parse::<H256>().is_err());
    }

    #[test]
    fn address_word_is_left_padded() {
        let a = Address([0x11; 20]);
        let word = a.to_word();
        assert_eq!(&word[..12], &[0u8; 12]);
        assert_eq!(&word[12..], &[0x11; 20]);
    }

    #[test]
    fn ethers_conversions_keep_bytes() {
        let a: Address = CHECKSUMMED[1].parse().unwrap();
        let converted: eth::Address = a.into();
        assert_eq!(Address::from(converted), a);
        assert_eq!(format!("{converted:?}"), CHECKSUMMED[1].to_lowercase());

        let h = H256([0x42; 32]);
        assert_eq!(H256::from(eth::H256::from(h)), h);
    }

    #[test]
    fn h256_serde_is_prefixed_hex() {
        let h = H256([0xab; 32]);
        let json = serde_json::to_string(&h).unwrap();
        assert_eq!(json, format!("\"0x{}\"", "ab".repeat(32)));
        let back: H256 = serde_json::from_str(&json).unwrap();
        assert_eq!(back, h);
    }
}
