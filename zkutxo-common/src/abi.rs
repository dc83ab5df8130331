//! Solidity ABI helpers over `ethers::abi`.
//!
//! Token constructors for the shapes the ledger uses plus typed readers for
//! decoded return data. Encoding itself is `ethers_core::abi::encode`, the
//! same head/tail layout as `abi.encode`.

use ethers_core::abi as ethabi;
use ethers_core::types::U256;

use crate::{Address, UtxoError, H256};

pub use ethers_core::abi::{encode, ParamType, Token};

/// Constructors for the token shapes the ledger uses.
pub mod token {
    use super::*;

    pub fn uint(value: u128) -> Token {
        Token::Uint(U256::from(value))
    }

    /// A `uint256` given as a big-endian 32-byte word.
    pub fn uint_word(word: &[u8; 32]) -> Token {
        Token::Uint(U256::from_big_endian(word))
    }

    pub fn address(address: &Address) -> Token {
        Token::Address((*address).into())
    }

    pub fn bytes32(word: &H256) -> Token {
        Token::FixedBytes(word.0.to_vec())
    }

    pub fn string(value: &str) -> Token {
        Token::String(value.to_string())
    }

    pub fn bytes32_array(words: &[H256]) -> Token {
        Token::Array(words.iter().map(bytes32).collect())
    }

    pub fn uint_word_array(words: &[[u8; 32]]) -> Token {
        Token::Array(words.iter().map(uint_word).collect())
    }

    pub fn address_array(addresses: &[Address]) -> Token {
        Token::Array(addresses.iter().map(address).collect())
    }
}

/// First four bytes of `keccak256(signature)`.
pub fn selector(signature: &str) -> [u8; 4] {
    ethers_core::utils::id(signature)
}

/// Selector followed by the encoded arguments.
pub fn encode_call(signature: &str, tokens: &[Token]) -> Vec<u8> {
    let mut data = selector(signature).to_vec();
    data.extend_from_slice(&encode(tokens));
    data
}

// ═══════════════════════════════════════════════════════════════════════════════
// DECODING
// ═══════════════════════════════════════════════════════════════════════════════

/// Decodes return data shaped as `types`.
pub fn decode(types: &[ParamType], data: &[u8]) -> Result<Vec<Token>, UtxoError> {
    ethabi::decode(types, data).map_err(|e| UtxoError::Encoding(format!("abi decode: {e}")))
}

/// Decodes return data holding exactly one value of type `ty`.
pub fn decode_single(ty: ParamType, data: &[u8]) -> Result<Token, UtxoError> {
    decode(&[ty], data)?
        .pop()
        .ok_or_else(|| UtxoError::Encoding("empty return data".into()))
}

pub fn as_bool(token: Token) -> Result<bool, UtxoError> {
    token
        .into_bool()
        .ok_or_else(|| UtxoError::Encoding("expected bool".into()))
}

pub fn as_u64(token: Token) -> Result<u64, UtxoError> {
    let value = token
        .into_uint()
        .ok_or_else(|| UtxoError::Encoding("expected uint".into()))?;
    if value > U256::from(u64::MAX) {
        return Err(UtxoError::Encoding(format!("value {value} does not fit in u64")));
    }
    Ok(value.as_u64())
}

pub fn as_address(token: Token) -> Result<Address, UtxoError> {
    token
        .into_address()
        .map(Address::from)
        .ok_or_else(|| UtxoError::Encoding("expected address".into()))
}

pub fn as_bytes32(token: Token) -> Result<H256, UtxoError> {
    let bytes = token
        .into_fixed_bytes()
        .ok_or_else(|| UtxoError::Encoding("expected bytes32".into()))?;
    H256::from_slice(&bytes)
}

pub fn as_bytes32_array(token: Token) -> Result<Vec<H256>, UtxoError> {
    token
        .into_array()
        .ok_or_else(|| UtxoError::Encoding("expected bytes32[]".into()))?
        .into_iter()
        .map(as_bytes32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_words_are_concatenated() {
        let encoded = encode(&[token::uint(1), Token::Bool(true)]);
        assert_eq!(encoded.len(), 64);
        assert_eq!(encoded[31], 1);
        assert_eq!(encoded[63], 1);
    }

    #[test]
    fn dynamic_array_layout() {
        let id = H256([0x01; 32]);
        let items = [H256([0xaa; 32]), H256([0xbb; 32])];
        let encoded = encode(&[token::bytes32(&id), token::bytes32_array(&items)]);
        // head: id, offset(64); tail: len(2), items
        assert_eq!(encoded.len(), 32 * 5);
        assert_eq!(&encoded[..32], &[0x01; 32]);
        assert_eq!(encoded[63], 64);
        assert_eq!(encoded[95], 2);
        assert_eq!(&encoded[96..128], &[0xaa; 32]);
        assert_eq!(&encoded[128..160], &[0xbb; 32]);

        let mut decoded = decode(
            &[
                ParamType::FixedBytes(32),
                ParamType::Array(Box::new(ParamType::FixedBytes(32))),
            ],
            &encoded,
        )
        .unwrap();
        assert_eq!(as_bytes32_array(decoded.remove(1)).unwrap(), items.to_vec());
        assert_eq!(as_bytes32(decoded.remove(0)).unwrap(), id);
    }

    #[test]
    fn uint_word_and_address_are_left_padded() {
        let address = Address([0x11; 20]);
        let mut word = [0u8; 32];
        word[31] = 7;
        let encoded = encode(&[token::address(&address), token::uint_word(&word)]);
        assert_eq!(&encoded[..32], &address.to_word());
        assert_eq!(&encoded[32..], &word);
    }

    #[test]
    fn string_is_padded_to_word_boundary() {
        let encoded = encode(&[token::string("SPLIT"), token::uint(7)]);
        // head: offset, 7; tail: len, padded data
        assert_eq!(encoded.len(), 32 * 4);
        assert_eq!(encoded[31], 64);
        assert_eq!(encoded[63], 7);
        assert_eq!(encoded[95], 5);
        assert_eq!(&encoded[96..101], b"SPLIT");
        assert!(encoded[101..].iter().all(|b| *b == 0));
    }

    #[test]
    fn erc20_transfer_selector() {
        assert_eq!(selector("transfer(address,uint256)"), [0xa9, 0x05, 0x9c, 0xbb]);
        let call = encode_call(
            "transfer(address,uint256)",
            &[token::address(&Address::ZERO), token::uint(1)],
        );
        assert_eq!(call.len(), 4 + 64);
    }

    #[test]
    fn readers_reject_wrong_shapes() {
        let short = [0u8; 16];
        assert!(decode_single(ParamType::Bool, &short).is_err());

        assert!(as_bool(token::uint(1)).is_err());
        assert!(as_address(Token::Bool(true)).is_err());
        assert!(as_u64(Token::Uint(U256::MAX)).is_err());
        assert_eq!(as_u64(token::uint(42)).unwrap(), 42);
    }
}
