//! Canonical per-operation data hashes.
//!
//! Each hash is `keccak256(abi.encode(...))` over exactly the fields and order
//! the ledger contract recomputes. Addresses enter as parsed 20-byte values
//! so checksum casing never reaches the hash.

use ethers_core::abi::Token;
use ethers_core::utils::hash_message;

use crate::abi::{self, token};
use crate::{keccak256, Address, Commitment, NullifierHash, Operation, UtxoId, H256};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositFields {
    pub token: Address,
    pub commitment: Commitment,
    pub nullifier: NullifierHash,
    pub amount: u64,
    pub sender: Address,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitFields {
    pub source_id: UtxoId,
    pub output_nullifiers: Vec<NullifierHash>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferFields {
    pub source_id: UtxoId,
    pub recipient: Address,
    pub output_nullifier: NullifierHash,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithdrawFields {
    pub source_nullifier: NullifierHash,
    pub amount: u64,
    pub token: Address,
    pub recipient: Address,
}

/// Stateless builder for ledger-facing hashes.
pub struct CanonicalHasher;

impl CanonicalHasher {
    pub fn deposit(fields: &DepositFields) -> H256 {
        hash_tokens(&[
            token::address(&fields.token),
            token::uint_word(&fields.commitment.x),
            token::uint_word(&fields.commitment.y),
            token::bytes32(&fields.nullifier),
            token::uint(fields.amount as u128),
            token::address(&fields.sender),
        ])
    }

    /// Amounts are deliberately absent.
    pub fn split(fields: &SplitFields) -> H256 {
        hash_tokens(&[
            token::bytes32(&fields.source_id),
            token::bytes32_array(&fields.output_nullifiers),
        ])
    }

    pub fn transfer(fields: &TransferFields) -> H256 {
        hash_tokens(&[
            token::bytes32(&fields.source_id),
            token::address(&fields.recipient),
            token::bytes32(&fields.output_nullifier),
        ])
    }

    pub fn withdraw(fields: &WithdrawFields) -> H256 {
        hash_tokens(&[
            token::bytes32(&fields.source_nullifier),
            token::uint(fields.amount as u128),
            token::address(&fields.token),
            token::address(&fields.recipient),
        ])
    }

    /// `keccak256(abi.encode(string op, bytes32 dataHash, uint256 nonce, uint256 timestamp))`.
    pub fn attestation_message(
        operation: Operation,
        data_hash: &H256,
        nonce: u64,
        timestamp: u64,
    ) -> H256 {
        hash_tokens(&[
            token::string(operation.name()),
            token::bytes32(data_hash),
            token::uint(nonce as u128),
            token::uint(timestamp as u128),
        ])
    }

    /// EIP-191 personal-message digest of a 32-byte message hash.
    pub fn personal_message_digest(message_hash: &H256) -> H256 {
        hash_message(message_hash.0).into()
    }
}

fn hash_tokens(tokens: &[Token]) -> H256 {
    H256(keccak256(&abi::encode(tokens)))
}
