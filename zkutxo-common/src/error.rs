//! Error taxonomy shared by every zkutxo crate.

use thiserror::Error;

use crate::types::{Operation, TxHash, UtxoId};

// ═══════════════════════════════════════════════════════════════════════════════
// ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

/// Aggregated error type for the private UTXO engine.
#[derive(Debug, Error)]
pub enum UtxoError {
    /// Amount is zero where a positive amount is required, or above the value ceiling.
    #[error("value out of range: {0}")]
    Range(String),

    /// Owner key material missing or unusable.
    #[error("nullifier derivation failed: {0}")]
    Derivation(String),

    /// Local and ledger canonical hash disagree. Never retried.
    #[error("{operation} hash mismatch: local {local}, ledger {remote}")]
    HashMismatch {
        operation: Operation,
        local: String,
        remote: String,
    },

    /// Ledger dry-run rejected the operation. Nothing was submitted.
    #[error("{operation} pre-validation failed (code {code}): {message}")]
    PreValidation {
        operation: Operation,
        code: u8,
        message: String,
    },

    /// The attestation nonce was consumed before our transaction landed.
    #[error("nonce {nonce} already consumed on the ledger")]
    NonceConflict { nonce: u64 },

    /// The node refused the transaction outright, so it was never broadcast.
    #[error("ledger node rejected the transaction: {0}")]
    Rejected(String),

    /// Transaction reverted or the receipt reports failure. Local state untouched.
    #[error("{operation} submission failed for {ids:?}: {reason}")]
    Submission {
        operation: Operation,
        ids: Vec<UtxoId>,
        reason: String,
    },

    /// No receipt within the timeout; outcome must be settled by reconciliation.
    #[error("{operation} receipt for {tx_hash} not observed in time; outcome unknown for {ids:?}")]
    ReceiptTimeout {
        operation: Operation,
        tx_hash: TxHash,
        ids: Vec<UtxoId>,
    },

    /// Submission failed in a way that may or may not have broadcast the
    /// transaction; outputs are parked until reconciliation settles them.
    #[error("{operation} submission outcome unknown for {ids:?}: {reason}")]
    OutcomeUnknown {
        operation: Operation,
        ids: Vec<UtxoId>,
        reason: String,
    },

    /// Ledger knows a UTXO for which no private data exists locally.
    #[error("utxo {0} exists on the ledger but has no local private data")]
    IrrecoverableUtxo(UtxoId),

    #[error("signing error: {0}")]
    Signing(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("ledger rpc error: {0}")]
    Rpc(String),

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl UtxoError {
    /// Whether the operation may be re-signed with a fresh nonce and submitted again.
    ///
    /// Transport failures are not: the first transaction may already be in flight.
    pub fn is_retryable(&self) -> bool {
        matches!(self, UtxoError::NonceConflict { .. })
    }

    /// Whether the error was raised before anything reached the network.
    pub fn aborted_before_submission(&self) -> bool {
        matches!(
            self,
            UtxoError::Range(_)
                | UtxoError::Derivation(_)
                | UtxoError::HashMismatch { .. }
                | UtxoError::PreValidation { .. }
                | UtxoError::InvalidInput(_)
                | UtxoError::Rejected(_)
        )
    }

    pub fn pre_validation(operation: Operation, code: u8) -> Self {
        UtxoError::PreValidation {
            operation,
            code,
            message: PreValidationCode::message(operation, code),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PRE-VALIDATION CODES
// ═══════════════════════════════════════════════════════════════════════════════

/// Result codes returned by the ledger's dry-run entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PreValidationCode {
    Ok = 0,
    InvalidNullifier = 1,
    AlreadySpent = 2,
    BalanceNotConserved = 3,
    NullifierCollision = 4,
    InvalidRecipient = 5,
    StaleNonce = 6,
}

impl TryFrom<u8> for PreValidationCode {
    type Error = UtxoError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Ok),
            1 => Ok(Self::InvalidNullifier),
            2 => Ok(Self::AlreadySpent),
            3 => Ok(Self::BalanceNotConserved),
            4 => Ok(Self::NullifierCollision),
            5 => Ok(Self::InvalidRecipient),
            6 => Ok(Self::StaleNonce),
            other => Err(UtxoError::InvalidInput(format!(
                "unknown pre-validation code {other}"
            ))),
        }
    }
}

impl PreValidationCode {
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Human message for `code` as reported for `operation`.
    pub fn message(operation: Operation, code: u8) -> String {
        let known = match (operation, PreValidationCode::try_from(code)) {
            (_, Ok(Self::Ok)) => Some("ok"),
            (Operation::Withdraw, Ok(Self::InvalidNullifier)) => Some("nullifier not registered"),
            (_, Ok(Self::InvalidNullifier)) => Some("source nullifier unknown to the ledger"),
            (Operation::Withdraw, Ok(Self::AlreadySpent)) => Some("nullifier already used"),
            (_, Ok(Self::AlreadySpent)) => Some("source UTXO already spent"),
            (Operation::Split, Ok(Self::BalanceNotConserved)) => {
                Some("output amounts do not sum to the input value")
            }
            (Operation::Transfer, Ok(Self::BalanceNotConserved)) => {
                Some("transfer amount must equal the input value")
            }
            (Operation::Withdraw, Ok(Self::BalanceNotConserved)) => {
                Some("withdraw amount does not match the UTXO value")
            }
            (Operation::Deposit | Operation::Split | Operation::Transfer, Ok(Self::NullifierCollision)) => {
                Some("output nullifier already exists")
            }
            (Operation::Split, Ok(Self::InvalidRecipient)) => Some("output owner is the zero address"),
            (_, Ok(Self::InvalidRecipient)) => Some("recipient is the zero address"),
            (_, Ok(Self::StaleNonce)) => Some("attestation nonce already consumed"),
            _ => None,
        };
        match known {
            Some(message) => message.to_string(),
            None => format!("unknown pre-validation failure (code {code})"),
        }
    }
}
