//! Statically typed capability interfaces to the remote ledger.
//!
//! The ledger holds only ids, owners and spent flags. Each state-changing
//! entry point gets its own trait and call struct so a mismatched call is a
//! compile error rather than a revert.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use zkutxo_attestor::NonceSource;
use zkutxo_common::{
    Address, Attestation, BlindingFactor, CanonicalHasher, Commitment, DepositFields,
    NullifierHash, Operation, SplitFields, TransferFields, TxHash, UtxoError, UtxoId,
    WithdrawFields, H256,
};

/// Revert reason the ledger uses for a stale attestation nonce.
pub const NONCE_REVERT_REASON: &str = "INVALID_NONCE";

// ═══════════════════════════════════════════════════════════════════════════════
// VIEW TYPES
// ═══════════════════════════════════════════════════════════════════════════════

/// What the ledger stores per UTXO.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteUtxo {
    pub id: UtxoId,
    pub owner: Address,
    pub is_spent: bool,
    pub spent_tx_hash: Option<TxHash>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    Success,
    Reverted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxReceipt {
    pub tx_hash: TxHash,
    pub status: TxStatus,
    pub block_number: u64,
    pub revert_reason: Option<String>,
}

impl TxReceipt {
    pub fn is_success(&self) -> bool {
        self.status == TxStatus::Success
    }

    pub fn is_nonce_revert(&self) -> bool {
        self.status == TxStatus::Reverted
            && self
                .revert_reason
                .as_deref()
                .is_some_and(|r| r.contains(NONCE_REVERT_REASON))
    }
}

/// `(ok, errorCode)` as returned by a dry-run entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreValidation {
    pub ok: bool,
    pub code: u8,
}

impl PreValidation {
    pub const OK: PreValidation = PreValidation { ok: true, code: 0 };

    pub fn rejected(code: u8) -> Self {
        Self { ok: false, code }
    }

    pub fn into_result(self, operation: Operation) -> Result<(), UtxoError> {
        if self.ok && self.code == 0 {
            Ok(())
        } else {
            Err(UtxoError::pre_validation(operation, self.code))
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CALLS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositRequest {
    pub token: Address,
    pub amount: u64,
    pub commitment: Commitment,
    pub nullifier: NullifierHash,
    pub sender: Address,
}

impl DepositRequest {
    pub fn fields(&self) -> DepositFields {
        DepositFields {
            token: self.token,
            commitment: self.commitment,
            nullifier: self.nullifier,
            amount: self.amount,
            sender: self.sender,
        }
    }
}

/// One new UTXO registered by a split or transfer. The amount never leaves the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputNote {
    pub owner: Address,
    pub commitment: Commitment,
    pub nullifier: NullifierHash,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitRequest {
    pub source_id: UtxoId,
    pub outputs: Vec<OutputNote>,
}

impl SplitRequest {
    pub fn fields(&self) -> SplitFields {
        SplitFields {
            source_id: self.source_id,
            output_nullifiers: self.outputs.iter().map(|o| o.nullifier).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub source_id: UtxoId,
    pub recipient: Address,
    pub output: OutputNote,
}

impl TransferRequest {
    pub fn fields(&self) -> TransferFields {
        TransferFields {
            source_id: self.source_id,
            recipient: self.recipient,
            output_nullifier: self.output.nullifier,
        }
    }
}

/// Withdrawal reveals the amount and opens the source commitment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithdrawRequest {
    pub source_nullifier: NullifierHash,
    pub amount: u64,
    pub token: Address,
    pub recipient: Address,
    pub blinding_factor: BlindingFactor,
}

impl WithdrawRequest {
    pub fn fields(&self) -> WithdrawFields {
        WithdrawFields {
            source_nullifier: self.source_nullifier,
            amount: self.amount,
            token: self.token,
            recipient: self.recipient,
        }
    }
}

/// A request plus the attestation authorizing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attested<R> {
    pub request: R,
    pub attestation: Attestation,
}

pub type DepositCall = Attested<DepositRequest>;
pub type SplitCall = Attested<SplitRequest>;
pub type TransferCall = Attested<TransferRequest>;
pub type WithdrawCall = Attested<WithdrawRequest>;

/// Field set of any operation, for hash comparisons against the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CanonicalCall {
    Deposit(DepositFields),
    Split(SplitFields),
    Transfer(TransferFields),
    Withdraw(WithdrawFields),
}

impl CanonicalCall {
    pub fn operation(&self) -> Operation {
        match self {
            CanonicalCall::Deposit(_) => Operation::Deposit,
            CanonicalCall::Split(_) => Operation::Split,
            CanonicalCall::Transfer(_) => Operation::Transfer,
            CanonicalCall::Withdraw(_) => Operation::Withdraw,
        }
    }

    pub fn data_hash(&self) -> H256 {
        match self {
            CanonicalCall::Deposit(f) => CanonicalHasher::deposit(f),
            CanonicalCall::Split(f) => CanonicalHasher::split(f),
            CanonicalCall::Transfer(f) => CanonicalHasher::transfer(f),
            CanonicalCall::Withdraw(f) => CanonicalHasher::withdraw(f),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CAPABILITIES
// ═══════════════════════════════════════════════════════════════════════════════

/// Read-only views. Every implementation is also the signer's nonce source.
#[async_trait]
pub trait LedgerReader: NonceSource {
    async fn trusted_signer(&self) -> Result<Address, UtxoError>;

    /// Whether any UTXO ever registered `nullifier`.
    async fn is_nullifier_used(&self, nullifier: &NullifierHash) -> Result<bool, UtxoError>;

    async fn utxo(&self, id: &UtxoId) -> Result<Option<RemoteUtxo>, UtxoError>;

    async fn user_utxos(&self, owner: &Address) -> Result<Vec<UtxoId>, UtxoError>;

    async fn user_unspent_utxos(&self, owner: &Address) -> Result<Vec<UtxoId>, UtxoError>;

    /// `None` while the transaction is not yet mined.
    async fn receipt(&self, tx_hash: &TxHash) -> Result<Option<TxReceipt>, UtxoError>;

    /// The hash the ledger itself computes for `call`, if it exposes such a view.
    async fn expected_data_hash(&self, _call: &CanonicalCall) -> Result<Option<H256>, UtxoError> {
        Ok(None)
    }
}

#[async_trait]
pub trait DepositLedger: LedgerReader {
    async fn deposit(&self, call: &DepositCall) -> Result<TxHash, UtxoError>;
}

#[async_trait]
pub trait SplitLedger: LedgerReader {
    async fn pre_validate_split(
        &self,
        request: &SplitRequest,
        nonce: Option<u64>,
    ) -> Result<PreValidation, UtxoError>;

    async fn split(&self, call: &SplitCall) -> Result<TxHash, UtxoError>;
}

#[async_trait]
pub trait TransferLedger: LedgerReader {
    async fn pre_validate_transfer(
        &self,
        request: &TransferRequest,
        nonce: Option<u64>,
    ) -> Result<PreValidation, UtxoError>;

    async fn transfer(&self, call: &TransferCall) -> Result<TxHash, UtxoError>;
}

#[async_trait]
pub trait WithdrawLedger: LedgerReader {
    async fn pre_validate_withdraw(
        &self,
        request: &WithdrawRequest,
        nonce: Option<u64>,
    ) -> Result<PreValidation, UtxoError>;

    async fn withdraw(&self, call: &WithdrawCall) -> Result<TxHash, UtxoError>;
}
