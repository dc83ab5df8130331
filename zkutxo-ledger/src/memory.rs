//! In-process ledger that enforces the same rules as the deployed contract.
//!
//! Used by the scenario tests and by the CLI's `--simulate` mode. Besides the
//! contract surface it exposes a few fault knobs (reverts, withheld receipts,
//! foreign nonce consumption, out-of-band spends) so the engine's failure
//! paths can be driven deterministically.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;
use zkutxo_attestor::{verify_attestation, NonceSource, SignatureScheme};
use zkutxo_common::{
    keccak256_concat, Address, Attestation, Commitment, CommitmentEngine, NullifierHash,
    Operation, PreValidationCode, PrivateUtxo, TxHash, UtxoError, UtxoId, H256,
};

use crate::ledger::{
    CanonicalCall, DepositCall, DepositLedger, LedgerReader, OutputNote, PreValidation,
    RemoteUtxo, SplitCall, SplitLedger, SplitRequest, TransferCall, TransferLedger,
    TransferRequest, TxReceipt, TxStatus, WithdrawCall, WithdrawLedger, WithdrawRequest,
    NONCE_REVERT_REASON,
};

#[derive(Debug, Clone)]
struct LedgerEntry {
    owner: Address,
    commitment: Commitment,
    spent_tx: Option<TxHash>,
}

#[derive(Debug, Default)]
struct Faults {
    revert_next: Option<String>,
    withhold_next_receipt: bool,
    nonce_bump_before_next_submit: u64,
    lose_next_nonce_race: bool,
    hash_view_override: Option<H256>,
}

#[derive(Debug, Default)]
struct LedgerState {
    last_nonce: u64,
    block_number: u64,
    tx_counter: u64,
    submitted: usize,
    utxos: HashMap<UtxoId, LedgerEntry>,
    by_nullifier: HashMap<NullifierHash, UtxoId>,
    by_owner: HashMap<Address, Vec<UtxoId>>,
    receipts: HashMap<TxHash, TxReceipt>,
    withheld: HashMap<TxHash, TxReceipt>,
    faults: Faults,
}

impl LedgerState {
    fn next_tx_hash(&mut self) -> TxHash {
        self.tx_counter += 1;
        H256(keccak256_concat(&[
            b"zkutxo/sim/tx",
            &self.tx_counter.to_be_bytes(),
        ]))
    }

    fn register(&mut self, owner: Address, commitment: Commitment, nullifier: NullifierHash) -> UtxoId {
        let id = PrivateUtxo::compute_id(&nullifier, &commitment);
        self.utxos.insert(
            id,
            LedgerEntry {
                owner,
                commitment,
                spent_tx: None,
            },
        );
        self.by_nullifier.insert(nullifier, id);
        self.by_owner.entry(owner).or_default().push(id);
        id
    }

    fn outputs_code(&self, outputs: &[OutputNote]) -> Option<u8> {
        if outputs.iter().any(|o| o.owner.is_zero()) {
            return Some(PreValidationCode::InvalidRecipient.code());
        }
        let mut seen = HashSet::new();
        for output in outputs {
            let id = PrivateUtxo::compute_id(&output.nullifier, &output.commitment);
            if !seen.insert(output.nullifier)
                || self.by_nullifier.contains_key(&output.nullifier)
                || self.utxos.contains_key(&id)
            {
                return Some(PreValidationCode::NullifierCollision.code());
            }
        }
        None
    }

    fn source_code(&self, source_id: &UtxoId) -> Result<&LedgerEntry, u8> {
        let entry = self
            .utxos
            .get(source_id)
            .ok_or(PreValidationCode::InvalidNullifier.code())?;
        if entry.spent_tx.is_some() {
            return Err(PreValidationCode::AlreadySpent.code());
        }
        Ok(entry)
    }

    fn nonce_code(&self, nonce: Option<u64>) -> Option<u8> {
        match nonce {
            Some(n) if n <= self.last_nonce => Some(PreValidationCode::StaleNonce.code()),
            _ => None,
        }
    }
}

/// Simulated ledger contract.
pub struct InMemoryLedger {
    trusted_signer: Address,
    scheme: SignatureScheme,
    commitments: CommitmentEngine,
    state: Mutex<LedgerState>,
}

impl InMemoryLedger {
    pub fn new(trusted_signer: Address, scheme: SignatureScheme) -> Self {
        Self {
            trusted_signer,
            scheme,
            commitments: CommitmentEngine::new(),
            state: Mutex::new(LedgerState::default()),
        }
    }

    // ── validation shared by dry runs and execution ──────────────────────────

    fn split_code(&self, state: &LedgerState, request: &SplitRequest) -> u8 {
        let source = match state.source_code(&request.source_id) {
            Ok(entry) => entry,
            Err(code) => return code,
        };
        if let Some(code) = state.outputs_code(&request.outputs) {
            return code;
        }
        let outputs: Vec<Commitment> = request.outputs.iter().map(|o| o.commitment).collect();
        match self.commitments.verify_balance(&[source.commitment], &outputs) {
            Ok(true) if !outputs.is_empty() => PreValidationCode::Ok.code(),
            _ => PreValidationCode::BalanceNotConserved.code(),
        }
    }

    fn transfer_code(state: &LedgerState, request: &TransferRequest) -> u8 {
        let source = match state.source_code(&request.source_id) {
            Ok(entry) => entry,
            Err(code) => return code,
        };
        if request.recipient.is_zero() || request.output.owner != request.recipient {
            return PreValidationCode::InvalidRecipient.code();
        }
        if let Some(code) = state.outputs_code(std::slice::from_ref(&request.output)) {
            return code;
        }
        // a single output conserves value only if it carries the source commitment
        if source.commitment != request.output.commitment {
            return PreValidationCode::BalanceNotConserved.code();
        }
        PreValidationCode::Ok.code()
    }

    fn withdraw_code(&self, state: &LedgerState, request: &WithdrawRequest) -> u8 {
        let Some(id) = state.by_nullifier.get(&request.source_nullifier) else {
            return PreValidationCode::InvalidNullifier.code();
        };
        let source = match state.source_code(id) {
            Ok(entry) => entry,
            Err(code) => return code,
        };
        if request.recipient.is_zero() {
            return PreValidationCode::InvalidRecipient.code();
        }
        if !self
            .commitments
            .verify_opening(&source.commitment, request.amount, &request.blinding_factor)
        {
            return PreValidationCode::BalanceNotConserved.code();
        }
        PreValidationCode::Ok.code()
    }

    fn check_attestation(
        &self,
        operation: Operation,
        data_hash: H256,
        attestation: &Attestation,
    ) -> Result<(), String> {
        if attestation.operation != operation {
            return Err("OPERATION_MISMATCH".into());
        }
        if attestation.data_hash != data_hash {
            return Err("HASH_MISMATCH".into());
        }
        verify_attestation(attestation, &self.trusted_signer, self.scheme)
            .map_err(|_| "INVALID_ATTESTATION".to_string())
    }

    /// Runs one state-changing transaction and records its receipt.
    async fn execute<F>(
        &self,
        operation: Operation,
        data_hash: H256,
        attestation: &Attestation,
        apply: F,
    ) -> Result<TxHash, UtxoError>
    where
        F: FnOnce(&Self, &mut LedgerState, TxHash) -> Result<(), String> + Send,
    {
        let mut state = self.state.lock().await;
        let bump = std::mem::take(&mut state.faults.nonce_bump_before_next_submit);
        state.last_nonce += bump;

        // the node refuses to broadcast a call that would revert on the nonce check
        if attestation.nonce != state.last_nonce + 1 {
            debug!(
                nonce = attestation.nonce,
                last = state.last_nonce,
                reason = NONCE_REVERT_REASON,
                "rejecting submission"
            );
            return Err(UtxoError::NonceConflict {
                nonce: attestation.nonce,
            });
        }

        state.submitted += 1;
        state.block_number += 1;
        let tx_hash = state.next_tx_hash();

        if std::mem::take(&mut state.faults.lose_next_nonce_race) {
            // a competing attestation with the same nonce is mined first; like a
            // real node, the receipt only says "reverted"
            state.last_nonce = attestation.nonce;
            let receipt = TxReceipt {
                tx_hash,
                status: TxStatus::Reverted,
                block_number: state.block_number,
                revert_reason: None,
            };
            debug!(%operation, %tx_hash, "simulated transaction lost its nonce");
            state.receipts.insert(tx_hash, receipt);
            return Ok(tx_hash);
        }

        let mut outcome = self.check_attestation(operation, data_hash, attestation);
        if outcome.is_ok() {
            if let Some(reason) = state.faults.revert_next.take() {
                outcome = Err(reason);
            }
        }
        if outcome.is_ok() {
            outcome = apply(self, &mut state, tx_hash);
        }

        let receipt = match outcome {
            Ok(()) => {
                state.last_nonce = attestation.nonce;
                TxReceipt {
                    tx_hash,
                    status: TxStatus::Success,
                    block_number: state.block_number,
                    revert_reason: None,
                }
            }
            Err(reason) => TxReceipt {
                tx_hash,
                status: TxStatus::Reverted,
                block_number: state.block_number,
                revert_reason: Some(reason),
            },
        };
        debug!(%operation, %tx_hash, status = ?receipt.status, "simulated transaction");

        if std::mem::take(&mut state.faults.withhold_next_receipt) {
            state.withheld.insert(tx_hash, receipt);
        } else {
            state.receipts.insert(tx_hash, receipt);
        }
        Ok(tx_hash)
    }

    // ── fault knobs ──────────────────────────────────────────────────────────

    /// The next executed transaction reverts with `reason`.
    pub async fn revert_next(&self, reason: impl Into<String>) {
        self.state.lock().await.faults.revert_next = Some(reason.into());
    }

    /// The next transaction executes but its receipt stays invisible.
    pub async fn withhold_next_receipt(&self) {
        self.state.lock().await.faults.withhold_next_receipt = true;
    }

    pub async fn release_withheld_receipts(&self) {
        let mut state = self.state.lock().await;
        let withheld: Vec<(TxHash, TxReceipt)> = state.withheld.drain().collect();
        state.receipts.extend(withheld);
    }

    /// Another signer consumes `count` nonces right before our next submission lands.
    pub async fn consume_nonces_before_next_submit(&self, count: u64) {
        self.state.lock().await.faults.nonce_bump_before_next_submit = count;
    }

    /// The next transaction is broadcast, then loses its nonce to a competing
    /// attestation and reverts without a reason.
    pub async fn lose_next_nonce_race(&self) {
        self.state.lock().await.faults.lose_next_nonce_race = true;
    }

    pub async fn consume_nonces(&self, count: u64) {
        self.state.lock().await.last_nonce += count;
    }

    /// Makes the canonical-hash view return `hash` for every call.
    pub async fn override_hash_view(&self, hash: Option<H256>) {
        self.state.lock().await.faults.hash_view_override = hash;
    }

    /// Marks `id` spent by a transaction this client never saw.
    pub async fn spend_out_of_band(&self, id: &UtxoId) -> Result<TxHash, UtxoError> {
        let mut state = self.state.lock().await;
        state.block_number += 1;
        let tx_hash = state.next_tx_hash();
        let entry = state
            .utxos
            .get_mut(id)
            .ok_or_else(|| UtxoError::NotFound(format!("ledger utxo {id}")))?;
        entry.spent_tx = Some(tx_hash);
        Ok(tx_hash)
    }

    /// Registers a UTXO created elsewhere, with no private data on this client.
    pub async fn register_foreign_utxo(
        &self,
        owner: Address,
        commitment: Commitment,
        nullifier: NullifierHash,
    ) -> UtxoId {
        self.state.lock().await.register(owner, commitment, nullifier)
    }

    /// Transactions that passed the nonce check and were broadcast.
    pub async fn submitted_count(&self) -> usize {
        self.state.lock().await.submitted
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CAPABILITIES
// ═══════════════════════════════════════════════════════════════════════════════

#[async_trait]
impl NonceSource for InMemoryLedger {
    async fn last_nonce(&self) -> Result<u64, UtxoError> {
        Ok(self.state.lock().await.last_nonce)
    }
}

#[async_trait]
impl LedgerReader for InMemoryLedger {
    async fn trusted_signer(&self) -> Result<Address, UtxoError> {
        Ok(self.trusted_signer)
    }

    async fn is_nullifier_used(&self, nullifier: &NullifierHash) -> Result<bool, UtxoError> {
        Ok(self.state.lock().await.by_nullifier.contains_key(nullifier))
    }

    async fn utxo(&self, id: &UtxoId) -> Result<Option<RemoteUtxo>, UtxoError> {
        Ok(self.state.lock().await.utxos.get(id).map(|entry| RemoteUtxo {
            id: *id,
            owner: entry.owner,
            is_spent: entry.spent_tx.is_some(),
            spent_tx_hash: entry.spent_tx,
        }))
    }

    async fn user_utxos(&self, owner: &Address) -> Result<Vec<UtxoId>, UtxoError> {
        Ok(self
            .state
            .lock()
            .await
            .by_owner
            .get(owner)
            .cloned()
            .unwrap_or_default())
    }

    async fn user_unspent_utxos(&self, owner: &Address) -> Result<Vec<UtxoId>, UtxoError> {
        let state = self.state.lock().await;
        Ok(state
            .by_owner
            .get(owner)
            .map(|ids| {
                ids.iter()
                    .filter(|id| state.utxos.get(*id).is_some_and(|e| e.spent_tx.is_none()))
                    .copied()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn receipt(&self, tx_hash: &TxHash) -> Result<Option<TxReceipt>, UtxoError> {
        Ok(self.state.lock().await.receipts.get(tx_hash).cloned())
    }

    async fn expected_data_hash(&self, call: &CanonicalCall) -> Result<Option<H256>, UtxoError> {
        let state = self.state.lock().await;
        Ok(Some(
            state
                .faults
                .hash_view_override
                .unwrap_or_else(|| call.data_hash()),
        ))
    }
}

#[async_trait]
impl DepositLedger for InMemoryLedger {
    async fn deposit(&self, call: &DepositCall) -> Result<TxHash, UtxoError> {
        let request = call.request.clone();
        let data_hash = CanonicalCall::Deposit(request.fields()).data_hash();
        self.execute(Operation::Deposit, data_hash, &call.attestation, move |_, state, _| {
            if request.amount == 0 || request.token.is_zero() {
                return Err("INVALID_DEPOSIT".into());
            }
            let id = PrivateUtxo::compute_id(&request.nullifier, &request.commitment);
            if state.by_nullifier.contains_key(&request.nullifier) || state.utxos.contains_key(&id) {
                return Err("NULLIFIER_USED".into());
            }
            state.register(request.sender, request.commitment, request.nullifier);
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl SplitLedger for InMemoryLedger {
    async fn pre_validate_split(
        &self,
        request: &SplitRequest,
        nonce: Option<u64>,
    ) -> Result<PreValidation, UtxoError> {
        let state = self.state.lock().await;
        let code = state
            .nonce_code(nonce)
            .unwrap_or_else(|| self.split_code(&state, request));
        Ok(to_pre_validation(code))
    }

    async fn split(&self, call: &SplitCall) -> Result<TxHash, UtxoError> {
        let request = call.request.clone();
        let data_hash = CanonicalCall::Split(request.fields()).data_hash();
        self.execute(Operation::Split, data_hash, &call.attestation, move |ledger, state, tx| {
            match ledger.split_code(state, &request) {
                0 => {}
                code => return Err(format!("PRE_VALIDATION_{code}")),
            }
            if let Some(source) = state.utxos.get_mut(&request.source_id) {
                source.spent_tx = Some(tx);
            }
            for output in &request.outputs {
                state.register(output.owner, output.commitment, output.nullifier);
            }
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl TransferLedger for InMemoryLedger {
    async fn pre_validate_transfer(
        &self,
        request: &TransferRequest,
        nonce: Option<u64>,
    ) -> Result<PreValidation, UtxoError> {
        let state = self.state.lock().await;
        let code = state
            .nonce_code(nonce)
            .unwrap_or_else(|| Self::transfer_code(&state, request));
        Ok(to_pre_validation(code))
    }

    async fn transfer(&self, call: &TransferCall) -> Result<TxHash, UtxoError> {
        let request = call.request.clone();
        let data_hash = CanonicalCall::Transfer(request.fields()).data_hash();
        self.execute(Operation::Transfer, data_hash, &call.attestation, move |_, state, tx| {
            match Self::transfer_code(state, &request) {
                0 => {}
                code => return Err(format!("PRE_VALIDATION_{code}")),
            }
            if let Some(source) = state.utxos.get_mut(&request.source_id) {
                source.spent_tx = Some(tx);
            }
            let output = &request.output;
            state.register(output.owner, output.commitment, output.nullifier);
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl WithdrawLedger for InMemoryLedger {
    async fn pre_validate_withdraw(
        &self,
        request: &WithdrawRequest,
        nonce: Option<u64>,
    ) -> Result<PreValidation, UtxoError> {
        let state = self.state.lock().await;
        let code = state
            .nonce_code(nonce)
            .unwrap_or_else(|| self.withdraw_code(&state, request));
        Ok(to_pre_validation(code))
    }

    async fn withdraw(&self, call: &WithdrawCall) -> Result<TxHash, UtxoError> {
        let request = call.request.clone();
        let data_hash = CanonicalCall::Withdraw(request.fields()).data_hash();
        self.execute(Operation::Withdraw, data_hash, &call.attestation, move |ledger, state, tx| {
            match ledger.withdraw_code(state, &request) {
                0 => {}
                code => return Err(format!("PRE_VALIDATION_{code}")),
            }
            let id = state.by_nullifier.get(&request.source_nullifier).copied();
            if let Some(source) = id.and_then(|id| state.utxos.get_mut(&id)) {
                source.spent_tx = Some(tx);
            }
            Ok(())
        })
        .await
    }
}

fn to_pre_validation(code: u8) -> PreValidation {
    if code == PreValidationCode::Ok.code() {
        PreValidation::OK
    } else {
        PreValidation::rejected(code)
    }
}
