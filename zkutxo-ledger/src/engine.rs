//! The operation state machine.
//!
//! Every privileged operation runs the same pipeline: local validation,
//! commitment and nullifier construction, canonical hash (checked against the
//! ledger's own view when it offers one), ledger dry run, attestation, submit,
//! receipt. Local records change only after a successful receipt. Once a
//! submission may have reached the network, the outputs are never dropped: a
//! missing receipt or a failed send leaves them parked as `PENDING_CONFIRM`
//! for reconciliation.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use zkutxo_attestor::{AttestationSigner, NonceSource};
use zkutxo_common::{
    current_timestamp, Address, Attestation, BlindingFactor, CommitmentEngine, Operation,
    PreValidationCode, PrivateUtxo, ReconciliationMeta, TxHash, UtxoError, UtxoId, UtxoKind,
    UtxoStatus, H256, MAX_UTXO_VALUE,
};

use crate::config::EngineConfig;
use crate::events::{EventBus, LedgerEvent};
use crate::ledger::{
    Attested, CanonicalCall, DepositLedger, DepositRequest, LedgerReader, OutputNote,
    SplitLedger, SplitRequest, TransferLedger, TransferRequest, TxReceipt, WithdrawLedger,
    WithdrawRequest,
};
use crate::reconcile::{AuditReport, ReconcileReport, ReconciliationService};
use crate::session::OwnerSession;
use crate::store::EncryptedLocalStore;

/// One requested split output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSpec {
    pub amount: u128,
    pub owner: Address,
}

/// Result of a confirmed split, transfer or withdraw.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpendOutcome {
    pub operation: Operation,
    pub tx_hash: TxHash,
    pub spent: PrivateUtxo,
    pub created: Vec<PrivateUtxo>,
}

enum Settled {
    Confirmed(TxReceipt),
    /// Possibly executed. `tx_hash` is known only if the node answered the send.
    Unknown {
        tx_hash: Option<TxHash>,
        reason: String,
    },
}

pub struct UtxoLedgerEngine<L> {
    ledger: Arc<L>,
    signer: Arc<AttestationSigner>,
    store: Arc<EncryptedLocalStore>,
    events: EventBus,
    config: EngineConfig,
    commitments: CommitmentEngine,
    owner_locks: Mutex<HashMap<Address, Arc<AsyncMutex<()>>>>,
}

impl<L: LedgerReader> UtxoLedgerEngine<L> {
    pub fn new(
        ledger: Arc<L>,
        signer: Arc<AttestationSigner>,
        store: Arc<EncryptedLocalStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            ledger,
            signer,
            store,
            events: EventBus::new(),
            config,
            commitments: CommitmentEngine::new(),
            owner_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn ledger(&self) -> &Arc<L> {
        &self.ledger
    }

    pub fn store(&self) -> &Arc<EncryptedLocalStore> {
        &self.store
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Refuses to run when the ledger trusts a different attestor.
    pub async fn check_trusted_signer(&self) -> Result<(), UtxoError> {
        let remote = self.ledger.trusted_signer().await?;
        let local = self.signer.trusted_signer();
        if remote != local {
            return Err(UtxoError::Signing(format!(
                "ledger trusts {remote}, engine is configured for {local}"
            )));
        }
        Ok(())
    }

    pub fn list(&self, session: &OwnerSession) -> Result<Vec<PrivateUtxo>, UtxoError> {
        Ok(self.store.list(&session.owner())?)
    }

    pub fn reconciler(&self) -> ReconciliationService<L> {
        ReconciliationService::new(
            Arc::clone(&self.ledger),
            Arc::clone(&self.store),
            self.events.clone(),
            self.config.reconcile,
        )
    }

    /// Reconciles the session owner's partition while holding their session lock.
    pub async fn reconcile(&self, session: &OwnerSession) -> Result<ReconcileReport, UtxoError> {
        let owner = session.owner();
        let _session = self.lock_owner(&owner).await?;
        self.reconciler().reconcile(&owner).await
    }

    pub async fn audit(&self, session: &OwnerSession) -> Result<AuditReport, UtxoError> {
        self.reconciler().audit(&session.owner()).await
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // DEPOSIT
    // ═══════════════════════════════════════════════════════════════════════════

    pub async fn deposit(
        &self,
        session: &OwnerSession,
        token: Address,
        amount: u128,
    ) -> Result<PrivateUtxo, UtxoError>
    where
        L: DepositLedger,
    {
        let owner = session.owner();
        let _session = self.lock_owner(&owner).await?;

        let value = check_amount(amount)?;
        if token.is_zero() {
            return Err(UtxoError::InvalidInput("deposit token is the zero address".into()));
        }

        let (commitment, blinding_factor) = self.commitments.commit(amount, None)?;
        let nullifier = session.deriver().derive(&commitment)?;
        if self.ledger.is_nullifier_used(&nullifier).await? {
            return Err(UtxoError::pre_validation(
                Operation::Deposit,
                PreValidationCode::NullifierCollision.code(),
            ));
        }

        let request = DepositRequest {
            token,
            amount: value,
            commitment,
            nullifier,
            sender: owner,
        };
        let data_hash = self
            .canonical_hash(CanonicalCall::Deposit(request.fields()))
            .await?;

        let mut utxo = PrivateUtxo {
            id: PrivateUtxo::compute_id(&nullifier, &commitment),
            owner,
            token_address: token,
            value,
            commitment,
            blinding_factor,
            nullifier_hash: nullifier,
            is_spent: false,
            status: UtxoStatus::PendingConfirm,
            parent_id: None,
            kind: UtxoKind::Deposit,
            created_at: current_timestamp(),
            confirmed_tx_hash: None,
            reconciliation: None,
        };

        let ledger = Arc::clone(&self.ledger);
        let settled = self
            .submit_attested(Operation::Deposit, data_hash, &[utxo.id], move |attestation| {
                let ledger = Arc::clone(&ledger);
                let call = Attested {
                    request: request.clone(),
                    attestation,
                };
                async move { ledger.deposit(&call).await }
            })
            .await?;

        match settled {
            Settled::Confirmed(receipt) => {
                utxo.status = UtxoStatus::Unspent;
                utxo.confirmed_tx_hash = Some(receipt.tx_hash);
                self.store.save(&owner, &utxo)?;
                info!(
                    owner = %owner,
                    id = %utxo.id,
                    tx = %receipt.tx_hash,
                    value,
                    "deposit confirmed"
                );
                self.events.publish(LedgerEvent::DepositConfirmed {
                    owner,
                    utxo_id: utxo.id,
                    tx_hash: receipt.tx_hash,
                });
                Ok(utxo)
            }
            Settled::Unknown { tx_hash, reason } => {
                let ids = vec![utxo.id];
                self.park_pending(Operation::Deposit, &owner, tx_hash, vec![utxo])?;
                Err(unknown_outcome(Operation::Deposit, tx_hash, ids, reason))
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // SPLIT
    // ═══════════════════════════════════════════════════════════════════════════

    /// Consumes one UTXO into `outputs`, which must sum exactly to its value.
    pub async fn split(
        &self,
        session: &OwnerSession,
        utxo_id: &UtxoId,
        outputs: &[OutputSpec],
    ) -> Result<SpendOutcome, UtxoError>
    where
        L: SplitLedger,
    {
        let owner = session.owner();
        let _session = self.lock_owner(&owner).await?;
        let input = self.load_spendable(Operation::Split, &owner, utxo_id)?;

        if outputs.is_empty() {
            return Err(UtxoError::InvalidInput("split needs at least one output".into()));
        }
        for output in outputs {
            check_amount(output.amount)?;
            if output.owner.is_zero() {
                return Err(UtxoError::pre_validation(
                    Operation::Split,
                    PreValidationCode::InvalidRecipient.code(),
                ));
            }
        }
        let total = outputs
            .iter()
            .try_fold(0u128, |acc, o| acc.checked_add(o.amount));
        if total != Some(input.value as u128) {
            debug!(input = input.value, ?total, "split rejected: not conserved");
            return Err(UtxoError::pre_validation(
                Operation::Split,
                PreValidationCode::BalanceNotConserved.code(),
            ));
        }

        let blindings = self
            .commitments
            .split_blindings(&input.blinding_factor, outputs.len());
        let created = outputs
            .iter()
            .zip(blindings)
            .enumerate()
            .map(|(index, (spec, blinding))| {
                self.derive_output(session, &input, index as u32, spec.owner, spec.amount, blinding, UtxoKind::Split)
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.check_conservation(Operation::Split, &input, &created)?;

        let request = SplitRequest {
            source_id: input.id,
            outputs: created.iter().map(output_note).collect(),
        };
        let data_hash = self
            .canonical_hash(CanonicalCall::Split(request.fields()))
            .await?;
        self.ledger
            .pre_validate_split(&request, None)
            .await?
            .into_result(Operation::Split)?;

        let ids = involved_ids(&input, &created);
        let ledger = Arc::clone(&self.ledger);
        let settled = self
            .submit_attested(Operation::Split, data_hash, &ids, move |attestation| {
                let ledger = Arc::clone(&ledger);
                let call = Attested {
                    request: request.clone(),
                    attestation,
                };
                async move { ledger.split(&call).await }
            })
            .await?;

        self.settle_spend(Operation::Split, &owner, input, created, settled)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // TRANSFER
    // ═══════════════════════════════════════════════════════════════════════════

    /// Moves the whole UTXO to `recipient`.
    ///
    /// The output keeps the input's blinding factor, so its commitment equals
    /// the input commitment. The ledger links the two through the source id
    /// anyway; only the nullifier and owner are fresh. Split to rerandomize.
    pub async fn transfer(
        &self,
        session: &OwnerSession,
        utxo_id: &UtxoId,
        recipient: Address,
    ) -> Result<SpendOutcome, UtxoError>
    where
        L: TransferLedger,
    {
        let owner = session.owner();
        let _session = self.lock_owner(&owner).await?;
        let input = self.load_spendable(Operation::Transfer, &owner, utxo_id)?;

        if recipient.is_zero() {
            return Err(UtxoError::pre_validation(
                Operation::Transfer,
                PreValidationCode::InvalidRecipient.code(),
            ));
        }

        // a transfer is a one-output split of the full value
        let output = self.derive_output(
            session,
            &input,
            0,
            recipient,
            input.value as u128,
            input.blinding_factor,
            UtxoKind::Transfer,
        )?;
        let created = vec![output];
        self.check_conservation(Operation::Transfer, &input, &created)?;

        let request = TransferRequest {
            source_id: input.id,
            recipient,
            output: output_note(&created[0]),
        };
        let data_hash = self
            .canonical_hash(CanonicalCall::Transfer(request.fields()))
            .await?;
        self.ledger
            .pre_validate_transfer(&request, None)
            .await?
            .into_result(Operation::Transfer)?;

        let ids = involved_ids(&input, &created);
        let ledger = Arc::clone(&self.ledger);
        let settled = self
            .submit_attested(Operation::Transfer, data_hash, &ids, move |attestation| {
                let ledger = Arc::clone(&ledger);
                let call = Attested {
                    request: request.clone(),
                    attestation,
                };
                async move { ledger.transfer(&call).await }
            })
            .await?;

        self.settle_spend(Operation::Transfer, &owner, input, created, settled)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // WITHDRAW
    // ═══════════════════════════════════════════════════════════════════════════

    /// Redeems the full UTXO value to `recipient`. The amount becomes public.
    pub async fn withdraw(
        &self,
        session: &OwnerSession,
        utxo_id: &UtxoId,
        recipient: Address,
    ) -> Result<SpendOutcome, UtxoError>
    where
        L: WithdrawLedger,
    {
        let owner = session.owner();
        let _session = self.lock_owner(&owner).await?;
        let input = self.load_spendable(Operation::Withdraw, &owner, utxo_id)?;

        if recipient.is_zero() {
            return Err(UtxoError::pre_validation(
                Operation::Withdraw,
                PreValidationCode::InvalidRecipient.code(),
            ));
        }

        let request = WithdrawRequest {
            source_nullifier: input.nullifier_hash,
            amount: input.value,
            token: input.token_address,
            recipient,
            blinding_factor: input.blinding_factor,
        };
        let data_hash = self
            .canonical_hash(CanonicalCall::Withdraw(request.fields()))
            .await?;
        self.ledger
            .pre_validate_withdraw(&request, None)
            .await?
            .into_result(Operation::Withdraw)?;

        let ledger = Arc::clone(&self.ledger);
        let settled = self
            .submit_attested(Operation::Withdraw, data_hash, &[input.id], move |attestation| {
                let ledger = Arc::clone(&ledger);
                let call = Attested {
                    request: request.clone(),
                    attestation,
                };
                async move { ledger.withdraw(&call).await }
            })
            .await?;

        self.settle_spend(Operation::Withdraw, &owner, input, Vec::new(), settled)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // SHARED PIPELINE
    // ═══════════════════════════════════════════════════════════════════════════

    async fn lock_owner(&self, owner: &Address) -> Result<OwnedMutexGuard<()>, UtxoError> {
        let lock = {
            let mut locks = self
                .owner_locks
                .lock()
                .map_err(|_| UtxoError::Store("owner lock table poisoned".into()))?;
            Arc::clone(locks.entry(*owner).or_default())
        };
        Ok(lock.lock_owned().await)
    }

    fn load_spendable(
        &self,
        operation: Operation,
        owner: &Address,
        id: &UtxoId,
    ) -> Result<PrivateUtxo, UtxoError> {
        let utxo = self.store.require(owner, id)?;
        if utxo.is_spent {
            return Err(UtxoError::pre_validation(
                operation,
                PreValidationCode::AlreadySpent.code(),
            ));
        }
        if !utxo.is_spendable() {
            return Err(UtxoError::InvalidInput(format!(
                "utxo {id} is {:?}; reconcile before spending it",
                utxo.status
            )));
        }
        Ok(utxo)
    }

    #[allow(clippy::too_many_arguments)]
    fn derive_output(
        &self,
        session: &OwnerSession,
        input: &PrivateUtxo,
        index: u32,
        owner: Address,
        amount: u128,
        blinding: BlindingFactor,
        kind: UtxoKind,
    ) -> Result<PrivateUtxo, UtxoError> {
        let (commitment, blinding_factor) = self.commitments.commit(amount, Some(blinding))?;
        let nullifier = session
            .deriver()
            .derive_output(&commitment, &input.nullifier_hash, index, &owner)?;
        Ok(PrivateUtxo {
            id: PrivateUtxo::compute_id(&nullifier, &commitment),
            owner,
            token_address: input.token_address,
            value: check_amount(amount)?,
            commitment,
            blinding_factor,
            nullifier_hash: nullifier,
            is_spent: false,
            status: UtxoStatus::PendingConfirm,
            parent_id: Some(input.id),
            kind,
            created_at: current_timestamp(),
            confirmed_tx_hash: None,
            reconciliation: None,
        })
    }

    fn check_conservation(
        &self,
        operation: Operation,
        input: &PrivateUtxo,
        created: &[PrivateUtxo],
    ) -> Result<(), UtxoError> {
        let outputs: Vec<_> = created.iter().map(|u| u.commitment).collect();
        if !self.commitments.verify_balance(&[input.commitment], &outputs)? {
            error!(%operation, input = %input.id, "output commitments do not sum to the input");
            return Err(UtxoError::pre_validation(
                operation,
                PreValidationCode::BalanceNotConserved.code(),
            ));
        }
        Ok(())
    }

    /// Local canonical hash, cross-checked against the ledger's view when available.
    async fn canonical_hash(&self, call: CanonicalCall) -> Result<H256, UtxoError> {
        let operation = call.operation();
        let local = call.data_hash();
        if let Some(remote) = self.ledger.expected_data_hash(&call).await? {
            if remote != local {
                error!(%operation, %local, %remote, "canonical hash mismatch; aborting");
                return Err(UtxoError::HashMismatch {
                    operation,
                    local: local.to_string(),
                    remote: remote.to_string(),
                });
            }
        }
        Ok(local)
    }

    /// Signs, submits and waits, re-signing on nonce conflicts.
    ///
    /// The signing window stays open until the receipt is observed or given up
    /// on, so no other attestation can take the nonce in between. Only a nonce
    /// conflict leads to a second submission; any other send failure may have
    /// broadcast the first one and is reported as an unknown outcome.
    async fn submit_attested<F, Fut>(
        &self,
        operation: Operation,
        data_hash: H256,
        ids: &[UtxoId],
        submit: F,
    ) -> Result<Settled, UtxoError>
    where
        F: Fn(Attestation) -> Fut,
        Fut: Future<Output = Result<TxHash, UtxoError>>,
    {
        let mut guard = self.signer.begin().await;
        let mut conflicted = 0;

        for attempt in 0..=self.config.max_nonce_retries {
            if attempt > 0 {
                tokio::time::sleep(self.config.retry_delay(attempt)).await;
            }

            let attestation = guard.sign(self.ledger.as_ref(), operation, data_hash).await?;
            let nonce = attestation.nonce;

            let tx_hash = match submit(attestation).await {
                Ok(tx_hash) => tx_hash,
                Err(UtxoError::NonceConflict { .. }) => {
                    guard.release(nonce);
                    conflicted = nonce;
                    warn!(%operation, nonce, attempt, "nonce taken before broadcast");
                    continue;
                }
                Err(UtxoError::Rejected(reason)) => {
                    guard.release(nonce);
                    warn!(%operation, nonce, reason = %reason, "node rejected the transaction");
                    return Err(UtxoError::Submission {
                        operation,
                        ids: ids.to_vec(),
                        reason,
                    });
                }
                Err(err) if err.aborted_before_submission() => {
                    guard.release(nonce);
                    return Err(err);
                }
                Err(err) => {
                    guard.forget();
                    error!(%operation, nonce, error = %err, "send failed after submission started; outcome unknown");
                    return Ok(Settled::Unknown {
                        tx_hash: None,
                        reason: err.to_string(),
                    });
                }
            };

            match self.wait_for_receipt(&tx_hash).await {
                Ok(Some(receipt)) if receipt.is_success() => {
                    debug!(%operation, nonce, tx = %tx_hash, "transaction confirmed");
                    return Ok(Settled::Confirmed(receipt));
                }
                Ok(Some(receipt)) => {
                    guard.release(nonce);
                    if receipt.is_nonce_revert() || self.nonce_consumed(nonce).await {
                        conflicted = nonce;
                        warn!(%operation, nonce, attempt, tx = %tx_hash, "reverted on a consumed nonce");
                        continue;
                    }
                    let reason = receipt
                        .revert_reason
                        .unwrap_or_else(|| "transaction reverted".to_string());
                    warn!(%operation, tx = %tx_hash, reason = %reason, "transaction reverted");
                    return Err(UtxoError::Submission {
                        operation,
                        ids: ids.to_vec(),
                        reason,
                    });
                }
                Ok(None) => {
                    guard.forget();
                    warn!(%operation, tx = %tx_hash, "no receipt before timeout; outcome unknown");
                    return Ok(Settled::Unknown {
                        tx_hash: Some(tx_hash),
                        reason: "receipt not observed in time".into(),
                    });
                }
                Err(err) => {
                    guard.forget();
                    warn!(%operation, tx = %tx_hash, error = %err, "receipt polling failed; outcome unknown");
                    return Ok(Settled::Unknown {
                        tx_hash: Some(tx_hash),
                        reason: err.to_string(),
                    });
                }
            }
        }

        Err(UtxoError::NonceConflict { nonce: conflicted })
    }

    /// Whether the ledger has moved past `nonce`. Standard receipts carry no
    /// revert reason, so a revert is attributed to the nonce this way.
    async fn nonce_consumed(&self, nonce: u64) -> bool {
        match self.ledger.last_nonce().await {
            Ok(last) => last >= nonce,
            Err(err) => {
                warn!(nonce, error = %err, "could not re-read the ledger nonce");
                false
            }
        }
    }

    async fn wait_for_receipt(&self, tx_hash: &TxHash) -> Result<Option<TxReceipt>, UtxoError> {
        let deadline = Instant::now() + self.config.receipt_timeout();
        loop {
            if let Some(receipt) = self.ledger.receipt(tx_hash).await? {
                return Ok(Some(receipt));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.config.receipt_poll_interval()).await;
        }
    }

    fn settle_spend(
        &self,
        operation: Operation,
        owner: &Address,
        input: PrivateUtxo,
        mut created: Vec<PrivateUtxo>,
        settled: Settled,
    ) -> Result<SpendOutcome, UtxoError> {
        match settled {
            Settled::Confirmed(receipt) => {
                let tx_hash = receipt.tx_hash;
                let mut spent = input;
                spent.mark_spent(tx_hash);
                for utxo in &mut created {
                    utxo.status = UtxoStatus::Unspent;
                    utxo.confirmed_tx_hash = Some(tx_hash);
                }
                self.store.apply_spend(&spent, &created)?;
                info!(
                    %operation,
                    owner = %owner,
                    spent = %spent.id,
                    created = created.len(),
                    tx = %tx_hash,
                    "spend confirmed"
                );
                self.events.publish(LedgerEvent::SpendConfirmed {
                    operation,
                    owner: *owner,
                    spent: spent.id,
                    created: created.iter().map(|u| u.id).collect(),
                    tx_hash,
                });
                Ok(SpendOutcome {
                    operation,
                    tx_hash,
                    spent,
                    created,
                })
            }
            Settled::Unknown { tx_hash, reason } => {
                let ids = involved_ids(&input, &created);
                self.park_pending(operation, owner, tx_hash, created)?;
                Err(unknown_outcome(operation, tx_hash, ids, reason))
            }
        }
    }

    /// Persists outputs of an unconfirmed transaction so their private data survives.
    fn park_pending(
        &self,
        operation: Operation,
        owner: &Address,
        tx_hash: Option<TxHash>,
        outputs: Vec<PrivateUtxo>,
    ) -> Result<(), UtxoError> {
        let ids: Vec<UtxoId> = outputs.iter().map(|u| u.id).collect();
        for mut utxo in outputs {
            utxo.status = UtxoStatus::PendingConfirm;
            utxo.reconciliation = Some(ReconciliationMeta {
                last_checked_at: current_timestamp(),
                note: Some(format!("{operation} outcome unknown")),
                pending_tx_hash: tx_hash,
            });
            let partition = utxo.owner;
            self.store.save(&partition, &utxo)?;
        }
        warn!(%operation, owner = %owner, tx = ?tx_hash, pending = ids.len(), "outputs parked until reconciliation");
        self.events.publish(LedgerEvent::OutcomeUnknown {
            operation,
            owner: *owner,
            tx_hash,
            ids,
        });
        Ok(())
    }
}

fn check_amount(amount: u128) -> Result<u64, UtxoError> {
    if amount == 0 {
        return Err(UtxoError::Range("amount must be positive".into()));
    }
    if amount > MAX_UTXO_VALUE {
        return Err(UtxoError::Range(format!(
            "amount {amount} exceeds ceiling {MAX_UTXO_VALUE}"
        )));
    }
    Ok(amount as u64)
}

fn unknown_outcome(
    operation: Operation,
    tx_hash: Option<TxHash>,
    ids: Vec<UtxoId>,
    reason: String,
) -> UtxoError {
    match tx_hash {
        Some(tx_hash) => UtxoError::ReceiptTimeout {
            operation,
            tx_hash,
            ids,
        },
        None => UtxoError::OutcomeUnknown {
            operation,
            ids,
            reason,
        },
    }
}

fn output_note(utxo: &PrivateUtxo) -> OutputNote {
    OutputNote {
        owner: utxo.owner,
        commitment: utxo.commitment,
        nullifier: utxo.nullifier_hash,
    }
}

fn involved_ids(input: &PrivateUtxo, created: &[PrivateUtxo]) -> Vec<UtxoId> {
    std::iter::once(input.id)
        .chain(created.iter().map(|u| u.id))
        .collect()
}
