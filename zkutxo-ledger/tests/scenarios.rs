//! End-to-end scenarios against the simulated ledger.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use zkutxo_attestor::{AttestationSigner, AttestorKey, NonceSource, SignatureScheme};
use zkutxo_common::{
    Address, CommitmentEngine, Operation, OwnerKeyMaterial, PrivateUtxo, UtxoError, UtxoKind,
    UtxoStatus, H256,
};
use zkutxo_ledger::{
    DepositCall, DepositLedger, EncryptedLocalStore, EngineConfig, EngineConfigBuilder,
    InMemoryLedger, LedgerEvent, LedgerReader, OutputSpec, OwnerSession, PreValidation,
    ReconcilePolicy, RemoteUtxo, SplitCall, SplitLedger, SplitRequest, StoreKey, TxReceipt,
    UtxoLedgerEngine, WithdrawLedger, WithdrawRequest,
};

const ATTESTOR_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
const TOKEN: Address = Address([0xaa; 20]);

// ═══════════════════════════════════════════════════════════════════════════════
// HARNESS
// ═══════════════════════════════════════════════════════════════════════════════

struct Harness {
    ledger: Arc<InMemoryLedger>,
    engine: UtxoLedgerEngine<InMemoryLedger>,
    alice: OwnerSession,
    bob: OwnerSession,
}

fn test_config() -> EngineConfig {
    EngineConfigBuilder::new()
        .receipt_timeout_secs(1)
        .receipt_poll_interval_ms(10)
        .retry_delay_ms(1)
        .build()
}

fn session(byte: u8) -> OwnerSession {
    OwnerSession::new(
        Address([byte; 20]),
        OwnerKeyMaterial::new([byte; 32]).unwrap(),
    )
    .unwrap()
}

fn harness_with(config: EngineConfig, store: EncryptedLocalStore) -> Harness {
    let key: AttestorKey = ATTESTOR_KEY.parse().unwrap();
    let trusted = key.address();
    let ledger = Arc::new(InMemoryLedger::new(trusted, config.signature_scheme));
    let signer = Arc::new(AttestationSigner::new(
        Some(key),
        trusted,
        config.signature_scheme,
    ));
    let engine = UtxoLedgerEngine::new(Arc::clone(&ledger), signer, Arc::new(store), config);
    Harness {
        ledger,
        engine,
        alice: session(0x11),
        bob: session(0x22),
    }
}

fn harness() -> Harness {
    harness_with(test_config(), EncryptedLocalStore::in_memory(&StoreKey::random()))
}

/// Executes splits on the simulated ledger but loses the node's response once,
/// the way a connection reset after broadcast looks to the client.
struct DroppedResponseLedger {
    inner: InMemoryLedger,
    drop_next_split_response: AtomicBool,
}

#[async_trait]
impl NonceSource for DroppedResponseLedger {
    async fn last_nonce(&self) -> Result<u64, UtxoError> {
        self.inner.last_nonce().await
    }
}

#[async_trait]
impl LedgerReader for DroppedResponseLedger {
    async fn trusted_signer(&self) -> Result<Address, UtxoError> {
        self.inner.trusted_signer().await
    }

    async fn is_nullifier_used(&self, nullifier: &H256) -> Result<bool, UtxoError> {
        self.inner.is_nullifier_used(nullifier).await
    }

    async fn utxo(&self, id: &H256) -> Result<Option<RemoteUtxo>, UtxoError> {
        self.inner.utxo(id).await
    }

    async fn user_utxos(&self, owner: &Address) -> Result<Vec<H256>, UtxoError> {
        self.inner.user_utxos(owner).await
    }

    async fn user_unspent_utxos(&self, owner: &Address) -> Result<Vec<H256>, UtxoError> {
        self.inner.user_unspent_utxos(owner).await
    }

    async fn receipt(&self, tx_hash: &H256) -> Result<Option<TxReceipt>, UtxoError> {
        self.inner.receipt(tx_hash).await
    }
}

#[async_trait]
impl DepositLedger for DroppedResponseLedger {
    async fn deposit(&self, call: &DepositCall) -> Result<H256, UtxoError> {
        self.inner.deposit(call).await
    }
}

#[async_trait]
impl SplitLedger for DroppedResponseLedger {
    async fn pre_validate_split(
        &self,
        request: &SplitRequest,
        nonce: Option<u64>,
    ) -> Result<PreValidation, UtxoError> {
        self.inner.pre_validate_split(request, nonce).await
    }

    async fn split(&self, call: &SplitCall) -> Result<H256, UtxoError> {
        let tx_hash = self.inner.split(call).await?;
        if self.drop_next_split_response.swap(false, Ordering::SeqCst) {
            return Err(UtxoError::Rpc("connection reset after send".into()));
        }
        Ok(tx_hash)
    }
}

fn local(h: &Harness, owner: &OwnerSession, id: &H256) -> PrivateUtxo {
    h.engine.store().require(&owner.owner(), id).unwrap()
}

// ═══════════════════════════════════════════════════════════════════════════════
// SCENARIOS
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn deposit_then_split_conserves_value() {
    let h = harness();
    let input = h.engine.deposit(&h.alice, TOKEN, 1_000_000_000).await.unwrap();
    assert_eq!(input.status, UtxoStatus::Unspent);
    assert!(input.confirmed_tx_hash.is_some());
    assert_eq!(h.ledger.last_nonce().await.unwrap(), 1);

    let outcome = h
        .engine
        .split(
            &h.alice,
            &input.id,
            &[
                OutputSpec { amount: 600_000_000, owner: h.alice.owner() },
                OutputSpec { amount: 400_000_000, owner: h.bob.owner() },
            ],
        )
        .await
        .unwrap();

    assert_eq!(outcome.operation, Operation::Split);
    assert_eq!(outcome.created.len(), 2);
    let outputs: Vec<_> = outcome.created.iter().map(|u| u.commitment).collect();
    assert!(CommitmentEngine::new()
        .verify_balance(&[input.commitment], &outputs)
        .unwrap());
    for created in &outcome.created {
        assert_eq!(created.parent_id, Some(input.id));
        assert_eq!(created.kind, UtxoKind::Split);
        assert_eq!(created.status, UtxoStatus::Unspent);
        assert!(CommitmentEngine::new().verify_opening(
            &created.commitment,
            created.value,
            &created.blinding_factor
        ));
    }
    assert_eq!(
        outcome.created.iter().map(|u| u.value).sum::<u64>(),
        input.value
    );

    let spent = local(&h, &h.alice, &input.id);
    assert!(spent.is_spent);
    assert_eq!(spent.status, UtxoStatus::Spent);
    assert_eq!(spent.confirmed_tx_hash, Some(outcome.tx_hash));

    assert_eq!(h.engine.list(&h.alice).unwrap().len(), 2);
    let received = h.engine.list(&h.bob).unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].value, 400_000_000);
    assert_eq!(received[0].owner, h.bob.owner());
    assert_eq!(received[0].id, outcome.created[1].id);
    assert_eq!(
        h.ledger.user_unspent_utxos(&h.alice.owner()).await.unwrap().len(),
        1
    );
    assert_eq!(
        h.ledger.user_unspent_utxos(&h.bob.owner()).await.unwrap(),
        vec![received[0].id]
    );
    assert_eq!(h.ledger.last_nonce().await.unwrap(), 2);
}

#[tokio::test]
async fn split_short_of_input_value_is_rejected() {
    let h = harness();
    let input = h.engine.deposit(&h.alice, TOKEN, 1_000_000_000).await.unwrap();
    let submitted = h.ledger.submitted_count().await;

    let err = h
        .engine
        .split(
            &h.alice,
            &input.id,
            &[OutputSpec { amount: 900_000_000, owner: h.bob.owner() }],
        )
        .await
        .unwrap_err();
    assert!(
        matches!(err, UtxoError::PreValidation { operation: Operation::Split, code: 3, .. }),
        "{err}"
    );

    assert_eq!(h.ledger.submitted_count().await, submitted);
    assert_eq!(h.ledger.last_nonce().await.unwrap(), 1);
    assert_eq!(local(&h, &h.alice, &input.id).status, UtxoStatus::Unspent);
    assert!(h.engine.list(&h.bob).unwrap().is_empty());
}

#[tokio::test]
async fn transfer_moves_record_to_recipient_partition() {
    let h = harness();
    let input = h.engine.deposit(&h.alice, TOKEN, 500_000_000).await.unwrap();

    let outcome = h
        .engine
        .transfer(&h.alice, &input.id, h.bob.owner())
        .await
        .unwrap();
    let output = &outcome.created[0];
    assert_eq!(output.owner, h.bob.owner());
    assert_eq!(output.value, 500_000_000);
    assert_eq!(output.kind, UtxoKind::Transfer);
    // same opening, fresh nullifier and id
    assert_eq!(output.commitment, input.commitment);
    assert_eq!(output.blinding_factor, input.blinding_factor);
    assert_ne!(output.nullifier_hash, input.nullifier_hash);
    assert_ne!(output.id, input.id);

    assert!(local(&h, &h.alice, &input.id).is_spent);
    let received = local(&h, &h.bob, &output.id);
    assert_eq!(received.status, UtxoStatus::Unspent);
    assert_eq!(received.parent_id, Some(input.id));

    let remote = h.ledger.utxo(&output.id).await.unwrap().unwrap();
    assert_eq!(remote.owner, h.bob.owner());
    assert!(!remote.is_spent);

    // the recipient can spend what they were sent
    let withdrawn = h
        .engine
        .withdraw(&h.bob, &output.id, h.bob.owner())
        .await
        .unwrap();
    assert!(withdrawn.created.is_empty());
    assert!(h
        .ledger
        .user_unspent_utxos(&h.bob.owner())
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn off_by_one_splits_never_reach_the_ledger() {
    let h = harness();
    let input = h.engine.deposit(&h.alice, TOKEN, 1000).await.unwrap();
    let submitted = h.ledger.submitted_count().await;

    for (a, b) in [(600, 401), (600, 399)] {
        let err = h
            .engine
            .split(
                &h.alice,
                &input.id,
                &[
                    OutputSpec { amount: a, owner: h.alice.owner() },
                    OutputSpec { amount: b, owner: h.alice.owner() },
                ],
            )
            .await
            .unwrap_err();
        assert!(
            matches!(err, UtxoError::PreValidation { operation: Operation::Split, code: 3, .. }),
            "{err}"
        );
    }

    assert_eq!(h.ledger.submitted_count().await, submitted);
    assert_eq!(local(&h, &h.alice, &input.id).status, UtxoStatus::Unspent);
}

#[tokio::test]
async fn withdrawing_twice_reports_nullifier_already_used() {
    let h = harness();
    let input = h.engine.deposit(&h.alice, TOKEN, 42).await.unwrap();
    h.engine
        .withdraw(&h.alice, &input.id, h.alice.owner())
        .await
        .unwrap();
    let submitted = h.ledger.submitted_count().await;

    let err = h
        .engine
        .withdraw(&h.alice, &input.id, h.alice.owner())
        .await
        .unwrap_err();
    assert!(err.aborted_before_submission());
    assert!(err.to_string().contains("nullifier already used"), "{err}");
    assert_eq!(h.ledger.submitted_count().await, submitted);
}

#[tokio::test]
async fn ledger_pre_validation_catches_spend_the_client_never_saw() {
    let h = harness();
    let input = h.engine.deposit(&h.alice, TOKEN, 42).await.unwrap();
    h.ledger.spend_out_of_band(&input.id).await.unwrap();
    let submitted = h.ledger.submitted_count().await;

    let err = h
        .engine
        .withdraw(&h.alice, &input.id, h.alice.owner())
        .await
        .unwrap_err();
    assert!(
        matches!(err, UtxoError::PreValidation { operation: Operation::Withdraw, code: 2, .. }),
        "{err}"
    );
    assert_eq!(h.ledger.submitted_count().await, submitted);
}

// ═══════════════════════════════════════════════════════════════════════════════
// VALIDATION
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn deposit_amount_bounds() {
    let h = harness();
    assert!(matches!(
        h.engine.deposit(&h.alice, TOKEN, 0).await,
        Err(UtxoError::Range(_))
    ));
    assert!(matches!(
        h.engine
            .deposit(&h.alice, TOKEN, u64::MAX as u128 + 1)
            .await,
        Err(UtxoError::Range(_))
    ));
    assert!(h
        .engine
        .deposit(&h.alice, TOKEN, u64::MAX as u128)
        .await
        .is_ok());
    assert_eq!(h.ledger.submitted_count().await, 1);
}

#[tokio::test]
async fn zero_recipient_is_rejected_locally() {
    let h = harness();
    let input = h.engine.deposit(&h.alice, TOKEN, 10).await.unwrap();

    let err = h
        .engine
        .transfer(&h.alice, &input.id, Address::ZERO)
        .await
        .unwrap_err();
    assert!(matches!(err, UtxoError::PreValidation { code: 5, .. }));

    let err = h
        .engine
        .split(
            &h.alice,
            &input.id,
            &[
                OutputSpec { amount: 5, owner: h.alice.owner() },
                OutputSpec { amount: 5, owner: Address::ZERO },
            ],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, UtxoError::PreValidation { code: 5, .. }));
    assert_eq!(h.ledger.submitted_count().await, 1);
}

#[tokio::test]
async fn read_only_session_cannot_deposit() {
    let h = harness();
    let viewer = OwnerSession::read_only(h.alice.owner());
    let err = h.engine.deposit(&viewer, TOKEN, 10).await.unwrap_err();
    assert!(matches!(err, UtxoError::Derivation(_)));
    assert_eq!(h.ledger.submitted_count().await, 0);
}

#[tokio::test]
async fn hash_mismatch_aborts_before_submission() {
    let h = harness();
    let input = h.engine.deposit(&h.alice, TOKEN, 100).await.unwrap();
    let submitted = h.ledger.submitted_count().await;
    h.ledger.override_hash_view(Some(H256([1; 32]))).await;

    let err = h
        .engine
        .transfer(&h.alice, &input.id, h.bob.owner())
        .await
        .unwrap_err();
    assert!(matches!(err, UtxoError::HashMismatch { operation: Operation::Transfer, .. }));
    assert!(err.aborted_before_submission());
    assert_eq!(h.ledger.submitted_count().await, submitted);
    assert_eq!(h.ledger.last_nonce().await.unwrap(), 1);
    assert_eq!(local(&h, &h.alice, &input.id).status, UtxoStatus::Unspent);
}

// ═══════════════════════════════════════════════════════════════════════════════
// NONCES
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn nonces_increase_and_stale_nonce_is_rejected() {
    let h = harness();
    let mut last = None;
    for amount in [10, 20, 30] {
        let utxo = h.engine.deposit(&h.alice, TOKEN, amount).await.unwrap();
        last = Some(utxo);
    }
    assert_eq!(h.ledger.last_nonce().await.unwrap(), 3);

    let utxo = last.unwrap();
    let request = WithdrawRequest {
        source_nullifier: utxo.nullifier_hash,
        amount: utxo.value,
        token: utxo.token_address,
        recipient: h.alice.owner(),
        blinding_factor: utxo.blinding_factor,
    };
    let stale = h
        .ledger
        .pre_validate_withdraw(&request, Some(2))
        .await
        .unwrap();
    assert_eq!(stale.code, 6);
    let err = stale.into_result(Operation::Withdraw).unwrap_err();
    assert!(err.to_string().contains("attestation nonce already consumed"));

    let fresh = h
        .ledger
        .pre_validate_withdraw(&request, Some(4))
        .await
        .unwrap();
    assert!(fresh.ok);
}

#[tokio::test]
async fn nonce_conflict_is_retried_with_a_fresh_attestation() {
    let h = harness();
    h.ledger.consume_nonces_before_next_submit(2).await;

    let utxo = h.engine.deposit(&h.alice, TOKEN, 7).await.unwrap();
    assert_eq!(utxo.status, UtxoStatus::Unspent);
    assert_eq!(h.ledger.last_nonce().await.unwrap(), 3);
    assert_eq!(h.ledger.submitted_count().await, 1);
}

#[tokio::test]
async fn nonce_conflict_surfaces_when_retries_are_exhausted() {
    let config = EngineConfigBuilder::new()
        .receipt_timeout_secs(1)
        .receipt_poll_interval_ms(10)
        .retry_delay_ms(1)
        .max_nonce_retries(0)
        .build();
    let h = harness_with(config, EncryptedLocalStore::in_memory(&StoreKey::random()));
    h.ledger.consume_nonces_before_next_submit(1).await;

    let err = h.engine.deposit(&h.alice, TOKEN, 7).await.unwrap_err();
    assert!(matches!(err, UtxoError::NonceConflict { nonce: 1 }));
    assert!(h.engine.list(&h.alice).unwrap().is_empty());

    // the released nonce does not block the next attempt
    let utxo = h.engine.deposit(&h.alice, TOKEN, 7).await.unwrap();
    assert_eq!(utxo.status, UtxoStatus::Unspent);
    assert_eq!(h.ledger.last_nonce().await.unwrap(), 2);
}

#[tokio::test]
async fn reverted_on_consumed_nonce_is_retried() {
    let h = harness();
    h.ledger.lose_next_nonce_race().await;

    let utxo = h.engine.deposit(&h.alice, TOKEN, 7).await.unwrap();
    assert_eq!(utxo.status, UtxoStatus::Unspent);
    // the lost race and the resubmission both reached the ledger
    assert_eq!(h.ledger.submitted_count().await, 2);
    assert_eq!(h.ledger.last_nonce().await.unwrap(), 2);
    assert_eq!(h.engine.list(&h.alice).unwrap().len(), 1);
}

#[tokio::test]
async fn concurrent_owners_get_distinct_nonces() {
    let h = harness();
    let (a, b) = tokio::join!(
        h.engine.deposit(&h.alice, TOKEN, 1),
        h.engine.deposit(&h.bob, TOKEN, 2)
    );
    a.unwrap();
    b.unwrap();
    assert_eq!(h.ledger.last_nonce().await.unwrap(), 2);
    assert_eq!(h.ledger.submitted_count().await, 2);
}

// ═══════════════════════════════════════════════════════════════════════════════
// FAILURE OUTCOMES
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn revert_leaves_input_unspent() {
    let h = harness();
    let input = h.engine.deposit(&h.alice, TOKEN, 100).await.unwrap();
    h.ledger.revert_next("OUT_OF_GAS").await;

    let err = h
        .engine
        .transfer(&h.alice, &input.id, h.bob.owner())
        .await
        .unwrap_err();
    match &err {
        UtxoError::Submission { operation, ids, reason } => {
            assert_eq!(*operation, Operation::Transfer);
            assert_eq!(ids[0], input.id);
            assert_eq!(reason, "OUT_OF_GAS");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(local(&h, &h.alice, &input.id).status, UtxoStatus::Unspent);
    assert!(h.engine.list(&h.bob).unwrap().is_empty());
    assert_eq!(h.ledger.last_nonce().await.unwrap(), 1);

    h.engine
        .transfer(&h.alice, &input.id, h.bob.owner())
        .await
        .unwrap();
    assert_eq!(h.ledger.last_nonce().await.unwrap(), 2);
}

#[tokio::test(start_paused = true)]
async fn receipt_timeout_parks_outputs_until_reconciled() {
    let h = harness();
    let mut events = h.engine.events().subscribe();
    let input = h.engine.deposit(&h.alice, TOKEN, 900).await.unwrap();
    h.ledger.withhold_next_receipt().await;

    let err = h
        .engine
        .split(
            &h.alice,
            &input.id,
            &[
                OutputSpec { amount: 300, owner: h.alice.owner() },
                OutputSpec { amount: 600, owner: h.alice.owner() },
            ],
        )
        .await
        .unwrap_err();
    let (tx_hash, ids) = match err {
        UtxoError::ReceiptTimeout { operation: Operation::Split, tx_hash, ids } => (tx_hash, ids),
        other => panic!("unexpected error: {other}"),
    };
    assert_eq!(ids.len(), 3);
    assert_eq!(ids[0], input.id);

    // neither spent nor unspent: the input is untouched, outputs are parked
    assert_eq!(local(&h, &h.alice, &input.id).status, UtxoStatus::Unspent);
    for id in &ids[1..] {
        let parked = local(&h, &h.alice, id);
        assert_eq!(parked.status, UtxoStatus::PendingConfirm);
        assert_eq!(
            parked.reconciliation.as_ref().and_then(|m| m.pending_tx_hash),
            Some(tx_hash)
        );
        let err = h
            .engine
            .withdraw(&h.alice, id, h.alice.owner())
            .await
            .unwrap_err();
        assert!(matches!(err, UtxoError::InvalidInput(_)));
    }

    let pending = h.engine.reconcile(&h.alice).await.unwrap();
    assert_eq!(pending.flipped_to_spent, vec![input.id]);
    assert_eq!(pending.promoted.len(), 2);

    h.ledger.release_withheld_receipts().await;
    for id in &ids[1..] {
        let confirmed = local(&h, &h.alice, id);
        assert_eq!(confirmed.status, UtxoStatus::Unspent);
        assert_eq!(confirmed.confirmed_tx_hash, Some(tx_hash));
    }

    // the consumed nonce is re-read from the ledger
    h.engine.deposit(&h.alice, TOKEN, 1).await.unwrap();
    assert_eq!(h.ledger.last_nonce().await.unwrap(), 3);

    let kinds: Vec<&'static str> = std::iter::from_fn(|| events.try_recv().ok())
        .map(|env| match env.event {
            LedgerEvent::DepositConfirmed { .. } => "deposit",
            LedgerEvent::SpendConfirmed { .. } => "spend",
            LedgerEvent::OutcomeUnknown { .. } => "unknown",
            LedgerEvent::ReconciliationCompleted { .. } => "reconciled",
        })
        .collect();
    assert_eq!(kinds, vec!["deposit", "unknown", "reconciled", "deposit"]);
}

#[tokio::test]
async fn send_error_after_broadcast_parks_outputs() {
    let key: AttestorKey = ATTESTOR_KEY.parse().unwrap();
    let trusted = key.address();
    let config = test_config();
    let ledger = Arc::new(DroppedResponseLedger {
        inner: InMemoryLedger::new(trusted, config.signature_scheme),
        drop_next_split_response: AtomicBool::new(true),
    });
    let signer = Arc::new(AttestationSigner::new(Some(key), trusted, config.signature_scheme));
    let engine = UtxoLedgerEngine::new(
        Arc::clone(&ledger),
        signer,
        Arc::new(EncryptedLocalStore::in_memory(&StoreKey::random())),
        config,
    );
    let (alice, bob) = (session(0x11), session(0x22));

    let input = engine.deposit(&alice, TOKEN, 1_000).await.unwrap();
    let err = engine
        .split(
            &alice,
            &input.id,
            &[
                OutputSpec { amount: 600, owner: alice.owner() },
                OutputSpec { amount: 400, owner: bob.owner() },
            ],
        )
        .await
        .unwrap_err();
    let ids = match err {
        UtxoError::OutcomeUnknown { operation: Operation::Split, ids, .. } => ids,
        other => panic!("unexpected error: {other}"),
    };
    assert_eq!(ids.len(), 3);
    assert_eq!(ids[0], input.id);

    // the split executed once and was not sent again
    assert_eq!(ledger.inner.submitted_count().await, 2);
    assert_eq!(ledger.inner.last_nonce().await.unwrap(), 2);

    let store = engine.store();
    assert_eq!(
        store.require(&alice.owner(), &input.id).unwrap().status,
        UtxoStatus::Unspent
    );
    let mine = store.require(&alice.owner(), &ids[1]).unwrap();
    let theirs = store.require(&bob.owner(), &ids[2]).unwrap();
    for parked in [&mine, &theirs] {
        assert_eq!(parked.status, UtxoStatus::PendingConfirm);
        assert!(parked
            .reconciliation
            .as_ref()
            .is_some_and(|m| m.pending_tx_hash.is_none()));
    }
    assert_eq!(theirs.value, 400);

    let report = engine.reconcile(&alice).await.unwrap();
    assert_eq!(report.flipped_to_spent, vec![input.id]);
    assert_eq!(report.promoted, vec![ids[1]]);
    let report = engine.reconcile(&bob).await.unwrap();
    assert_eq!(report.promoted, vec![ids[2]]);

    assert_eq!(store.require(&bob.owner(), &ids[2]).unwrap().status, UtxoStatus::Unspent);
    assert!(store.require(&alice.owner(), &input.id).unwrap().is_spent);
    assert!(engine.audit(&alice).await.unwrap().is_consistent());
    assert!(engine.audit(&bob).await.unwrap().is_consistent());
}

#[tokio::test(start_paused = true)]
async fn pending_deposit_stays_pending_while_ledger_is_silent() {
    let h = harness();
    h.ledger.withhold_next_receipt().await;
    let err = h.engine.deposit(&h.alice, TOKEN, 5).await.unwrap_err();
    let id = match err {
        UtxoError::ReceiptTimeout { ids, .. } => ids[0],
        other => panic!("unexpected error: {other}"),
    };
    assert_eq!(local(&h, &h.alice, &id).status, UtxoStatus::PendingConfirm);

    // the simulated deposit did execute, so reconciliation promotes it
    let report = h.engine.reconcile(&h.alice).await.unwrap();
    assert_eq!(report.promoted, vec![id]);
    assert_eq!(local(&h, &h.alice, &id).status, UtxoStatus::Unspent);
}

// ═══════════════════════════════════════════════════════════════════════════════
// RECONCILIATION
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn out_of_band_spend_is_flipped_locally() {
    let h = harness();
    let input = h.engine.deposit(&h.alice, TOKEN, 100).await.unwrap();
    let oob = h.ledger.spend_out_of_band(&input.id).await.unwrap();

    let report = h.engine.reconcile(&h.alice).await.unwrap();
    assert_eq!(report.checked, 1);
    assert_eq!(report.flipped_to_spent, vec![input.id]);

    let flipped = local(&h, &h.alice, &input.id);
    assert!(flipped.is_spent);
    assert_eq!(flipped.confirmed_tx_hash, Some(oob));

    let again = h.engine.reconcile(&h.alice).await.unwrap();
    assert!(again.is_clean());
}

#[tokio::test]
async fn local_spent_ledger_unspent_follows_policy() {
    let h = harness();
    let input = h.engine.deposit(&h.alice, TOKEN, 100).await.unwrap();
    h.engine
        .store()
        .mark_spent(&h.alice.owner(), &input.id, H256([7; 32]))
        .unwrap();

    let report = h.engine.reconcile(&h.alice).await.unwrap();
    assert_eq!(report.mismatched, vec![input.id]);
    assert!(local(&h, &h.alice, &input.id).is_spent);

    let permissive = zkutxo_ledger::ReconciliationService::new(
        Arc::clone(h.engine.ledger()),
        Arc::clone(h.engine.store()),
        h.engine.events().clone(),
        ReconcilePolicy { allow_unspend: true },
    );
    let report = permissive.reconcile(&h.alice.owner()).await.unwrap();
    assert_eq!(report.recovered, vec![input.id]);

    let recovered = local(&h, &h.alice, &input.id);
    assert_eq!(recovered.status, UtxoStatus::Recovered);
    assert!(recovered.is_spendable());
    h.engine
        .withdraw(&h.alice, &input.id, h.alice.owner())
        .await
        .unwrap();
}

#[tokio::test]
async fn audit_partitions_ids() {
    let h = harness();
    let synced = h.engine.deposit(&h.alice, TOKEN, 10).await.unwrap();
    let mismatched = h.engine.deposit(&h.alice, TOKEN, 20).await.unwrap();
    h.engine
        .store()
        .mark_spent(&h.alice.owner(), &mismatched.id, H256([3; 32]))
        .unwrap();

    // a record that never reached the ledger
    let mut never_sent = synced.clone();
    let (commitment, blinding) = CommitmentEngine::new().commit(30, None).unwrap();
    never_sent.commitment = commitment;
    never_sent.blinding_factor = blinding;
    never_sent.value = 30;
    never_sent.nullifier_hash = h.alice.deriver().derive(&commitment).unwrap();
    never_sent.id = PrivateUtxo::compute_id(&never_sent.nullifier_hash, &commitment);
    h.engine.store().save(&h.alice.owner(), &never_sent).unwrap();

    // a ledger entry with no private data here
    let (foreign_commitment, _) = CommitmentEngine::new().commit(40, None).unwrap();
    let foreign = h
        .ledger
        .register_foreign_utxo(h.alice.owner(), foreign_commitment, H256([0x44; 32]))
        .await;

    let audit = h.engine.audit(&h.alice).await.unwrap();
    assert_eq!(audit.local_only, vec![never_sent.id]);
    assert_eq!(audit.remote_only, vec![foreign]);
    assert_eq!(audit.mismatched, vec![mismatched.id]);
    assert!(!audit.is_consistent());

    let findings = audit.irrecoverable();
    assert!(matches!(findings.as_slice(), [UtxoError::IrrecoverableUtxo(id)] if *id == foreign));

    // audits report; they never write
    assert!(h.engine.store().get(&h.alice.owner(), &foreign).unwrap().is_none());
}

// ═══════════════════════════════════════════════════════════════════════════════
// PERSISTENCE AND SIGNER TRUST
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn records_survive_reopening_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store");
    let key = StoreKey::from_passphrase("correct horse");

    let (ledger, deposited) = {
        let h = harness_with(test_config(), EncryptedLocalStore::open(&path, &key).unwrap());
        let utxo = h.engine.deposit(&h.alice, TOKEN, 1_000_000_007).await.unwrap();
        h.engine.store().flush().unwrap();
        (Arc::clone(&h.ledger), utxo)
    };
    assert_eq!(ledger.last_nonce().await.unwrap(), 1);

    let store = EncryptedLocalStore::open(&path, &key).unwrap();
    let reloaded = store.require(&session(0x11).owner(), &deposited.id).unwrap();
    assert_eq!(reloaded.value, 1_000_000_007);
    assert_eq!(reloaded.commitment, deposited.commitment);
    assert!(CommitmentEngine::new().verify_opening(
        &reloaded.commitment,
        reloaded.value,
        &reloaded.blinding_factor
    ));
    drop(store);

    let wrong = EncryptedLocalStore::open(&path, &StoreKey::from_passphrase("wrong")).unwrap();
    assert!(wrong.list(&session(0x11).owner()).is_err());
}

#[tokio::test]
async fn untrusted_attestor_never_submits() {
    let key: AttestorKey = ATTESTOR_KEY.parse().unwrap();
    let other = Address([0x99; 20]);
    let ledger = Arc::new(InMemoryLedger::new(other, SignatureScheme::PersonalMessage));
    let signer = Arc::new(AttestationSigner::new(
        Some(key),
        other,
        SignatureScheme::PersonalMessage,
    ));
    let engine = UtxoLedgerEngine::new(
        Arc::clone(&ledger),
        signer,
        Arc::new(EncryptedLocalStore::in_memory(&StoreKey::random())),
        test_config(),
    );
    assert!(engine.check_trusted_signer().await.is_ok());

    let err = engine.deposit(&session(0x11), TOKEN, 5).await.unwrap_err();
    assert!(matches!(err, UtxoError::Signing(_)));
    assert_eq!(ledger.submitted_count().await, 0);
    assert_eq!(ledger.last_nonce().await.unwrap(), 0);
}

#[tokio::test]
async fn raw_digest_scheme_round_trips() {
    let config = EngineConfigBuilder::new()
        .receipt_timeout_secs(1)
        .receipt_poll_interval_ms(10)
        .signature_scheme(SignatureScheme::RawDigest)
        .build();
    let h = harness_with(config, EncryptedLocalStore::in_memory(&StoreKey::random()));
    let utxo = h.engine.deposit(&h.alice, TOKEN, 3).await.unwrap();
    h.engine
        .transfer(&h.alice, &utxo.id, h.bob.owner())
        .await
        .unwrap();
    assert_eq!(h.ledger.last_nonce().await.unwrap(), 2);
}
