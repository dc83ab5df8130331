//! Keeps the local store aligned with the ledger's minimal public state.
//!
//! The ledger only knows ids, owners and spent flags, so reconciliation can
//! move flags and promote pending records but never rebuild private fields.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use futures::future::try_join_all;
use serde::Serialize;
use tracing::{info, warn};
use zkutxo_common::{
    current_timestamp, Address, PrivateUtxo, ReconciliationMeta, UtxoError, UtxoId, UtxoStatus,
    H256,
};

use crate::config::ReconcilePolicy;
use crate::events::{EventBus, LedgerEvent};
use crate::ledger::{LedgerReader, RemoteUtxo};
use crate::store::EncryptedLocalStore;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub owner: Address,
    pub checked: usize,
    /// Local unspent, ledger spent: flipped.
    pub flipped_to_spent: Vec<UtxoId>,
    /// Pending records the ledger now knows.
    pub promoted: Vec<UtxoId>,
    /// Local spent, ledger unspent, restored under `allow_unspend`.
    pub recovered: Vec<UtxoId>,
    /// Disagreements left in place.
    pub mismatched: Vec<UtxoId>,
    pub still_pending: Vec<UtxoId>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.flipped_to_spent.is_empty()
            && self.recovered.is_empty()
            && self.mismatched.is_empty()
            && self.still_pending.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditReport {
    pub owner: Address,
    /// Known locally, never reached the ledger.
    pub local_only: Vec<UtxoId>,
    /// On the ledger with no local private data. Cannot be spent from here.
    pub remote_only: Vec<UtxoId>,
    /// Spent flag differs between the two sides.
    pub mismatched: Vec<UtxoId>,
}

impl AuditReport {
    pub fn irrecoverable(&self) -> Vec<UtxoError> {
        self.remote_only
            .iter()
            .map(|id| UtxoError::IrrecoverableUtxo(*id))
            .collect()
    }

    pub fn is_consistent(&self) -> bool {
        self.local_only.is_empty() && self.remote_only.is_empty() && self.mismatched.is_empty()
    }
}

pub struct ReconciliationService<L> {
    ledger: Arc<L>,
    store: Arc<EncryptedLocalStore>,
    events: EventBus,
    policy: ReconcilePolicy,
}

impl<L: LedgerReader> ReconciliationService<L> {
    pub fn new(
        ledger: Arc<L>,
        store: Arc<EncryptedLocalStore>,
        events: EventBus,
        policy: ReconcilePolicy,
    ) -> Self {
        Self {
            ledger,
            store,
            events,
            policy,
        }
    }

    /// Aligns every local record of `owner` with the ledger. Remote wins for
    /// the spent flag; the reverse direction follows the configured policy.
    pub async fn reconcile(&self, owner: &Address) -> Result<ReconcileReport, UtxoError> {
        let mut report = ReconcileReport {
            owner: *owner,
            ..Default::default()
        };

        let local = self.store.list(owner)?;
        let remote = try_join_all(local.iter().map(|utxo| self.ledger.utxo(&utxo.id))).await?;
        for (utxo, remote) in local.into_iter().zip(remote) {
            report.checked += 1;
            self.reconcile_one(owner, utxo, remote, &mut report)?;
        }

        info!(
            owner = %owner,
            checked = report.checked,
            flipped = report.flipped_to_spent.len(),
            promoted = report.promoted.len(),
            recovered = report.recovered.len(),
            mismatched = report.mismatched.len(),
            pending = report.still_pending.len(),
            "reconciliation finished"
        );
        self.events.publish(LedgerEvent::ReconciliationCompleted {
            owner: *owner,
            flipped_to_spent: report.flipped_to_spent.len(),
            promoted: report.promoted.len(),
            recovered: report.recovered.len(),
            mismatched: report.mismatched.len(),
        });
        Ok(report)
    }

    fn reconcile_one(
        &self,
        owner: &Address,
        mut utxo: PrivateUtxo,
        remote: Option<RemoteUtxo>,
        report: &mut ReconcileReport,
    ) -> Result<(), UtxoError> {
        let id = utxo.id;
        let pending_tx = utxo
            .reconciliation
            .as_ref()
            .and_then(|meta| meta.pending_tx_hash);

        let Some(remote) = remote else {
            if utxo.status == UtxoStatus::PendingConfirm {
                utxo.reconciliation = Some(meta("outcome still unknown", pending_tx));
                self.store.overwrite(&utxo)?;
                report.still_pending.push(id);
            } else {
                warn!(owner = %owner, id = %id, "local utxo unknown to the ledger");
                report.mismatched.push(id);
            }
            return Ok(());
        };

        if remote.owner != utxo.owner {
            warn!(id = %id, local = %utxo.owner, remote = %remote.owner, "owner disagrees with ledger");
            report.mismatched.push(id);
            return Ok(());
        }

        if utxo.status == UtxoStatus::PendingConfirm {
            let note = if remote.is_spent {
                let (tx, note) = spending_tx(&remote, "confirmed by reconciliation, already spent");
                utxo.mark_spent(tx);
                report.flipped_to_spent.push(id);
                note
            } else {
                utxo.status = UtxoStatus::Unspent;
                utxo.confirmed_tx_hash = pending_tx;
                "confirmed by reconciliation".to_string()
            };
            utxo.reconciliation = Some(meta(&note, None));
            self.store.overwrite(&utxo)?;
            info!(owner = %owner, id = %id, status = ?utxo.status, "pending utxo promoted");
            report.promoted.push(id);
            return Ok(());
        }

        match (utxo.is_spent, remote.is_spent) {
            (false, true) => {
                let (tx, note) = spending_tx(&remote, "spent on the ledger by an unseen transaction");
                warn!(owner = %owner, id = %id, tx = %tx, "ledger reports spent; flipping local record");
                utxo.mark_spent(tx);
                utxo.reconciliation = Some(meta(&note, None));
                self.store.overwrite(&utxo)?;
                report.flipped_to_spent.push(id);
            }
            (true, false) if self.policy.allow_unspend => {
                self.store
                    .recover(owner, &id, "ledger reports the utxo unspent")?;
                report.recovered.push(id);
            }
            (true, false) => {
                warn!(owner = %owner, id = %id, "local SPENT but ledger unspent; left in place");
                report.mismatched.push(id);
            }
            _ => {}
        }
        Ok(())
    }

    /// Partitions ids into local-only, remote-only and spent-flag mismatches.
    ///
    /// Remote-only ids are findings, never reconstructed: the ledger has no
    /// amounts or blinding factors to rebuild them from.
    pub async fn audit(&self, owner: &Address) -> Result<AuditReport, UtxoError> {
        let local: HashMap<UtxoId, PrivateUtxo> = self
            .store
            .list(owner)?
            .into_iter()
            .map(|u| (u.id, u))
            .collect();
        let (all, unspent) = futures::try_join!(
            self.ledger.user_utxos(owner),
            self.ledger.user_unspent_utxos(owner)
        )?;
        let remote: BTreeSet<UtxoId> = all.into_iter().collect();
        let remote_unspent: BTreeSet<UtxoId> = unspent.into_iter().collect();

        let mut report = AuditReport {
            owner: *owner,
            ..Default::default()
        };
        for (id, utxo) in &local {
            if !remote.contains(id) {
                report.local_only.push(*id);
            } else if utxo.is_spent == remote_unspent.contains(id) {
                report.mismatched.push(*id);
            }
        }
        report.remote_only = remote
            .iter()
            .filter(|id| !local.contains_key(id))
            .copied()
            .collect();
        report.local_only.sort();
        report.mismatched.sort();

        for id in &report.remote_only {
            warn!(owner = %owner, id = %id, "ledger utxo has no local private data");
        }
        Ok(report)
    }
}

/// The spending transaction as reported by the ledger. A spent record must
/// carry a hash, so an unreported one is stored as zero and called out in the note.
fn spending_tx(remote: &RemoteUtxo, note: &str) -> (H256, String) {
    match remote.spent_tx_hash {
        Some(tx) => (tx, note.to_string()),
        None => (
            H256::ZERO,
            format!("{note}; ledger did not report the spending transaction"),
        ),
    }
}

fn meta(note: &str, pending_tx_hash: Option<H256>) -> ReconciliationMeta {
    ReconciliationMeta {
        last_checked_at: current_timestamp(),
        note: Some(note.to_string()),
        pending_tx_hash,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote(spent_tx_hash: Option<H256>) -> RemoteUtxo {
        RemoteUtxo {
            id: H256([1; 32]),
            owner: Address([2; 20]),
            is_spent: true,
            spent_tx_hash,
        }
    }

    #[test]
    fn reported_spending_tx_is_kept() {
        let (tx, note) = spending_tx(&remote(Some(H256([9; 32]))), "flipped");
        assert_eq!(tx, H256([9; 32]));
        assert_eq!(note, "flipped");
    }

    #[test]
    fn missing_spending_tx_is_zero_and_noted() {
        let (tx, note) = spending_tx(&remote(None), "flipped");
        assert!(tx.is_zero());
        assert_eq!(note, "flipped; ledger did not report the spending transaction");
    }
}
