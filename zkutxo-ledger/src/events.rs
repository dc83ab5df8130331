//! Typed state-transition events.
//!
//! Every published event gets a sequence number under the bus lock and is
//! pushed to each live subscriber in that order, once.

use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;
use zkutxo_common::{Address, Operation, TxHash, UtxoId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    DepositConfirmed {
        owner: Address,
        utxo_id: UtxoId,
        tx_hash: TxHash,
    },
    /// Split, transfer or withdraw confirmed.
    SpendConfirmed {
        operation: Operation,
        owner: Address,
        spent: UtxoId,
        created: Vec<UtxoId>,
        tx_hash: TxHash,
    },
    /// Receipt never observed, or the submission itself failed mid-flight;
    /// reconciliation will settle it. `tx_hash` is absent when the node never
    /// answered the submission.
    OutcomeUnknown {
        operation: Operation,
        owner: Address,
        tx_hash: Option<TxHash>,
        ids: Vec<UtxoId>,
    },
    ReconciliationCompleted {
        owner: Address,
        flipped_to_spent: usize,
        promoted: usize,
        recovered: usize,
        mismatched: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventEnvelope {
    pub seq: u64,
    pub event: LedgerEvent,
}

#[derive(Default)]
struct BusState {
    next_seq: u64,
    subscribers: Vec<mpsc::UnboundedSender<EventEnvelope>>,
}

/// Fan-out of ledger events to any number of subscribers.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<BusState>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receives every event published after this call.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<EventEnvelope> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut state) = self.inner.lock() {
            state.subscribers.push(tx);
        }
        rx
    }

    /// Returns the sequence number assigned to `event`.
    pub fn publish(&self, event: LedgerEvent) -> u64 {
        let Ok(mut state) = self.inner.lock() else {
            return 0;
        };
        state.next_seq += 1;
        let envelope = EventEnvelope {
            seq: state.next_seq,
            event,
        };
        // closed receivers drop out here
        state
            .subscribers
            .retain(|tx| tx.send(envelope.clone()).is_ok());
        debug!(seq = envelope.seq, subscribers = state.subscribers.len(), "published ledger event");
        envelope.seq
    }
}
