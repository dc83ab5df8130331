//! zkutxo-ledger
//!
//! The private UTXO engine proper: it drives deposit, split, transfer and
//! withdraw against a remote ledger contract, keeps every owner's private
//! records in an encrypted local store, and reconciles that store against the
//! ledger's public state (ids, owners and spent flags only).
//!
//! # Architecture
//!
//! - [`ledger`]: capability traits the engine needs from a ledger, one per
//!   state-changing operation, plus the read-only views.
//! - [`memory::InMemoryLedger`]: a simulation of the contract, with fault knobs.
//! - [`rpc::JsonRpcLedger`]: the deployed contract over JSON-RPC (feature `rpc`).
//! - [`engine::UtxoLedgerEngine`]: the operation state machine.
//! - [`reconcile::ReconciliationService`]: spent-flag sync and audits.
//! - [`store::EncryptedLocalStore`]: AES-GCM sealed records, in memory or in sled.

pub mod config;
pub mod engine;
pub mod events;
pub mod ledger;
pub mod memory;
pub mod reconcile;
pub mod session;
pub mod store;

#[cfg(feature = "rpc")]
pub mod rpc;

pub use config::{EngineConfig, EngineConfigBuilder, ReconcilePolicy};
pub use engine::{OutputSpec, SpendOutcome, UtxoLedgerEngine};
pub use events::{EventBus, EventEnvelope, LedgerEvent};
pub use ledger::{
    Attested, CanonicalCall, DepositCall, DepositLedger, DepositRequest, LedgerReader,
    OutputNote, PreValidation, RemoteUtxo, SplitCall, SplitLedger, SplitRequest, TransferCall,
    TransferLedger, TransferRequest, TxReceipt, TxStatus, WithdrawCall, WithdrawLedger,
    WithdrawRequest, NONCE_REVERT_REASON,
};
pub use memory::InMemoryLedger;
pub use reconcile::{AuditReport, ReconcileReport, ReconciliationService};
pub use session::OwnerSession;
pub use store::{EncryptedLocalStore, SaveOutcome, StoreError, StoreKey};

#[cfg(feature = "rpc")]
pub use rpc::{JsonRpcLedger, RpcError};

/// Any ledger that supports every operation the engine drives.
pub trait FullLedger: DepositLedger + SplitLedger + TransferLedger + WithdrawLedger {}

impl<T> FullLedger for T where T: DepositLedger + SplitLedger + TransferLedger + WithdrawLedger {}
