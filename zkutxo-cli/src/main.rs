//! zkutxo
//!
//! Operator CLI over the private UTXO engine. Results are printed as JSON on
//! stdout; logs go to stderr.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};
use zkutxo_attestor::{AttestationSigner, AttestorKey};
use zkutxo_common::{
    Address, Operation, PrivateUtxo, TxHash, UtxoId, UtxoKind, UtxoStatus,
};
use zkutxo_ledger::{
    EncryptedLocalStore, EngineConfig, FullLedger, InMemoryLedger, JsonRpcLedger, OutputSpec,
    OwnerSession, SpendOutcome, StoreKey, UtxoLedgerEngine,
};

const DEFAULT_STORE_PATH: &str = ".zkutxo/store";

#[derive(Parser)]
#[command(name = "zkutxo", about = "Private UTXO ledger operations")]
struct Cli {
    /// Encrypted store directory. Overrides ZKUTXO_STORE_PATH.
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Owner address the command acts for.
    #[arg(long, global = true)]
    owner: Option<Address>,

    /// Use an in-process simulated ledger instead of ZKUTXO_RPC_URL.
    #[arg(long, global = true)]
    simulate: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lock public tokens into a fresh private UTXO.
    Deposit(DepositArgs),
    /// Split one UTXO into several whose amounts sum to its value.
    Split(SplitArgs),
    /// Hand a whole UTXO to another owner.
    Transfer(TransferArgs),
    /// Redeem a UTXO for public tokens.
    Withdraw(WithdrawArgs),
    /// Show the owner's local records.
    List,
    /// Align local spent flags with the ledger.
    Reconcile,
    /// Compare local and ledger ids without changing anything.
    Audit,
    /// Make a SPENT record spendable again. Administrative override.
    Recover(RecoverArgs),
}

impl Commands {
    fn submits(&self) -> bool {
        matches!(
            self,
            Commands::Deposit(_) | Commands::Split(_) | Commands::Transfer(_) | Commands::Withdraw(_)
        )
    }
}

#[derive(Args)]
struct DepositArgs {
    #[arg(long)]
    token: Address,
    #[arg(long)]
    amount: u128,
}

#[derive(Args)]
struct SplitArgs {
    #[arg(long)]
    utxo: UtxoId,
    /// One output as AMOUNT:OWNER. Repeat for each output.
    #[arg(long = "out", value_parser = parse_output, required = true)]
    outputs: Vec<OutputSpec>,
}

#[derive(Args)]
struct TransferArgs {
    #[arg(long)]
    utxo: UtxoId,
    #[arg(long)]
    to: Address,
}

#[derive(Args)]
struct WithdrawArgs {
    #[arg(long)]
    utxo: UtxoId,
    /// Defaults to the owner.
    #[arg(long)]
    to: Option<Address>,
}

#[derive(Args)]
struct RecoverArgs {
    #[arg(long)]
    utxo: UtxoId,
    #[arg(long)]
    reason: String,
}

fn parse_output(raw: &str) -> Result<OutputSpec, String> {
    let (amount, owner) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected AMOUNT:OWNER, got '{raw}'"))?;
    Ok(OutputSpec {
        amount: amount
            .trim()
            .parse()
            .map_err(|e| format!("bad amount '{amount}': {e}"))?,
        owner: owner
            .trim()
            .parse()
            .map_err(|e| format!("bad owner '{owner}': {e}"))?,
    })
}

/// A record without its private opening.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UtxoView {
    id: UtxoId,
    owner: Address,
    token_address: Address,
    value: String,
    status: UtxoStatus,
    kind: UtxoKind,
    parent_id: Option<UtxoId>,
    confirmed_tx_hash: Option<TxHash>,
}

impl From<&PrivateUtxo> for UtxoView {
    fn from(utxo: &PrivateUtxo) -> Self {
        Self {
            id: utxo.id,
            owner: utxo.owner,
            token_address: utxo.token_address,
            value: utxo.value.to_string(),
            status: utxo.status,
            kind: utxo.kind,
            parent_id: utxo.parent_id,
            confirmed_tx_hash: utxo.confirmed_tx_hash,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SpendView {
    operation: Operation,
    tx_hash: TxHash,
    spent: UtxoView,
    created: Vec<UtxoView>,
}

impl From<&SpendOutcome> for SpendView {
    fn from(outcome: &SpendOutcome) -> Self {
        Self {
            operation: outcome.operation,
            tx_hash: outcome.tx_hash,
            spent: UtxoView::from(&outcome.spent),
            created: outcome.created.iter().map(UtxoView::from).collect(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "zkutxo=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = EngineConfig::from_env().context("invalid ZKUTXO_* configuration")?;

    let owner = cli.owner.context("--owner is required")?;
    let session = match env::var("ZKUTXO_OWNER_SECRET") {
        Ok(raw) => OwnerSession::new(owner, raw.parse().context("invalid ZKUTXO_OWNER_SECRET")?)?,
        Err(_) => OwnerSession::read_only(owner),
    };

    let passphrase =
        env::var("ZKUTXO_STORE_PASSPHRASE").context("ZKUTXO_STORE_PASSPHRASE is not set")?;
    let store_path = cli
        .store
        .or_else(|| config.store_path.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_PATH));
    let store = EncryptedLocalStore::open(&store_path, &StoreKey::from_passphrase(&passphrase))
        .with_context(|| format!("failed to open store at {}", store_path.display()))?;

    let key = env::var("ZKUTXO_ATTESTOR_KEY")
        .ok()
        .map(|raw| raw.parse::<AttestorKey>())
        .transpose()
        .context("invalid ZKUTXO_ATTESTOR_KEY")?;
    let trusted = config
        .trusted_signer
        .or_else(|| key.as_ref().map(AttestorKey::address))
        .ok_or_else(|| anyhow!("set ZKUTXO_TRUSTED_SIGNER or ZKUTXO_ATTESTOR_KEY"))?;
    let signer = Arc::new(AttestationSigner::new(key, trusted, config.signature_scheme));

    let output = if cli.simulate {
        warn!("simulated ledger: its state is discarded when the process exits");
        let ledger = Arc::new(InMemoryLedger::new(trusted, config.signature_scheme));
        execute(ledger, signer, store, config, &session, cli.command).await?
    } else {
        let rpc_url = config.rpc_url.clone().context("ZKUTXO_RPC_URL is not set")?;
        let contract = config
            .ledger_address
            .context("ZKUTXO_LEDGER_ADDRESS is not set")?;
        info!(%contract, hash_view = config.hash_view, "using JSON-RPC ledger");
        let ledger = JsonRpcLedger::new(&rpc_url, contract, owner)?
            .with_chain_id(config.chain_id)
            .with_hash_view(config.hash_view);
        ledger.check_chain().await?;
        let ledger = Arc::new(ledger);
        execute(ledger, signer, store, config, &session, cli.command).await?
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn execute<L: FullLedger>(
    ledger: Arc<L>,
    signer: Arc<AttestationSigner>,
    store: EncryptedLocalStore,
    config: EngineConfig,
    session: &OwnerSession,
    command: Commands,
) -> Result<Value> {
    let engine = UtxoLedgerEngine::new(ledger, signer, Arc::new(store), config);
    if command.submits() {
        engine
            .check_trusted_signer()
            .await
            .context("attestor is not trusted by the ledger")?;
    }

    let output = match command {
        Commands::Deposit(args) => {
            let utxo = engine.deposit(session, args.token, args.amount).await?;
            serde_json::to_value(UtxoView::from(&utxo))?
        }
        Commands::Split(args) => {
            let outcome = engine.split(session, &args.utxo, &args.outputs).await?;
            serde_json::to_value(SpendView::from(&outcome))?
        }
        Commands::Transfer(args) => {
            let outcome = engine.transfer(session, &args.utxo, args.to).await?;
            serde_json::to_value(SpendView::from(&outcome))?
        }
        Commands::Withdraw(args) => {
            let recipient = args.to.unwrap_or_else(|| session.owner());
            let outcome = engine.withdraw(session, &args.utxo, recipient).await?;
            serde_json::to_value(SpendView::from(&outcome))?
        }
        Commands::List => {
            let records = engine.list(session)?;
            serde_json::to_value(records.iter().map(UtxoView::from).collect::<Vec<_>>())?
        }
        Commands::Reconcile => serde_json::to_value(engine.reconcile(session).await?)?,
        Commands::Audit => {
            let report = engine.audit(session).await?;
            for finding in report.irrecoverable() {
                warn!("{finding}");
            }
            serde_json::to_value(report)?
        }
        Commands::Recover(args) => {
            let utxo = engine
                .store()
                .recover(&session.owner(), &args.utxo, &args.reason)?;
            serde_json::to_value(UtxoView::from(&utxo))?
        }
    };

    engine.store().flush()?;
    Ok(output)
}
