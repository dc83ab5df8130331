//! EVM client for the deployed ledger contract.
//!
//! This module requires the `rpc` feature flag. Views go through `eth_call`;
//! writes go through `eth_sendTransaction` on an `ethers` HTTP provider, so
//! the node must manage the sending account.

use async_trait::async_trait;
use ethers::providers::{Http, Middleware, Provider, ProviderError, RpcError as _};
use ethers::types::{
    transaction::eip2718::TypedTransaction, Bytes, TransactionReceipt, TransactionRequest, U256,
    U64,
};
use thiserror::Error;
use tracing::{debug, info};
use zkutxo_attestor::NonceSource;
use zkutxo_common::abi::{self, token, ParamType, Token};
use zkutxo_common::{Address, Attestation, NullifierHash, TxHash, UtxoError, UtxoId, H256};

use crate::ledger::{
    CanonicalCall, DepositCall, DepositLedger, LedgerReader, OutputNote, PreValidation,
    RemoteUtxo, SplitCall, SplitLedger, SplitRequest, TransferCall, TransferLedger,
    TransferRequest, TxReceipt, TxStatus, WithdrawCall, WithdrawLedger, WithdrawRequest,
    NONCE_REVERT_REASON,
};

const ATTESTATION_ARGS: &str = "bytes32,uint256,uint256,uint8,bytes32,bytes32";

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("invalid rpc url: {0}")]
    Url(String),

    #[error("node is on chain {actual}, expected {expected}")]
    ChainMismatch { expected: u64, actual: U256 },
}

impl From<RpcError> for UtxoError {
    fn from(err: RpcError) -> Self {
        UtxoError::Rpc(err.to_string())
    }
}

/// Ledger contract reached through an `ethers` HTTP provider.
pub struct JsonRpcLedger {
    provider: Provider<Http>,
    contract: Address,
    from: Address,
    chain_id: Option<u64>,
    hash_view: bool,
}

impl JsonRpcLedger {
    /// `from` is the node-managed account that pays for split, transfer and
    /// withdraw. Deposits are sent from the depositor's own address.
    pub fn new(rpc_url: &str, contract: Address, from: Address) -> Result<Self, RpcError> {
        let provider =
            Provider::<Http>::try_from(rpc_url).map_err(|e| RpcError::Url(e.to_string()))?;
        Ok(Self {
            provider,
            contract,
            from,
            chain_id: None,
            hash_view: false,
        })
    }

    /// Use the contract's `hash*` views to cross-check canonical hashes.
    pub fn with_hash_view(mut self, enabled: bool) -> Self {
        self.hash_view = enabled;
        self
    }

    /// Pin the chain: checked by [`Self::check_chain`] and set on every transaction.
    pub fn with_chain_id(mut self, chain_id: Option<u64>) -> Self {
        self.chain_id = chain_id;
        self
    }

    /// Fails when the node serves a different chain than the configured one.
    pub async fn check_chain(&self) -> Result<(), UtxoError> {
        let Some(expected) = self.chain_id else {
            return Ok(());
        };
        let actual = self.provider.get_chainid().await.map_err(RpcError::from)?;
        if actual != U256::from(expected) {
            return Err(RpcError::ChainMismatch { expected, actual }.into());
        }
        info!(chain_id = expected, contract = %self.contract, "ledger chain verified");
        Ok(())
    }

    fn transaction(&self, from: Option<Address>, data: Vec<u8>) -> TransactionRequest {
        let mut tx = TransactionRequest::new()
            .to(ethers::types::Address::from(self.contract))
            .data(Bytes::from(data));
        if let Some(from) = from {
            tx = tx.from(ethers::types::Address::from(from));
        }
        if let Some(chain_id) = self.chain_id {
            tx = tx.chain_id(chain_id);
        }
        tx
    }

    async fn view(&self, signature: &str, tokens: &[Token]) -> Result<Vec<u8>, UtxoError> {
        let tx: TypedTransaction = self
            .transaction(None, abi::encode_call(signature, tokens))
            .into();
        let output = self.provider.call(&tx, None).await.map_err(RpcError::from)?;
        Ok(output.to_vec())
    }

    async fn send(
        &self,
        from: Address,
        signature: &str,
        tokens: &[Token],
        nonce: u64,
    ) -> Result<TxHash, UtxoError> {
        let tx = self.transaction(Some(from), abi::encode_call(signature, tokens));
        match self.provider.send_transaction(tx, None).await {
            Ok(pending) => {
                let tx_hash = TxHash::from(pending.tx_hash());
                debug!(%signature, tx = %tx_hash, nonce, "transaction sent");
                Ok(tx_hash)
            }
            Err(err) => Err(classify_send_error(err, nonce)),
        }
    }

    fn hash_view_call(call: &CanonicalCall) -> (&'static str, Vec<Token>) {
        match call {
            CanonicalCall::Deposit(f) => (
                "hashDeposit(address,uint256,uint256,bytes32,uint256,address)",
                vec![
                    token::address(&f.token),
                    token::uint_word(&f.commitment.x),
                    token::uint_word(&f.commitment.y),
                    token::bytes32(&f.nullifier),
                    token::uint(f.amount as u128),
                    token::address(&f.sender),
                ],
            ),
            CanonicalCall::Split(f) => (
                "hashSplit(bytes32,bytes32[])",
                vec![
                    token::bytes32(&f.source_id),
                    token::bytes32_array(&f.output_nullifiers),
                ],
            ),
            CanonicalCall::Transfer(f) => (
                "hashTransfer(bytes32,address,bytes32)",
                vec![
                    token::bytes32(&f.source_id),
                    token::address(&f.recipient),
                    token::bytes32(&f.output_nullifier),
                ],
            ),
            CanonicalCall::Withdraw(f) => (
                "hashWithdraw(bytes32,uint256,address,address)",
                vec![
                    token::bytes32(&f.source_nullifier),
                    token::uint(f.amount as u128),
                    token::address(&f.token),
                    token::address(&f.recipient),
                ],
            ),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ENCODING HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

/// A JSON-RPC error response means the node refused the transaction; anything
/// else (transport, timeout) leaves open whether it was broadcast.
fn classify_send_error(err: ProviderError, nonce: u64) -> UtxoError {
    match err.as_error_response() {
        // gas estimation surfaces the contract's nonce check before broadcast
        Some(response) if response.message.contains(NONCE_REVERT_REASON) => {
            UtxoError::NonceConflict { nonce }
        }
        Some(response) => {
            UtxoError::Rejected(format!("{} (code {})", response.message, response.code))
        }
        None => RpcError::Provider(err).into(),
    }
}

/// Standard receipts carry no revert reason; nonce reverts are recognised by
/// the engine re-reading `lastNonce()`.
fn to_receipt(tx_hash: TxHash, receipt: &TransactionReceipt) -> TxReceipt {
    let status = if receipt.status == Some(U64::from(1)) {
        TxStatus::Success
    } else {
        TxStatus::Reverted
    };
    TxReceipt {
        tx_hash,
        status,
        block_number: receipt.block_number.map(|b| b.as_u64()).unwrap_or(0),
        revert_reason: None,
    }
}

fn attestation_tokens(attestation: &Attestation) -> Vec<Token> {
    let sig = &attestation.signature;
    vec![
        token::bytes32(&attestation.data_hash),
        token::uint(attestation.nonce as u128),
        token::uint(attestation.timestamp as u128),
        token::uint(sig.v() as u128),
        token::bytes32(&H256(sig.r())),
        token::bytes32(&H256(sig.s())),
    ]
}

/// `(address[] owners, uint256[] cxs, uint256[] cys, bytes32[] nullifiers)`
fn output_tokens(outputs: &[OutputNote]) -> Vec<Token> {
    let owners: Vec<Address> = outputs.iter().map(|o| o.owner).collect();
    let xs: Vec<[u8; 32]> = outputs.iter().map(|o| o.commitment.x).collect();
    let ys: Vec<[u8; 32]> = outputs.iter().map(|o| o.commitment.y).collect();
    let nullifiers: Vec<H256> = outputs.iter().map(|o| o.nullifier).collect();
    vec![
        token::address_array(&owners),
        token::uint_word_array(&xs),
        token::uint_word_array(&ys),
        token::bytes32_array(&nullifiers),
    ]
}

fn split_tokens(request: &SplitRequest) -> Vec<Token> {
    let mut tokens = vec![token::bytes32(&request.source_id)];
    tokens.extend(output_tokens(&request.outputs));
    tokens
}

fn transfer_tokens(request: &TransferRequest) -> Vec<Token> {
    vec![
        token::bytes32(&request.source_id),
        token::address(&request.recipient),
        token::uint_word(&request.output.commitment.x),
        token::uint_word(&request.output.commitment.y),
        token::bytes32(&request.output.nullifier),
    ]
}

fn withdraw_tokens(request: &WithdrawRequest) -> Vec<Token> {
    vec![
        token::bytes32(&request.source_nullifier),
        token::uint(request.amount as u128),
        token::address(&request.token),
        token::address(&request.recipient),
        token::uint_word(&request.blinding_factor.to_bytes()),
    ]
}

fn pre_validation(data: &[u8]) -> Result<PreValidation, UtxoError> {
    let mut values = abi::decode(&[ParamType::Bool, ParamType::Uint(8)], data)?.into_iter();
    let (Some(ok), Some(code)) = (values.next(), values.next()) else {
        return Err(UtxoError::Encoding("pre-validation tuple too short".into()));
    };
    let code = u8::try_from(abi::as_u64(code)?)
        .map_err(|_| UtxoError::Encoding("pre-validation code out of range".into()))?;
    Ok(PreValidation {
        ok: abi::as_bool(ok)?,
        code,
    })
}

fn bytes32_list(data: &[u8]) -> Result<Vec<H256>, UtxoError> {
    abi::as_bytes32_array(abi::decode_single(
        ParamType::Array(Box::new(ParamType::FixedBytes(32))),
        data,
    )?)
}

fn with_nonce(mut tokens: Vec<Token>, nonce: Option<u64>) -> Vec<Token> {
    // zero asks the contract to skip its nonce check
    tokens.push(token::uint(nonce.unwrap_or(0) as u128));
    tokens
}

fn with_attestation(mut tokens: Vec<Token>, attestation: &Attestation) -> Vec<Token> {
    tokens.extend(attestation_tokens(attestation));
    tokens
}

// ═══════════════════════════════════════════════════════════════════════════════
// CAPABILITIES
// ═══════════════════════════════════════════════════════════════════════════════

#[async_trait]
impl NonceSource for JsonRpcLedger {
    async fn last_nonce(&self) -> Result<u64, UtxoError> {
        let data = self.view("lastNonce()", &[]).await?;
        abi::as_u64(abi::decode_single(ParamType::Uint(256), &data)?)
    }
}

#[async_trait]
impl LedgerReader for JsonRpcLedger {
    async fn trusted_signer(&self) -> Result<Address, UtxoError> {
        let data = self.view("trustedSigner()", &[]).await?;
        abi::as_address(abi::decode_single(ParamType::Address, &data)?)
    }

    async fn is_nullifier_used(&self, nullifier: &NullifierHash) -> Result<bool, UtxoError> {
        let data = self
            .view("isNullifierUsed(bytes32)", &[token::bytes32(nullifier)])
            .await?;
        abi::as_bool(abi::decode_single(ParamType::Bool, &data)?)
    }

    async fn utxo(&self, id: &UtxoId) -> Result<Option<RemoteUtxo>, UtxoError> {
        // (bool exists, address owner, bool isSpent, bytes32 spentTxHash)
        let data = self.view("getUTXO(bytes32)", &[token::bytes32(id)]).await?;
        let mut values = abi::decode(
            &[
                ParamType::Bool,
                ParamType::Address,
                ParamType::Bool,
                ParamType::FixedBytes(32),
            ],
            &data,
        )?
        .into_iter();
        let (Some(exists), Some(owner), Some(is_spent), Some(spent_tx)) =
            (values.next(), values.next(), values.next(), values.next())
        else {
            return Err(UtxoError::Encoding("getUTXO tuple too short".into()));
        };
        if !abi::as_bool(exists)? {
            return Ok(None);
        }
        let spent_tx_hash = abi::as_bytes32(spent_tx)?;
        Ok(Some(RemoteUtxo {
            id: *id,
            owner: abi::as_address(owner)?,
            is_spent: abi::as_bool(is_spent)?,
            spent_tx_hash: (!spent_tx_hash.is_zero()).then_some(spent_tx_hash),
        }))
    }

    async fn user_utxos(&self, owner: &Address) -> Result<Vec<UtxoId>, UtxoError> {
        let data = self
            .view("getUserUTXOs(address)", &[token::address(owner)])
            .await?;
        bytes32_list(&data)
    }

    async fn user_unspent_utxos(&self, owner: &Address) -> Result<Vec<UtxoId>, UtxoError> {
        let data = self
            .view("getUserUnspentUTXOs(address)", &[token::address(owner)])
            .await?;
        bytes32_list(&data)
    }

    async fn receipt(&self, tx_hash: &TxHash) -> Result<Option<TxReceipt>, UtxoError> {
        let receipt = self
            .provider
            .get_transaction_receipt(ethers::types::H256::from(*tx_hash))
            .await
            .map_err(RpcError::from)?;
        Ok(receipt.map(|r| to_receipt(*tx_hash, &r)))
    }

    async fn expected_data_hash(&self, call: &CanonicalCall) -> Result<Option<H256>, UtxoError> {
        if !self.hash_view {
            return Ok(None);
        }
        let (signature, tokens) = Self::hash_view_call(call);
        let data = self.view(signature, &tokens).await?;
        Ok(Some(abi::as_bytes32(abi::decode_single(
            ParamType::FixedBytes(32),
            &data,
        )?)?))
    }
}

#[async_trait]
impl DepositLedger for JsonRpcLedger {
    async fn deposit(&self, call: &DepositCall) -> Result<TxHash, UtxoError> {
        let request = &call.request;
        let tokens = with_attestation(
            vec![
                token::address(&request.token),
                token::uint(request.amount as u128),
                token::uint_word(&request.commitment.x),
                token::uint_word(&request.commitment.y),
                token::bytes32(&request.nullifier),
            ],
            &call.attestation,
        );
        let signature = format!("deposit(address,uint256,uint256,uint256,bytes32,{ATTESTATION_ARGS})");
        self.send(request.sender, &signature, &tokens, call.attestation.nonce)
            .await
    }
}

#[async_trait]
impl SplitLedger for JsonRpcLedger {
    async fn pre_validate_split(
        &self,
        request: &SplitRequest,
        nonce: Option<u64>,
    ) -> Result<PreValidation, UtxoError> {
        let data = self
            .view(
                "preValidateSplit(bytes32,address[],uint256[],uint256[],bytes32[],uint256)",
                &with_nonce(split_tokens(request), nonce),
            )
            .await?;
        pre_validation(&data)
    }

    async fn split(&self, call: &SplitCall) -> Result<TxHash, UtxoError> {
        let signature = format!(
            "split(bytes32,address[],uint256[],uint256[],bytes32[],{ATTESTATION_ARGS})"
        );
        let tokens = with_attestation(split_tokens(&call.request), &call.attestation);
        self.send(self.from, &signature, &tokens, call.attestation.nonce)
            .await
    }
}

#[async_trait]
impl TransferLedger for JsonRpcLedger {
    async fn pre_validate_transfer(
        &self,
        request: &TransferRequest,
        nonce: Option<u64>,
    ) -> Result<PreValidation, UtxoError> {
        let data = self
            .view(
                "preValidateTransfer(bytes32,address,uint256,uint256,bytes32,uint256)",
                &with_nonce(transfer_tokens(request), nonce),
            )
            .await?;
        pre_validation(&data)
    }

    async fn transfer(&self, call: &TransferCall) -> Result<TxHash, UtxoError> {
        let signature =
            format!("transfer(bytes32,address,uint256,uint256,bytes32,{ATTESTATION_ARGS})");
        let tokens = with_attestation(transfer_tokens(&call.request), &call.attestation);
        self.send(self.from, &signature, &tokens, call.attestation.nonce)
            .await
    }
}

#[async_trait]
impl WithdrawLedger for JsonRpcLedger {
    async fn pre_validate_withdraw(
        &self,
        request: &WithdrawRequest,
        nonce: Option<u64>,
    ) -> Result<PreValidation, UtxoError> {
        let data = self
            .view(
                "preValidateWithdraw(bytes32,uint256,address,address,uint256,uint256)",
                &with_nonce(withdraw_tokens(request), nonce),
            )
            .await?;
        pre_validation(&data)
    }

    async fn withdraw(&self, call: &WithdrawCall) -> Result<TxHash, UtxoError> {
        let signature =
            format!("withdraw(bytes32,uint256,address,address,uint256,{ATTESTATION_ARGS})");
        let tokens = with_attestation(withdraw_tokens(&call.request), &call.attestation);
        self.send(self.from, &signature, &tokens, call.attestation.nonce)
            .await
    }
}

#[cfg(test)]
mod tests {
    use ethers::providers::{HttpClientError, JsonRpcError};

    use super::*;

    fn node_error(message: &str) -> ProviderError {
        ProviderError::JsonRpcClientError(Box::new(HttpClientError::JsonRpcError(JsonRpcError {
            code: 3,
            message: message.to_string(),
            data: None,
        })))
    }

    #[test]
    fn pre_validation_decodes_tuple() {
        let data = abi::encode(&[Token::Bool(false), token::uint(2)]);
        assert_eq!(pre_validation(&data).unwrap(), PreValidation::rejected(2));
        let ok = abi::encode(&[Token::Bool(true), token::uint(0)]);
        assert_eq!(pre_validation(&ok).unwrap(), PreValidation::OK);
        assert!(pre_validation(&[0u8; 8]).is_err());
    }

    #[test]
    fn send_errors_are_classified() {
        let err = classify_send_error(node_error("execution reverted: INVALID_NONCE"), 4);
        assert!(matches!(err, UtxoError::NonceConflict { nonce: 4 }));

        let err = classify_send_error(node_error("execution reverted: PRE_VALIDATION_2"), 4);
        assert!(matches!(err, UtxoError::Rejected(ref m) if m.contains("PRE_VALIDATION_2")));
        assert!(err.aborted_before_submission());

        // no error object from the node: the transaction may be out there
        let err = classify_send_error(ProviderError::CustomError("connection reset".into()), 4);
        assert!(matches!(err, UtxoError::Rpc(_)));
        assert!(!err.is_retryable());
        assert!(!err.aborted_before_submission());
    }

    #[test]
    fn reverted_receipt_has_no_reason() {
        let receipt = TransactionReceipt {
            status: Some(U64::from(0)),
            block_number: Some(U64::from(5)),
            ..Default::default()
        };
        let converted = to_receipt(H256([1; 32]), &receipt);
        assert_eq!(converted.status, TxStatus::Reverted);
        assert_eq!(converted.block_number, 5);
        assert!(!converted.is_nonce_revert());

        let ok = TransactionReceipt {
            status: Some(U64::from(1)),
            ..Default::default()
        };
        assert!(to_receipt(H256([1; 32]), &ok).is_success());
    }

    #[test]
    fn chain_id_is_stamped_on_transactions() {
        let ledger = JsonRpcLedger::new("http://localhost:8545", Address([9; 20]), Address([1; 20]))
            .unwrap()
            .with_chain_id(Some(31337));
        let tx = ledger.transaction(Some(Address([1; 20])), vec![1, 2, 3]);
        assert_eq!(tx.chain_id, Some(U64::from(31337)));
        assert_eq!(tx.to, Some(ethers::types::Address::from([9u8; 20]).into()));
        assert!(JsonRpcLedger::new("not a url", Address::ZERO, Address::ZERO).is_err());
    }
}
