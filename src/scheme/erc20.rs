//! ERC-20 scheme: approve + relayed `transferFrom`.
//!
//! The buyer pays only the approval gas; the relayer (contract owner) pulls
//! the funds through `payWithTokenFrom` and pays settlement gas. That trust
//! tradeoff is deliberate: the relayer is the sole caller authorized
//! on-chain.

use alloy::primitives::FixedBytes;
use alloy::providers::Provider;

use crate::chain::{ChainError, ERC20_SETTLE_GAS_LIMIT, EvmChain, PaymentReceiver, PaymentToken};
use crate::facilitator::SchemeHandler;
use crate::network::PaymentMethod;
use crate::scheme::common_gates;
use crate::types::{
    Erc20Proof, ProofPayload, SchemeRequest, SettlementResult, VerifyOutcome,
};

/// Invoice identifier used when the proof carries an empty one.
const DEFAULT_INVOICE_ID: &str = "x402";

/// Packs an invoice id string into the `bytes32` the receiving contract
/// expects: UTF-8 bytes truncated to 32, zero-padded on the right.
pub fn invoice_id_bytes32(invoice_id: &str) -> FixedBytes<32> {
    let id = if invoice_id.is_empty() {
        DEFAULT_INVOICE_ID
    } else {
        invoice_id
    };
    let bytes = id.as_bytes();
    let len = bytes.len().min(32);
    let mut packed = [0u8; 32];
    packed[..len].copy_from_slice(&bytes[..len]);
    FixedBytes(packed)
}

pub struct Erc20Scheme;

impl Erc20Scheme {
    fn proof<'a>(request: &'a SchemeRequest) -> Option<&'a Erc20Proof> {
        match &request.payload.payload {
            ProofPayload::Erc20(proof) => Some(proof),
            _ => None,
        }
    }
}

impl SchemeHandler for Erc20Scheme {
    /// Checks, first failure wins: version → minimum price → approval
    /// receipt (when supplied) → allowance → balance. An RPC failure on any
    /// read surfaces as `{valid: false}` with the error as reason.
    async fn verify(
        &self,
        request: &SchemeRequest,
        chain: &EvmChain,
    ) -> Result<VerifyOutcome, ChainError> {
        if let Some(invalid) = common_gates(PaymentMethod::Erc20, request, chain) {
            return Ok(invalid);
        }
        let Some(proof) = Self::proof(request) else {
            return Ok(VerifyOutcome::invalid("Payment method mismatch"));
        };

        if proof.amount < request.token.min_amount {
            return Ok(VerifyOutcome::invalid("Insufficient amount"));
        }

        if let Some(approval_hash) = proof.approval_tx_hash {
            let receipt = chain
                .provider()
                .get_transaction_receipt(approval_hash.into())
                .await;
            match receipt {
                Ok(Some(receipt)) if receipt.status() => {}
                Ok(Some(_)) => {
                    return Ok(VerifyOutcome::invalid("Approval transaction failed"));
                }
                Ok(None) => {
                    return Ok(VerifyOutcome::invalid("Approval transaction not found"));
                }
                Err(e) => return Ok(VerifyOutcome::invalid(format!("rpc error: {e}"))),
            }
        }

        let token = PaymentToken::new(request.token.address.into(), chain.provider());

        let allowance = token
            .allowance(proof.from.into(), request.payment_contract.into())
            .call()
            .await;
        match allowance {
            Ok(allowance) if allowance >= Into::<alloy::primitives::U256>::into(proof.amount) => {}
            Ok(_) => return Ok(VerifyOutcome::invalid("Insufficient allowance")),
            Err(e) => return Ok(VerifyOutcome::invalid(format!("rpc error: {e}"))),
        }

        let balance = token.balanceOf(proof.from.into()).call().await;
        match balance {
            Ok(balance) if balance >= Into::<alloy::primitives::U256>::into(proof.amount) => {}
            Ok(_) => return Ok(VerifyOutcome::invalid("Insufficient balance")),
            Err(e) => return Ok(VerifyOutcome::invalid(format!("rpc error: {e}"))),
        }

        Ok(VerifyOutcome::Valid)
    }

    /// Relays `payWithTokenFrom(token, from, amount, invoiceId)` with a
    /// fixed gas ceiling and waits for one confirmation.
    async fn settle(
        &self,
        request: &SchemeRequest,
        chain: &EvmChain,
    ) -> Result<SettlementResult, ChainError> {
        let proof = match Self::proof(request) {
            Some(proof) => proof,
            None => return Ok(SettlementResult::failed("Payment method mismatch")),
        };
        let invoice_id = invoice_id_bytes32(&proof.invoice_id);
        let receiver = PaymentReceiver::new(request.payment_contract.into(), chain.provider());

        let pending = receiver
            .payWithTokenFrom(
                request.token.address.into(),
                proof.from.into(),
                proof.amount.into(),
                invoice_id,
            )
            .gas(ERC20_SETTLE_GAS_LIMIT)
            .send()
            .await;
        let pending = match pending {
            Ok(pending) => pending,
            Err(e) => {
                tracing::warn!(error = %e, invoice = %proof.invoice_id, "payWithTokenFrom send failed");
                return Ok(SettlementResult::failed(e.to_string()));
            }
        };

        let receipt = match pending.get_receipt().await {
            Ok(receipt) => receipt,
            Err(e) => {
                tracing::warn!(error = %e, invoice = %proof.invoice_id, "payWithTokenFrom receipt failed");
                return Ok(SettlementResult::failed(e.to_string()));
            }
        };
        if !receipt.status() {
            tracing::warn!(
                tx = %receipt.transaction_hash,
                invoice = %proof.invoice_id,
                "payWithTokenFrom reverted"
            );
            return Ok(SettlementResult::failed("execution reverted"));
        }

        tracing::info!(
            tx = %receipt.transaction_hash,
            payer = %proof.from,
            amount = %proof.amount,
            invoice = %proof.invoice_id,
            "erc20 settlement confirmed"
        );
        Ok(SettlementResult::confirmed(
            receipt.transaction_hash.into(),
            proof.from,
        ))
    }
}
