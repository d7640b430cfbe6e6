//! Native-coin scheme: the buyer broadcast a plain value transfer themselves
//! and submits its hash as proof.
//!
//! Verification does the heavy lifting (receipt, value, sender); settlement
//! is a pure echo, because the receiving contract already finalized the
//! transfer the moment it was mined.

use alloy::consensus::Transaction as _;
use alloy::providers::Provider;

use crate::chain::{ChainError, EvmChain};
use crate::facilitator::SchemeHandler;
use crate::network::PaymentMethod;
use crate::scheme::common_gates;
use crate::types::{
    NativeProof, ProofPayload, SchemeRequest, SettlementResult, TokenAmount, VerifyOutcome,
};

pub struct NativeScheme;

impl NativeScheme {
    fn proof<'a>(request: &'a SchemeRequest) -> Option<&'a NativeProof> {
        match &request.payload.payload {
            ProofPayload::Native(proof) => Some(proof),
            _ => None,
        }
    }
}

impl SchemeHandler for NativeScheme {
    /// Hard gates in order, first failure wins:
    /// version → receipt exists → receipt succeeded → value covers the
    /// required amount → sender matches the claim (if one was made).
    async fn verify(
        &self,
        request: &SchemeRequest,
        chain: &EvmChain,
    ) -> Result<VerifyOutcome, ChainError> {
        if let Some(invalid) = common_gates(PaymentMethod::Native, request, chain) {
            return Ok(invalid);
        }
        let Some(proof) = Self::proof(request) else {
            return Ok(VerifyOutcome::invalid("Payment method mismatch"));
        };

        // An amount claimed below the configured minimum price never passes,
        // regardless of what the transaction actually carried.
        let minimum = request.token.min_amount;
        if let Some(claimed) = proof.amount
            && claimed < minimum
        {
            return Ok(VerifyOutcome::invalid("Insufficient amount"));
        }
        let required: TokenAmount = proof.amount.unwrap_or(minimum);

        let tx_hash = proof.tx_hash.into();
        let receipt = chain.provider().get_transaction_receipt(tx_hash).await?;
        let receipt = match receipt {
            Some(receipt) => receipt,
            None => return Ok(VerifyOutcome::invalid("Transaction not found")),
        };
        if !receipt.status() {
            return Ok(VerifyOutcome::invalid("Transaction failed"));
        }

        let tx = chain.provider().get_transaction_by_hash(tx_hash).await?;
        let tx = match tx {
            Some(tx) => tx,
            None => return Ok(VerifyOutcome::invalid("Transaction not found")),
        };
        if tx.inner.value() < Into::<alloy::primitives::U256>::into(required) {
            return Ok(VerifyOutcome::invalid("Insufficient amount"));
        }

        if let Some(claimed_sender) = proof.from {
            // Address equality is case-insensitive by construction: both
            // sides are parsed 20-byte values, not strings.
            if tx.inner.signer() != alloy::primitives::Address::from(claimed_sender) {
                return Ok(VerifyOutcome::invalid("Sender mismatch"));
            }
        }

        Ok(VerifyOutcome::Valid)
    }

    /// No additional on-chain call: the buyer already paid when they
    /// broadcast the transaction, so settle echoes the confirmation.
    async fn settle(
        &self,
        request: &SchemeRequest,
        _chain: &EvmChain,
    ) -> Result<SettlementResult, ChainError> {
        let proof = match Self::proof(request) {
            Some(proof) => proof,
            None => return Ok(SettlementResult::failed("Payment method mismatch")),
        };
        tracing::info!(tx = %proof.tx_hash, "native settlement echoed");
        Ok(SettlementResult {
            success: true,
            transaction: Some(proof.tx_hash),
            payer: proof.from,
            error: None,
        })
    }
}
