//! EIP-3009 scheme: gasless settlement of an off-chain signed authorization.
//!
//! The buyer signs EIP-712 typed data and pays zero gas; the relayer submits
//! `transferWithAuthorization` on the token itself (bypassing the receiving
//! contract) and absorbs the gas cost entirely. That subsidization is a
//! deliberate product decision, preserved here.

use alloy::primitives::{Bytes, FixedBytes};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::chain::{
    ChainError, EIP3009_SETTLE_GAS_LIMIT, EvmChain, PaymentToken, recover_authorization_signer,
    token_eip712_domain,
};
use crate::facilitator::SchemeHandler;
use crate::network::PaymentMethod;
use crate::scheme::common_gates;
use crate::types::{
    Eip3009Authorization, Eip3009Proof, ProofPayload, SchemeRequest, SettlementResult,
    VerifyOutcome,
};

/// Position of the wall clock relative to an authorization's validity
/// window `[validAfter, validBefore)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowState {
    NotYetValid,
    Active,
    Expired,
}

/// Classifies `now` against the window. The upper bound is exclusive:
/// `now == validBefore` is already expired.
pub fn authorization_window(auth: &Eip3009Authorization, now: u64) -> WindowState {
    if now < auth.valid_after.0 {
        WindowState::NotYetValid
    } else if now >= auth.valid_before.0 {
        WindowState::Expired
    } else {
        WindowState::Active
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

pub struct Eip3009Scheme;

impl Eip3009Scheme {
    fn proof<'a>(request: &'a SchemeRequest) -> Option<&'a Eip3009Proof> {
        match &request.payload.payload {
            ProofPayload::Eip3009(proof) => Some(proof),
            _ => None,
        }
    }
}

impl SchemeHandler for Eip3009Scheme {
    /// Local gates first (version, signature recovery, treasury match, time
    /// window, minimum amount), then the single on-chain read (balance).
    /// Every local failure short-circuits with zero RPC traffic.
    async fn verify(
        &self,
        request: &SchemeRequest,
        chain: &EvmChain,
    ) -> Result<VerifyOutcome, ChainError> {
        if let Some(invalid) = common_gates(PaymentMethod::Eip3009, request, chain) {
            return Ok(invalid);
        }
        let Some(proof) = Self::proof(request) else {
            return Ok(VerifyOutcome::invalid("Payment method mismatch"));
        };
        let auth = &proof.authorization;

        let domain = match token_eip712_domain(&request.token, chain.chain_id()) {
            Some(domain) => domain,
            None => {
                return Ok(VerifyOutcome::invalid(
                    "Token does not support gasless authorization",
                ));
            }
        };
        match recover_authorization_signer(auth, &proof.signature, &domain) {
            Ok(signer) if signer == auth.from => {}
            _ => return Ok(VerifyOutcome::invalid("Invalid signature")),
        }

        if auth.to != request.treasury {
            return Ok(VerifyOutcome::invalid("Recipient mismatch"));
        }

        match authorization_window(auth, unix_now()) {
            WindowState::NotYetValid => {
                return Ok(VerifyOutcome::invalid("Authorization not yet valid"));
            }
            WindowState::Expired => {
                return Ok(VerifyOutcome::invalid("Authorization expired"));
            }
            WindowState::Active => {}
        }

        if auth.value < request.token.min_amount {
            return Ok(VerifyOutcome::invalid("Insufficient amount"));
        }

        let token = PaymentToken::new(request.token.address.into(), chain.provider());
        let balance = token.balanceOf(auth.from.into()).call().await;
        match balance {
            Ok(balance) if balance >= Into::<alloy::primitives::U256>::into(auth.value) => {}
            Ok(_) => return Ok(VerifyOutcome::invalid("Insufficient balance")),
            Err(e) => return Ok(VerifyOutcome::invalid(format!("rpc error: {e}"))),
        }

        Ok(VerifyOutcome::Valid)
    }

    /// Submits `transferWithAuthorization` on the token with a fixed gas
    /// limit and waits for one confirmation. A replayed authorization fails
    /// here at the chain layer (nonce already consumed) and surfaces as
    /// `{success: false}`, never as a crash.
    async fn settle(
        &self,
        request: &SchemeRequest,
        chain: &EvmChain,
    ) -> Result<SettlementResult, ChainError> {
        let proof = match Self::proof(request) {
            Some(proof) => proof,
            None => return Ok(SettlementResult::failed("Payment method mismatch")),
        };
        let auth = &proof.authorization;
        let token = PaymentToken::new(request.token.address.into(), chain.provider());

        let pending = token
            .transferWithAuthorization(
                auth.from.into(),
                auth.to.into(),
                auth.value.into(),
                auth.valid_after.into(),
                auth.valid_before.into(),
                FixedBytes(auth.nonce.0),
                Bytes::copy_from_slice(&proof.signature.0),
            )
            .gas(EIP3009_SETTLE_GAS_LIMIT)
            .send()
            .await;
        let pending = match pending {
            Ok(pending) => pending,
            Err(e) => {
                tracing::warn!(error = %e, payer = %auth.from, "transferWithAuthorization send failed");
                return Ok(SettlementResult::failed(e.to_string()));
            }
        };

        let receipt = match pending.get_receipt().await {
            Ok(receipt) => receipt,
            Err(e) => {
                tracing::warn!(error = %e, payer = %auth.from, "transferWithAuthorization receipt failed");
                return Ok(SettlementResult::failed(e.to_string()));
            }
        };
        if !receipt.status() {
            tracing::warn!(
                tx = %receipt.transaction_hash,
                payer = %auth.from,
                "transferWithAuthorization reverted"
            );
            return Ok(SettlementResult::failed("execution reverted"));
        }

        tracing::info!(
            tx = %receipt.transaction_hash,
            payer = %auth.from,
            value = %auth.value,
            "eip3009 settlement confirmed"
        );
        Ok(SettlementResult::confirmed(
            receipt.transaction_hash.into(),
            auth.from,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::authorization_signing_hash;
    use crate::network::Network;
    use crate::scheme::testing;
    use crate::types::{
        EvmAddress, EvmSignature, HexEncodedNonce, TokenAmount, UnixTimestamp, X402Version,
    };
    use alloy::signers::SignerSync;
    use alloy::signers::local::PrivateKeySigner;

    fn signed_request(
        signer: &PrivateKeySigner,
        value: TokenAmount,
        valid_after: u64,
        valid_before: u64,
    ) -> SchemeRequest {
        let network = Network::EspaceTestnet;
        let token = testing::token(network, PaymentMethod::Eip3009);
        let treasury: EvmAddress = "0x1000000000000000000000000000000000000001"
            .parse()
            .unwrap();
        let auth = Eip3009Authorization {
            from: signer.address().into(),
            to: treasury,
            value,
            valid_after: UnixTimestamp(valid_after),
            valid_before: UnixTimestamp(valid_before),
            nonce: HexEncodedNonce([0x11; 32]),
        };
        let domain = token_eip712_domain(&token, network.chain_id()).unwrap();
        let hash = authorization_signing_hash(&auth, &domain);
        let signature = EvmSignature(signer.sign_hash_sync(&hash).unwrap().as_bytes());
        testing::request(
            network,
            token,
            ProofPayload::Eip3009(Eip3009Proof {
                signature,
                authorization: auth,
            }),
        )
    }

    #[tokio::test]
    async fn unsupported_version_rejected_before_chain_io() {
        let signer = PrivateKeySigner::random();
        let chain = testing::dead_chain(Network::EspaceTestnet);
        let mut request = signed_request(&signer, TokenAmount::from(1000u64), 0, u64::MAX);
        request.payload.x402_version = X402Version(1);
        let outcome = Eip3009Scheme.verify(&request, &chain).await.unwrap();
        assert_eq!(outcome, VerifyOutcome::invalid("Unsupported x402 version"));
    }

    #[tokio::test]
    async fn tampered_value_fails_signature_check() {
        let signer = PrivateKeySigner::random();
        let chain = testing::dead_chain(Network::EspaceTestnet);
        let mut request = signed_request(&signer, TokenAmount::from(1000u64), 0, u64::MAX);
        if let ProofPayload::Eip3009(proof) = &mut request.payload.payload {
            proof.authorization.value = TokenAmount::from(1u64);
        }
        let outcome = Eip3009Scheme.verify(&request, &chain).await.unwrap();
        assert_eq!(outcome, VerifyOutcome::invalid("Invalid signature"));
    }

    #[tokio::test]
    async fn wrong_recipient_rejected() {
        let signer = PrivateKeySigner::random();
        let chain = testing::dead_chain(Network::EspaceTestnet);
        let mut request = signed_request(&signer, TokenAmount::from(1000u64), 0, u64::MAX);
        // Point the request's treasury elsewhere; the signed `to` no longer
        // matches the destination payments must land on.
        request.treasury = "0x9999999999999999999999999999999999999999"
            .parse()
            .unwrap();
        let outcome = Eip3009Scheme.verify(&request, &chain).await.unwrap();
        assert_eq!(outcome, VerifyOutcome::invalid("Recipient mismatch"));
    }

    #[tokio::test]
    async fn expired_window_rejected_before_chain_io() {
        let signer = PrivateKeySigner::random();
        let chain = testing::dead_chain(Network::EspaceTestnet);
        let request = signed_request(&signer, TokenAmount::from(1000u64), 0, 1);
        let outcome = Eip3009Scheme.verify(&request, &chain).await.unwrap();
        assert_eq!(outcome, VerifyOutcome::invalid("Authorization expired"));
    }

    #[tokio::test]
    async fn future_window_rejected_before_chain_io() {
        let signer = PrivateKeySigner::random();
        let chain = testing::dead_chain(Network::EspaceTestnet);
        let request = signed_request(&signer, TokenAmount::from(1000u64), u64::MAX - 1, u64::MAX);
        let outcome = Eip3009Scheme.verify(&request, &chain).await.unwrap();
        assert_eq!(outcome, VerifyOutcome::invalid("Authorization not yet valid"));
    }

    #[tokio::test]
    async fn below_minimum_value_rejected_before_chain_io() {
        let signer = PrivateKeySigner::random();
        let chain = testing::dead_chain(Network::EspaceTestnet);
        // Testnet USDC minimum is 100 smallest units.
        let request = signed_request(&signer, TokenAmount::from(99u64), 0, u64::MAX);
        let outcome = Eip3009Scheme.verify(&request, &chain).await.unwrap();
        assert_eq!(outcome, VerifyOutcome::invalid("Insufficient amount"));
    }

    #[test]
    fn window_boundary_is_exclusive_at_valid_before() {
        let auth = Eip3009Authorization {
            from: EvmAddress::ZERO,
            to: EvmAddress::ZERO,
            value: TokenAmount::from(1u64),
            valid_after: UnixTimestamp(100),
            valid_before: UnixTimestamp(200),
            nonce: HexEncodedNonce([0; 32]),
        };
        assert_eq!(authorization_window(&auth, 99), WindowState::NotYetValid);
        assert_eq!(authorization_window(&auth, 100), WindowState::Active);
        assert_eq!(authorization_window(&auth, 199), WindowState::Active);
        assert_eq!(authorization_window(&auth, 200), WindowState::Expired);
        assert_eq!(authorization_window(&auth, 201), WindowState::Expired);
    }
}
