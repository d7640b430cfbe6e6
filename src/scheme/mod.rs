//! Payment scheme implementations and method dispatch.
//!
//! One module per scheme, each a [`SchemeHandler`] impl:
//! - [`native`] — confirmation of a buyer-broadcast value transfer,
//! - [`erc20`] — allowance-based settlement relayed through the payment
//!   contract,
//! - [`eip3009`] — gasless settlement of an off-chain signed authorization.

pub mod eip3009;
pub mod erc20;
pub mod native;

pub use eip3009::Eip3009Scheme;
pub use erc20::Erc20Scheme;
pub use native::NativeScheme;

use crate::chain::{ChainError, EvmChain};
use crate::facilitator::SchemeHandler;
use crate::network::PaymentMethod;
use crate::types::{SchemeRequest, SettlementResult, VerifyOutcome};

/// Verifies `request` with the handler for `method`.
pub async fn verify(
    method: PaymentMethod,
    request: &SchemeRequest,
    chain: &EvmChain,
) -> Result<VerifyOutcome, ChainError> {
    match method {
        PaymentMethod::Native => NativeScheme.verify(request, chain).await,
        PaymentMethod::Erc20 => Erc20Scheme.verify(request, chain).await,
        PaymentMethod::Eip3009 => Eip3009Scheme.verify(request, chain).await,
    }
}

/// Settles `request` with the handler for `method`.
pub async fn settle(
    method: PaymentMethod,
    request: &SchemeRequest,
    chain: &EvmChain,
) -> Result<SettlementResult, ChainError> {
    match method {
        PaymentMethod::Native => NativeScheme.settle(request, chain).await,
        PaymentMethod::Erc20 => Erc20Scheme.settle(request, chain).await,
        PaymentMethod::Eip3009 => Eip3009Scheme.settle(request, chain).await,
    }
}

/// Gates shared by every scheme, run before any chain I/O: protocol version,
/// declared network vs. resolved chain, and payload vs. method congruence.
/// First failure wins.
pub(crate) fn common_gates(
    method: PaymentMethod,
    request: &SchemeRequest,
    chain: &EvmChain,
) -> Option<VerifyOutcome> {
    let proof = &request.payload;
    if !proof.x402_version.is_supported() {
        return Some(VerifyOutcome::invalid("Unsupported x402 version"));
    }
    if proof.network != chain.network() {
        return Some(VerifyOutcome::invalid("Network mismatch"));
    }
    if proof.payload.method() != method || request.token.payment_method != method {
        return Some(VerifyOutcome::invalid("Payment method mismatch"));
    }
    None
}

#[cfg(test)]
pub(crate) mod testing {
    //! Shared fixtures for scheme tests. Providers point at an unreachable
    //! endpoint, so any test that passes proves its gate fires before chain
    //! I/O.

    use alloy::signers::local::PrivateKeySigner;
    use url::Url;

    use crate::chain::EvmChain;
    use crate::network::{Network, PaymentMethod, TokenDescriptor};
    use crate::types::{EvmAddress, PaymentProof, ProofPayload, Scheme, SchemeRequest, X402Version};

    pub fn dead_chain(network: Network) -> EvmChain {
        let signer = PrivateKeySigner::random();
        let address: EvmAddress = signer.address().into();
        EvmChain::connect(
            network,
            Url::parse("http://localhost:1").unwrap(),
            alloy::network::EthereumWallet::from(signer),
            address,
        )
    }

    pub fn token(network: Network, method: PaymentMethod) -> TokenDescriptor {
        network.token_by_method(method).unwrap().clone()
    }

    pub fn request(
        network: Network,
        token: TokenDescriptor,
        payload: ProofPayload,
    ) -> SchemeRequest {
        SchemeRequest {
            payload: PaymentProof {
                x402_version: X402Version::V2,
                scheme: Scheme::Exact,
                network,
                payload,
            },
            token,
            network: Some(network.chain_id()),
            treasury: "0x1000000000000000000000000000000000000001"
                .parse()
                .unwrap(),
            payment_contract: "0x2000000000000000000000000000000000000002"
                .parse()
                .unwrap(),
        }
    }
}
