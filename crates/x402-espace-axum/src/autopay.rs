//! Demo auto-pay strategy.
//!
//! For demos only: the gate itself acts as payer, signing an EIP-3009
//! authorization with a held key instead of waiting for the client round
//! trip. This is never the default path — it runs only when the request
//! carries the explicit [`AUTO_PAY_HEADER`](crate::AUTO_PAY_HEADER) flag,
//! and only on the designated test network. Construction refuses any other
//! network so funds on mainnet cannot move by accident.

use alloy::signers::SignerSync;
use alloy::signers::local::PrivateKeySigner;
use std::time::{SystemTime, UNIX_EPOCH};

use x402_espace::chain::{authorization_signing_hash, token_eip712_domain};
use x402_espace::network::{Network, PaymentMethod, TokenDescriptor};
use x402_espace::types::{
    Eip3009Authorization, Eip3009Proof, EvmAddress, EvmSignature, HexEncodedNonce, PaymentProof,
    ProofPayload, Scheme, TokenAmount, UnixTimestamp, X402Version,
};

/// Authorizations are backdated slightly and kept short-lived.
const VALID_AFTER_SLACK_SECS: u64 = 60;
const VALIDITY_SECS: u64 = 600;

#[derive(Debug, thiserror::Error)]
pub enum AutoPayError {
    #[error("auto-pay is restricted to the test network, got {0}")]
    ProductionNetwork(Network),
    #[error("auto-pay requires an eip3009-capable token")]
    UnsupportedToken,
    #[error("auto-pay signing failed: {0}")]
    Signing(String),
}

/// Holds the demo payer key for one (test) network.
pub struct AutoPay {
    signer: PrivateKeySigner,
    network: Network,
}

impl AutoPay {
    /// Fails unless `network` is the designated non-production network.
    pub fn new(signer: PrivateKeySigner, network: Network) -> Result<Self, AutoPayError> {
        if !network.is_test() {
            return Err(AutoPayError::ProductionNetwork(network));
        }
        Ok(AutoPay { signer, network })
    }

    pub fn payer(&self) -> EvmAddress {
        self.signer.address().into()
    }

    /// Signs a fresh gasless authorization paying `amount` to `treasury`.
    /// The proof then flows through the normal verify/settle path.
    pub fn build_proof(
        &self,
        token: &TokenDescriptor,
        amount: TokenAmount,
        treasury: EvmAddress,
    ) -> Result<PaymentProof, AutoPayError> {
        if token.payment_method != PaymentMethod::Eip3009 {
            return Err(AutoPayError::UnsupportedToken);
        }
        let domain = token_eip712_domain(token, self.network.chain_id())
            .ok_or(AutoPayError::UnsupportedToken)?;

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let authorization = Eip3009Authorization {
            from: self.payer(),
            to: treasury,
            value: amount,
            valid_after: UnixTimestamp(now.saturating_sub(VALID_AFTER_SLACK_SECS)),
            valid_before: UnixTimestamp(now + VALIDITY_SECS),
            nonce: HexEncodedNonce(rand::random::<[u8; 32]>()),
        };
        let hash = authorization_signing_hash(&authorization, &domain);
        let signature = self
            .signer
            .sign_hash_sync(&hash)
            .map_err(|e| AutoPayError::Signing(e.to_string()))?;

        Ok(PaymentProof {
            x402_version: X402Version::V2,
            scheme: Scheme::Exact,
            network: self.network,
            payload: ProofPayload::Eip3009(Eip3009Proof {
                signature: EvmSignature(signature.as_bytes()),
                authorization,
            }),
        })
    }
}
