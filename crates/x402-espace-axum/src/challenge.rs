//! Builds the 402 Payment Required challenge.
//!
//! A challenge is ephemeral: fresh invoice id and nonce on every 402, expiry
//! a fixed hour out, token metadata resolved from the network registry. The
//! full envelope rides base64-encoded in `PAYMENT-REQUIRED`; the discrete
//! `X-Payment-*` headers duplicate the essentials for clients that only read
//! simple headers.

use axum_core::body::Body;
use axum_core::response::Response;
use http::{HeaderValue, StatusCode, header};
use std::time::{SystemTime, UNIX_EPOCH};

use x402_espace::network::{Network, TokenDescriptor};
use x402_espace::types::{
    EvmAddress, OfferExtra, PaymentOffer, PaymentRequirements, ResourceInfo, Scheme, TokenAmount,
    X402Version,
};
use x402_espace::util::Base64Bytes;

use crate::PAYMENT_REQUIRED_HEADER;

/// Challenge validity window.
pub const CHALLENGE_TIMEOUT_SECS: u64 = 3600;

/// A freshly issued 402 challenge, ready to render.
#[derive(Debug, Clone)]
pub struct Challenge {
    pub requirements: PaymentRequirements,
    pub invoice_id: String,
    pub nonce: String,
    pub expiry: u64,
    pub amount: TokenAmount,
    pub token_symbol: String,
    pub endpoint: String,
}

/// 128-bit random identifier as 32 lowercase hex chars. Collision-improbable
/// per request; uniqueness is not otherwise enforced here.
pub fn random_id128() -> String {
    format!("{:032x}", rand::random::<u128>())
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl Challenge {
    /// Assembles a challenge for one token on one network.
    pub fn build(
        network: Network,
        token: &TokenDescriptor,
        amount: TokenAmount,
        treasury: EvmAddress,
        payment_contract: EvmAddress,
        resource: ResourceInfo,
    ) -> Self {
        let invoice_id = random_id128();
        let nonce = random_id128();
        let expiry = unix_now() + CHALLENGE_TIMEOUT_SECS;
        let endpoint = resource.url.clone();
        let (name, version) = match &token.eip712 {
            Some(eip712) => (Some(eip712.name.clone()), Some(eip712.version.clone())),
            None => (None, None),
        };
        let requirements = PaymentRequirements {
            x402_version: X402Version::V2,
            resource,
            accepts: vec![PaymentOffer {
                scheme: Scheme::Exact,
                network,
                amount,
                asset: token.address,
                pay_to: treasury,
                max_timeout_seconds: CHALLENGE_TIMEOUT_SECS,
                extra: OfferExtra {
                    payment_method: token.payment_method,
                    symbol: token.symbol.clone(),
                    decimals: token.decimals,
                    name,
                    version,
                    payment_contract,
                },
            }],
        };
        Challenge {
            requirements,
            invoice_id,
            nonce,
            expiry,
            amount,
            token_symbol: token.symbol.clone(),
            endpoint,
        }
    }

    /// Renders the 402 response: envelope header, discrete headers, generic
    /// JSON body carrying the rejection reason.
    pub fn into_response(self, reason: &str) -> Response {
        let envelope = serde_json::to_vec(&self.requirements)
            .expect("challenge envelope serialization cannot fail");
        let envelope = Base64Bytes::encode(envelope);
        let envelope = HeaderValue::from_bytes(envelope.as_ref())
            .expect("base64 output is always a valid header value");

        let body = serde_json::json!({
            "error": reason,
            "invoiceId": &self.invoice_id,
        });

        let mut builder = Response::builder()
            .status(StatusCode::PAYMENT_REQUIRED)
            .header(header::CONTENT_TYPE, "application/json")
            .header(PAYMENT_REQUIRED_HEADER, envelope)
            .header("X-Payment-Amount", self.amount.to_string())
            .header("X-Payment-Token", &self.token_symbol)
            .header("X-Payment-Nonce", &self.nonce)
            .header("X-Payment-Expiry", self.expiry.to_string())
            .header("X-Payment-Invoice-Id", &self.invoice_id);
        if let Ok(endpoint) = HeaderValue::from_str(&self.endpoint) {
            builder = builder.header("X-Payment-Endpoint", endpoint);
        }
        builder
            .body(Body::from(body.to_string()))
            .expect("response construction cannot fail")
    }
}
