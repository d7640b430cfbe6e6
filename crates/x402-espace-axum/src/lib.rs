//! Axum middleware enforcing x402 payments on protected routes.
//!
//! The middleware intercepts gated requests and runs the seller side of the
//! protocol: without a `PAYMENT-SIGNATURE` header it answers `402 Payment
//! Required` with a fresh challenge; with one, it decodes the proof, has the
//! facilitator verify and settle it, and attaches the
//! [`SettlementResult`](x402_espace::types::SettlementResult) (plus the
//! resolved token and network) to the request for the downstream handler.
//!
//! ```rust,no_run
//! use axum::{Router, routing::get};
//! use axum::response::IntoResponse;
//! use x402_espace::network::Network;
//! use x402_espace::types::TokenAmount;
//! use x402_espace_axum::X402Middleware;
//!
//! let x402 = X402Middleware::new(
//!     "https://facilitator.example.com".parse().unwrap(),
//!     "api-key".into(),
//!     Network::EspaceTestnet,
//!     "0x1000000000000000000000000000000000000001".parse().unwrap(),
//!     "0x2000000000000000000000000000000000000002".parse().unwrap(),
//! );
//!
//! let app: Router = Router::new().route(
//!     "/premium",
//!     get(premium).layer(
//!         x402.with_price(TokenAmount::from(1000u64))
//!             .with_description("premium query".into()),
//!     ),
//! );
//!
//! async fn premium() -> impl IntoResponse {
//!     "paid content"
//! }
//! ```

pub mod autopay;
pub mod challenge;
pub mod facilitator_client;
pub mod layer;

pub use autopay::AutoPay;
pub use challenge::Challenge;
pub use facilitator_client::{FacilitatorClient, FacilitatorClientError};
pub use layer::{X402LayerBuilder, X402Middleware};

/// Request header carrying the buyer's base64 JSON payment proof.
pub const PAYMENT_SIGNATURE_HEADER: &str = "PAYMENT-SIGNATURE";

/// Response header carrying the base64 JSON challenge envelope.
pub const PAYMENT_REQUIRED_HEADER: &str = "PAYMENT-REQUIRED";

/// Response header echoing the settlement result on paid responses.
pub const PAYMENT_RESPONSE_HEADER: &str = "X-Payment-Response";

/// Opt-in flag header for the demo auto-pay path.
pub const AUTO_PAY_HEADER: &str = "X-Payment-Auto";
