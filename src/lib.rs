//! x402 payments on Conflux eSpace.
//!
//! This crate implements the x402 HTTP-402 machine-payment protocol for
//! Conflux eSpace networks: a facilitator that verifies and settles
//! payments across three payment schemes, and the protocol types shared
//! with the seller-side middleware (`x402-espace-axum`).
//!
//! # Roles
//!
//! - **Facilitator**: the server in this crate's binary. Verifies payment
//!   proofs against the chain and settles them with the relayer key. See
//!   [`handlers`] for the HTTP surface and [`scheme`] for the three payment
//!   schemes.
//! - **Seller**: a payment-gated API. Uses the `x402-espace-axum` middleware
//!   crate, which builds on the types here.
//! - **Buyer**: any client constructing [`types::PaymentProof`] payloads —
//!   typically an agent SDK in another language.
//!
//! # Payment schemes
//!
//! | scheme | buyer pays gas | settlement |
//! |---|---|---|
//! | `native` | yes (own transfer) | echo of the confirmed transfer |
//! | `erc20` | approval only | relayer calls `payWithTokenFrom` |
//! | `eip3009` | none | relayer calls `transferWithAuthorization` |
//!
//! # Modules
//!
//! - [`chain`] — per-network provider/signer wrapper and contract bindings.
//! - [`config`] — CLI/env configuration of the facilitator server.
//! - [`facilitator`] — the [`SchemeHandler`](facilitator::SchemeHandler)
//!   verify/settle contract.
//! - [`handlers`] — the facilitator's HTTP endpoints.
//! - [`network`] — network registry and token descriptors.
//! - [`provider_pool`] — lazy per-chain connection pool.
//! - [`scheme`] — the three scheme implementations and dispatch.
//! - [`types`] — wire types of the protocol.
//! - [`util`] — base64 header payloads, graceful shutdown.

pub mod chain;
pub mod config;
pub mod facilitator;
pub mod handlers;
pub mod network;
pub mod provider_pool;
pub mod scheme;
pub mod telemetry;
pub mod types;
pub mod util;
