//! x402 facilitator HTTP entrypoint.
//!
//! Launches the Axum server exposing payment verification and settlement
//! for Conflux eSpace networks.
//!
//! Endpoints:
//! - `GET /x402/health` – relayer balance and configured contract (no auth)
//! - `GET /x402/supported` – supported scheme/network combinations
//! - `POST /x402/verify-{native|erc20|eip3009}` – verify a payment proof
//! - `POST /x402/settle-{native|erc20|eip3009}` – settle a verified payment
//!
//! Environment:
//! - `.env` values loaded at startup
//! - `HOST`, `PORT` control the binding address
//! - `FACILITATOR_API_KEY`, `EVM_PRIVATE_KEY`, `PAYMENT_CONTRACT` are
//!   required
//! - `RPC_URL_ESPACE`, `RPC_URL_ESPACE_TESTNET` override RPC endpoints
//! - `OTEL_*` variables enable tracing export (with the `telemetry` feature)

use axum::Router;
use axum::http::Method;
use dotenvy::dotenv;
use std::sync::Arc;
use tower_http::cors;

use x402_espace::config::Config;
use x402_espace::handlers::{self, AppState};
use x402_espace::provider_pool::ConnectionPool;
use x402_espace::telemetry::Telemetry;
use x402_espace::util::SigDown;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env variables
    dotenv().ok();

    let telemetry = Telemetry::new()
        .with_name(env!("CARGO_PKG_NAME"))
        .with_version(env!("CARGO_PKG_VERSION"))
        .register();

    let config = Config::load();
    let signer = config.signer()?;

    let pool = ConnectionPool::new(signer, config.default_network);
    let state = Arc::new(AppState {
        pool,
        api_key: config.api_key.clone(),
        payment_contract: config.payment_contract,
    });

    let http_endpoints = Router::new()
        .merge(handlers::routes().with_state(state))
        .layer(telemetry.http_tracing())
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers(cors::Any),
        );

    let addr = config.socket_addr();
    tracing::info!("Starting facilitator at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        });

    let sig_down = SigDown::try_new()?;
    let axum_cancellation_token = sig_down.cancellation_token();
    let axum_graceful_shutdown = async move { axum_cancellation_token.cancelled().await };
    axum::serve(listener, http_endpoints)
        .with_graceful_shutdown(axum_graceful_shutdown)
        .await?;

    Ok(())
}
