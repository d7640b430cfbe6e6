//! HTTP endpoints of the x402 **facilitator**.
//!
//! Per-request lifecycle: authenticate (`X-API-Key`), route by path, resolve
//! the chain connection, dispatch to the scheme handler, respond. The health
//! endpoint is exempt from authentication and doubles as a
//! liveness/capacity probe (relayer balance).
//!
//! Bodies are capped at 1 MiB and parsed by hand so that authentication is
//! decided before any byte of the body is interpreted.

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde_json::json;
use std::sync::Arc;
use tracing::instrument;

use crate::network::{Network, PaymentMethod};
use crate::provider_pool::{ConnectionPool, PoolError};
use crate::scheme;
use crate::types::{ErrorResponse, EvmAddress, SchemeRequest, SettlementResult, X402Version};

/// Maximum accepted request body, enforced before JSON parsing.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Header carrying the shared-secret facilitator key.
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Shared state of the facilitator server.
pub struct AppState {
    pub pool: ConnectionPool,
    pub api_key: String,
    pub payment_contract: EvmAddress,
}

/// Builds the facilitator router. Attach state with `.with_state(...)`.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/x402/health", get(get_health))
        .route("/x402/supported", get(get_supported))
        .route("/x402/verify-native", post(verify_native))
        .route("/x402/verify-erc20", post(verify_erc20))
        .route("/x402/verify-eip3009", post(verify_eip3009))
        .route("/x402/settle-native", post(settle_native))
        .route("/x402/settle-erc20", post(settle_erc20))
        .route("/x402/settle-eip3009", post(settle_eip3009))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
}

/// Exact-match check of the shared-secret header. A mismatch stops all
/// further processing.
fn check_api_key(headers: &HeaderMap, state: &AppState) -> Result<(), Response> {
    match headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()) {
        Some(key) if key == state.api_key => Ok(()),
        Some(_) => {
            tracing::warn!("rejected request with mismatched API key");
            Err(unauthorized("invalid API key"))
        }
        None => Err(unauthorized("authentication required")),
    }
}

fn unauthorized(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorResponse {
            error: message.to_string(),
        }),
    )
        .into_response()
}

fn bad_request(message: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

/// Parses the body and resolves the chain connection, mapping failures to
/// the protocol's 400s.
fn decode_request(
    state: &AppState,
    body: &Bytes,
) -> Result<(SchemeRequest, Arc<crate::chain::EvmChain>), Response> {
    let request: SchemeRequest =
        serde_json::from_slice(body).map_err(|_| bad_request("Invalid request body"))?;
    let chain = state.pool.chain(request.network).map_err(|e| match e {
        PoolError::UnknownChain(_) => bad_request(e.to_string()),
        PoolError::InvalidRpcUrl { .. } => {
            tracing::error!(error = %e, "misconfigured RPC endpoint");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "misconfigured network".to_string(),
                }),
            )
                .into_response()
        }
    })?;
    Ok((request, chain))
}

/// `GET /x402/health`: liveness and capacity. No authentication — load
/// balancers and dashboards poll this.
#[instrument(skip_all)]
async fn get_health(State(state): State<Arc<AppState>>) -> Response {
    let network = state.pool.default_network();
    let chain = match state.pool.chain_for(network) {
        Ok(chain) => chain,
        Err(e) => {
            tracing::error!(error = %e, "health: cannot resolve default chain");
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "degraded", "error": "misconfigured network" })),
            )
                .into_response();
        }
    };
    match chain.relayer_balance().await {
        Ok(balance) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "network": network,
                "chainId": network.chain_id(),
                "facilitator": state.pool.signer_address(),
                "balance": balance.to_string(),
                "paymentContract": state.payment_contract,
            })),
        )
            .into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "health: RPC unreachable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "degraded",
                    "network": network,
                    "chainId": network.chain_id(),
                    "error": "RPC unreachable",
                })),
            )
                .into_response()
        }
    }
}

/// `GET /x402/supported`: the scheme/network/method combinations this
/// facilitator settles, for client discovery.
#[instrument(skip_all)]
async fn get_supported(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Err(response) = check_api_key(&headers, &state) {
        return response;
    }
    let mut kinds = Vec::new();
    for network in Network::variants() {
        for method in PaymentMethod::variants() {
            if network.token_by_method(*method).is_some() {
                kinds.push(json!({
                    "x402Version": X402Version::V2,
                    "scheme": "exact",
                    "network": network,
                    "paymentMethod": method,
                }));
            }
        }
    }
    (StatusCode::OK, Json(json!({ "kinds": kinds }))).into_response()
}

/// `POST /x402/verify-{native|erc20|eip3009}`: checks a payment proof
/// against the chain without moving funds.
#[instrument(skip_all, fields(method = %method))]
async fn handle_verify(
    method: PaymentMethod,
    state: Arc<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(response) = check_api_key(&headers, &state) {
        return response;
    }
    let (request, chain) = match decode_request(&state, &body) {
        Ok(decoded) => decoded,
        Err(response) => return response,
    };
    match scheme::verify(method, &request, &chain).await {
        Ok(outcome) => {
            if let crate::types::VerifyOutcome::Invalid { reason } = &outcome {
                tracing::info!(%method, reason, "verification rejected");
            }
            (StatusCode::OK, Json(outcome)).into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, %method, "verification internal error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "verification failed".to_string(),
                }),
            )
                .into_response()
        }
    }
}

/// `POST /x402/settle-{native|erc20|eip3009}`: executes the payment
/// on-chain. Failure maps to 500, not 402 — at this point the error is a
/// relayer-side execution problem, not a buyer mistake.
#[instrument(skip_all, fields(method = %method))]
async fn handle_settle(
    method: PaymentMethod,
    state: Arc<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(response) = check_api_key(&headers, &state) {
        return response;
    }
    let (request, chain) = match decode_request(&state, &body) {
        Ok(decoded) => decoded,
        Err(response) => return response,
    };

    // Funds may already be moving on-chain: the settlement must run to
    // completion even if the caller disconnects and this handler future is
    // dropped.
    let task = tokio::spawn(async move { scheme::settle(method, &request, &chain).await });
    let result = match task.await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            tracing::error!(error = %e, %method, "settlement internal error");
            SettlementResult::failed("settlement failed")
        }
        Err(e) => {
            tracing::error!(error = %e, %method, "settlement task panicked");
            SettlementResult::failed("settlement failed")
        }
    };
    let status = if result.success {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(result)).into_response()
}

macro_rules! scheme_endpoints {
    ($verify:ident, $settle:ident, $method:expr) => {
        async fn $verify(
            State(state): State<Arc<AppState>>,
            headers: HeaderMap,
            body: Bytes,
        ) -> Response {
            handle_verify($method, state, headers, body).await
        }

        async fn $settle(
            State(state): State<Arc<AppState>>,
            headers: HeaderMap,
            body: Bytes,
        ) -> Response {
            handle_settle($method, state, headers, body).await
        }
    };
}

scheme_endpoints!(verify_native, settle_native, PaymentMethod::Native);
scheme_endpoints!(verify_erc20, settle_erc20, PaymentMethod::Erc20);
scheme_endpoints!(verify_eip3009, settle_eip3009, PaymentMethod::Eip3009);

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::signers::local::PrivateKeySigner;
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::Mutex;
    use tower::ServiceExt;

    const API_KEY: &str = "test-facilitator-key";

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn app() -> Router {
        let state = AppState {
            pool: ConnectionPool::new(PrivateKeySigner::random(), Network::EspaceTestnet),
            api_key: API_KEY.to_string(),
            payment_contract: "0x2000000000000000000000000000000000000002"
                .parse()
                .unwrap(),
        };
        routes().with_state(Arc::new(state))
    }

    fn post(uri: &str, key: Option<&str>, body: Body) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header("Content-Type", "application/json");
        if let Some(key) = key {
            builder = builder.header(API_KEY_HEADER, key);
        }
        builder.body(body).unwrap()
    }

    #[tokio::test]
    async fn missing_api_key_is_401_regardless_of_body() {
        for uri in [
            "/x402/verify-native",
            "/x402/settle-erc20",
            "/x402/verify-eip3009",
        ] {
            let response = app()
                .oneshot(post(uri, None, Body::from("definitely not json")))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{uri}");
        }
    }

    #[tokio::test]
    async fn wrong_api_key_is_401() {
        let response = app()
            .oneshot(post("/x402/verify-native", Some("wrong"), Body::from("{}")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn oversized_body_rejected_before_parsing() {
        let huge = vec![b'a'; MAX_BODY_BYTES + 1];
        let response = app()
            .oneshot(post("/x402/verify-native", Some(API_KEY), Body::from(huge)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn malformed_json_is_400() {
        let response = app()
            .oneshot(post(
                "/x402/verify-native",
                Some(API_KEY),
                Body::from("{not json"),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_chain_id_is_400() {
        let body = serde_json::json!({
            "payload": {
                "x402Version": 2,
                "scheme": "exact",
                "network": "eip155:71",
                "payload": { "txHash": format!("0x{}", "ab".repeat(32)) },
            },
            "token": Network::EspaceTestnet.token_by_method(PaymentMethod::Native).unwrap(),
            "network": 424242,
            "treasury": "0x1000000000000000000000000000000000000001",
            "paymentContract": "0x2000000000000000000000000000000000000002",
        });
        let response = app()
            .oneshot(post(
                "/x402/verify-native",
                Some(API_KEY),
                Body::from(body.to_string()),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn health_needs_no_key_and_reports_degraded_rpc() {
        let _guard = ENV_LOCK.lock().expect("env lock poisoned");
        let original = std::env::var("RPC_URL_ESPACE_TESTNET").ok();
        // Safety: guarded by `ENV_LOCK`, so no concurrent environment
        // mutation occurs.
        unsafe { std::env::set_var("RPC_URL_ESPACE_TESTNET", "http://localhost:1") };

        let response = app()
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/x402/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        // Safety: guarded by `ENV_LOCK`, so no concurrent environment
        // mutation occurs.
        unsafe {
            match original {
                Some(value) => std::env::set_var("RPC_URL_ESPACE_TESTNET", value),
                None => std::env::remove_var("RPC_URL_ESPACE_TESTNET"),
            }
        }
    }

    #[tokio::test]
    async fn supported_lists_all_three_methods_per_network() {
        let response = app()
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/x402/supported")
                    .header(API_KEY_HEADER, API_KEY)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let kinds = json["kinds"].as_array().unwrap();
        // 2 networks × 3 methods
        assert_eq!(kinds.len(), 6);
    }
}
