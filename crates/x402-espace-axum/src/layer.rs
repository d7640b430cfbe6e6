//! The payment gate: a `tower` layer enforcing x402 payment on a route.
//!
//! Per-request state machine:
//!
//! - no `PAYMENT-SIGNATURE` header → 402 challenge (terminal), unless the
//!   demo auto-pay path is armed and explicitly requested;
//! - header present → decode (malformed → 400, distinct from a failed
//!   payment) → facilitator verify → facilitator settle → attach the
//!   settlement result, resolved token, and network to the request → inner
//!   handler.
//!
//! Any verify or settle failure terminates with 402 and the reason. A
//! settlement that did not confirm on-chain is never attached as success.

use axum_core::body::Body;
use axum_core::extract::Request;
use axum_core::response::Response;
use http::{HeaderValue, StatusCode, Uri, header};
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::util::BoxCloneSyncService;
use tower::{Layer, Service};
use url::Url;

use x402_espace::network::Network;
use x402_espace::types::{
    EvmAddress, PaymentProof, ResourceInfo, SchemeRequest, TokenAmount, VerifyOutcome,
};
use x402_espace::util::Base64Bytes;

use crate::autopay::AutoPay;
use crate::challenge::Challenge;
use crate::facilitator_client::{FacilitatorClient, FacilitatorClientError};
use crate::{AUTO_PAY_HEADER, PAYMENT_RESPONSE_HEADER, PAYMENT_SIGNATURE_HEADER};

/// Seller-side entry point. Create one per application, then derive a layer
/// per protected route with [`X402Middleware::with_price`].
#[derive(Clone)]
pub struct X402Middleware {
    facilitator: Arc<FacilitatorClient>,
    network: Network,
    treasury: EvmAddress,
    payment_contract: EvmAddress,
    autopay: Option<Arc<AutoPay>>,
}

impl X402Middleware {
    pub fn new(
        facilitator_url: Url,
        api_key: String,
        network: Network,
        treasury: EvmAddress,
        payment_contract: EvmAddress,
    ) -> Self {
        X402Middleware {
            facilitator: Arc::new(FacilitatorClient::new(facilitator_url, api_key)),
            network,
            treasury,
            payment_contract,
            autopay: None,
        }
    }

    pub fn facilitator(&self) -> &Arc<FacilitatorClient> {
        &self.facilitator
    }

    /// Arms the demo auto-pay strategy. The path still only activates per
    /// request via the explicit flag header, and [`AutoPay`] itself refuses
    /// to exist for production networks.
    pub fn with_autopay(mut self, autopay: AutoPay) -> Self {
        self.autopay = Some(Arc::new(autopay));
        self
    }

    /// Starts a layer builder charging `amount` (smallest units of the
    /// route's token, default token when none is named).
    pub fn with_price(&self, amount: TokenAmount) -> X402LayerBuilder {
        X402LayerBuilder {
            gate: GateConfig {
                facilitator: self.facilitator.clone(),
                network: self.network,
                treasury: self.treasury,
                payment_contract: self.payment_contract,
                autopay: self.autopay.clone(),
                amount,
                token_symbol: None,
                description: String::new(),
                mime_type: "application/json".to_string(),
                resource_url: None,
            },
        }
    }
}

/// Route-level configuration, frozen into the service at layer time.
#[derive(Clone)]
struct GateConfig {
    facilitator: Arc<FacilitatorClient>,
    network: Network,
    treasury: EvmAddress,
    payment_contract: EvmAddress,
    autopay: Option<Arc<AutoPay>>,
    amount: TokenAmount,
    token_symbol: Option<String>,
    description: String,
    mime_type: String,
    resource_url: Option<String>,
}

impl GateConfig {
    fn resource_info(&self, uri: &Uri) -> ResourceInfo {
        ResourceInfo {
            url: self
                .resource_url
                .clone()
                .unwrap_or_else(|| uri.path().to_string()),
            description: self.description.clone(),
            mime_type: self.mime_type.clone(),
        }
    }

    /// Token offered in challenges: the configured symbol, else the
    /// network's default (gasless if available, else native).
    fn challenge_token(&self) -> &'static x402_espace::network::TokenDescriptor {
        self.token_symbol
            .as_deref()
            .and_then(|symbol| self.network.token_by_symbol(symbol))
            .unwrap_or_else(|| self.network.default_token())
    }
}

/// Builder for one protected route.
#[derive(Clone)]
pub struct X402LayerBuilder {
    gate: GateConfig,
}

impl X402LayerBuilder {
    /// Charge in a specific token (by symbol) instead of the default.
    pub fn with_token(mut self, symbol: String) -> Self {
        self.gate.token_symbol = Some(symbol);
        self
    }

    /// Human-readable description included in 402 challenges.
    pub fn with_description(mut self, description: String) -> Self {
        self.gate.description = description;
        self
    }

    /// MIME type of the protected resource (default `application/json`).
    pub fn with_mime_type(mut self, mime: String) -> Self {
        self.gate.mime_type = mime;
        self
    }

    /// Full URL of the protected resource. When unset, the request path is
    /// used.
    pub fn with_resource(mut self, url: String) -> Self {
        self.gate.resource_url = Some(url);
        self
    }
}

impl<S> Layer<S> for X402LayerBuilder
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
{
    type Service = PaymentGate;

    fn layer(&self, inner: S) -> Self::Service {
        PaymentGate {
            gate: Arc::new(self.gate.clone()),
            inner: BoxCloneSyncService::new(inner),
        }
    }
}

/// The service wrapping a protected route.
#[derive(Clone)]
pub struct PaymentGate {
    gate: Arc<GateConfig>,
    inner: BoxCloneSyncService<Request, Response, Infallible>,
}

impl Service<Request> for PaymentGate {
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let gate = self.gate.clone();
        let inner = self.inner.clone();
        Box::pin(handle_request(gate, inner, req))
    }
}

enum PaymentFlowError {
    /// Verification said no. The buyer gets the reason and a fresh 402.
    Rejected(String),
    /// Settlement ran but did not confirm on-chain. Not paid.
    NotSettled(String),
    /// The facilitator could not be reached or answered garbage.
    Facilitator(FacilitatorClientError),
}

async fn handle_request(
    gate: Arc<GateConfig>,
    mut inner: BoxCloneSyncService<Request, Response, Infallible>,
    mut req: Request,
) -> Result<Response, Infallible> {
    let resource = gate.resource_info(req.uri());
    let challenge_token = gate.challenge_token();
    let challenge = |reason: &str| {
        Challenge::build(
            gate.network,
            challenge_token,
            gate.amount,
            gate.treasury,
            gate.payment_contract,
            resource.clone(),
        )
        .into_response(reason)
    };

    let proof: PaymentProof = match req.headers().get(PAYMENT_SIGNATURE_HEADER) {
        Some(value) => match PaymentProof::try_from(Base64Bytes::from(value.as_bytes())) {
            Ok(proof) => proof,
            Err(e) => {
                tracing::warn!(error = %e, "malformed payment header");
                return Ok(json_error(
                    StatusCode::BAD_REQUEST,
                    "invalid payment header",
                ));
            }
        },
        None => {
            let wants_auto = req.headers().contains_key(AUTO_PAY_HEADER);
            match (&gate.autopay, wants_auto) {
                (Some(autopay), true) => {
                    match autopay.build_proof(challenge_token, gate.amount, gate.treasury) {
                        Ok(proof) => {
                            tracing::info!(payer = %autopay.payer(), "demo auto-pay engaged");
                            proof
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "auto-pay unavailable");
                            return Ok(challenge("Payment required"));
                        }
                    }
                }
                _ => return Ok(challenge("Payment required")),
            }
        }
    };

    let Some(token) = gate.network.token_by_method(proof.payload.method()) else {
        return Ok(challenge("Unsupported payment method"));
    };
    let method = token.payment_method;
    let scheme_request = SchemeRequest {
        payload: proof,
        token: token.clone(),
        network: Some(gate.network.chain_id()),
        treasury: gate.treasury,
        payment_contract: gate.payment_contract,
    };

    // Verify, then settle, exactly once and in that order. Spawned so that
    // a client disconnect dropping this future cannot abort a settlement
    // whose funds may already be moving on-chain.
    let facilitator = gate.facilitator.clone();
    let flow = tokio::spawn(async move {
        let outcome = facilitator
            .verify(method, &scheme_request)
            .await
            .map_err(PaymentFlowError::Facilitator)?;
        if let VerifyOutcome::Invalid { reason } = outcome {
            return Err(PaymentFlowError::Rejected(reason));
        }
        let settlement = facilitator
            .settle(method, &scheme_request)
            .await
            .map_err(PaymentFlowError::Facilitator)?;
        if !settlement.success {
            let reason = settlement
                .error
                .unwrap_or_else(|| "settlement failed".to_string());
            return Err(PaymentFlowError::NotSettled(reason));
        }
        Ok((scheme_request, settlement))
    });

    let (scheme_request, settlement) = match flow.await {
        Ok(Ok(paid)) => paid,
        Ok(Err(PaymentFlowError::Rejected(reason))) => {
            tracing::info!(reason, "payment rejected");
            return Ok(challenge(&reason));
        }
        Ok(Err(PaymentFlowError::NotSettled(reason))) => {
            tracing::warn!(reason, "settlement failed");
            return Ok(challenge(&format!("Settlement failed: {reason}")));
        }
        Ok(Err(PaymentFlowError::Facilitator(e))) => {
            tracing::error!(error = %e, "facilitator unreachable");
            return Ok(json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "payment processing failed",
            ));
        }
        Err(e) => {
            tracing::error!(error = %e, "payment flow task failed");
            return Ok(json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "payment processing failed",
            ));
        }
    };

    // The downstream handler reads this triplet to render the paid response
    // and log the payment.
    req.extensions_mut().insert(settlement.clone());
    req.extensions_mut().insert(scheme_request.token.clone());
    req.extensions_mut().insert(gate.network);

    let mut response = inner.call(req).await?;
    if let Ok(encoded) = settlement.to_b64()
        && let Ok(value) = HeaderValue::from_bytes(encoded.as_ref())
    {
        response.headers_mut().insert(PAYMENT_RESPONSE_HEADER, value);
    }
    Ok(response)
}

fn json_error(status: StatusCode, message: &str) -> Response {
    let body = serde_json::json!({ "error": message });
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("response construction cannot fail")
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::signers::local::PrivateKeySigner;
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::{Extension, Router};
    use serde_json::json;
    use tower::ServiceExt;
    use wiremock::matchers::{header, method as http_method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};
    use x402_espace::handlers::API_KEY_HEADER;
    use x402_espace::types::{
        NativeProof, ProofPayload, Scheme, SettlementResult, TransactionHash, X402Version,
    };

    const API_KEY: &str = "seller-key";

    fn middleware(facilitator_url: &str) -> X402Middleware {
        X402Middleware::new(
            facilitator_url.parse().unwrap(),
            API_KEY.to_string(),
            Network::EspaceTestnet,
            "0x1000000000000000000000000000000000000001".parse().unwrap(),
            "0x2000000000000000000000000000000000000002".parse().unwrap(),
        )
    }

    fn app(x402: &X402Middleware) -> Router {
        Router::new().route(
            "/premium",
            get(paid_handler).layer(
                x402.with_price(TokenAmount::from(1000u64))
                    .with_description("premium query".to_string()),
            ),
        )
    }

    async fn paid_handler(
        Extension(settlement): Extension<SettlementResult>,
        Extension(network): Extension<Network>,
    ) -> axum::response::Response {
        assert!(settlement.success);
        assert_eq!(network, Network::EspaceTestnet);
        axum::Json(json!({ "data": "paid content" })).into_response()
    }

    fn native_proof_header() -> String {
        let proof = PaymentProof {
            x402_version: X402Version::V2,
            scheme: Scheme::Exact,
            network: Network::EspaceTestnet,
            payload: ProofPayload::Native(NativeProof {
                tx_hash: TransactionHash([0xab; 32]),
                from: None,
                amount: Some(TokenAmount::from(1000u64)),
            }),
        };
        Base64Bytes::encode(serde_json::to_vec(&proof).unwrap()).to_string()
    }

    fn get_request(headers: &[(&str, &str)]) -> http::Request<axum::body::Body> {
        let mut builder = http::Request::builder().method("GET").uri("/premium");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(axum::body::Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn missing_proof_yields_challenge() {
        let x402 = middleware("http://localhost:1");
        let response = app(&x402).oneshot(get_request(&[])).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
        let headers = response.headers();
        assert!(headers.contains_key(crate::PAYMENT_REQUIRED_HEADER));
        assert_eq!(
            headers.get("X-Payment-Amount").unwrap().to_str().unwrap(),
            "1000"
        );
        assert!(headers.contains_key("X-Payment-Invoice-Id"));
        // Challenge issuance never contacts the facilitator (the URL above
        // is unreachable).
    }

    #[tokio::test]
    async fn malformed_proof_is_400_not_402() {
        let x402 = middleware("http://localhost:1");
        let response = app(&x402)
            .oneshot(get_request(&[(PAYMENT_SIGNATURE_HEADER, "%%%not-base64%%%")]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn paid_flow_verifies_settles_and_attaches() {
        let server = MockServer::start().await;
        Mock::given(http_method("POST"))
            .and(path("/x402/verify-native"))
            .and(header(API_KEY_HEADER, API_KEY))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "valid": true })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(http_method("POST"))
            .and(path("/x402/settle-native"))
            .and(header(API_KEY_HEADER, API_KEY))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "transaction": format!("0x{}", "ab".repeat(32)),
                "payer": "0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let x402 = middleware(&server.uri());
        let response = app(&x402)
            .oneshot(get_request(&[(
                PAYMENT_SIGNATURE_HEADER,
                &native_proof_header(),
            )]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(PAYMENT_RESPONSE_HEADER));
    }

    #[tokio::test]
    async fn rejected_verification_is_402_with_reason() {
        let server = MockServer::start().await;
        Mock::given(http_method("POST"))
            .and(path("/x402/verify-native"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "valid": false,
                "reason": "Insufficient amount",
            })))
            .expect(1)
            .mount(&server)
            .await;
        // No settle mock: settlement must not be attempted after a failed
        // verify.

        let x402 = middleware(&server.uri());
        let response = app(&x402)
            .oneshot(get_request(&[(
                PAYMENT_SIGNATURE_HEADER,
                &native_proof_header(),
            )]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["error"], "Insufficient amount");
    }

    #[tokio::test]
    async fn failed_settlement_is_not_paid() {
        let server = MockServer::start().await;
        Mock::given(http_method("POST"))
            .and(path("/x402/verify-native"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "valid": true })))
            .mount(&server)
            .await;
        Mock::given(http_method("POST"))
            .and(path("/x402/settle-native"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({
                "success": false,
                "error": "execution reverted",
            })))
            .mount(&server)
            .await;

        let x402 = middleware(&server.uri());
        let response = app(&x402)
            .oneshot(get_request(&[(
                PAYMENT_SIGNATURE_HEADER,
                &native_proof_header(),
            )]))
            .await
            .unwrap();
        // The downstream handler never ran; the buyer restarts the flow.
        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(body["error"].as_str().unwrap().contains("execution reverted"));
    }

    #[tokio::test]
    async fn unreachable_facilitator_is_500() {
        let x402 = middleware("http://localhost:1");
        let response = app(&x402)
            .oneshot(get_request(&[(
                PAYMENT_SIGNATURE_HEADER,
                &native_proof_header(),
            )]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn autopay_runs_only_with_explicit_flag() {
        let server = MockServer::start().await;
        Mock::given(http_method("POST"))
            .and(path("/x402/verify-eip3009"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "valid": true })))
            .mount(&server)
            .await;
        Mock::given(http_method("POST"))
            .and(path("/x402/settle-eip3009"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "transaction": format!("0x{}", "cd".repeat(32)),
                "payer": "0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045",
            })))
            .mount(&server)
            .await;

        let autopay =
            AutoPay::new(PrivateKeySigner::random(), Network::EspaceTestnet).unwrap();
        let x402 = middleware(&server.uri()).with_autopay(autopay);

        // Without the flag: still a plain challenge.
        let response = app(&x402).oneshot(get_request(&[])).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);

        // With the flag: the gate pays for itself through the normal flow.
        let response = app(&x402)
            .oneshot(get_request(&[(crate::AUTO_PAY_HEADER, "true")]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
