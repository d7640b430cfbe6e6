//! HTTP client for the remote facilitator.
//!
//! Wraps the `verify-*`/`settle-*` endpoints with the shared-secret header
//! and a hard 30-second timeout. A timeout or transport failure surfaces as
//! an error the orchestrator treats as a settlement failure — never as a
//! payment collected.

use std::time::Duration;
use url::Url;

use x402_espace::handlers::API_KEY_HEADER;
use x402_espace::network::PaymentMethod;
use x402_espace::types::{SchemeRequest, SettlementResult, VerifyOutcome};

/// Upper bound on any outbound facilitator call.
const FACILITATOR_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum FacilitatorClientError {
    #[error("facilitator request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("facilitator authentication failed")]
    Unauthorized,
    #[error("invalid facilitator URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("facilitator answered {status}: {body}")]
    Status { status: u16, body: String },
}

/// Client for one facilitator deployment.
#[derive(Debug, Clone)]
pub struct FacilitatorClient {
    base_url: Url,
    api_key: String,
    http: reqwest::Client,
}

impl FacilitatorClient {
    pub fn new(base_url: Url, api_key: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(FACILITATOR_TIMEOUT)
            .build()
            .expect("reqwest client construction cannot fail with static config");
        FacilitatorClient {
            base_url,
            api_key,
            http,
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, action: &str, method: PaymentMethod) -> Result<Url, FacilitatorClientError> {
        let path = format!("x402/{}-{}", action, method.route_segment());
        Ok(self.base_url.join(&path)?)
    }

    async fn post(
        &self,
        url: Url,
        request: &SchemeRequest,
    ) -> Result<reqwest::Response, FacilitatorClientError> {
        let response = self
            .http
            .post(url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(request)
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(FacilitatorClientError::Unauthorized);
        }
        Ok(response)
    }

    /// `POST /x402/verify-<method>`.
    pub async fn verify(
        &self,
        method: PaymentMethod,
        request: &SchemeRequest,
    ) -> Result<VerifyOutcome, FacilitatorClientError> {
        let response = self.post(self.endpoint("verify", method)?, request).await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FacilitatorClientError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json::<VerifyOutcome>().await?)
    }

    /// `POST /x402/settle-<method>`. The facilitator answers 200 on success
    /// and 500 on failure, with a [`SettlementResult`] body either way.
    pub async fn settle(
        &self,
        method: PaymentMethod,
        request: &SchemeRequest,
    ) -> Result<SettlementResult, FacilitatorClientError> {
        let response = self.post(self.endpoint("settle", method)?, request).await?;
        let status = response.status();
        let body = response.bytes().await?;
        match serde_json::from_slice::<SettlementResult>(&body) {
            Ok(result) => Ok(result),
            Err(_) => Err(FacilitatorClientError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            }),
        }
    }
}
