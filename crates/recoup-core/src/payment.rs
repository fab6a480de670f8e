//! Payment execution collaborator

use crate::rates::RateQuote;
use async_trait::async_trait;
use recoup_common::config::PaymentConfig;
use recoup_common::types::{CampaignId, CustomerId, WorkspaceId};
use recoup_storage::models::CampaignTarget;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Receipt statuses that count as a collected payment
pub const SUCCESS_STATUSES: [&str; 4] = ["success", "succeeded", "confirmed", "completed"];

/// Payment execution errors
#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("Payment transport error: {0}")]
    Transport(String),

    #[error("Payment rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Invalid payment response: {0}")]
    InvalidResponse(String),

    #[error("Exchange rate unavailable: {0}")]
    RateUnavailable(String),
}

/// A request to collect an outstanding amount
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRequest {
    /// Stable per attempt, so a re-run of an interrupted attempt cannot charge twice
    pub idempotency_key: String,
    pub campaign_id: CampaignId,
    pub attempt_number: i32,
    pub workspace_id: WorkspaceId,
    pub customer_id: CustomerId,
    pub target: CampaignTarget,
    pub amount_cents: i64,
    pub currency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote: Option<RateQuote>,
}

impl PaymentRequest {
    pub fn idempotency_key_for(campaign_id: CampaignId, attempt_number: i32) -> String {
        format!("dunning-{}-{}", campaign_id, attempt_number)
    }
}

/// Result reported by the payment executor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentReceipt {
    pub transaction_reference: String,
    pub status: String,
    #[serde(default)]
    pub resource_usage: Option<String>,
    #[serde(default)]
    pub block_reference: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl PaymentReceipt {
    pub fn is_success(&self) -> bool {
        let status = self.status.to_ascii_lowercase();
        SUCCESS_STATUSES.contains(&status.as_str())
    }
}

/// Executes payment requests
#[async_trait]
pub trait PaymentClient: Send + Sync {
    async fn process_payment(
        &self,
        request: &PaymentRequest,
    ) -> std::result::Result<PaymentReceipt, PaymentError>;
}

/// Payment client posting JSON requests to an HTTP executor
pub struct HttpPaymentClient {
    client: Client,
    config: PaymentConfig,
}

impl HttpPaymentClient {
    pub fn new(config: PaymentConfig) -> std::result::Result<Self, PaymentError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PaymentError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }
}

#[async_trait]
impl PaymentClient for HttpPaymentClient {
    async fn process_payment(
        &self,
        request: &PaymentRequest,
    ) -> std::result::Result<PaymentReceipt, PaymentError> {
        let mut builder = self
            .client
            .post(&self.config.endpoint)
            .header("Idempotency-Key", &request.idempotency_key)
            .json(request);

        if let Some(api_key) = &self.config.api_key {
            builder = builder.bearer_auth(api_key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| PaymentError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PaymentError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let receipt: PaymentReceipt = response
            .json()
            .await
            .map_err(|e| PaymentError::InvalidResponse(e.to_string()))?;

        debug!(
            campaign_id = %request.campaign_id,
            attempt = request.attempt_number,
            status = %receipt.status,
            "Payment executor responded"
        );

        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;
    use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

    fn request() -> PaymentRequest {
        let campaign_id = Uuid::new_v4();
        PaymentRequest {
            idempotency_key: PaymentRequest::idempotency_key_for(campaign_id, 2),
            campaign_id,
            attempt_number: 2,
            workspace_id: Uuid::new_v4(),
            customer_id: Uuid::new_v4(),
            target: CampaignTarget::Subscription(Uuid::new_v4()),
            amount_cents: 1999,
            currency: "USD".to_string(),
            quote: None,
        }
    }

    fn client(endpoint: String) -> HttpPaymentClient {
        HttpPaymentClient::new(PaymentConfig {
            endpoint,
            api_key: Some("secret".to_string()),
            ..PaymentConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_success_statuses() {
        for status in ["success", "Succeeded", "CONFIRMED", "completed"] {
            let receipt = PaymentReceipt {
                transaction_reference: "tx".to_string(),
                status: status.to_string(),
                resource_usage: None,
                block_reference: None,
                error_message: None,
            };
            assert!(receipt.is_success(), "{} should be a success", status);
        }

        let pending = PaymentReceipt {
            transaction_reference: "tx".to_string(),
            status: "pending".to_string(),
            resource_usage: None,
            block_reference: None,
            error_message: None,
        };
        assert!(!pending.is_success());
    }

    #[tokio::test]
    async fn test_process_payment_posts_request() {
        let mock_server = MockServer::start().await;
        let request = request();

        Mock::given(matchers::method("POST"))
            .and(matchers::path("/payments"))
            .and(matchers::header("Idempotency-Key", request.idempotency_key.as_str()))
            .and(matchers::header("Authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "transaction_reference": "0xabc",
                "status": "confirmed",
                "block_reference": "1234"
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let receipt = client(format!("{}/payments", mock_server.uri()))
            .process_payment(&request)
            .await
            .unwrap();

        assert_eq!(receipt.transaction_reference, "0xabc");
        assert_eq!(receipt.block_reference.as_deref(), Some("1234"));
        assert!(receipt.is_success());
    }

    #[tokio::test]
    async fn test_process_payment_maps_http_errors() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(402).set_body_string("insufficient funds"))
            .mount(&mock_server)
            .await;

        let result = client(mock_server.uri()).process_payment(&request()).await;

        match result {
            Err(PaymentError::Rejected { status, body }) => {
                assert_eq!(status, 402);
                assert_eq!(body, "insufficient funds");
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_process_payment_invalid_body() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&mock_server)
            .await;

        let result = client(mock_server.uri()).process_payment(&request()).await;
        assert!(matches!(result, Err(PaymentError::InvalidResponse(_))));
    }
}
