//! HTTP client for the downstream microservice protocol.
//!
//! - `POST {endpoint}/orders` with the JSON order payload; only 200 is success
//! - `GET {endpoint}/health`; any 2xx is healthy

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::debug;

use vigil_domain::OrderPayload;
use vigil_exec::{DownstreamClient, ExecError};

use crate::http::{build_client, expect_status, join_url, send_bounded, ConnectorError, DEFAULT_TIMEOUT};

/// reqwest-backed `DownstreamClient`
pub struct HttpDownstreamClient {
    client: Client,
    request_timeout: Duration,
}

impl HttpDownstreamClient {
    /// Client with the given per-request timeout.
    pub fn new(request_timeout: Duration) -> Result<Self, ConnectorError> {
        Ok(Self {
            client: build_client(request_timeout)?,
            request_timeout,
        })
    }
}

impl Default for HttpDownstreamClient {
    fn default() -> Self {
        Self {
            client: Client::new(),
            request_timeout: DEFAULT_TIMEOUT,
        }
    }
}

#[async_trait]
impl DownstreamClient for HttpDownstreamClient {
    async fn send_order(&self, endpoint: &str, payload: &OrderPayload) -> Result<(), ExecError> {
        let url = join_url(endpoint, "orders");
        debug!(%url, action = payload.action.name(), "POST order");

        let response = send_bounded(self.request_timeout, self.client.post(&url).json(payload).send())
            .await
            .map_err(|e| e.into_exec(endpoint))?;
        expect_status(response, StatusCode::OK)
            .await
            .map_err(|e| e.into_exec(endpoint))?;
        Ok(())
    }

    async fn check_health(&self, endpoint: &str) -> Result<(), ExecError> {
        let url = join_url(endpoint, "health");
        let response = send_bounded(self.request_timeout, self.client.get(&url).send())
            .await
            .map_err(|e| e.into_exec(endpoint))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(ConnectorError::Status {
                status: response.status().as_u16(),
                body: String::new(),
            }
            .into_exec(endpoint))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use uuid::Uuid;
    use vigil_domain::{CommissionType, OrderAction};
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn payload() -> OrderPayload {
        OrderPayload::new(
            OrderAction::ChargeCommission {
                operation_id: Uuid::now_v7(),
                user_id: Uuid::now_v7(),
                commission_amount: dec!(50),
                commission_type: CommissionType::Referent,
            },
            "vigil-test",
        )
    }

    #[tokio::test]
    async fn test_send_order_success() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/orders"))
            .and(body_partial_json(serde_json::json!({
                "action": "charge_commission",
                "supervisor": "vigil-test",
                "commission_type": "REFERENT"
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = HttpDownstreamClient::new(Duration::from_secs(2)).unwrap();
        client.send_order(&mock_server.uri(), &payload()).await.unwrap();
    }

    #[tokio::test]
    async fn test_non_200_is_failure() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/orders"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&mock_server)
            .await;

        let client = HttpDownstreamClient::new(Duration::from_secs(2)).unwrap();
        let result = client.send_order(&mock_server.uri(), &payload()).await;
        assert!(matches!(result, Err(ExecError::Downstream { .. })));
    }

    #[tokio::test]
    async fn test_slow_service_times_out() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/orders"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&mock_server)
            .await;

        let client = HttpDownstreamClient::new(Duration::from_millis(100)).unwrap();
        let result = client.send_order(&mock_server.uri(), &payload()).await;
        assert!(matches!(result, Err(ExecError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_health_check() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&mock_server)
            .await;

        let client = HttpDownstreamClient::new(Duration::from_secs(2)).unwrap();
        client.check_health(&mock_server.uri()).await.unwrap();

        // Nothing listens on /health for a fresh server
        let unhealthy = MockServer::start().await;
        assert!(client.check_health(&unhealthy.uri()).await.is_err());
    }
}
