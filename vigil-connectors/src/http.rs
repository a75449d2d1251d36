//! Shared HTTP plumbing for the connectors.

use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use thiserror::Error;
use tokio::time::timeout;

use vigil_exec::ExecError;

/// Default bound for a single request
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors that can occur in the HTTP connectors.
#[derive(Debug, Clone, Error)]
pub enum ConnectorError {
    /// Transport failure (DNS, refused, reset)
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    /// Unexpected status code
    #[error("Unexpected HTTP status {status}: {body}")]
    Status { status: u16, body: String },

    /// Body could not be decoded
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// Request timed out
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Client could not be built
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl ConnectorError {
    /// Map into the execution error taxonomy for a given collaborator.
    pub fn into_exec(self, service: &str) -> ExecError {
        match self {
            ConnectorError::Timeout(_) => ExecError::Timeout(format!("{}: {}", service, self)),
            ConnectorError::Config(msg) => ExecError::Config(msg),
            other => ExecError::Downstream {
                service: service.to_string(),
                message: other.to_string(),
            },
        }
    }
}

/// Build a reqwest client with the given request timeout.
pub fn build_client(request_timeout: Duration) -> Result<Client, ConnectorError> {
    Client::builder()
        .timeout(request_timeout)
        .build()
        .map_err(|e| ConnectorError::Config(e.to_string()))
}

/// Strip a trailing slash so `{base}/path` never doubles it.
pub fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// Await a request under `limit`, mapping transport errors.
pub async fn send_bounded<F>(limit: Duration, request: F) -> Result<Response, ConnectorError>
where
    F: std::future::Future<Output = Result<Response, reqwest::Error>>,
{
    timeout(limit, request)
        .await
        .map_err(|_| ConnectorError::Timeout(limit))?
        .map_err(|e| {
            if e.is_timeout() {
                ConnectorError::Timeout(limit)
            } else {
                ConnectorError::RequestFailed(e.to_string())
            }
        })
}

/// Require an exact status, reading the body into the error otherwise.
pub async fn expect_status(response: Response, expected: StatusCode) -> Result<Response, ConnectorError> {
    let status = response.status();
    if status == expected {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ConnectorError::Status {
        status: status.as_u16(),
        body,
    })
}
