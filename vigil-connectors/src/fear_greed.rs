//! Fear & Greed index over HTTP.
//!
//! `GET {base}/fng/?limit=1` →
//! `{"data": [{"value": "45", "value_classification": "Fear", "timestamp": "..."}]}`

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;

use vigil_domain::MarketDirection;
use vigil_exec::{ExecError, FearGreedProvider};

use crate::http::{build_client, expect_status, join_url, send_bounded, ConnectorError};

#[derive(Debug, Deserialize)]
struct FngResponse {
    data: Vec<FngEntry>,
}

#[derive(Debug, Deserialize)]
struct FngEntry {
    value: String,
    #[serde(default)]
    value_classification: Option<String>,
}

/// Direction bands applied to the index value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectionBands {
    /// Below this value only LONG is allowed
    pub long_only_below: u8,
    /// Above this value only SHORT is allowed
    pub short_only_above: u8,
}

impl Default for DirectionBands {
    fn default() -> Self {
        Self {
            long_only_below: MarketDirection::LONG_ONLY_BELOW,
            short_only_above: MarketDirection::SHORT_ONLY_ABOVE,
        }
    }
}

/// reqwest-backed `FearGreedProvider`
pub struct HttpFearGreedProvider {
    client: Client,
    base_url: String,
    request_timeout: Duration,
    bands: DirectionBands,
}

impl HttpFearGreedProvider {
    pub fn new(
        base_url: impl Into<String>,
        request_timeout: Duration,
        bands: DirectionBands,
    ) -> Result<Self, ConnectorError> {
        Ok(Self {
            client: build_client(request_timeout)?,
            base_url: base_url.into(),
            request_timeout,
            bands,
        })
    }

    async fn fetch_value(&self) -> Result<u8, ConnectorError> {
        let url = join_url(&self.base_url, "fng/");
        let request = self.client.get(&url).query(&[("limit", "1")]).send();
        let response = send_bounded(self.request_timeout, request).await?;
        let body = expect_status(response, StatusCode::OK)
            .await?
            .json::<FngResponse>()
            .await
            .map_err(|e| ConnectorError::ParseError(e.to_string()))?;

        let entry = body
            .data
            .first()
            .ok_or_else(|| ConnectorError::ParseError("empty index data".to_string()))?;
        debug!(value = %entry.value, classification = ?entry.value_classification, "Fear & Greed index");

        entry
            .value
            .trim()
            .parse::<u8>()
            .map_err(|e| ConnectorError::ParseError(format!("index value {:?}: {}", entry.value, e)))
    }
}

#[async_trait]
impl FearGreedProvider for HttpFearGreedProvider {
    async fn market_direction(&self) -> Result<MarketDirection, ExecError> {
        let value = self.fetch_value().await.map_err(|e| match e {
            ConnectorError::Timeout(_) => e.into_exec("fear & greed"),
            other => ExecError::Sentiment(other.to_string()),
        })?;

        Ok(MarketDirection::from_index(
            value,
            self.bands.long_only_below,
            self.bands.short_only_above,
        )?)
    }
}
