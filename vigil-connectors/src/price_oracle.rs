//! HTTP price oracle over a public ticker endpoint.
//!
//! `GET {base}/api/v3/ticker/price?symbol=BTCUSDT` →
//! `{"symbol": "BTCUSDT", "price": "66000.00"}`

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;

use vigil_domain::{Price, Symbol};
use vigil_exec::{ExecError, PriceOracle};

use crate::http::{build_client, expect_status, join_url, send_bounded, ConnectorError};

/// Ticker response body
#[derive(Debug, Deserialize)]
struct TickerPrice {
    symbol: String,
    price: Decimal,
}

/// reqwest-backed `PriceOracle`
pub struct HttpPriceOracle {
    client: Client,
    base_url: String,
    request_timeout: Duration,
}

impl HttpPriceOracle {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self, ConnectorError> {
        Ok(Self {
            client: build_client(request_timeout)?,
            base_url: base_url.into(),
            request_timeout,
        })
    }

    async fn fetch(&self, symbol: &Symbol) -> Result<TickerPrice, ConnectorError> {
        let url = join_url(&self.base_url, "api/v3/ticker/price");
        let request = self.client.get(&url).query(&[("symbol", symbol.as_pair())]).send();
        let response = send_bounded(self.request_timeout, request).await?;
        let response = expect_status(response, StatusCode::OK).await?;
        response
            .json::<TickerPrice>()
            .await
            .map_err(|e| ConnectorError::ParseError(e.to_string()))
    }
}

#[async_trait]
impl PriceOracle for HttpPriceOracle {
    async fn current_price(&self, symbol: &Symbol) -> Result<Price, ExecError> {
        let ticker = self.fetch(symbol).await.map_err(|e| match e {
            ConnectorError::Timeout(_) => e.into_exec("price oracle"),
            other => ExecError::Oracle(other.to_string()),
        })?;

        if ticker.symbol != symbol.as_pair() {
            return Err(ExecError::Oracle(format!(
                "Ticker answered for {} instead of {}",
                ticker.symbol, symbol
            )));
        }

        Ok(Price::new(ticker.price)?)
    }
}
