//! Execution layer port definitions.
//!
//! Ports define the interfaces for external services (price feed, market
//! sentiment, downstream microservices). Adapters implement these ports for
//! specific services (HTTP, stub, etc.).

use async_trait::async_trait;

use vigil_domain::{MarketDirection, OrderPayload, Price, Symbol};

use crate::error::ExecError;

// =============================================================================
// Price Oracle
// =============================================================================

/// Port for current market prices.
///
/// Implementations:
/// - `StubPriceOracle` - For testing (configured prices)
/// - `HttpPriceOracle` - Ticker endpoint over HTTP (vigil-connectors)
#[async_trait]
pub trait PriceOracle: Send + Sync {
    /// Latest price for a symbol.
    async fn current_price(&self, symbol: &Symbol) -> Result<Price, ExecError>;
}

// =============================================================================
// Fear & Greed Provider
// =============================================================================

/// Port for the Fear & Greed index, already mapped to allowed directions.
#[async_trait]
pub trait FearGreedProvider: Send + Sync {
    /// Current index value and the sides new positions may take.
    async fn market_direction(&self) -> Result<MarketDirection, ExecError>;
}

// =============================================================================
// Downstream Client
// =============================================================================

/// Port for the downstream microservice protocol.
///
/// `endpoint` is the base URL of the microservice.
#[async_trait]
pub trait DownstreamClient: Send + Sync {
    /// `POST {endpoint}/orders`; only HTTP 200 counts as delivered.
    async fn send_order(&self, endpoint: &str, payload: &OrderPayload) -> Result<(), ExecError>;

    /// `GET {endpoint}/health`; `Ok` means the service accepts orders.
    async fn check_health(&self, endpoint: &str) -> Result<(), ExecError>;
}
