//! Stub implementations for testing.
//!
//! These implementations simulate the price feed, market sentiment and
//! downstream microservices without making real network calls.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use std::time::Duration;

use vigil_domain::{MarketDirection, OrderPayload, Price, Symbol};

use crate::error::ExecError;
use crate::ports::{DownstreamClient, FearGreedProvider, PriceOracle};

// =============================================================================
// Stub Price Oracle
// =============================================================================

/// Stub price oracle for testing.
///
/// Returns configured prices; unknown symbols are an error.
pub struct StubPriceOracle {
    /// Current prices by symbol
    prices: RwLock<HashMap<String, Decimal>>,
    /// Number of upcoming lookups that fail
    fail_next: RwLock<u32>,
    /// Artificial latency (for timeout tests)
    delay: RwLock<Option<Duration>>,
}

impl StubPriceOracle {
    /// Create an oracle with no prices.
    pub fn new() -> Self {
        Self {
            prices: RwLock::new(HashMap::new()),
            fail_next: RwLock::new(0),
            delay: RwLock::new(None),
        }
    }

    /// Create an oracle with one configured price.
    pub fn with_price(symbol: &str, price: Decimal) -> Self {
        let oracle = Self::new();
        oracle.set_price(symbol, price);
        oracle
    }

    /// Set price for a specific symbol.
    pub fn set_price(&self, symbol: &str, price: Decimal) {
        let mut prices = self.prices.write().unwrap();
        prices.insert(symbol.to_uppercase(), price);
    }

    /// Make the next `count` lookups fail.
    pub fn set_fail_next(&self, count: u32) {
        *self.fail_next.write().unwrap() = count;
    }

    /// Delay every lookup.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.write().unwrap() = delay;
    }

    fn should_fail(&self) -> bool {
        let mut fail_next = self.fail_next.write().unwrap();
        if *fail_next > 0 {
            *fail_next -= 1;
            return true;
        }
        false
    }
}

impl Default for StubPriceOracle {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PriceOracle for StubPriceOracle {
    async fn current_price(&self, symbol: &Symbol) -> Result<Price, ExecError> {
        let delay = *self.delay.read().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.should_fail() {
            return Err(ExecError::Oracle("Simulated oracle failure".to_string()));
        }

        let price = {
            let prices = self.prices.read().unwrap();
            prices.get(&symbol.as_pair()).copied()
        };

        match price {
            Some(price) => Ok(Price::new(price)?),
            None => Err(ExecError::Oracle(format!("No price for {}", symbol))),
        }
    }
}

// =============================================================================
// Stub Fear & Greed
// =============================================================================

/// Stub Fear & Greed provider with a settable index value.
pub struct StubFearGreed {
    value: RwLock<Option<u8>>,
}

impl StubFearGreed {
    /// Provider reporting `value`.
    pub fn new(value: u8) -> Self {
        Self {
            value: RwLock::new(Some(value)),
        }
    }

    /// Change the index value; `None` simulates an outage.
    pub fn set_value(&self, value: Option<u8>) {
        *self.value.write().unwrap() = value;
    }
}

#[async_trait]
impl FearGreedProvider for StubFearGreed {
    async fn market_direction(&self) -> Result<MarketDirection, ExecError> {
        let value = *self.value.read().unwrap();
        match value {
            Some(value) => Ok(MarketDirection::from_index(
                value,
                MarketDirection::LONG_ONLY_BELOW,
                MarketDirection::SHORT_ONLY_ABOVE,
            )?),
            None => Err(ExecError::Sentiment("Simulated sentiment outage".to_string())),
        }
    }
}

// =============================================================================
// Stub Downstream
// =============================================================================

/// Stub downstream microservices.
///
/// Records every delivered payload per endpoint. Endpoints can be marked
/// unreachable, in which case both orders and health checks fail.
pub struct StubDownstream {
    delivered: RwLock<Vec<(String, OrderPayload)>>,
    unreachable: RwLock<HashSet<String>>,
    fail_next: RwLock<u32>,
}

impl StubDownstream {
    /// All endpoints reachable.
    pub fn new() -> Self {
        Self {
            delivered: RwLock::new(Vec::new()),
            unreachable: RwLock::new(HashSet::new()),
            fail_next: RwLock::new(0),
        }
    }

    /// Toggle reachability of an endpoint.
    pub fn set_unreachable(&self, endpoint: &str, unreachable: bool) {
        let mut set = self.unreachable.write().unwrap();
        if unreachable {
            set.insert(endpoint.to_string());
        } else {
            set.remove(endpoint);
        }
    }

    /// Make the next `count` order deliveries fail with HTTP 503.
    pub fn set_fail_next(&self, count: u32) {
        *self.fail_next.write().unwrap() = count;
    }

    /// Every delivered payload, in order.
    pub fn delivered(&self) -> Vec<(String, OrderPayload)> {
        self.delivered.read().unwrap().clone()
    }

    /// Payloads delivered to one endpoint.
    pub fn delivered_to(&self, endpoint: &str) -> Vec<OrderPayload> {
        self.delivered
            .read()
            .unwrap()
            .iter()
            .filter(|(e, _)| e == endpoint)
            .map(|(_, p)| p.clone())
            .collect()
    }

    fn is_unreachable(&self, endpoint: &str) -> bool {
        self.unreachable.read().unwrap().contains(endpoint)
    }

    fn should_fail(&self) -> bool {
        let mut fail_next = self.fail_next.write().unwrap();
        if *fail_next > 0 {
            *fail_next -= 1;
            return true;
        }
        false
    }
}

impl Default for StubDownstream {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DownstreamClient for StubDownstream {
    async fn send_order(&self, endpoint: &str, payload: &OrderPayload) -> Result<(), ExecError> {
        if self.is_unreachable(endpoint) {
            return Err(ExecError::Downstream {
                service: endpoint.to_string(),
                message: "connection refused".to_string(),
            });
        }
        if self.should_fail() {
            return Err(ExecError::Downstream {
                service: endpoint.to_string(),
                message: "HTTP 503".to_string(),
            });
        }

        let mut delivered = self.delivered.write().unwrap();
        delivered.push((endpoint.to_string(), payload.clone()));
        Ok(())
    }

    async fn check_health(&self, endpoint: &str) -> Result<(), ExecError> {
        if self.is_unreachable(endpoint) {
            return Err(ExecError::Downstream {
                service: endpoint.to_string(),
                message: "connection refused".to_string(),
            });
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
