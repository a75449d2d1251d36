//! Vigil Connectors
//!
//! HTTP adapters for the execution ports: downstream microservices, the
//! price oracle and the Fear & Greed index.

#![warn(clippy::all)]

// Public modules
pub mod downstream;
pub mod fear_greed;
pub mod http;
pub mod price_oracle;

// Re-exports
pub use downstream::HttpDownstreamClient;
pub use fear_greed::{DirectionBands, HttpFearGreedProvider};
pub use http::ConnectorError;
pub use price_oracle::HttpPriceOracle;
