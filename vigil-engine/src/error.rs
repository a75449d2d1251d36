//! Error types for the decision engine

use thiserror::Error;
use vigil_domain::DomainError;

/// Errors that can occur while building engine inputs
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Commission percentage outside 0..=100
    #[error("Invalid plan percent for {plan}: {value}")]
    InvalidPlanPercent { plan: &'static str, value: String },

    /// Retry policy that could never succeed
    #[error("Invalid retry policy: {0}")]
    InvalidRetryPolicy(String),

    /// PnL at this price does not fit a `Decimal`
    #[error("PnL overflow: entry {entry}, price {price}")]
    PnlOverflow { entry: String, price: String },

    /// Domain validation failed
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),
}
