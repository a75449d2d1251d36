//! Execution layer error types.

use thiserror::Error;

/// Errors that can occur talking to external collaborators.
#[derive(Debug, Error)]
pub enum ExecError {
    /// Price oracle could not produce a price
    #[error("Price oracle error: {0}")]
    Oracle(String),

    /// Fear & Greed provider failure
    #[error("Market sentiment error: {0}")]
    Sentiment(String),

    /// Downstream microservice refused or failed the request
    #[error("Downstream error from {service}: {message}")]
    Downstream {
        /// Endpoint or microservice name
        service: String,
        /// HTTP status or transport error
        message: String,
    },

    /// Microservice is not in the registry
    #[error("Unknown microservice: {0}")]
    UnknownMicroservice(String),

    /// Store error
    #[error("Store error: {0}")]
    Store(#[from] vigil_store::StoreError),

    /// Domain error
    #[error("Domain error: {0}")]
    Domain(#[from] vigil_domain::DomainError),

    /// Engine error
    #[error("Engine error: {0}")]
    Engine(#[from] vigil_engine::EngineError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Timeout waiting for operation
    #[error("Timeout: {0}")]
    Timeout(String),
}

impl ExecError {
    /// Retrying later may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            ExecError::Oracle(_)
            | ExecError::Sentiment(_)
            | ExecError::Downstream { .. }
            | ExecError::Timeout(_) => true,
            ExecError::Store(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// Result type for execution operations.
pub type ExecResult<T> = Result<T, ExecError>;
