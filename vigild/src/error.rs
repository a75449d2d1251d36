//! Daemon error types.

use thiserror::Error;
use uuid::Uuid;
use vigil_domain::DomainError;
use vigil_engine::EngineError;
use vigil_exec::ExecError;
use vigil_store::StoreError;

/// Daemon-level errors.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Domain error
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// Engine error
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Execution error
    #[error("Execution error: {0}")]
    Exec(#[from] ExecError),

    /// Store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Position not found
    #[error("Position not found: {0}")]
    PositionNotFound(Uuid),

    /// Admission or signal rejected; nothing was mutated
    #[error("Validation error: {0}")]
    Validation(String),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl DaemonError {
    /// Worth retrying on the next cycle
    pub fn is_transient(&self) -> bool {
        match self {
            DaemonError::Exec(e) => e.is_transient(),
            DaemonError::Store(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Rejections caused by the caller's input
    pub fn is_validation(&self) -> bool {
        matches!(self, DaemonError::Validation(_) | DaemonError::Domain(_))
    }
}

/// Result type for daemon operations.
pub type DaemonResult<T> = Result<T, DaemonError>;
