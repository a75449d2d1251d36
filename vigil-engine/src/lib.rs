//! Vigil Engine Layer
//!
//! Pure decision logic, deterministic, no I/O.
//! Takes positions, prices and signals → returns decisions to execute.

#![warn(clippy::all)]

pub mod closure;
pub mod commission;
pub mod error;
pub mod pnl;
pub mod retry;

pub use closure::{evaluate, evaluate_signal, threshold_reason, Closure, ClosureDecision};
pub use commission::{classify_payments, compute_commission, CommissionPlans};
pub use error::EngineError;
pub use pnl::compute_pnl;
pub use retry::RetryPolicy;
