//! Vigil Domain Layer
//!
//! Pure domain logic with zero I/O dependencies.
//! Contains entities, value objects, signals and downstream order payloads.

#![warn(clippy::all)]

// Public modules
pub mod entities;
pub mod orders;
pub mod signals;
pub mod value_objects;

// Re-export commonly used types
pub use entities::{
    CloseReason, CommissionRecord, CommissionType, HealthStatus, MicroserviceHealth, Payment,
    PaymentKind, PaymentStatus, PendingOrder, PendingOrderId, PendingOrderStatus, Position,
    PositionId, PositionStatus, UserId, UserPlan,
};
pub use orders::{OrderAction, OrderPayload};
pub use signals::{CloseSignal, MarketDirection};
pub use value_objects::{DomainError, Leverage, Pnl, Price, Quantity, Side, Symbol, Thresholds};
