//! Vigil Storage Layer
//!
//! Provides persistence for positions, commissions, pending orders and
//! microservice health, plus a read-only view of the billing ledger.
//!
//! # Architecture
//!
//! - **Repository traits**: Define the storage interface (ports)
//! - **In-memory store**: Fast implementation for testing
//! - **PostgreSQL store**: Production implementation (feature `postgres`)
//!
//! # Usage
//!
//! ```rust
//! use vigil_store::{MemoryStore, PositionRepository};
//! use vigil_domain::{Leverage, Position, Price, Quantity, Side, Symbol, Thresholds};
//! use rust_decimal_macros::dec;
//! use uuid::Uuid;
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = MemoryStore::new();
//!
//!     // Admit a position within the per-user cap
//!     let position = Position::new(
//!         Uuid::now_v7(),
//!         Symbol::from_pair("BTCUSDT").unwrap(),
//!         Side::Long,
//!         Price::new(dec!(60000)).unwrap(),
//!         Quantity::new(dec!(1000)).unwrap(),
//!         Leverage::new(5).unwrap(),
//!         Thresholds::new(dec!(15), dec!(10)).unwrap(),
//!     );
//!     store.insert_within_cap(&position, 2).await.unwrap();
//!
//!     // Find active positions
//!     let active = store.find_active().await.unwrap();
//!     println!("Active positions: {}", active.len());
//! }
//! ```

#![warn(clippy::all)]

// Modules
mod error;
mod memory;
#[cfg(feature = "postgres")]
mod postgres;
mod repository;

// Re-exports
pub use error::StoreError;
pub use memory::MemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PgStore;
pub use repository::{
    BillingRepository, CommissionRepository, HealthRepository, PendingOrderRepository,
    PositionRepository, RecordOutcome, Store,
};
