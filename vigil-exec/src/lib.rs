//! Vigil Execution Layer
//!
//! Everything that talks to collaborators outside the supervisor.
//!
//! # Architecture
//!
//! ```text
//! Closure / Sweep → OrderDispatcher → DownstreamClient → microservice
//!                        │
//!                        └→ pending_orders (retry queue)
//! ```
//!
//! # Components
//!
//! - **Ports**: Traits for the price oracle, Fear & Greed and downstream protocol
//! - **HealthRegistry**: Cached microservice status read by the dispatcher
//! - **OrderDispatcher**: Delivery, pending-order retry sweep, health probe
//! - **Stub**: Test implementations for development
//!
//! # Example
//!
//! ```rust,ignore
//! use vigil_exec::{DispatcherConfig, HealthRegistry, MicroserviceEndpoint, OrderDispatcher, StubDownstream};
//! use vigil_store::MemoryStore;
//! use std::sync::Arc;
//!
//! let registry = Arc::new(HealthRegistry::new(&[MicroserviceEndpoint::new("commission", "http://commission")]));
//! let dispatcher = OrderDispatcher::new(
//!     Arc::new(StubDownstream::new()),
//!     registry,
//!     Arc::new(MemoryStore::new()),
//!     DispatcherConfig::default(),
//! );
//!
//! let outcome = dispatcher.notify("commission", action).await?;
//! ```

#![warn(clippy::all)]

pub mod dispatcher;
pub mod error;
pub mod health;
pub mod ports;
pub mod stub;

// Re-exports for convenience
pub use dispatcher::{DispatchOutcome, DispatcherConfig, OrderDispatcher, RetrySummary};
pub use error::{ExecError, ExecResult};
pub use health::{HealthChange, HealthRegistry, MicroserviceEndpoint};
pub use ports::{DownstreamClient, FearGreedProvider, PriceOracle};
pub use stub::{StubDownstream, StubFearGreed, StubPriceOracle};
