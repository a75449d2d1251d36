//! Vigil Daemon Library
//!
//! Runtime orchestrator for position supervision.
//!
//! # Architecture
//!
//! ```text
//!              API Server ──admission / close signals──┐
//!                                                      ↓
//! Scheduler → operations cycle → PositionStore (cache) → Store
//!           → commission sweep → closure pipeline → OrderDispatcher → microservices
//!           → health probe / pending retry / accounting reconciliation
//! ```
//!
//! # Components
//!
//! - **Daemon**: Main runtime orchestrator
//! - **Scheduler**: Periodic tasks with per-cycle failure containment
//! - **Supervisor**: Price-driven evaluation and closure of positions
//! - **Pipeline**: Commission and downstream notification after a closure
//! - **PositionStore**: Lockable cache of supervised positions
//! - **Event Bus**: Internal lifecycle events
//! - **API**: HTTP endpoints
//! - **Config**: Environment-based configuration
//!
//! # Example
//!
//! ```rust,ignore
//! use vigild::{Config, Daemon};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::from_env().expect("Failed to load config");
//!     let daemon = Daemon::from_config(config).await.expect("Failed to wire daemon");
//!     daemon.run().await.expect("Daemon error");
//! }
//! ```

#![warn(clippy::all)]

pub mod accounting;
pub mod admission;
pub mod api;
pub mod commission;
pub mod config;
pub mod context;
pub mod daemon;
pub mod error;
pub mod event_bus;
pub mod metrics;
pub mod pipeline;
pub mod position_store;
pub mod scheduler;
pub mod signals;
pub mod supervisor;

// Re-exports for convenience
pub use accounting::{reconcile_accounting, AccountingSummary, IntegrityGap};
pub use admission::{admit, AdmissionRequest};
pub use commission::{classify, record_commission, CommissionStep};
pub use config::{ApiConfig, Config, Environment, LogFormat, SymbolTable};
pub use context::SupervisorContext;
pub use daemon::Daemon;
pub use error::{DaemonError, DaemonResult};
pub use event_bus::{DaemonEvent, EventBus, EventReceiver};
pub use metrics::Metrics;
pub use pipeline::{complete_closure, sweep_incomplete_closures, PipelineReport, SweepReport};
pub use position_store::{PositionHandle, PositionStore, ReconcileReport};
pub use scheduler::Scheduler;
pub use signals::{apply_close_signal, SignalReport};
pub use supervisor::{close_position, run_operations_cycle, CloseOutcome, CycleReport, Evaluation};
