//! Repository trait definitions (Ports)
//!
//! These traits define the storage interface for the supervisor.
//! Implementations can be PostgreSQL, in-memory, or mock for testing.

use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use vigil_domain::{
    CommissionRecord, MicroserviceHealth, Payment, PendingOrder, PendingOrderId, Position,
    PositionId, UserId, UserPlan,
};

/// Result of an exactly-once commission write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Record inserted and `commission_calculated` set
    Recorded,
    /// The operation already had a commission; nothing changed
    AlreadyRecorded,
}

/// Repository for Position entities
#[async_trait]
pub trait PositionRepository: Send + Sync {
    /// Save a position (insert or update of the single row)
    async fn save(&self, position: &Position) -> Result<(), StoreError>;

    /// Insert a new position unless the user already holds `max_active`
    /// PENDING/OPEN positions. Check and insert are atomic.
    ///
    /// # Errors
    /// `StoreError::CapReached` when the user is at the cap.
    async fn insert_within_cap(&self, position: &Position, max_active: usize) -> Result<(), StoreError>;

    /// Find a position by ID
    async fn find_by_id(&self, id: PositionId) -> Result<Option<Position>, StoreError>;

    /// Find several positions by ID; unknown ids are skipped
    async fn find_by_ids(&self, ids: &[PositionId]) -> Result<Vec<Position>, StoreError>;

    /// Find all positions of a user
    async fn find_by_user(&self, user_id: UserId) -> Result<Vec<Position>, StoreError>;

    /// Find all active positions (PENDING or OPEN)
    async fn find_active(&self) -> Result<Vec<Position>, StoreError>;

    /// Closed positions whose commission or downstream step is still undone
    async fn find_incomplete_closures(&self) -> Result<Vec<Position>, StoreError>;

    /// Positions closed within `[from, to)`
    async fn find_closed_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Position>, StoreError>;

    /// Set `downstream_notified = true` (idempotent)
    async fn mark_downstream_notified(&self, id: PositionId) -> Result<(), StoreError>;
}

/// Repository for commission records
#[async_trait]
pub trait CommissionRepository: Send + Sync {
    /// Insert the record and set `Position.commission_calculated` in one
    /// transaction. A repeat for the same operation is a no-op.
    async fn record_commission(&self, record: &CommissionRecord) -> Result<RecordOutcome, StoreError>;

    /// Find the commission of an operation
    async fn find_by_operation(&self, operation_id: PositionId) -> Result<Option<CommissionRecord>, StoreError>;

    /// Commissions created within `[from, to)`
    async fn find_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<CommissionRecord>, StoreError>;
}

/// Repository for queued downstream orders
#[async_trait]
pub trait PendingOrderRepository: Send + Sync {
    /// Save an order (insert or update)
    async fn save(&self, order: &PendingOrder) -> Result<(), StoreError>;

    /// Find an order by ID
    async fn find_by_id(&self, id: PendingOrderId) -> Result<Option<PendingOrder>, StoreError>;

    /// PENDING orders, oldest first
    async fn find_pending(&self) -> Result<Vec<PendingOrder>, StoreError>;

    /// Number of PENDING orders
    async fn count_pending(&self) -> Result<usize, StoreError>;
}

/// Repository for microservice health snapshots
#[async_trait]
pub trait HealthRepository: Send + Sync {
    /// Save a snapshot (upsert by name)
    async fn save(&self, health: &MicroserviceHealth) -> Result<(), StoreError>;

    /// All known microservices
    async fn find_all(&self) -> Result<Vec<MicroserviceHealth>, StoreError>;
}

/// Read-only view of the billing ledger
#[async_trait]
pub trait BillingRepository: Send + Sync {
    /// Payments made by a user
    async fn find_payments(&self, user_id: UserId) -> Result<Vec<Payment>, StoreError>;

    /// Billing plan of a user, if any
    async fn find_plan(&self, user_id: UserId) -> Result<Option<UserPlan>, StoreError>;
}

/// Combined store interface
pub trait Store: Send + Sync {
    /// Get position repository
    fn positions(&self) -> &dyn PositionRepository;

    /// Get commission repository
    fn commissions(&self) -> &dyn CommissionRepository;

    /// Get pending order repository
    fn pending_orders(&self) -> &dyn PendingOrderRepository;

    /// Get microservice health repository
    fn health(&self) -> &dyn HealthRepository;

    /// Get billing ledger
    fn billing(&self) -> &dyn BillingRepository;
}
