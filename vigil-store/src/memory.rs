//! In-memory store implementation
//!
//! Used for testing and development without a database.
//! Thread-safe using RwLock for concurrent access.

use crate::error::StoreError;
use crate::repository::{
    BillingRepository, CommissionRepository, HealthRepository, PendingOrderRepository,
    PositionRepository, RecordOutcome, Store,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::RwLock;
use vigil_domain::{
    CommissionRecord, MicroserviceHealth, Payment, PendingOrder, PendingOrderId, Position,
    PositionId, PositionStatus, UserId, UserPlan,
};

/// In-memory store for testing
pub struct MemoryStore {
    positions: RwLock<HashMap<PositionId, Position>>,
    commissions: RwLock<HashMap<PositionId, CommissionRecord>>,
    pending_orders: RwLock<HashMap<PendingOrderId, PendingOrder>>,
    health: RwLock<HashMap<String, MicroserviceHealth>>,
    payments: RwLock<Vec<Payment>>,
    plans: RwLock<HashMap<UserId, UserPlan>>,
    /// Number of upcoming writes that fail with a database error
    failing_writes: AtomicU32,
    /// Billing ledger lookups fail while set
    billing_unavailable: AtomicBool,
}

impl MemoryStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self {
            positions: RwLock::new(HashMap::new()),
            commissions: RwLock::new(HashMap::new()),
            pending_orders: RwLock::new(HashMap::new()),
            health: RwLock::new(HashMap::new()),
            payments: RwLock::new(Vec::new()),
            plans: RwLock::new(HashMap::new()),
            failing_writes: AtomicU32::new(0),
            billing_unavailable: AtomicBool::new(false),
        }
    }

    /// Get the number of positions
    pub fn position_count(&self) -> usize {
        self.positions.read().unwrap().len()
    }

    /// Get the number of commission records
    pub fn commission_count(&self) -> usize {
        self.commissions.read().unwrap().len()
    }

    /// Get the number of queued orders (any status)
    pub fn pending_order_count(&self) -> usize {
        self.pending_orders.read().unwrap().len()
    }

    /// Seed the billing ledger with a payment
    pub fn add_payment(&self, payment: Payment) {
        self.payments.write().unwrap().push(payment);
    }

    /// Seed the billing ledger with a user plan
    pub fn set_plan(&self, user_id: UserId, plan: UserPlan) {
        self.plans.write().unwrap().insert(user_id, plan);
    }

    /// Make the next `count` writes fail (for retry tests)
    pub fn fail_next_writes(&self, count: u32) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    /// Toggle billing ledger availability
    pub fn set_billing_unavailable(&self, unavailable: bool) {
        self.billing_unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Clear all data (useful for test setup)
    pub fn clear(&self) {
        self.positions.write().unwrap().clear();
        self.commissions.write().unwrap().clear();
        self.pending_orders.write().unwrap().clear();
        self.health.write().unwrap().clear();
        self.payments.write().unwrap().clear();
        self.plans.write().unwrap().clear();
        self.failing_writes.store(0, Ordering::SeqCst);
        self.billing_unavailable.store(false, Ordering::SeqCst);
    }

    fn check_write(&self) -> Result<(), StoreError> {
        let injected = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match injected {
            Ok(_) => Err(StoreError::Database("injected write failure".to_string())),
            Err(_) => Ok(()),
        }
    }

    fn check_billing(&self) -> Result<(), StoreError> {
        if self.billing_unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Connection("billing ledger unavailable".to_string()));
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Position Repository Implementation
// =============================================================================

#[async_trait]
impl PositionRepository for MemoryStore {
    async fn save(&self, position: &Position) -> Result<(), StoreError> {
        self.check_write()?;
        let mut positions = self.positions.write().unwrap();
        if let Some(stored) = positions.get(&position.id) {
            if stored.is_closed() {
                return Err(StoreError::AlreadyClosed {
                    id: position.id.to_string(),
                });
            }
            if stored.status == PositionStatus::Open && position.status == PositionStatus::Pending {
                return Err(StoreError::InvalidState {
                    message: format!("position {} cannot go back from OPEN to PENDING", position.id),
                });
            }
        }
        positions.insert(position.id, position.clone());
        Ok(())
    }

    async fn insert_within_cap(&self, position: &Position, max_active: usize) -> Result<(), StoreError> {
        self.check_write()?;
        let mut positions = self.positions.write().unwrap();

        if positions.contains_key(&position.id) {
            return Err(StoreError::duplicate("position", position.id.to_string()));
        }

        let active = positions
            .values()
            .filter(|p| p.user_id == position.user_id && p.is_active())
            .count();
        if active >= max_active {
            return Err(StoreError::CapReached {
                user_id: position.user_id.to_string(),
                limit: max_active,
            });
        }

        positions.insert(position.id, position.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: PositionId) -> Result<Option<Position>, StoreError> {
        let positions = self.positions.read().unwrap();
        Ok(positions.get(&id).cloned())
    }

    async fn find_by_ids(&self, ids: &[PositionId]) -> Result<Vec<Position>, StoreError> {
        let positions = self.positions.read().unwrap();
        Ok(ids.iter().filter_map(|id| positions.get(id).cloned()).collect())
    }

    async fn find_by_user(&self, user_id: UserId) -> Result<Vec<Position>, StoreError> {
        let positions = self.positions.read().unwrap();
        Ok(positions.values().filter(|p| p.user_id == user_id).cloned().collect())
    }

    async fn find_active(&self) -> Result<Vec<Position>, StoreError> {
        let positions = self.positions.read().unwrap();
        Ok(positions.values().filter(|p| p.is_active()).cloned().collect())
    }

    async fn find_incomplete_closures(&self) -> Result<Vec<Position>, StoreError> {
        let positions = self.positions.read().unwrap();
        let mut found: Vec<Position> = positions
            .values()
            .filter(|p| p.is_closed() && !p.is_pipeline_complete())
            .cloned()
            .collect();
        found.sort_by_key(|p| p.closed_at);
        Ok(found)
    }

    async fn find_closed_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Position>, StoreError> {
        let positions = self.positions.read().unwrap();
        Ok(positions
            .values()
            .filter(|p| p.closed_at.map(|at| at >= from && at < to).unwrap_or(false))
            .cloned()
            .collect())
    }

    async fn mark_downstream_notified(&self, id: PositionId) -> Result<(), StoreError> {
        self.check_write()?;
        let mut positions = self.positions.write().unwrap();
        let position = positions
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("position", id.to_string()))?;
        if !position.downstream_notified {
            position.downstream_notified = true;
            position.updated_at = Utc::now();
        }
        Ok(())
    }
}

// =============================================================================
// Commission Repository Implementation
// =============================================================================

#[async_trait]
impl CommissionRepository for MemoryStore {
    async fn record_commission(&self, record: &CommissionRecord) -> Result<RecordOutcome, StoreError> {
        self.check_write()?;
        // Lock order: positions, then commissions
        let mut positions = self.positions.write().unwrap();
        let mut commissions = self.commissions.write().unwrap();

        let position = positions
            .get_mut(&record.operation_id)
            .ok_or_else(|| StoreError::not_found("position", record.operation_id.to_string()))?;

        if position.commission_calculated || commissions.contains_key(&record.operation_id) {
            position.commission_calculated = true;
            return Ok(RecordOutcome::AlreadyRecorded);
        }

        commissions.insert(record.operation_id, record.clone());
        position.commission_calculated = true;
        position.updated_at = Utc::now();
        Ok(RecordOutcome::Recorded)
    }

    async fn find_by_operation(&self, operation_id: PositionId) -> Result<Option<CommissionRecord>, StoreError> {
        let commissions = self.commissions.read().unwrap();
        Ok(commissions.get(&operation_id).cloned())
    }

    async fn find_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<CommissionRecord>, StoreError> {
        let commissions = self.commissions.read().unwrap();
        Ok(commissions
            .values()
            .filter(|c| c.created_at >= from && c.created_at < to)
            .cloned()
            .collect())
    }
}

// =============================================================================
// Pending Order Repository Implementation
// =============================================================================

#[async_trait]
impl PendingOrderRepository for MemoryStore {
    async fn save(&self, order: &PendingOrder) -> Result<(), StoreError> {
        self.check_write()?;
        let mut orders = self.pending_orders.write().unwrap();
        orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: PendingOrderId) -> Result<Option<PendingOrder>, StoreError> {
        let orders = self.pending_orders.read().unwrap();
        Ok(orders.get(&id).cloned())
    }

    async fn find_pending(&self) -> Result<Vec<PendingOrder>, StoreError> {
        let orders = self.pending_orders.read().unwrap();
        let mut pending: Vec<PendingOrder> = orders.values().filter(|o| o.is_pending()).cloned().collect();
        pending.sort_by_key(|o| o.created_at);
        Ok(pending)
    }

    async fn count_pending(&self) -> Result<usize, StoreError> {
        let orders = self.pending_orders.read().unwrap();
        Ok(orders.values().filter(|o| o.is_pending()).count())
    }
}

// =============================================================================
// Health Repository Implementation
// =============================================================================

#[async_trait]
impl HealthRepository for MemoryStore {
    async fn save(&self, health: &MicroserviceHealth) -> Result<(), StoreError> {
        self.check_write()?;
        let mut registry = self.health.write().unwrap();
        registry.insert(health.name.clone(), health.clone());
        Ok(())
    }

    async fn find_all(&self) -> Result<Vec<MicroserviceHealth>, StoreError> {
        let registry = self.health.read().unwrap();
        let mut all: Vec<MicroserviceHealth> = registry.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(all)
    }
}

// =============================================================================
// Billing Repository Implementation
// =============================================================================

#[async_trait]
impl BillingRepository for MemoryStore {
    async fn find_payments(&self, user_id: UserId) -> Result<Vec<Payment>, StoreError> {
        self.check_billing()?;
        let payments = self.payments.read().unwrap();
        Ok(payments.iter().filter(|p| p.user_id == user_id).cloned().collect())
    }

    async fn find_plan(&self, user_id: UserId) -> Result<Option<UserPlan>, StoreError> {
        self.check_billing()?;
        let plans = self.plans.read().unwrap();
        Ok(plans.get(&user_id).copied())
    }
}

// =============================================================================
// Store Implementation
// =============================================================================

impl Store for MemoryStore {
    fn positions(&self) -> &dyn PositionRepository {
        self
    }

    fn commissions(&self) -> &dyn CommissionRepository {
        self
    }

    fn pending_orders(&self) -> &dyn PendingOrderRepository {
        self
    }

    fn health(&self) -> &dyn HealthRepository {
        self
    }

    fn billing(&self) -> &dyn BillingRepository {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use uuid::Uuid;
    use vigil_domain::{
        CloseReason, CommissionType, HealthStatus, Leverage, OrderAction, OrderPayload, Pnl,
        Price, Quantity, Side, Symbol, Thresholds,
    };

    fn create_test_position(user_id: UserId) -> Position {
        Position::new(
            user_id,
            Symbol::from_pair("BTCUSDT").unwrap(),
            Side::Long,
            Price::new(dec!(60000)).unwrap(),
            Quantity::new(dec!(1000)).unwrap(),
            Leverage::new(5).unwrap(),
            Thresholds::new(dec!(15), dec!(10)).unwrap(),
        )
    }

    fn close(position: &mut Position, pnl_usd: rust_decimal::Decimal) {
        position
            .close(
                Price::new(dec!(66000)).unwrap(),
                Pnl { usd: pnl_usd, percent: dec!(50) },
                CloseReason::ManualSignal,
            )
            .unwrap();
    }

    fn create_test_order() -> PendingOrder {
        let payload = OrderPayload::new(
            OrderAction::CreditAffiliate {
                operation_id: Uuid::now_v7(),
                user_id: Uuid::now_v7(),
                commission_amount: dec!(10),
            },
            "vigil-test",
        );
        PendingOrder::new("payments", payload, None)
    }

    // Position Repository Tests
    #[tokio::test]
    async fn test_position_save_and_find() {
        let store = MemoryStore::new();
        let position = create_test_position(Uuid::now_v7());
        let id = position.id;

        PositionRepository::save(&store, &position).await.unwrap();

        let found = PositionRepository::find_by_id(&store, id).await.unwrap();
        assert_eq!(found.unwrap().id, id);
    }

    #[tokio::test]
    async fn test_find_active_excludes_closed() {
        let store = MemoryStore::new();
        let user = Uuid::now_v7();

        let open = create_test_position(user);
        let mut closed = create_test_position(user);
        close(&mut closed, dec!(10));

        PositionRepository::save(&store, &open).await.unwrap();
        PositionRepository::save(&store, &closed).await.unwrap();

        let active = PositionRepository::find_active(&store).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, open.id);

        let by_user = PositionRepository::find_by_user(&store, user).await.unwrap();
        assert_eq!(by_user.len(), 2);
    }

    #[tokio::test]
    async fn test_insert_within_cap() {
        let store = MemoryStore::new();
        let user = Uuid::now_v7();

        store.insert_within_cap(&create_test_position(user), 2).await.unwrap();
        store.insert_within_cap(&create_test_position(user), 2).await.unwrap();

        let third = store.insert_within_cap(&create_test_position(user), 2).await;
        assert!(matches!(third, Err(StoreError::CapReached { limit: 2, .. })));

        // Other users are unaffected
        store.insert_within_cap(&create_test_position(Uuid::now_v7()), 2).await.unwrap();
        assert_eq!(store.position_count(), 3);
    }

    #[tokio::test]
    async fn test_cap_frees_up_after_close() {
        let store = MemoryStore::new();
        let user = Uuid::now_v7();

        let mut first = create_test_position(user);
        store.insert_within_cap(&first, 1).await.unwrap();
        assert!(store.insert_within_cap(&create_test_position(user), 1).await.is_err());

        close(&mut first, dec!(-5));
        PositionRepository::save(&store, &first).await.unwrap();
        store.insert_within_cap(&create_test_position(user), 1).await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_row_is_frozen() {
        let store = MemoryStore::new();
        let mut position = create_test_position(Uuid::now_v7());
        close(&mut position, dec!(500));
        PositionRepository::save(&store, &position).await.unwrap();

        let result = PositionRepository::save(&store, &position).await;
        assert!(matches!(result, Err(StoreError::AlreadyClosed { .. })));
    }

    #[tokio::test]
    async fn test_open_row_never_regresses_to_pending() {
        let store = MemoryStore::new();
        let pending = create_test_position(Uuid::now_v7());
        PositionRepository::save(&store, &pending).await.unwrap();

        let mut open = pending.clone();
        open.open().unwrap();
        PositionRepository::save(&store, &open).await.unwrap();

        let result = PositionRepository::save(&store, &pending).await;
        assert!(matches!(result, Err(StoreError::InvalidState { .. })));

        let stored = PositionRepository::find_by_id(&store, pending.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PositionStatus::Open);
    }

    #[tokio::test]
    async fn test_record_commission_once() {
        let store = MemoryStore::new();
        let mut position = create_test_position(Uuid::now_v7());
        close(&mut position, dec!(500));
        PositionRepository::save(&store, &position).await.unwrap();

        let record = CommissionRecord::new(
            position.id,
            position.user_id,
            dec!(50),
            CommissionType::Referent,
            UserPlan::Subscription,
            dec!(10),
        );

        assert_eq!(store.record_commission(&record).await.unwrap(), RecordOutcome::Recorded);
        assert_eq!(
            store.record_commission(&record).await.unwrap(),
            RecordOutcome::AlreadyRecorded
        );
        assert_eq!(store.commission_count(), 1);

        let stored = PositionRepository::find_by_id(&store, position.id).await.unwrap().unwrap();
        assert!(stored.commission_calculated);
    }

    #[tokio::test]
    async fn test_record_commission_unknown_operation() {
        let store = MemoryStore::new();
        let record = CommissionRecord::new(
            Uuid::now_v7(),
            Uuid::now_v7(),
            dec!(1),
            CommissionType::Real,
            UserPlan::Prepaid,
            dec!(20),
        );
        assert!(matches!(
            store.record_commission(&record).await,
            Err(StoreError::NotFound { .. })
        ));
        assert_eq!(store.commission_count(), 0);
    }

    #[tokio::test]
    async fn test_incomplete_closures() {
        let store = MemoryStore::new();

        let mut profitable = create_test_position(Uuid::now_v7());
        close(&mut profitable, dec!(500));
        let mut done = create_test_position(Uuid::now_v7());
        close(&mut done, dec!(-20));
        done.downstream_notified = true;

        PositionRepository::save(&store, &profitable).await.unwrap();
        PositionRepository::save(&store, &done).await.unwrap();
        PositionRepository::save(&store, &create_test_position(Uuid::now_v7())).await.unwrap();

        let incomplete = store.find_incomplete_closures().await.unwrap();
        assert_eq!(incomplete.len(), 1);
        assert_eq!(incomplete[0].id, profitable.id);

        store.mark_downstream_notified(profitable.id).await.unwrap();
        assert_eq!(store.find_incomplete_closures().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_injected_write_failures() {
        let store = MemoryStore::new();
        store.fail_next_writes(2);

        let position = create_test_position(Uuid::now_v7());
        assert!(PositionRepository::save(&store, &position).await.is_err());
        assert!(PositionRepository::save(&store, &position).await.is_err());
        assert!(PositionRepository::save(&store, &position).await.is_ok());
    }

    // Pending Order Repository Tests
    #[tokio::test]
    async fn test_pending_order_lifecycle() {
        let store = MemoryStore::new();
        let mut order = create_test_order();

        PendingOrderRepository::save(&store, &order).await.unwrap();
        assert_eq!(store.count_pending().await.unwrap(), 1);

        order.mark_sent();
        PendingOrderRepository::save(&store, &order).await.unwrap();
        assert_eq!(store.count_pending().await.unwrap(), 0);
        assert!(store.find_pending().await.unwrap().is_empty());
        assert_eq!(store.pending_order_count(), 1);
    }

    // Health / Billing Tests
    #[tokio::test]
    async fn test_health_upsert_by_name() {
        let store = MemoryStore::new();
        HealthRepository::save(
            &store,
            &MicroserviceHealth::new("commission", "http://commission", HealthStatus::Offline),
        )
        .await
        .unwrap();
        HealthRepository::save(
            &store,
            &MicroserviceHealth::new("commission", "http://commission", HealthStatus::Online),
        )
        .await
        .unwrap();

        let all = store.find_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].is_online());
    }

    #[tokio::test]
    async fn test_billing_unavailable() {
        let store = MemoryStore::new();
        let user = Uuid::now_v7();
        store.set_plan(user, UserPlan::Prepaid);

        assert_eq!(store.find_plan(user).await.unwrap(), Some(UserPlan::Prepaid));

        store.set_billing_unavailable(true);
        assert!(store.find_plan(user).await.is_err());
        assert!(store.find_payments(user).await.is_err());
    }
}
