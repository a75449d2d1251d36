//! PostgreSQL store.
//!
//! Implements every repository port over a shared `PgPool`.
//!
//! This module uses dynamic queries (sqlx::query) instead of compile-time
//! checked macros (sqlx::query!) to allow compilation without DATABASE_URL.

use crate::error::StoreError;
use crate::repository::{
    BillingRepository, CommissionRepository, HealthRepository, PendingOrderRepository,
    PositionRepository, RecordOutcome, Store,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use vigil_domain::{
    CommissionRecord, Leverage, MicroserviceHealth, OrderPayload, Payment, PendingOrder,
    PendingOrderId, Position, PositionId, Price, Quantity, Symbol, UserId, UserPlan,
};

const POSITION_COLUMNS: &str = r#"
    id, user_id, symbol, side, status,
    entry_price, quantity, leverage, take_profit_percent, stop_loss_percent,
    current_price, pnl_usd, pnl_percent, exit_price, close_reason,
    commission_calculated, downstream_notified, fear_greed_index,
    opened_at, closed_at, created_at, updated_at
"#;

/// PostgreSQL-backed store
pub struct PgStore {
    /// PostgreSQL connection pool
    pool: Arc<PgPool>,
}

impl PgStore {
    /// Create a new PostgreSQL store.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Get a reference to the underlying pool (for testing).
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// =============================================================================
// Row mapping
// =============================================================================

fn parse_position_row(row: &PgRow) -> Result<Position, StoreError> {
    let symbol: String = row.try_get("symbol")?;
    let side: String = row.try_get("side")?;
    let status: String = row.try_get("status")?;
    let leverage: i32 = row.try_get("leverage")?;
    let close_reason: Option<String> = row.try_get("close_reason")?;
    let fear_greed_index: Option<i16> = row.try_get("fear_greed_index")?;
    let current_price: Option<rust_decimal::Decimal> = row.try_get("current_price")?;
    let exit_price: Option<rust_decimal::Decimal> = row.try_get("exit_price")?;

    let leverage = u32::try_from(leverage)
        .map_err(|_| StoreError::Deserialization(format!("negative leverage {}", leverage)))?;

    Ok(Position {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        symbol: Symbol::from_pair(&symbol)?,
        side: side.parse()?,
        status: status.parse()?,
        entry_price: Price::new(row.try_get("entry_price")?)?,
        quantity: Quantity::new(row.try_get("quantity")?)?,
        leverage: Leverage::new(leverage)?,
        take_profit_percent: row.try_get("take_profit_percent")?,
        stop_loss_percent: row.try_get("stop_loss_percent")?,
        current_price: current_price.map(Price::new).transpose()?,
        pnl_usd: row.try_get("pnl_usd")?,
        pnl_percent: row.try_get("pnl_percent")?,
        exit_price: exit_price.map(Price::new).transpose()?,
        close_reason: close_reason.map(|r| r.parse()).transpose()?,
        commission_calculated: row.try_get("commission_calculated")?,
        downstream_notified: row.try_get("downstream_notified")?,
        fear_greed_index: fear_greed_index.and_then(|v| u8::try_from(v).ok()),
        opened_at: row.try_get("opened_at")?,
        closed_at: row.try_get("closed_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn parse_positions(rows: &[PgRow]) -> Result<Vec<Position>, StoreError> {
    rows.iter().map(parse_position_row).collect()
}

fn parse_commission_row(row: &PgRow) -> Result<CommissionRecord, StoreError> {
    let commission_type: String = row.try_get("commission_type")?;
    let plan: String = row.try_get("plan")?;

    Ok(CommissionRecord {
        operation_id: row.try_get("operation_id")?,
        user_id: row.try_get("user_id")?,
        amount: row.try_get("amount")?,
        commission_type: commission_type.parse()?,
        counts_for_affiliate: row.try_get("counts_for_affiliate")?,
        counts_for_refund: row.try_get("counts_for_refund")?,
        plan: plan.parse()?,
        plan_percent: row.try_get("plan_percent")?,
        created_at: row.try_get("created_at")?,
    })
}

fn parse_pending_order_row(row: &PgRow) -> Result<PendingOrder, StoreError> {
    let status: String = row.try_get("status")?;
    let payload: serde_json::Value = row.try_get("payload")?;
    let attempts: i32 = row.try_get("attempts")?;

    Ok(PendingOrder {
        id: row.try_get("id")?,
        microservice_name: row.try_get("microservice_name")?,
        payload: serde_json::from_value::<OrderPayload>(payload)
            .map_err(|e| StoreError::Deserialization(e.to_string()))?,
        status: status.parse()?,
        attempts: u32::try_from(attempts).unwrap_or(0),
        last_attempt_at: row.try_get("last_attempt_at")?,
        last_error: row.try_get("last_error")?,
        created_at: row.try_get("created_at")?,
    })
}

fn parse_health_row(row: &PgRow) -> Result<MicroserviceHealth, StoreError> {
    let status: String = row.try_get("status")?;
    Ok(MicroserviceHealth {
        name: row.try_get("name")?,
        status: status.parse()?,
        endpoint: row.try_get("endpoint")?,
        last_check: row.try_get("last_check")?,
    })
}

fn parse_payment_row(row: &PgRow) -> Result<Payment, StoreError> {
    let kind: String = row.try_get("kind")?;
    let status: String = row.try_get("status")?;
    Ok(Payment {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        kind: kind.parse()?,
        status: status.parse()?,
        amount: row.try_get("amount")?,
        completed_at: row.try_get("completed_at")?,
    })
}

/// Bind every column of a position, in `POSITION_COLUMNS` order
fn bind_position<'q>(
    query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    position: &'q Position,
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    query
        .bind(position.id)
        .bind(position.user_id)
        .bind(position.symbol.as_pair())
        .bind(position.side.as_str())
        .bind(position.status.as_str())
        .bind(position.entry_price.as_decimal())
        .bind(position.quantity.as_decimal())
        .bind(position.leverage.value() as i32)
        .bind(position.take_profit_percent)
        .bind(position.stop_loss_percent)
        .bind(position.current_price.map(|p| p.as_decimal()))
        .bind(position.pnl_usd)
        .bind(position.pnl_percent)
        .bind(position.exit_price.map(|p| p.as_decimal()))
        .bind(position.close_reason.map(|r| r.as_str()))
        .bind(position.commission_calculated)
        .bind(position.downstream_notified)
        .bind(position.fear_greed_index.map(i16::from))
        .bind(position.opened_at)
        .bind(position.closed_at)
        .bind(position.created_at)
        .bind(position.updated_at)
}

const INSERT_POSITION: &str = r#"
    INSERT INTO positions (
        id, user_id, symbol, side, status,
        entry_price, quantity, leverage, take_profit_percent, stop_loss_percent,
        current_price, pnl_usd, pnl_percent, exit_price, close_reason,
        commission_calculated, downstream_notified, fear_greed_index,
        opened_at, closed_at, created_at, updated_at
    ) VALUES (
        $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11,
        $12, $13, $14, $15, $16, $17, $18, $19, $20, $21, $22
    )
"#;

// =============================================================================
// Position Repository
// =============================================================================

#[async_trait]
impl PositionRepository for PgStore {
    async fn save(&self, position: &Position) -> Result<(), StoreError> {
        // Closed rows are frozen; bookkeeping flags only move forward
        let sql = format!(
            r#"{INSERT_POSITION}
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                current_price = EXCLUDED.current_price,
                pnl_usd = EXCLUDED.pnl_usd,
                pnl_percent = EXCLUDED.pnl_percent,
                exit_price = EXCLUDED.exit_price,
                close_reason = EXCLUDED.close_reason,
                commission_calculated = positions.commission_calculated OR EXCLUDED.commission_calculated,
                downstream_notified = positions.downstream_notified OR EXCLUDED.downstream_notified,
                fear_greed_index = EXCLUDED.fear_greed_index,
                opened_at = EXCLUDED.opened_at,
                closed_at = EXCLUDED.closed_at,
                updated_at = EXCLUDED.updated_at
            WHERE positions.status <> 'CLOSED'
              AND NOT (positions.status = 'OPEN' AND EXCLUDED.status = 'PENDING')
            "#
        );

        let result = bind_position(sqlx::query(&sql), position).execute(&*self.pool).await?;
        if result.rows_affected() > 0 {
            return Ok(());
        }

        let stored: Option<String> = sqlx::query_scalar("SELECT status FROM positions WHERE id = $1")
            .bind(position.id)
            .fetch_optional(&*self.pool)
            .await?;
        match stored.as_deref() {
            Some("CLOSED") => Err(StoreError::AlreadyClosed {
                id: position.id.to_string(),
            }),
            _ => Err(StoreError::InvalidState {
                message: format!("position {} cannot go back from OPEN to PENDING", position.id),
            }),
        }
    }

    async fn insert_within_cap(&self, position: &Position, max_active: usize) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        // Serialize admissions per user for the duration of the transaction
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1::text))")
            .bind(position.user_id.to_string())
            .execute(&mut *tx)
            .await?;

        let active: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM positions WHERE user_id = $1 AND status IN ('PENDING', 'OPEN')",
        )
        .bind(position.user_id)
        .fetch_one(&mut *tx)
        .await?;

        if active >= max_active as i64 {
            tx.rollback().await?;
            return Err(StoreError::CapReached {
                user_id: position.user_id.to_string(),
                limit: max_active,
            });
        }

        bind_position(sqlx::query(INSERT_POSITION), position)
            .execute(&mut *tx)
            .await
            .map_err(|e| match StoreError::from(e) {
                StoreError::Duplicate { .. } => StoreError::duplicate("position", position.id.to_string()),
                other => other,
            })?;

        tx.commit().await?;
        Ok(())
    }

    async fn find_by_id(&self, id: PositionId) -> Result<Option<Position>, StoreError> {
        let sql = format!("SELECT {POSITION_COLUMNS} FROM positions WHERE id = $1");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&*self.pool).await?;
        row.as_ref().map(parse_position_row).transpose()
    }

    async fn find_by_ids(&self, ids: &[PositionId]) -> Result<Vec<Position>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!("SELECT {POSITION_COLUMNS} FROM positions WHERE id = ANY($1)");
        let rows = sqlx::query(&sql).bind(ids).fetch_all(&*self.pool).await?;
        parse_positions(&rows)
    }

    async fn find_by_user(&self, user_id: UserId) -> Result<Vec<Position>, StoreError> {
        let sql = format!(
            "SELECT {POSITION_COLUMNS} FROM positions WHERE user_id = $1 ORDER BY created_at"
        );
        let rows = sqlx::query(&sql).bind(user_id).fetch_all(&*self.pool).await?;
        parse_positions(&rows)
    }

    async fn find_active(&self) -> Result<Vec<Position>, StoreError> {
        let sql = format!(
            "SELECT {POSITION_COLUMNS} FROM positions WHERE status IN ('PENDING', 'OPEN') ORDER BY created_at"
        );
        let rows = sqlx::query(&sql).fetch_all(&*self.pool).await?;
        parse_positions(&rows)
    }

    async fn find_incomplete_closures(&self) -> Result<Vec<Position>, StoreError> {
        let sql = format!(
            r#"SELECT {POSITION_COLUMNS} FROM positions
            WHERE status = 'CLOSED'
              AND (NOT downstream_notified OR (pnl_usd > 0 AND NOT commission_calculated))
            ORDER BY closed_at"#
        );
        let rows = sqlx::query(&sql).fetch_all(&*self.pool).await?;
        parse_positions(&rows)
    }

    async fn find_closed_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Position>, StoreError> {
        let sql = format!(
            r#"SELECT {POSITION_COLUMNS} FROM positions
            WHERE status = 'CLOSED' AND closed_at >= $1 AND closed_at < $2
            ORDER BY closed_at"#
        );
        let rows = sqlx::query(&sql).bind(from).bind(to).fetch_all(&*self.pool).await?;
        parse_positions(&rows)
    }

    async fn mark_downstream_notified(&self, id: PositionId) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE positions SET downstream_notified = TRUE, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&*self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("position", id.to_string()));
        }
        Ok(())
    }
}

// =============================================================================
// Commission Repository
// =============================================================================

#[async_trait]
impl CommissionRepository for PgStore {
    async fn record_commission(&self, record: &CommissionRecord) -> Result<RecordOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        let flag: Option<bool> =
            sqlx::query_scalar("SELECT commission_calculated FROM positions WHERE id = $1 FOR UPDATE")
                .bind(record.operation_id)
                .fetch_optional(&mut *tx)
                .await?;

        match flag {
            None => {
                tx.rollback().await?;
                return Err(StoreError::not_found("position", record.operation_id.to_string()));
            },
            Some(true) => {
                tx.commit().await?;
                return Ok(RecordOutcome::AlreadyRecorded);
            },
            Some(false) => {},
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO commission_calculations (
                operation_id, user_id, amount, commission_type,
                counts_for_affiliate, counts_for_refund, plan, plan_percent, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (operation_id) DO NOTHING
            "#,
        )
        .bind(record.operation_id)
        .bind(record.user_id)
        .bind(record.amount)
        .bind(record.commission_type.as_str())
        .bind(record.counts_for_affiliate)
        .bind(record.counts_for_refund)
        .bind(record.plan.as_str())
        .bind(record.plan_percent)
        .bind(record.created_at)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        sqlx::query("UPDATE positions SET commission_calculated = TRUE, updated_at = NOW() WHERE id = $1")
            .bind(record.operation_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        if inserted == 0 {
            Ok(RecordOutcome::AlreadyRecorded)
        } else {
            Ok(RecordOutcome::Recorded)
        }
    }

    async fn find_by_operation(&self, operation_id: PositionId) -> Result<Option<CommissionRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM commission_calculations WHERE operation_id = $1")
            .bind(operation_id)
            .fetch_optional(&*self.pool)
            .await?;
        row.as_ref().map(parse_commission_row).transpose()
    }

    async fn find_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<CommissionRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM commission_calculations
            WHERE created_at >= $1 AND created_at < $2
            ORDER BY created_at
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_all(&*self.pool)
        .await?;
        rows.iter().map(parse_commission_row).collect()
    }
}

// =============================================================================
// Pending Order Repository
// =============================================================================

#[async_trait]
impl PendingOrderRepository for PgStore {
    async fn save(&self, order: &PendingOrder) -> Result<(), StoreError> {
        let payload = serde_json::to_value(&order.payload)?;

        sqlx::query(
            r#"
            INSERT INTO pending_orders (
                id, microservice_name, payload, status, attempts,
                last_attempt_at, last_error, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                attempts = EXCLUDED.attempts,
                last_attempt_at = EXCLUDED.last_attempt_at,
                last_error = EXCLUDED.last_error
            "#,
        )
        .bind(order.id)
        .bind(&order.microservice_name)
        .bind(payload)
        .bind(order.status.as_str())
        .bind(order.attempts as i32)
        .bind(order.last_attempt_at)
        .bind(&order.last_error)
        .bind(order.created_at)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(&self, id: PendingOrderId) -> Result<Option<PendingOrder>, StoreError> {
        let row = sqlx::query("SELECT * FROM pending_orders WHERE id = $1")
            .bind(id)
            .fetch_optional(&*self.pool)
            .await?;
        row.as_ref().map(parse_pending_order_row).transpose()
    }

    async fn find_pending(&self) -> Result<Vec<PendingOrder>, StoreError> {
        let rows = sqlx::query("SELECT * FROM pending_orders WHERE status = 'PENDING' ORDER BY created_at")
            .fetch_all(&*self.pool)
            .await?;
        rows.iter().map(parse_pending_order_row).collect()
    }

    async fn count_pending(&self) -> Result<usize, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pending_orders WHERE status = 'PENDING'")
            .fetch_one(&*self.pool)
            .await?;
        Ok(count.max(0) as usize)
    }
}

// =============================================================================
// Health Repository
// =============================================================================

#[async_trait]
impl HealthRepository for PgStore {
    async fn save(&self, health: &MicroserviceHealth) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO microservice_health (name, status, endpoint, last_check)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (name) DO UPDATE SET
                status = EXCLUDED.status,
                endpoint = EXCLUDED.endpoint,
                last_check = EXCLUDED.last_check
            "#,
        )
        .bind(&health.name)
        .bind(health.status.as_str())
        .bind(&health.endpoint)
        .bind(health.last_check)
        .execute(&*self.pool)
        .await?;
        Ok(())
    }

    async fn find_all(&self) -> Result<Vec<MicroserviceHealth>, StoreError> {
        let rows = sqlx::query("SELECT name, status, endpoint, last_check FROM microservice_health ORDER BY name")
            .fetch_all(&*self.pool)
            .await?;
        rows.iter().map(parse_health_row).collect()
    }
}

// =============================================================================
// Billing Repository
// =============================================================================

#[async_trait]
impl BillingRepository for PgStore {
    async fn find_payments(&self, user_id: UserId) -> Result<Vec<Payment>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, kind, status, amount, completed_at
            FROM payments
            WHERE user_id = $1
            ORDER BY completed_at DESC NULLS LAST
            "#,
        )
        .bind(user_id)
        .fetch_all(&*self.pool)
        .await?;
        rows.iter().map(parse_payment_row).collect()
    }

    async fn find_plan(&self, user_id: UserId) -> Result<Option<UserPlan>, StoreError> {
        let plan: Option<String> = sqlx::query_scalar("SELECT plan FROM user_plans WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&*self.pool)
            .await?;
        Ok(plan.map(|p| p.parse()).transpose()?)
    }
}

impl Store for PgStore {
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

// =============================================================================
// Tests
// =============================================================================
