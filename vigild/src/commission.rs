//! Commission step of the closure pipeline.
//!
//! Classification reads the billing ledger and never fails: any lookup
//! problem resolves to REFERENT. The plan lookup can fail; that leaves the
//! step undone for the commission sweep. Recording is exactly-once per
//! operation, enforced by the repository.

use chrono::Utc;
use tracing::{info, warn};

use vigil_domain::{CommissionRecord, CommissionType, Position, UserId, UserPlan};
use vigil_engine::{classify_payments, compute_commission};
use vigil_store::RecordOutcome;

use crate::context::SupervisorContext;
use crate::error::DaemonResult;
use crate::event_bus::DaemonEvent;
use crate::position_store::with_persistence_retry;

/// Result of the commission step for one position.
#[derive(Debug, Clone, PartialEq)]
pub enum CommissionStep {
    /// Not closed, or no profit to share
    NotApplicable,
    /// Recorded now
    Recorded(CommissionRecord),
    /// Recorded earlier; the existing record, when it could be read back
    AlreadyRecorded(Option<CommissionRecord>),
}

impl CommissionStep {
    pub fn record(&self) -> Option<&CommissionRecord> {
        match self {
            CommissionStep::Recorded(record) => Some(record),
            CommissionStep::AlreadyRecorded(record) => record.as_ref(),
            CommissionStep::NotApplicable => None,
        }
    }
}

/// REAL iff the user has a recent completed real-money payment.
///
/// A ledger failure is logged and classified REFERENT, never REAL.
pub async fn classify(ctx: &SupervisorContext, user_id: UserId) -> CommissionType {
    match ctx.store.billing().find_payments(user_id).await {
        Ok(payments) => classify_payments(&payments, Utc::now(), ctx.config.commission.real_payment_lookback),
        Err(e) => {
            warn!(%user_id, error = %e, "Payment lookup failed, classifying commission as REFERENT");
            CommissionType::Referent
        },
    }
}

/// Billing plan of a user; SUBSCRIPTION when the ledger has none.
pub async fn plan_for(ctx: &SupervisorContext, user_id: UserId) -> DaemonResult<UserPlan> {
    match ctx.store.billing().find_plan(user_id).await? {
        Some(plan) => Ok(plan),
        None => {
            warn!(%user_id, "No billing plan on record, using SUBSCRIPTION");
            Ok(UserPlan::Subscription)
        },
    }
}

/// Compute, classify and record the commission of a closed position.
///
/// The record and `commission_calculated` are written in one repository
/// transaction; a repeat call reports `AlreadyRecorded`.
pub async fn record_commission(ctx: &SupervisorContext, position: &Position) -> DaemonResult<CommissionStep> {
    if !position.is_commissionable() {
        return Ok(CommissionStep::NotApplicable);
    }
    if position.commission_calculated {
        let existing = ctx.store.commissions().find_by_operation(position.id).await?;
        return Ok(CommissionStep::AlreadyRecorded(existing));
    }

    let plan = plan_for(ctx, position.user_id).await?;
    let commission_type = classify(ctx, position.user_id).await;
    let plan_percent = ctx.config.commission.plans.percent_for(plan);
    let amount = compute_commission(position.pnl_usd, plan_percent);

    let record = CommissionRecord::new(
        position.id,
        position.user_id,
        amount,
        commission_type,
        plan,
        plan_percent,
    );

    let commissions = ctx.store.commissions();
    let outcome = with_persistence_retry(&ctx.config.persistence_retry, "record commission", || {
        commissions.record_commission(&record)
    })
    .await?;

    match outcome {
        RecordOutcome::Recorded => {
            info!(
                position_id = %position.id,
                user_id = %position.user_id,
                symbol = %position.symbol,
                commission_type = %commission_type,
                plan = %plan,
                %amount,
                "Commission recorded"
            );
            ctx.metrics.record_commission(commission_type);
            ctx.event_bus.send(DaemonEvent::CommissionRecorded {
                operation_id: position.id,
                user_id: position.user_id,
                commission_type,
                amount,
            });
            Ok(CommissionStep::Recorded(record))
        },
        RecordOutcome::AlreadyRecorded => {
            let existing = commissions.find_by_operation(position.id).await?;
            Ok(CommissionStep::AlreadyRecorded(existing))
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use chrono::Duration;
    use rust_decimal_macros::dec;
    use std::sync::Arc;
    use uuid::Uuid;
    use vigil_domain::{
        CloseReason, Leverage, Payment, PaymentKind, PaymentStatus, Pnl, Price, Quantity, Side, Symbol,
        Thresholds,
    };
    use vigil_exec::{StubDownstream, StubFearGreed, StubPriceOracle};
    use vigil_store::{MemoryStore, Store};

    fn context(memory: Arc<MemoryStore>) -> SupervisorContext {
        SupervisorContext::new(
            Config::test(),
            memory,
            Arc::new(StubPriceOracle::new()),
            Arc::new(StubFearGreed::new(50)),
            Arc::new(StubDownstream::new()),
        )
        .unwrap()
    }

    fn closed_position(pnl_usd: rust_decimal::Decimal) -> Position {
        let mut position = Position::new(
            Uuid::now_v7(),
            Symbol::from_pair("BTCUSDT").unwrap(),
            Side::Long,
            Price::new(dec!(60000)).unwrap(),
            Quantity::new(dec!(1000)).unwrap(),
            Leverage::new(1).unwrap(),
            Thresholds::new(dec!(15), dec!(10)).unwrap(),
        );
        position
            .close(
                Price::new(dec!(66000)).unwrap(),
                Pnl {
                    usd: pnl_usd,
                    percent: dec!(10),
                },
                CloseReason::ManualSignal,
            )
            .unwrap();
        position
    }

    fn card_payment(user_id: UserId, days_ago: i64) -> Payment {
        Payment {
            id: Uuid::now_v7(),
            user_id,
            kind: PaymentKind::Card,
            status: PaymentStatus::Completed,
            amount: dec!(99),
            completed_at: Some(Utc::now() - Duration::days(days_ago)),
        }
    }

    #[tokio::test]
    async fn test_classify_real_with_recent_payment() {
        let memory = Arc::new(MemoryStore::new());
        let user = Uuid::now_v7();
        memory.add_payment(card_payment(user, 3));
        let ctx = context(memory);

        assert_eq!(classify(&ctx, user).await, CommissionType::Real);
        assert_eq!(classify(&ctx, Uuid::now_v7()).await, CommissionType::Referent);
    }

    #[tokio::test]
    async fn test_classify_old_payment_is_referent() {
        let memory = Arc::new(MemoryStore::new());
        let user = Uuid::now_v7();
        memory.add_payment(card_payment(user, 45));
        let ctx = context(memory);

        assert_eq!(classify(&ctx, user).await, CommissionType::Referent);
    }

    #[tokio::test]
    async fn test_classify_lookup_error_is_referent() {
        let memory = Arc::new(MemoryStore::new());
        let user = Uuid::now_v7();
        memory.add_payment(card_payment(user, 1));
        memory.set_billing_unavailable(true);
        let ctx = context(memory);

        assert_eq!(classify(&ctx, user).await, CommissionType::Referent);
    }

    #[tokio::test]
    async fn test_record_commission_once() {
        let memory = Arc::new(MemoryStore::new());
        let ctx = context(memory.clone());
        let position = closed_position(dec!(500));
        memory.positions().save(&position).await.unwrap();
        memory.set_plan(position.user_id, UserPlan::Prepaid);

        let first = record_commission(&ctx, &position).await.unwrap();
        let record = match first {
            CommissionStep::Recorded(record) => record,
            other => panic!("Expected Recorded, got {:?}", other),
        };
        assert_eq!(record.amount, dec!(100));
        assert_eq!(record.plan_percent, dec!(20));
        assert_eq!(record.commission_type, CommissionType::Referent);
        assert!(!record.counts_for_affiliate);

        // Same in-memory copy (flag still false) hits the repository guard
        let second = record_commission(&ctx, &position).await.unwrap();
        assert!(matches!(second, CommissionStep::AlreadyRecorded(Some(_))));
        assert_eq!(memory.commission_count(), 1);

        let stored = memory.positions().find_by_id(position.id).await.unwrap().unwrap();
        assert!(stored.commission_calculated);
    }

    #[tokio::test]
    async fn test_losing_position_not_applicable() {
        let memory = Arc::new(MemoryStore::new());
        let ctx = context(memory.clone());
        let position = closed_position(dec!(-200));
        memory.positions().save(&position).await.unwrap();

        let step = record_commission(&ctx, &position).await.unwrap();
        assert_eq!(step, CommissionStep::NotApplicable);
        assert_eq!(memory.commission_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_plan_defaults_to_subscription() {
        let memory = Arc::new(MemoryStore::new());
        let ctx = context(memory.clone());
        let position = closed_position(dec!(500));
        memory.positions().save(&position).await.unwrap();

        let step = record_commission(&ctx, &position).await.unwrap();
        let record = step.record().unwrap();
        assert_eq!(record.plan, UserPlan::Subscription);
        assert_eq!(record.amount, dec!(50));
    }

    #[tokio::test]
    async fn test_plan_lookup_failure_leaves_step_undone() {
        let memory = Arc::new(MemoryStore::new());
        let ctx = context(memory.clone());
        let position = closed_position(dec!(500));
        memory.positions().save(&position).await.unwrap();
        memory.set_billing_unavailable(true);

        assert!(record_commission(&ctx, &position).await.is_err());
        assert_eq!(memory.commission_count(), 0);
        let stored = memory.positions().find_by_id(position.id).await.unwrap().unwrap();
        assert!(!stored.commission_calculated);
    }
}
