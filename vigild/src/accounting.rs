//! Periodic accounting reconciliation.
//!
//! Totals the commissions recorded in a window, cross-checks them against
//! the positions closed in the same window and sends one
//! `reconcile_accounting` order to the accounting microservice.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use vigil_domain::{CommissionType, OrderAction, PositionId};
use vigil_engine::compute_commission;
use vigil_exec::DispatchOutcome;

use crate::context::SupervisorContext;
use crate::error::DaemonResult;

/// An inconsistency between positions and commission records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityGap {
    /// `commission_calculated` set but no record exists
    MissingRecord(PositionId),
    /// Recorded amount differs from `pnl_usd * plan_percent / 100`
    AmountMismatch {
        operation_id: PositionId,
        recorded: Decimal,
        expected: Decimal,
    },
    /// Profitable closure whose commission step has not run
    CommissionPending(PositionId),
}

/// Result of reconciling one window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountingSummary {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub real_total: Decimal,
    pub referent_total: Decimal,
    pub record_count: u64,
    pub closures: usize,
    pub gaps: Vec<IntegrityGap>,
    /// `None` when the window was empty and nothing was sent
    pub dispatched: Option<DispatchOutcome>,
}

/// Reconcile commissions recorded in `[start, end)`.
pub async fn reconcile_accounting(
    ctx: &SupervisorContext,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> DaemonResult<AccountingSummary> {
    let records = ctx.store.commissions().find_between(start, end).await?;
    let closed = ctx.store.positions().find_closed_between(start, end).await?;

    let mut real_total = Decimal::ZERO;
    let mut referent_total = Decimal::ZERO;
    for record in &records {
        match record.commission_type {
            CommissionType::Real => real_total += record.amount,
            CommissionType::Referent => referent_total += record.amount,
        }
    }

    let by_operation: HashMap<PositionId, _> = records.iter().map(|r| (r.operation_id, r)).collect();
    let mut gaps = Vec::new();

    for position in closed.iter().filter(|p| p.is_commissionable()) {
        if !position.commission_calculated {
            gaps.push(IntegrityGap::CommissionPending(position.id));
            continue;
        }

        // The record may sit in an earlier window if the step ran late
        let record = match by_operation.get(&position.id) {
            Some(record) => (*record).clone(),
            None => match ctx.store.commissions().find_by_operation(position.id).await? {
                Some(record) => record,
                None => {
                    gaps.push(IntegrityGap::MissingRecord(position.id));
                    continue;
                },
            },
        };

        let expected = compute_commission(position.pnl_usd, record.plan_percent);
        if record.amount != expected {
            gaps.push(IntegrityGap::AmountMismatch {
                operation_id: position.id,
                recorded: record.amount,
                expected,
            });
        }
    }

    for gap in &gaps {
        warn!(?gap, %start, %end, task = "accounting_reconciliation", "Accounting integrity gap");
    }

    let record_count = records.len() as u64;
    let dispatched = if records.is_empty() && closed.is_empty() {
        debug!(%start, %end, "Empty accounting window, nothing to send");
        None
    } else {
        let outcome = ctx
            .dispatcher
            .notify(
                &ctx.config.downstream.routes.accounting,
                OrderAction::ReconcileAccounting {
                    window_start: start,
                    window_end: end,
                    real_total,
                    referent_total,
                    record_count,
                },
            )
            .await?;
        ctx.metrics.record_dispatch(&outcome);
        Some(outcome)
    };

    info!(
        %start,
        %end,
        %real_total,
        %referent_total,
        record_count,
        closures = closed.len(),
        gaps = gaps.len(),
        "Accounting window reconciled"
    );

    Ok(AccountingSummary {
        window_start: start,
        window_end: end,
        real_total,
        referent_total,
        record_count,
        closures: closed.len(),
        gaps,
        dispatched,
    })
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
        CloseReason, CommissionRecord, HealthStatus, Leverage, Pnl, Position, Price, Quantity, Side, Symbol,
        Thresholds, UserPlan,
    };
    use vigil_exec::{StubDownstream, StubFearGreed, StubPriceOracle};
    use vigil_store::{MemoryStore, Store};

    async fn setup() -> (SupervisorContext, Arc<MemoryStore>, Arc<StubDownstream>) {
        let memory = Arc::new(MemoryStore::new());
        let downstream = Arc::new(StubDownstream::new());
        let ctx = SupervisorContext::new(
            Config::test(),
            memory.clone(),
            Arc::new(StubPriceOracle::new()),
            Arc::new(StubFearGreed::new(50)),
            downstream.clone(),
        )
        .unwrap();
        ctx.dispatcher
            .registry()
            .set_status("accounting", HealthStatus::Online)
            .await;
        (ctx, memory, downstream)
    }

    async fn closed(memory: &MemoryStore, pnl_usd: Decimal) -> Position {
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
        memory.positions().save(&position).await.unwrap();
        position
    }

    fn window() -> (DateTime<Utc>, DateTime<Utc>) {
        let now = Utc::now();
        (now - Duration::hours(1), now + Duration::hours(1))
    }

    #[tokio::test]
    async fn test_totals_by_type_and_dispatch() {
        let (ctx, memory, downstream) = setup().await;
        let a = closed(&memory, dec!(100)).await;
        let b = closed(&memory, dec!(200)).await;
        for (position, kind) in [(&a, CommissionType::Real), (&b, CommissionType::Referent)] {
            let record = CommissionRecord::new(
                position.id,
                position.user_id,
                compute_commission(position.pnl_usd, dec!(10)),
                kind,
                UserPlan::Subscription,
                dec!(10),
            );
            memory.commissions().record_commission(&record).await.unwrap();
        }

        let (start, end) = window();
        let summary = reconcile_accounting(&ctx, start, end).await.unwrap();

        assert_eq!(summary.real_total, dec!(10));
        assert_eq!(summary.referent_total, dec!(20));
        assert_eq!(summary.record_count, 2);
        assert!(summary.gaps.is_empty());
        assert_eq!(summary.dispatched, Some(DispatchOutcome::Delivered));

        let sent = downstream.delivered_to("http://accounting.test");
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].action.name(), "reconcile_accounting");
    }

    #[tokio::test]
    async fn test_pending_and_mismatch_are_reported() {
        let (ctx, memory, _) = setup().await;
        let pending = closed(&memory, dec!(100)).await;
        let skewed = closed(&memory, dec!(300)).await;
        let record = CommissionRecord::new(
            skewed.id,
            skewed.user_id,
            dec!(1),
            CommissionType::Referent,
            UserPlan::Subscription,
            dec!(10),
        );
        memory.commissions().record_commission(&record).await.unwrap();

        let (start, end) = window();
        let summary = reconcile_accounting(&ctx, start, end).await.unwrap();

        assert!(summary.gaps.contains(&IntegrityGap::CommissionPending(pending.id)));
        assert!(summary.gaps.contains(&IntegrityGap::AmountMismatch {
            operation_id: skewed.id,
            recorded: dec!(1),
            expected: dec!(30),
        }));
    }

    #[tokio::test]
    async fn test_empty_window_sends_nothing() {
        let (ctx, _, downstream) = setup().await;
        let (start, end) = window();

        let summary = reconcile_accounting(&ctx, start, end).await.unwrap();

        assert_eq!(summary.dispatched, None);
        assert!(downstream.delivered().is_empty());
    }
}
