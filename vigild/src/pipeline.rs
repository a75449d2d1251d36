//! Closure pipeline: everything after a position reaches CLOSED.
//!
//! ```text
//! CLOSED (persisted)
//!   → commission recorded + commission_calculated   (profitable only)
//!   → orders handed to the dispatcher               (delivered or queued)
//!   → downstream_notified
//! ```
//!
//! Each step checks the persisted flags first, so the commission sweep can
//! resume a pipeline from wherever a crash or a storage outage left it.

use tracing::{debug, error, info, warn};

use vigil_domain::{CommissionRecord, CommissionType, OrderAction, Position, PositionId};

use crate::commission::{record_commission, CommissionStep};
use crate::context::SupervisorContext;
use crate::error::{DaemonError, DaemonResult};
use crate::position_store::with_persistence_retry;

/// What one pipeline run accomplished.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineReport {
    pub position_id: PositionId,
    pub commission: CommissionStep,
    /// Orders handed to the dispatcher in this run
    pub orders: usize,
    pub notified: bool,
}

/// Run (or resume) the pipeline of a closed position.
///
/// `Err` leaves the remaining steps for the commission sweep.
pub async fn complete_closure(ctx: &SupervisorContext, position: &Position) -> DaemonResult<PipelineReport> {
    if !position.is_closed() {
        return Err(DaemonError::Validation(format!(
            "Position {} is not closed",
            position.id
        )));
    }

    let commission = record_commission(ctx, position).await?;

    if position.downstream_notified {
        return Ok(PipelineReport {
            position_id: position.id,
            commission,
            orders: 0,
            notified: true,
        });
    }

    // A profitable closure whose record cannot be read back would notify
    // without the commission order
    if position.is_commissionable() && commission.record().is_none() {
        return Err(DaemonError::Validation(format!(
            "Commission of {} flagged but not readable",
            position.id
        )));
    }

    let orders = notify_downstream(ctx, position, commission.record()).await?;

    let positions = ctx.store.positions();
    with_persistence_retry(&ctx.config.persistence_retry, "mark downstream notified", || {
        positions.mark_downstream_notified(position.id)
    })
    .await?;

    debug!(position_id = %position.id, orders, "Closure pipeline complete");
    Ok(PipelineReport {
        position_id: position.id,
        commission,
        orders,
        notified: true,
    })
}

/// Hand the closure's orders to the dispatcher.
///
/// - `record_closure` → accounting, always
/// - `charge_commission` → commission, when a commission exists
/// - `credit_affiliate` → payments, REAL commissions only
///
/// Delivery problems are absorbed by the queue; `Err` means an order could
/// not even be queued.
pub async fn notify_downstream(
    ctx: &SupervisorContext,
    position: &Position,
    commission: Option<&CommissionRecord>,
) -> DaemonResult<usize> {
    let routes = &ctx.config.downstream.routes;
    let mut orders: Vec<(&str, OrderAction)> = Vec::with_capacity(3);

    if let (Some(reason), Some(exit_price)) = (position.close_reason, position.exit_price) {
        orders.push((
            routes.accounting.as_str(),
            OrderAction::RecordClosure {
                operation_id: position.id,
                user_id: position.user_id,
                symbol: position.symbol.as_pair(),
                close_reason: reason,
                exit_price: exit_price.as_decimal(),
                pnl_usd: position.pnl_usd,
                pnl_percent: position.pnl_percent,
            },
        ));
    }

    if let Some(record) = commission {
        orders.push((
            routes.commission.as_str(),
            OrderAction::ChargeCommission {
                operation_id: record.operation_id,
                user_id: record.user_id,
                commission_amount: record.amount,
                commission_type: record.commission_type,
            },
        ));

        if record.commission_type == CommissionType::Real {
            orders.push((
                routes.payments.as_str(),
                OrderAction::CreditAffiliate {
                    operation_id: record.operation_id,
                    user_id: record.user_id,
                    commission_amount: record.amount,
                },
            ));
        }
    }

    let count = orders.len();
    for (microservice, action) in orders {
        let outcome = ctx.dispatcher.notify(microservice, action).await?;
        ctx.metrics.record_dispatch(&outcome);
    }
    Ok(count)
}

/// Counters from one commission sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub resumed: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Resume every closure pipeline storage reports as incomplete.
///
/// A position still in the cache is locked first so a closer that is
/// mid-pipeline finishes before the sweep looks at it.
pub async fn sweep_incomplete_closures(ctx: &SupervisorContext) -> DaemonResult<SweepReport> {
    let pending = ctx.store.positions().find_incomplete_closures().await?;
    let mut report = SweepReport::default();

    for stale in pending {
        let id = stale.id;
        let handle = ctx.positions.get(id).await;
        let _guard = match &handle {
            Some(handle) => Some(handle.lock().await),
            None => None,
        };

        // Fresh flags after the lock
        let position = match ctx.store.positions().find_by_id(id).await {
            Ok(Some(position)) if !position.is_pipeline_complete() => position,
            Ok(_) => continue,
            Err(e) => {
                warn!(position_id = %id, error = %e, task = "commission_sweep", "Could not reload position");
                report.failed += 1;
                continue;
            },
        };

        report.resumed += 1;
        match complete_closure(ctx, &position).await {
            Ok(_) => {
                report.completed += 1;
                info!(
                    position_id = %id,
                    symbol = %position.symbol,
                    task = "commission_sweep",
                    "Resumed closure pipeline"
                );
            },
            Err(e) => {
                report.failed += 1;
                error!(
                    position_id = %id,
                    symbol = %position.symbol,
                    task = "commission_sweep",
                    error = %e,
                    "Closure pipeline still incomplete"
                );
            },
        }

        if handle.is_some() {
            ctx.positions.evict(id).await;
        }
    }

    Ok(report)
}
