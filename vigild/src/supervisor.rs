//! Operations cycle: price-driven evaluation of every supervised position.
//!
//! ```text
//! reconcile cache ← storage
//!   → per position (bounded concurrency):
//!       price (timeout) → evaluate
//!         ├─ Hold  → mark price (PENDING → OPEN on first price) → persist
//!         └─ Close → persist CLOSED → closure pipeline → evict
//! ```
//!
//! A failure on one position is logged and never stops the others.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use vigil_domain::{CloseReason, Position, PositionId, PositionStatus, Price};
use vigil_engine::{evaluate, Closure, ClosureDecision};
use vigil_exec::ExecError;
use vigil_store::StoreError;

use crate::context::SupervisorContext;
use crate::error::{DaemonError, DaemonResult};
use crate::event_bus::DaemonEvent;
use crate::pipeline::complete_closure;
use crate::position_store::PositionHandle;

/// What happened to one position in a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evaluation {
    /// Already closed when its turn came
    Skipped,
    /// Still open, mark refreshed
    Held,
    /// Closed in this cycle
    Closed(CloseReason),
    /// Storage already had it CLOSED; evicted
    ClosedOutOfBand,
}

/// Outcome of [`close_position`].
#[derive(Debug, Clone, PartialEq)]
pub enum CloseOutcome {
    /// CLOSED persisted by this call
    Closed(Position),
    /// Storage already had the position CLOSED
    ClosedOutOfBand,
}

/// Counters from one operations cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub evaluated: usize,
    pub held: usize,
    pub closed: usize,
    pub failed: usize,
    /// Positions storage reported closed or removed behind our back
    pub diverged: usize,
}

/// Run one operations cycle over every cached position.
pub async fn run_operations_cycle(ctx: &SupervisorContext) -> DaemonResult<CycleReport> {
    let mut report = CycleReport::default();

    match ctx.positions.reconcile().await {
        Ok(reconciled) => {
            for id in &reconciled.closed_out_of_band {
                ctx.event_bus.send(DaemonEvent::ReconciliationDivergence {
                    position_id: *id,
                    detail: "closed outside the supervisor".to_string(),
                });
            }
            for id in &reconciled.vanished {
                ctx.event_bus.send(DaemonEvent::ReconciliationDivergence {
                    position_id: *id,
                    detail: "missing from storage".to_string(),
                });
            }
            report.diverged += reconciled.closed_out_of_band.len() + reconciled.vanished.len();
        },
        Err(e) => {
            // Storage unreachable: keep supervising the cached state
            warn!(task = "operations", error = %e, "Reconcile failed, evaluating cached positions");
        },
    }

    let entries = ctx.positions.entries().await;
    let permits = Arc::new(Semaphore::new(ctx.config.evaluation_concurrency));
    let mut tasks = JoinSet::new();

    for (id, handle) in entries {
        let ctx = ctx.clone();
        let permits = Arc::clone(&permits);
        tasks.spawn(async move {
            let _permit = permits.acquire_owned().await;
            let symbol = handle.lock().await.symbol.clone();
            (id, symbol, evaluate_position(&ctx, id, handle).await)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        report.evaluated += 1;
        match joined {
            Ok((_, _, Ok(Evaluation::Held))) => report.held += 1,
            Ok((_, _, Ok(Evaluation::Closed(_)))) => report.closed += 1,
            Ok((_, _, Ok(Evaluation::ClosedOutOfBand))) => report.diverged += 1,
            Ok((_, _, Ok(Evaluation::Skipped))) => {},
            Ok((id, symbol, Err(e))) => {
                report.failed += 1;
                warn!(
                    position_id = %id,
                    %symbol,
                    task = "operations",
                    error = %e,
                    "Position evaluation failed"
                );
            },
            Err(e) => {
                report.failed += 1;
                error!(task = "operations", error = %e, "Position evaluation panicked");
            },
        }
    }

    let cached = ctx.positions.len().await;
    ctx.metrics.cached_positions.set(cached as i64);

    debug!(
        task = "operations",
        evaluated = report.evaluated,
        held = report.held,
        closed = report.closed,
        failed = report.failed,
        "Operations cycle complete"
    );
    Ok(report)
}

/// Evaluate one cached position against the current market price.
///
/// The price is fetched without holding the entry's lock; the decision is
/// made under it, against the freshest cached state.
pub async fn evaluate_position(
    ctx: &SupervisorContext,
    id: PositionId,
    handle: PositionHandle,
) -> DaemonResult<Evaluation> {
    let symbol = {
        let position = handle.lock().await;
        if position.is_closed() {
            return Ok(Evaluation::Skipped);
        }
        position.symbol.clone()
    };

    let price = fetch_price(ctx, &symbol).await?;

    let mut guard = handle.lock().await;
    match evaluate(&guard, price, None)? {
        ClosureDecision::Terminal => Ok(Evaluation::Skipped),
        ClosureDecision::Hold { price, pnl } => {
            let mut updated = guard.clone();
            if updated.status == PositionStatus::Pending {
                updated.open()?;
                info!(position_id = %id, symbol = %updated.symbol, %price, "Position opened");
            }
            updated.mark_price(price, pnl)?;

            match ctx.positions.persist(&updated).await {
                Ok(()) => {
                    *guard = updated;
                    Ok(Evaluation::Held)
                },
                Err(DaemonError::Store(StoreError::AlreadyClosed { .. })) => {
                    drop(guard);
                    closed_out_of_band(ctx, id).await;
                    Ok(Evaluation::ClosedOutOfBand)
                },
                Err(e) => Err(e),
            }
        },
        ClosureDecision::Close(closure) => match close_position(ctx, &mut guard, closure).await? {
            CloseOutcome::Closed(_) => Ok(Evaluation::Closed(closure.reason)),
            CloseOutcome::ClosedOutOfBand => Ok(Evaluation::ClosedOutOfBand),
        },
    }
}

/// Move a locked position to CLOSED and run its closure pipeline.
///
/// The caller holds the entry's lock for the whole call, so at most one
/// closer ever reaches storage. A pipeline failure is left to the
/// commission sweep; the closure itself stands.
pub async fn close_position(
    ctx: &SupervisorContext,
    position: &mut Position,
    closure: Closure,
) -> DaemonResult<CloseOutcome> {
    let mut closed = position.clone();
    closed.close(closure.exit_price, closure.pnl, closure.reason)?;

    match ctx.positions.persist(&closed).await {
        Ok(()) => {},
        Err(DaemonError::Store(StoreError::AlreadyClosed { .. })) => {
            closed_out_of_band(ctx, closed.id).await;
            return Ok(CloseOutcome::ClosedOutOfBand);
        },
        Err(e) => return Err(e),
    }
    *position = closed.clone();

    info!(
        position_id = %closed.id,
        user_id = %closed.user_id,
        symbol = %closed.symbol,
        side = %closed.side,
        reason = %closure.reason,
        exit_price = %closure.exit_price,
        pnl_usd = %closure.pnl.usd,
        pnl_percent = %closure.pnl.percent,
        "Position closed"
    );
    ctx.metrics.record_closure(closure.reason);
    ctx.event_bus.send(DaemonEvent::PositionClosed {
        position_id: closed.id,
        user_id: closed.user_id,
        symbol: closed.symbol.clone(),
        reason: closure.reason,
        pnl: closure.pnl,
        timestamp: Utc::now(),
    });

    if let Err(e) = complete_closure(ctx, &closed).await {
        warn!(
            position_id = %closed.id,
            symbol = %closed.symbol,
            error = %e,
            "Closure pipeline incomplete, left for commission sweep"
        );
    }

    ctx.positions.evict(closed.id).await;
    Ok(CloseOutcome::Closed(closed))
}

async fn fetch_price(ctx: &SupervisorContext, symbol: &vigil_domain::Symbol) -> DaemonResult<Price> {
    match tokio::time::timeout(ctx.config.call_timeout, ctx.oracle.current_price(symbol)).await {
        Ok(price) => Ok(price?),
        Err(_) => Err(ExecError::Timeout(format!(
            "price of {} exceeded {:?}",
            symbol, ctx.config.call_timeout
        ))
        .into()),
    }
}

async fn closed_out_of_band(ctx: &SupervisorContext, id: PositionId) {
    warn!(position_id = %id, "Position already closed in storage, evicting");
    ctx.positions.evict(id).await;
    ctx.event_bus.send(DaemonEvent::ReconciliationDivergence {
        position_id: id,
        detail: "closed outside the supervisor".to_string(),
    });
}
