//! Scheduler: the periodic tasks of the supervisor.
//!
//! | task                       | job                                         |
//! |----------------------------|---------------------------------------------|
//! | `operations`               | evaluate every supervised position          |
//! | `commission_sweep`         | resume incomplete closure pipelines         |
//! | `health_probe`             | probe downstream microservices              |
//! | `accounting_reconciliation`| total commissions of the elapsed window     |
//! | `pending_retry`            | replay the pending-order queue              |
//!
//! Every tick runs its cycle in a spawned task and awaits it: a failing or
//! panicking cycle is logged and counted, and the loop carries on. Cycles of
//! one task never overlap. Cancellation is observed between cycles, so an
//! in-flight cycle always completes.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::accounting::reconcile_accounting;
use crate::context::SupervisorContext;
use crate::error::DaemonResult;
use crate::event_bus::DaemonEvent;
use crate::pipeline::sweep_incomplete_closures;
use crate::supervisor::run_operations_cycle;

pub const OPERATIONS: &str = "operations";
pub const COMMISSION_SWEEP: &str = "commission_sweep";
pub const HEALTH_PROBE: &str = "health_probe";
pub const ACCOUNTING_RECONCILIATION: &str = "accounting_reconciliation";
pub const PENDING_RETRY: &str = "pending_retry";

/// Owns the periodic task loops.
pub struct Scheduler {
    ctx: SupervisorContext,
    shutdown: CancellationToken,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl Scheduler {
    pub fn new(ctx: SupervisorContext, shutdown: CancellationToken) -> Self {
        Self {
            ctx,
            shutdown,
            tasks: Vec::new(),
        }
    }

    /// Spawn every configured task.
    pub fn start(&mut self) {
        let schedule = self.ctx.config.schedule.clone();

        self.spawn_periodic(OPERATIONS, schedule.operations, |ctx| async move {
            run_operations_cycle(&ctx).await.map(|_| ())
        });

        self.spawn_periodic(COMMISSION_SWEEP, schedule.commission_sweep, |ctx| async move {
            let report = sweep_incomplete_closures(&ctx).await?;
            if report.resumed > 0 {
                info!(
                    task = COMMISSION_SWEEP,
                    resumed = report.resumed,
                    completed = report.completed,
                    failed = report.failed,
                    "Commission sweep finished"
                );
            }
            Ok(())
        });

        self.spawn_periodic(HEALTH_PROBE, schedule.health_probe, |ctx| async move {
            for change in ctx.dispatcher.probe_health().await {
                ctx.event_bus.send(DaemonEvent::HealthChanged(change));
            }
            Ok(())
        });

        // Windows are contiguous: each one starts where the last success ended
        let window_start = Arc::new(Mutex::new(Utc::now()));
        self.spawn_periodic(ACCOUNTING_RECONCILIATION, schedule.accounting_reconciliation, move |ctx| {
            let window_start = Arc::clone(&window_start);
            async move { reconcile_window(&ctx, &window_start).await }
        });

        self.spawn_periodic(PENDING_RETRY, schedule.pending_retry, |ctx| async move {
            let summary = ctx.dispatcher.retry_pending().await?;
            ctx.metrics.record_retry(&summary);
            if summary.sent + summary.retried + summary.failed + summary.expired > 0 {
                info!(
                    task = PENDING_RETRY,
                    sent = summary.sent,
                    retried = summary.retried,
                    failed = summary.failed,
                    expired = summary.expired,
                    "Pending orders replayed"
                );
            }
            Ok(())
        });

        info!(tasks = self.tasks.len(), "Scheduler started");
    }

    /// Run `job` every `period` until shutdown.
    pub(crate) fn spawn_periodic<F, Fut>(&mut self, name: &'static str, period: Duration, job: F)
    where
        F: Fn(SupervisorContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DaemonResult<()>> + Send + 'static,
    {
        let ctx = self.ctx.clone();
        let shutdown = self.shutdown.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            debug!(task = name, ?period, "Task loop started");

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {},
                }

                let outcome = match tokio::spawn(job(ctx.clone())).await {
                    Ok(Ok(())) => "ok",
                    Ok(Err(e)) => {
                        warn!(task = name, error = %e, "Cycle failed");
                        "error"
                    },
                    Err(e) => {
                        error!(task = name, error = %e, "Cycle panicked");
                        "panic"
                    },
                };
                ctx.metrics.record_cycle(name, outcome);
            }

            debug!(task = name, "Task loop stopped");
        });

        self.tasks.push((name, handle));
    }

    /// Wait for every task loop to stop after shutdown was requested.
    pub async fn join(self) {
        for (name, handle) in self.tasks {
            if let Err(e) = handle.await {
                error!(task = name, error = %e, "Task loop aborted");
            }
        }
        info!("Scheduler stopped");
    }
}

async fn reconcile_window(ctx: &SupervisorContext, window_start: &Mutex<DateTime<Utc>>) -> DaemonResult<()> {
    let mut start = window_start.lock().await;
    let end = Utc::now();
    reconcile_accounting(ctx, *start, end).await?;
    *start = end;
    Ok(())
}
