//! Prometheus metrics owned by the daemon.
//!
//! One registry per daemon instance, served as text at `GET /metrics`.

use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

use vigil_domain::{CloseReason, CommissionType};
use vigil_exec::{DispatchOutcome, RetrySummary};

/// Daemon metrics.
pub struct Metrics {
    registry: Registry,
    /// Scheduler cycles by task and outcome (ok, error, panic)
    pub cycles: IntCounterVec,
    /// Closures by reason
    pub closures: IntCounterVec,
    /// Commission records by type
    pub commissions: IntCounterVec,
    /// Downstream orders by outcome (delivered, queued, sent, retried, failed, expired)
    pub orders: IntCounterVec,
    /// Positions currently in the supervision cache
    pub cached_positions: IntGauge,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("vigil".to_string()), None)?;

        let cycles = IntCounterVec::new(
            Opts::new("scheduler_cycles_total", "scheduler cycles by task and outcome"),
            &["task", "outcome"],
        )?;
        let closures = IntCounterVec::new(
            Opts::new("position_closures_total", "positions closed by reason"),
            &["reason"],
        )?;
        let commissions = IntCounterVec::new(
            Opts::new("commissions_recorded_total", "commission records by type"),
            &["type"],
        )?;
        let orders = IntCounterVec::new(
            Opts::new("downstream_orders_total", "downstream orders by outcome"),
            &["outcome"],
        )?;
        let cached_positions = IntGauge::new("cached_positions", "positions in the supervision cache")?;

        registry.register(Box::new(cycles.clone()))?;
        registry.register(Box::new(closures.clone()))?;
        registry.register(Box::new(commissions.clone()))?;
        registry.register(Box::new(orders.clone()))?;
        registry.register(Box::new(cached_positions.clone()))?;

        Ok(Self {
            registry,
            cycles,
            closures,
            commissions,
            orders,
            cached_positions,
        })
    }

    pub fn record_cycle(&self, task: &str, outcome: &str) {
        self.cycles.with_label_values(&[task, outcome]).inc();
    }

    pub fn record_closure(&self, reason: CloseReason) {
        self.closures.with_label_values(&[reason.as_str()]).inc();
    }

    pub fn record_commission(&self, commission_type: CommissionType) {
        self.commissions.with_label_values(&[commission_type.as_str()]).inc();
    }

    pub fn record_dispatch(&self, outcome: &DispatchOutcome) {
        let label = match outcome {
            DispatchOutcome::Delivered => "delivered",
            DispatchOutcome::Queued(_) => "queued",
        };
        self.orders.with_label_values(&[label]).inc();
    }

    pub fn record_retry(&self, summary: &RetrySummary) {
        for (label, count) in [
            ("sent", summary.sent),
            ("retried", summary.retried),
            ("failed", summary.failed),
            ("expired", summary.expired),
        ] {
            if count > 0 {
                self.orders.with_label_values(&[label]).inc_by(count as u64);
            }
        }
    }

    /// Prometheus text exposition of every registered metric
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buf = Vec::new();
        if encoder.encode(&families, &mut buf).is_err() || buf.is_empty() {
            return "# no metrics\n".to_string();
        }
        String::from_utf8_lossy(&buf).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_render_contains_recorded_series() {
        let metrics = Metrics::new().unwrap();
        metrics.record_cycle("operations", "ok");
        metrics.record_closure(CloseReason::TakeProfit);
        metrics.record_commission(CommissionType::Real);
        metrics.record_dispatch(&DispatchOutcome::Queued(Uuid::now_v7()));
        metrics.cached_positions.set(3);

        let text = metrics.render();
        assert!(text.contains("vigil_scheduler_cycles_total{outcome=\"ok\",task=\"operations\"} 1"));
        assert!(text.contains("vigil_position_closures_total{reason=\"TAKE_PROFIT\"} 1"));
        assert!(text.contains("vigil_commissions_recorded_total{type=\"REAL\"} 1"));
        assert!(text.contains("vigil_downstream_orders_total{outcome=\"queued\"} 1"));
        assert!(text.contains("vigil_cached_positions 3"));
    }

    #[test]
    fn test_record_retry_skips_zero_counts() {
        let metrics = Metrics::new().unwrap();
        metrics.record_retry(&RetrySummary {
            sent: 2,
            ..Default::default()
        });

        assert_eq!(metrics.orders.with_label_values(&["sent"]).get(), 2);
        assert_eq!(metrics.orders.with_label_values(&["failed"]).get(), 0);
    }

    #[test]
    fn test_instances_are_independent() {
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.record_closure(CloseReason::StopLoss);

        assert_eq!(b.closures.with_label_values(&["STOP_LOSS"]).get(), 0);
    }
}
