//! Order dispatcher: delivers action orders to downstream microservices and
//! keeps undeliverable ones in the pending-order queue.
//!
//! # Delivery
//!
//! ```text
//! notify(service, action)
//!   ├─ service unknown / offline ──────────────→ queue → Queued(id)
//!   └─ online → POST {endpoint}/orders (timeout)
//!        ├─ 200 ─────────────────────────────→ Delivered
//!        └─ error / non-200 / timeout ───────→ queue → Queued(id)
//! ```
//!
//! `retry_pending()` replays the queue under the shared `RetryPolicy`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use vigil_domain::{HealthStatus, OrderAction, OrderPayload, PendingOrder, PendingOrderId};
use vigil_engine::RetryPolicy;
use vigil_store::Store;

use crate::error::ExecError;
use crate::health::{HealthChange, HealthRegistry};
use crate::ports::DownstreamClient;

/// Dispatcher settings
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Value of the `supervisor` field in every payload
    pub supervisor: String,
    /// Bound for a single downstream call
    pub call_timeout: Duration,
    /// Pending-order retry policy
    pub retry: RetryPolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            supervisor: "vigil".to_string(),
            call_timeout: Duration::from_secs(5),
            retry: RetryPolicy::default(),
        }
    }
}

/// What happened to a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Accepted by the microservice (HTTP 200)
    Delivered,
    /// Written to the pending-order queue
    Queued(PendingOrderId),
}

/// Counters from one pass over the pending-order queue
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetrySummary {
    pub sent: usize,
    pub retried: usize,
    pub failed: usize,
    pub expired: usize,
    pub skipped_offline: usize,
    pub not_due: usize,
}

/// Delivers orders and owns the pending-order queue.
pub struct OrderDispatcher {
    client: Arc<dyn DownstreamClient>,
    registry: Arc<HealthRegistry>,
    store: Arc<dyn Store>,
    config: DispatcherConfig,
}

impl OrderDispatcher {
    pub fn new(
        client: Arc<dyn DownstreamClient>,
        registry: Arc<HealthRegistry>,
        store: Arc<dyn Store>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            client,
            registry,
            store,
            config,
        }
    }

    /// Health cache shared with the probe.
    pub fn registry(&self) -> &Arc<HealthRegistry> {
        &self.registry
    }

    /// Deliver an action to a microservice, or queue it.
    ///
    /// Delivery problems never surface as errors. An `Err` means the order
    /// could not even be queued (storage failure) and the caller must retry.
    pub async fn notify(&self, microservice: &str, action: OrderAction) -> Result<DispatchOutcome, ExecError> {
        let payload = OrderPayload::new(action, &self.config.supervisor);
        let action_name = payload.action.name();

        let health = match self.registry.get(microservice).await {
            Some(health) => health,
            None => {
                warn!(microservice, action = action_name, "Unknown microservice, queueing order");
                return self.enqueue(microservice, payload, "unknown microservice").await;
            },
        };

        if !health.is_online() {
            debug!(microservice, action = action_name, "Microservice offline, queueing order");
            return self.enqueue(microservice, payload, "microservice offline").await;
        }

        match self.deliver(&health.endpoint, &payload).await {
            Ok(()) => {
                debug!(microservice, action = action_name, "Order delivered");
                Ok(DispatchOutcome::Delivered)
            },
            Err(e) => {
                warn!(microservice, action = action_name, error = %e, "Delivery failed, queueing order");
                self.enqueue(microservice, payload, &e.to_string()).await
            },
        }
    }

    /// Replay the pending-order queue once.
    ///
    /// - older than the retry horizon → FAILED without replay
    /// - microservice offline or unknown → skipped, no attempt spent
    /// - backoff not elapsed → skipped
    /// - otherwise re-sent: SENT on success, `attempts += 1` on failure and
    ///   FAILED once attempts are exhausted
    ///
    /// A storage error on one order is logged and does not stop the pass.
    pub async fn retry_pending(&self) -> Result<RetrySummary, ExecError> {
        let policy = self.config.retry;
        let now = Utc::now();
        let orders = self.store.pending_orders().find_pending().await?;
        let mut summary = RetrySummary::default();

        for mut order in orders {
            if policy.is_expired(order.created_at, now) {
                order.expire();
                summary.expired += 1;
                warn!(
                    order_id = %order.id,
                    microservice = %order.microservice_name,
                    action = order.payload.action.name(),
                    attempts = order.attempts,
                    "Pending order expired past retry horizon"
                );
                self.persist(&order).await;
                continue;
            }

            let health = match self.registry.get(&order.microservice_name).await {
                Some(health) if health.is_online() => health,
                _ => {
                    summary.skipped_offline += 1;
                    continue;
                },
            };

            if !policy.is_due(order.attempts, order.last_attempt_at, now) {
                summary.not_due += 1;
                continue;
            }

            match self.deliver(&health.endpoint, &order.payload).await {
                Ok(()) => {
                    order.mark_sent();
                    summary.sent += 1;
                    info!(
                        order_id = %order.id,
                        microservice = %order.microservice_name,
                        attempts = order.attempts,
                        "Pending order delivered"
                    );
                },
                Err(e) => {
                    order.record_failure(e.to_string(), policy.max_attempts);
                    if order.is_pending() {
                        summary.retried += 1;
                        debug!(order_id = %order.id, attempts = order.attempts, error = %e, "Retry failed");
                    } else {
                        summary.failed += 1;
                        warn!(
                            order_id = %order.id,
                            microservice = %order.microservice_name,
                            attempts = order.attempts,
                            error = %e,
                            "Pending order failed permanently"
                        );
                    }
                },
            }

            self.persist(&order).await;
        }

        Ok(summary)
    }

    /// Probe every configured microservice and persist the results.
    ///
    /// Returns the status flips observed.
    pub async fn probe_health(&self) -> Vec<HealthChange> {
        let mut changes = Vec::new();

        for service in self.registry.endpoints().await {
            let status = match tokio::time::timeout(
                self.config.call_timeout,
                self.client.check_health(&service.endpoint),
            )
            .await
            {
                Ok(Ok(())) => HealthStatus::Online,
                Ok(Err(e)) => {
                    debug!(microservice = %service.name, error = %e, "Health probe failed");
                    HealthStatus::Offline
                },
                Err(_) => {
                    debug!(microservice = %service.name, "Health probe timed out");
                    HealthStatus::Offline
                },
            };

            if let Some(change) = self.registry.set_status(&service.name, status).await {
                match change.current {
                    HealthStatus::Online => info!(microservice = %change.name, "Microservice back online"),
                    HealthStatus::Offline => warn!(microservice = %change.name, "Microservice went offline"),
                }
                changes.push(change);
            }

            if let Some(snapshot) = self.registry.get(&service.name).await {
                if let Err(e) = self.store.health().save(&snapshot).await {
                    warn!(microservice = %service.name, error = %e, "Failed to persist microservice health");
                }
            }
        }

        changes
    }

    async fn deliver(&self, endpoint: &str, payload: &OrderPayload) -> Result<(), ExecError> {
        match tokio::time::timeout(self.config.call_timeout, self.client.send_order(endpoint, payload)).await {
            Ok(result) => result,
            Err(_) => Err(ExecError::Timeout(format!(
                "POST {}/orders exceeded {:?}",
                endpoint, self.config.call_timeout
            ))),
        }
    }

    async fn enqueue(
        &self,
        microservice: &str,
        payload: OrderPayload,
        reason: &str,
    ) -> Result<DispatchOutcome, ExecError> {
        let order = PendingOrder::new(microservice, payload, Some(reason.to_string()));
        self.store.pending_orders().save(&order).await?;
        info!(
            order_id = %order.id,
            microservice,
            action = order.payload.action.name(),
            reason,
            "Order queued for retry"
        );
        Ok(DispatchOutcome::Queued(order.id))
    }

    async fn persist(&self, order: &PendingOrder) {
        if let Err(e) = self.store.pending_orders().save(order).await {
            warn!(order_id = %order.id, error = %e, "Failed to persist pending order");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::MicroserviceEndpoint;
    use crate::stub::StubDownstream;
    use chrono::Duration as ChronoDuration;
    use rust_decimal_macros::dec;
    use uuid::Uuid;
    use vigil_domain::PendingOrderStatus;
    use vigil_store::{MemoryStore, PendingOrderRepository};

    const COMMISSION: &str = "http://commission:8080";

    struct Harness {
        store: Arc<MemoryStore>,
        downstream: Arc<StubDownstream>,
        dispatcher: OrderDispatcher,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let downstream = Arc::new(StubDownstream::new());
        let registry = Arc::new(HealthRegistry::new(&[MicroserviceEndpoint::new(
            "commission",
            COMMISSION,
        )]));
        let dispatcher = OrderDispatcher::new(
            downstream.clone(),
            registry,
            store.clone(),
            DispatcherConfig {
                supervisor: "vigil-test".to_string(),
                ..DispatcherConfig::default()
            },
        );
        Harness {
            store,
            downstream,
            dispatcher,
        }
    }

    fn action() -> OrderAction {
        OrderAction::CreditAffiliate {
            operation_id: Uuid::now_v7(),
            user_id: Uuid::now_v7(),
            commission_amount: dec!(100),
        }
    }

    #[tokio::test]
    async fn test_online_delivery() {
        let h = harness();
        h.dispatcher.registry().set_status("commission", HealthStatus::Online).await;

        let outcome = h.dispatcher.notify("commission", action()).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Delivered);

        let delivered = h.downstream.delivered_to(COMMISSION);
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].supervisor, "vigil-test");
        assert_eq!(h.store.pending_order_count(), 0);
    }

    #[tokio::test]
    async fn test_offline_queues_then_retry_sends() {
        let h = harness();

        // Offline: never raises, exactly one pending order
        let outcome = h.dispatcher.notify("commission", action()).await.unwrap();
        let DispatchOutcome::Queued(id) = outcome else {
            panic!("expected queued, got {:?}", outcome);
        };
        assert_eq!(h.store.count_pending().await.unwrap(), 1);
        assert!(h.downstream.delivered().is_empty());

        // Still offline: skipped without spending an attempt
        let summary = h.dispatcher.retry_pending().await.unwrap();
        assert_eq!(summary.skipped_offline, 1);
        assert_eq!(h.store.find_by_id(id).await.unwrap().unwrap().attempts, 0);

        // Service recovers
        h.dispatcher.registry().set_status("commission", HealthStatus::Online).await;
        let summary = h.dispatcher.retry_pending().await.unwrap();
        assert_eq!(summary.sent, 1);

        let order = h.store.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(order.status, PendingOrderStatus::Sent);
        assert_eq!(h.downstream.delivered_to(COMMISSION).len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_microservice_is_queued() {
        let h = harness();
        let outcome = h.dispatcher.notify("payments", action()).await.unwrap();
        assert!(matches!(outcome, DispatchOutcome::Queued(_)));
        assert_eq!(h.store.count_pending().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delivery_failure_is_queued() {
        let h = harness();
        h.dispatcher.registry().set_status("commission", HealthStatus::Online).await;
        h.downstream.set_fail_next(1);

        let outcome = h.dispatcher.notify("commission", action()).await.unwrap();
        assert!(matches!(outcome, DispatchOutcome::Queued(_)));

        let pending = h.store.find_pending().await.unwrap();
        assert_eq!(pending[0].last_error.as_deref().map(|e| e.contains("503")), Some(true));
    }

    #[tokio::test]
    async fn test_queue_write_failure_surfaces() {
        let h = harness();
        h.store.fail_next_writes(1);
        assert!(h.dispatcher.notify("commission", action()).await.is_err());
    }

    #[tokio::test]
    async fn test_expired_orders_fail_without_replay() {
        let h = harness();
        h.dispatcher.registry().set_status("commission", HealthStatus::Online).await;

        let mut order = PendingOrder::new(
            "commission",
            OrderPayload::new(action(), "vigil-test"),
            None,
        );
        order.created_at = Utc::now() - ChronoDuration::hours(2);
        PendingOrderRepository::save(h.store.as_ref(), &order).await.unwrap();

        let summary = h.dispatcher.retry_pending().await.unwrap();
        assert_eq!(summary.expired, 1);
        assert!(h.downstream.delivered().is_empty());

        let stored = h.store.find_by_id(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PendingOrderStatus::Failed);
        assert_eq!(stored.attempts, 0);
    }

    #[tokio::test]
    async fn test_attempts_exhaust_to_failed() {
        let h = harness();
        h.dispatcher.registry().set_status("commission", HealthStatus::Online).await;

        let mut order = PendingOrder::new(
            "commission",
            OrderPayload::new(action(), "vigil-test"),
            None,
        );
        order.attempts = 4;
        order.last_attempt_at = Some(Utc::now() - ChronoDuration::minutes(30));
        PendingOrderRepository::save(h.store.as_ref(), &order).await.unwrap();

        h.downstream.set_fail_next(1);
        let summary = h.dispatcher.retry_pending().await.unwrap();
        assert_eq!(summary.failed, 1);

        let stored = h.store.find_by_id(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PendingOrderStatus::Failed);
        assert_eq!(stored.attempts, 5);
    }

    #[tokio::test]
    async fn test_backoff_not_due_is_skipped() {
        let h = harness();
        h.dispatcher.registry().set_status("commission", HealthStatus::Online).await;

        let mut order = PendingOrder::new(
            "commission",
            OrderPayload::new(action(), "vigil-test"),
            None,
        );
        order.attempts = 2;
        order.last_attempt_at = Some(Utc::now() - ChronoDuration::seconds(5));
        PendingOrderRepository::save(h.store.as_ref(), &order).await.unwrap();

        let summary = h.dispatcher.retry_pending().await.unwrap();
        assert_eq!(summary.not_due, 1);
        assert!(h.downstream.delivered().is_empty());
    }

    #[tokio::test]
    async fn test_probe_flips_and_persists() {
        let h = harness();

        let changes = h.dispatcher.probe_health().await;
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].current, HealthStatus::Online);
        assert!(h.dispatcher.registry().is_online("commission").await);

        h.downstream.set_unreachable(COMMISSION, true);
        let changes = h.dispatcher.probe_health().await;
        assert_eq!(changes[0].current, HealthStatus::Offline);

        // No flip, no change reported
        assert!(h.dispatcher.probe_health().await.is_empty());

        let persisted = vigil_store::HealthRepository::find_all(h.store.as_ref()).await.unwrap();
        assert_eq!(persisted.len(), 1);
        assert!(!persisted[0].is_online());
    }
}
