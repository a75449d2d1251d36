//! E2E tests: position supervision against in-memory storage and stub ports.
//!
//! Flows:
//! 1. Close signal against two users' LONG positions → both closed, one commission
//! 2. Commission step replayed → exactly one record
//! 3. Offline microservice → order queued → back online → SENT
//! 4. Position closed behind the supervisor's back → divergence reported
//! 5. Per-user admission cap
//! 6. Operations cycle and close signal racing on one position → one closure
//! 7. Concurrent admissions for one user → never more than the cap

use std::sync::Arc;
use std::time::Duration;

use rust_decimal_macros::dec;
use uuid::Uuid;

use vigil_domain::{
    CloseReason, CloseSignal, CommissionType, HealthStatus, PendingOrderStatus, Pnl, Position, Price, Side,
};
use vigil_exec::{StubDownstream, StubFearGreed, StubPriceOracle};
use vigil_store::{MemoryStore, Store};
use vigild::{
    admit, apply_close_signal, record_commission, run_operations_cycle, sweep_incomplete_closures,
    AdmissionRequest, CommissionStep, Config, DaemonEvent, SupervisorContext,
};

// =============================================================================
// Harness
// =============================================================================

struct Harness {
    ctx: SupervisorContext,
    store: Arc<MemoryStore>,
    oracle: Arc<StubPriceOracle>,
    downstream: Arc<StubDownstream>,
}

async fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let oracle = Arc::new(StubPriceOracle::with_price("BTCUSDT", dec!(60000)));
    let downstream = Arc::new(StubDownstream::new());
    let ctx = SupervisorContext::new(
        Config::test(),
        store.clone(),
        oracle.clone(),
        Arc::new(StubFearGreed::new(50)),
        downstream.clone(),
    )
    .unwrap();

    // Every stub endpoint answers its health check
    ctx.dispatcher.probe_health().await;

    Harness {
        ctx,
        store,
        oracle,
        downstream,
    }
}

fn long_request(user_id: Uuid, entry_price: rust_decimal::Decimal) -> AdmissionRequest {
    AdmissionRequest {
        user_id,
        symbol: "BTCUSDT".to_string(),
        side: Side::Long,
        entry_price,
        quantity: dec!(1000),
        leverage: None,
    }
}

async fn stored(h: &Harness, position: &Position) -> Position {
    h.store.positions().find_by_id(position.id).await.unwrap().unwrap()
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_close_signal_closes_both_users_commission_only_on_profit() {
    let h = harness().await;
    let winner = admit(&h.ctx, long_request(Uuid::now_v7(), dec!(60000))).await.unwrap();
    let loser = admit(&h.ctx, long_request(Uuid::now_v7(), dec!(70000))).await.unwrap();

    let signal = CloseSignal::new(Side::Long, Price::new(dec!(66000)).unwrap());
    let report = apply_close_signal(&h.ctx, signal).await.unwrap();
    assert_eq!(report.closed.len(), 2);
    assert_eq!(report.failed, 0);

    // 10% move at 10x on 1000 USD
    let winner = stored(&h, &winner).await;
    assert_eq!(winner.close_reason, Some(CloseReason::ManualSignal));
    assert_eq!(winner.exit_price, Some(Price::new(dec!(66000)).unwrap()));
    assert_eq!(winner.pnl_percent, dec!(100));
    assert_eq!(winner.pnl_usd, dec!(1000));
    assert!(winner.is_pipeline_complete());

    let loser = stored(&h, &loser).await;
    assert_eq!(loser.close_reason, Some(CloseReason::ManualSignal));
    assert!(loser.pnl_usd < dec!(0));
    assert!(loser.is_pipeline_complete());

    assert_eq!(h.store.commission_count(), 1);
    let record = h
        .store
        .commissions()
        .find_by_operation(winner.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.amount, dec!(100));
    assert_eq!(record.commission_type, CommissionType::Referent);
    assert!(h
        .store
        .commissions()
        .find_by_operation(loser.id)
        .await
        .unwrap()
        .is_none());

    // Two closures recorded, one commission charged, no affiliate credit
    assert_eq!(h.downstream.delivered_to("http://accounting.test").len(), 2);
    assert_eq!(h.downstream.delivered_to("http://commission.test").len(), 1);
    assert!(h.downstream.delivered_to("http://payments.test").is_empty());
    assert!(h.ctx.positions.is_empty().await);
}

#[tokio::test]
async fn test_commission_step_is_exactly_once() {
    let h = harness().await;
    let admitted = admit(&h.ctx, long_request(Uuid::now_v7(), dec!(60000))).await.unwrap();

    let mut closed = admitted.clone();
    closed
        .close(
            Price::new(dec!(61000)).unwrap(),
            Pnl {
                usd: dec!(166.6),
                percent: dec!(16.66),
            },
            CloseReason::TakeProfit,
        )
        .unwrap();
    h.ctx.positions.persist(&closed).await.unwrap();

    let first = record_commission(&h.ctx, &closed).await.unwrap();
    let second = record_commission(&h.ctx, &closed).await.unwrap();
    assert!(matches!(first, CommissionStep::Recorded(_)));
    assert!(matches!(second, CommissionStep::AlreadyRecorded(Some(_))));

    // The sweep finishes notification without a second record
    let sweep = sweep_incomplete_closures(&h.ctx).await.unwrap();
    assert_eq!(sweep.completed, 1);
    assert_eq!(h.store.commission_count(), 1);
    assert!(stored(&h, &closed).await.is_pipeline_complete());
}

#[tokio::test]
async fn test_offline_service_order_is_queued_then_sent() {
    let h = harness().await;
    h.downstream.set_unreachable("http://commission.test", true);
    h.ctx.dispatcher.probe_health().await;
    assert!(!h.ctx.dispatcher.registry().is_online("commission").await);

    admit(&h.ctx, long_request(Uuid::now_v7(), dec!(60000))).await.unwrap();
    let signal = CloseSignal::new(Side::Long, Price::new(dec!(63000)).unwrap());
    apply_close_signal(&h.ctx, signal).await.unwrap();

    // Accounting delivered, commission parked
    assert_eq!(h.downstream.delivered_to("http://accounting.test").len(), 1);
    assert!(h.downstream.delivered_to("http://commission.test").is_empty());
    let pending = h.store.pending_orders().find_pending().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].microservice_name, "commission");

    // Offline services are skipped without spending an attempt
    let summary = h.ctx.dispatcher.retry_pending().await.unwrap();
    assert_eq!(summary.skipped_offline, 1);

    h.downstream.set_unreachable("http://commission.test", false);
    let changes = h.ctx.dispatcher.probe_health().await;
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].current, HealthStatus::Online);

    let summary = h.ctx.dispatcher.retry_pending().await.unwrap();
    assert_eq!(summary.sent, 1);
    assert_eq!(h.downstream.delivered_to("http://commission.test").len(), 1);

    let order = h
        .store
        .pending_orders()
        .find_by_id(pending[0].id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.status, PendingOrderStatus::Sent);
}

#[tokio::test]
async fn test_out_of_band_closure_is_reported_and_evicted() {
    let h = harness().await;
    let mut events = h.ctx.event_bus.subscribe();
    let admitted = admit(&h.ctx, long_request(Uuid::now_v7(), dec!(60000))).await.unwrap();

    // Another writer closes the row
    let mut elsewhere = admitted.clone();
    elsewhere
        .close(
            Price::new(dec!(60100)).unwrap(),
            Pnl::default(),
            CloseReason::ManualSignal,
        )
        .unwrap();
    h.store.positions().save(&elsewhere).await.unwrap();

    let report = run_operations_cycle(&h.ctx).await.unwrap();
    assert_eq!(report.diverged, 1);
    assert_eq!(report.evaluated, 0);
    assert!(h.ctx.positions.get(admitted.id).await.is_none());

    let diverged = events.drain().into_iter().any(|e| {
        matches!(e, DaemonEvent::ReconciliationDivergence { position_id, .. } if position_id == admitted.id)
    });
    assert!(diverged);

    // The supervisor never touched the closed row
    let row = stored(&h, &admitted).await;
    assert_eq!(row.exit_price, Some(Price::new(dec!(60100)).unwrap()));
    assert_eq!(h.store.commission_count(), 0);
}

#[tokio::test]
async fn test_per_user_cap_frees_slot_on_close() {
    let h = harness().await;
    let user = Uuid::now_v7();

    admit(&h.ctx, long_request(user, dec!(60000))).await.unwrap();
    admit(&h.ctx, long_request(user, dec!(60000))).await.unwrap();
    let rejected = admit(&h.ctx, long_request(user, dec!(60000))).await.unwrap_err();
    assert!(rejected.is_validation());
    assert_eq!(h.store.position_count(), 2);

    // Stop-loss on both at 10x: 1% down is -10%
    h.oracle.set_price("BTCUSDT", dec!(59400));
    let report = run_operations_cycle(&h.ctx).await.unwrap();
    assert_eq!(report.closed, 2);

    assert!(admit(&h.ctx, long_request(user, dec!(59400))).await.is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cycle_and_signal_race_closes_once() {
    for delay_ms in [0u64, 5, 20] {
        let h = harness().await;
        let admitted = admit(&h.ctx, long_request(Uuid::now_v7(), dec!(60000))).await.unwrap();
        let mut events = h.ctx.event_bus.subscribe();

        // The market is past take-profit while a manual close arrives
        h.oracle.set_price("BTCUSDT", dec!(69000));
        h.oracle.set_delay(Some(Duration::from_millis(delay_ms)));
        let signal = CloseSignal::new(Side::Long, Price::new(dec!(66000)).unwrap());

        let (cycle, signalled) = tokio::join!(
            run_operations_cycle(&h.ctx),
            apply_close_signal(&h.ctx, signal)
        );
        let cycle = cycle.unwrap();
        let signalled = signalled.unwrap();

        assert_eq!(cycle.closed + signalled.closed.len(), 1, "delay {}ms", delay_ms);
        assert_eq!(cycle.diverged, 0);
        assert_eq!(signalled.failed, 0);

        let row = stored(&h, &admitted).await;
        assert!(row.is_closed());
        assert!(row.is_pipeline_complete());
        assert_eq!(h.store.commission_count(), 1);

        let closed_events = events
            .drain()
            .into_iter()
            .filter(|e| matches!(e, DaemonEvent::PositionClosed { position_id, .. } if *position_id == admitted.id))
            .count();
        assert_eq!(closed_events, 1);
        assert!(h.ctx.positions.is_empty().await);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_admissions_never_exceed_cap() {
    let h = harness().await;
    let user = Uuid::now_v7();

    let observer = {
        let store = h.store.clone();
        tokio::spawn(async move {
            let mut peak = 0;
            for _ in 0..500 {
                let active = store
                    .positions()
                    .find_by_user(user)
                    .await
                    .unwrap()
                    .iter()
                    .filter(|p| p.is_active())
                    .count();
                peak = peak.max(active);
                tokio::task::yield_now().await;
            }
            peak
        })
    };

    let admissions: Vec<_> = (0..8)
        .map(|_| {
            let ctx = h.ctx.clone();
            tokio::spawn(async move { admit(&ctx, long_request(user, dec!(60000))).await })
        })
        .collect();

    let mut admitted = 0;
    for admission in admissions {
        match admission.await.unwrap() {
            Ok(_) => admitted += 1,
            Err(e) => assert!(e.is_validation(), "unexpected error: {}", e),
        }
    }

    assert_eq!(admitted, 2);
    assert!(observer.await.unwrap() <= 2);
    assert_eq!(h.store.position_count(), 2);
}
