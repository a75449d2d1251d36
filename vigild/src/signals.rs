//! Manual close signals.
//!
//! A signal closes every active position on its side (optionally narrowed
//! to one symbol) at the signal price, independent of thresholds.

use tracing::{info, warn};

use vigil_domain::{CloseSignal, PositionId};
use vigil_engine::evaluate_signal;

use crate::context::SupervisorContext;
use crate::error::{DaemonError, DaemonResult};
use crate::supervisor::{close_position, CloseOutcome};

/// Result of applying one close signal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignalReport {
    /// Cached positions the signal targeted
    pub matched: usize,
    pub closed: Vec<PositionId>,
    pub failed: usize,
}

/// Close every cached position the signal targets.
///
/// Each position is re-checked under its lock, so a position the operations
/// cycle closed a moment earlier is skipped rather than closed twice.
///
/// A price at which no targeted position's PnL can be represented is a
/// Validation error; when only some positions are affected, the others close
/// and the rest count as failed.
pub async fn apply_close_signal(ctx: &SupervisorContext, signal: CloseSignal) -> DaemonResult<SignalReport> {
    if let Some(symbol) = &signal.symbol {
        if !ctx.config.symbols.contains(symbol) {
            return Err(DaemonError::Validation(format!("Symbol {} is not supervised", symbol)));
        }
    }

    info!(
        direction = %signal.direction,
        price = %signal.price,
        symbol = ?signal.symbol.as_ref().map(|s| s.as_pair()),
        "Applying close signal"
    );

    let mut report = SignalReport::default();
    let mut unpriceable = 0usize;
    for (id, handle) in ctx.positions.entries().await {
        let mut guard = handle.lock().await;
        let closure = match evaluate_signal(&guard, &signal) {
            Ok(Some(closure)) => closure,
            Ok(None) => continue,
            Err(e) => {
                report.matched += 1;
                report.failed += 1;
                unpriceable += 1;
                warn!(position_id = %id, symbol = %guard.symbol, error = %e, "Signal price not applicable to position");
                continue;
            },
        };
        report.matched += 1;

        match close_position(ctx, &mut guard, closure).await {
            Ok(CloseOutcome::Closed(_)) => report.closed.push(id),
            Ok(CloseOutcome::ClosedOutOfBand) => {},
            Err(e) => {
                report.failed += 1;
                warn!(position_id = %id, error = %e, "Close signal could not close position");
            },
        }
    }

    if unpriceable > 0 && unpriceable == report.matched {
        return Err(DaemonError::Validation(format!(
            "Signal price {} is out of range for every targeted position",
            signal.price
        )));
    }

    info!(
        matched = report.matched,
        closed = report.closed.len(),
        failed = report.failed,
        "Close signal applied"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use rust_decimal_macros::dec;
    use std::sync::Arc;
    use uuid::Uuid;
    use vigil_domain::{CloseReason, Leverage, Position, Price, Quantity, Side, Symbol, Thresholds};
    use vigil_exec::{StubDownstream, StubFearGreed, StubPriceOracle};
    use vigil_store::{MemoryStore, Store};

    async fn setup() -> (SupervisorContext, Arc<MemoryStore>) {
        let memory = Arc::new(MemoryStore::new());
        let ctx = SupervisorContext::new(
            Config::test(),
            memory.clone(),
            Arc::new(StubPriceOracle::new()),
            Arc::new(StubFearGreed::new(50)),
            Arc::new(StubDownstream::new()),
        )
        .unwrap();
        (ctx, memory)
    }

    async fn seed(ctx: &SupervisorContext, symbol: &str, side: Side) -> Position {
        let position = Position::new(
            Uuid::now_v7(),
            Symbol::from_pair(symbol).unwrap(),
            side,
            Price::new(dec!(60000)).unwrap(),
            Quantity::new(dec!(1000)).unwrap(),
            Leverage::new(1).unwrap(),
            Thresholds::new(dec!(15), dec!(10)).unwrap(),
        );
        ctx.positions.upsert(&position).await.unwrap();
        position
    }

    #[tokio::test]
    async fn test_signal_closes_only_its_side() {
        let (ctx, memory) = setup().await;
        let long = seed(&ctx, "BTCUSDT", Side::Long).await;
        let short = seed(&ctx, "BTCUSDT", Side::Short).await;

        let signal = CloseSignal::new(Side::Long, Price::new(dec!(61000)).unwrap());
        let report = apply_close_signal(&ctx, signal).await.unwrap();

        assert_eq!(report.closed, vec![long.id]);
        let stored = memory.positions().find_by_id(long.id).await.unwrap().unwrap();
        assert_eq!(stored.close_reason, Some(CloseReason::ManualSignal));
        assert_eq!(stored.exit_price, Some(Price::new(dec!(61000)).unwrap()));
        assert!(ctx.positions.get(short.id).await.is_some());
    }

    #[tokio::test]
    async fn test_symbol_narrowing() {
        let (ctx, _) = setup().await;
        let btc = seed(&ctx, "BTCUSDT", Side::Long).await;
        let eth = seed(&ctx, "ETHUSDT", Side::Long).await;

        let signal = CloseSignal::new(Side::Long, Price::new(dec!(3000)).unwrap())
            .with_symbol(Symbol::from_pair("ETHUSDT").unwrap());
        let report = apply_close_signal(&ctx, signal).await.unwrap();

        assert_eq!(report.closed, vec![eth.id]);
        assert!(ctx.positions.get(btc.id).await.is_some());
    }

    #[tokio::test]
    async fn test_unsupervised_symbol_rejected() {
        let (ctx, _) = setup().await;
        let signal = CloseSignal::new(Side::Long, Price::new(dec!(1)).unwrap())
            .with_symbol(Symbol::from_pair("DOGEUSDT").unwrap());

        assert!(matches!(
            apply_close_signal(&ctx, signal).await,
            Err(DaemonError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_out_of_range_price_is_rejected() {
        let (ctx, memory) = setup().await;
        let position = seed(&ctx, "BTCUSDT", Side::Long).await;
        let signal = CloseSignal::new(Side::Long, Price::new(dec!(70000000000000000000000000000)).unwrap());

        assert!(matches!(
            apply_close_signal(&ctx, signal).await,
            Err(DaemonError::Validation(_))
        ));
        assert!(ctx.positions.get(position.id).await.is_some());
        let stored = memory.positions().find_by_id(position.id).await.unwrap().unwrap();
        assert!(stored.is_active());
    }

    #[tokio::test]
    async fn test_out_of_range_price_does_not_block_other_positions() {
        let (ctx, _) = setup().await;
        let large = seed(&ctx, "BTCUSDT", Side::Long).await;
        let small = Position::new(
            Uuid::now_v7(),
            Symbol::from_pair("BTCUSDT").unwrap(),
            Side::Long,
            Price::new(dec!(60000)).unwrap(),
            Quantity::new(dec!(1)).unwrap(),
            Leverage::new(1).unwrap(),
            Thresholds::new(dec!(15), dec!(10)).unwrap(),
        );
        ctx.positions.upsert(&small).await.unwrap();

        let signal = CloseSignal::new(Side::Long, Price::new(dec!(70000000000000000000000000000)).unwrap());
        let report = apply_close_signal(&ctx, signal).await.unwrap();

        assert_eq!(report.matched, 2);
        assert_eq!(report.closed, vec![small.id]);
        assert_eq!(report.failed, 1);
        assert!(ctx.positions.get(large.id).await.is_some());
    }

    #[tokio::test]
    async fn test_repeated_signal_is_noop() {
        let (ctx, memory) = setup().await;
        seed(&ctx, "BTCUSDT", Side::Long).await;
        let signal = CloseSignal::new(Side::Long, Price::new(dec!(66000)).unwrap());

        let first = apply_close_signal(&ctx, signal.clone()).await.unwrap();
        let second = apply_close_signal(&ctx, signal).await.unwrap();

        assert_eq!(first.closed.len(), 1);
        assert_eq!(second.matched, 0);
        assert_eq!(memory.commission_count(), 1);
    }
}
