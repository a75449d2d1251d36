//! Closure rules: take-profit, stop-loss and manual close signals.
//!
//! Decision order for an active position:
//! 1. A close signal for the position's side closes it at the signal price
//! 2. `pnl_percent >= take_profit_percent` → TAKE_PROFIT
//! 3. `pnl_percent <= -stop_loss_percent` → STOP_LOSS
//! 4. Otherwise hold
//!
//! Closed positions are terminal and never produce a decision. A price whose
//! PnL cannot be represented is an error, never a decision.

use rust_decimal::Decimal;
use vigil_domain::{CloseReason, CloseSignal, Pnl, Position, Price, Thresholds};

use crate::error::EngineError;
use crate::pnl::compute_pnl;

/// A closure the caller must persist
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Closure {
    pub reason: CloseReason,
    pub exit_price: Price,
    /// Realized PnL at `exit_price`
    pub pnl: Pnl,
}

/// Outcome of evaluating one position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosureDecision {
    /// Position is already CLOSED
    Terminal,
    /// Keep the position open; the caller refreshes its mark
    Hold { price: Price, pnl: Pnl },
    /// Close the position
    Close(Closure),
}

impl ClosureDecision {
    pub fn closure(&self) -> Option<&Closure> {
        match self {
            ClosureDecision::Close(closure) => Some(closure),
            _ => None,
        }
    }
}

/// Threshold rule on leveraged PnL%, take-profit first
pub fn threshold_reason(pnl_percent: Decimal, thresholds: &Thresholds) -> Option<CloseReason> {
    if pnl_percent >= thresholds.take_profit_percent {
        Some(CloseReason::TakeProfit)
    } else if pnl_percent <= -thresholds.stop_loss_percent {
        Some(CloseReason::StopLoss)
    } else {
        None
    }
}

/// Evaluate a position against the latest market price and an optional signal
pub fn evaluate(
    position: &Position,
    market_price: Price,
    signal: Option<&CloseSignal>,
) -> Result<ClosureDecision, EngineError> {
    if position.is_closed() {
        return Ok(ClosureDecision::Terminal);
    }

    if let Some(signal) = signal {
        if let Some(closure) = evaluate_signal(position, signal)? {
            return Ok(ClosureDecision::Close(closure));
        }
    }

    let pnl = pnl_at(position, market_price)?;
    let decision = match threshold_reason(pnl.percent, &position.thresholds()) {
        Some(reason) => ClosureDecision::Close(Closure {
            reason,
            exit_price: market_price,
            pnl,
        }),
        None => ClosureDecision::Hold {
            price: market_price,
            pnl,
        },
    };
    Ok(decision)
}

/// Manual-close branch only: closes at the signal price when the signal targets
/// this position's side (and symbol, when narrowed)
pub fn evaluate_signal(position: &Position, signal: &CloseSignal) -> Result<Option<Closure>, EngineError> {
    if position.is_closed() || !signal.matches(position.side, &position.symbol) {
        return Ok(None);
    }

    Ok(Some(Closure {
        reason: CloseReason::ManualSignal,
        exit_price: signal.price,
        pnl: pnl_at(position, signal.price)?,
    }))
}

fn pnl_at(position: &Position, price: Price) -> Result<Pnl, EngineError> {
    compute_pnl(position.side, position.entry_price, price, position.quantity, position.leverage)
}
