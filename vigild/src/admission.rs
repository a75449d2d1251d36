//! Position admission: the only way a position enters supervision.

use rust_decimal::Decimal;
use serde::Deserialize;

use vigil_domain::{Leverage, MarketDirection, Position, Price, Quantity, Side, Symbol, UserId};
use vigil_exec::ExecError;

use crate::context::SupervisorContext;
use crate::error::{DaemonError, DaemonResult};
use crate::event_bus::DaemonEvent;

/// A request to open a position, as received from the API.
#[derive(Debug, Clone, Deserialize)]
pub struct AdmissionRequest {
    pub user_id: UserId,
    pub symbol: String,
    pub side: Side,
    pub entry_price: Decimal,
    /// USD amount the PnL percentage applies to
    pub quantity: Decimal,
    /// Defaults to the configured leverage
    #[serde(default)]
    pub leverage: Option<u32>,
}

/// Validate a request and admit it as a PENDING position.
///
/// Thresholds come from the symbol table. The side must be allowed by the
/// current Fear & Greed direction, and the user must be under the
/// per-user cap. A sentiment lookup failure rejects the request.
pub async fn admit(ctx: &SupervisorContext, request: AdmissionRequest) -> DaemonResult<Position> {
    let symbol = Symbol::from_pair(&request.symbol)?;
    let thresholds = ctx
        .config
        .symbols
        .thresholds(&symbol)
        .ok_or_else(|| DaemonError::Validation(format!("Symbol {} is not supervised", symbol)))?;
    let entry_price = Price::new(request.entry_price)?;
    let quantity = Quantity::new(request.quantity)?;
    let leverage = match request.leverage {
        Some(value) => Leverage::new(value)?,
        None => ctx.config.positions.default_leverage,
    };

    let direction = market_direction(ctx).await?;

    let position = Position::new(
        request.user_id,
        symbol,
        request.side,
        entry_price,
        quantity,
        leverage,
        thresholds,
    );
    let admitted = ctx
        .positions
        .admit(position, &direction, ctx.config.positions.max_positions_per_user)
        .await?;

    ctx.event_bus.send(DaemonEvent::PositionAdmitted {
        position_id: admitted.id,
        user_id: admitted.user_id,
        symbol: admitted.symbol.clone(),
        side: admitted.side,
        timestamp: admitted.created_at,
    });
    ctx.metrics.cached_positions.set(ctx.positions.len().await as i64);

    Ok(admitted)
}

async fn market_direction(ctx: &SupervisorContext) -> DaemonResult<MarketDirection> {
    match tokio::time::timeout(ctx.config.call_timeout, ctx.fear_greed.market_direction()).await {
        Ok(direction) => Ok(direction?),
        Err(_) => Err(ExecError::Timeout(format!(
            "Fear & Greed lookup exceeded {:?}",
            ctx.config.call_timeout
        ))
        .into()),
    }
}
