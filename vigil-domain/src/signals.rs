//! External market inputs: close signals and Fear & Greed direction gating.

use crate::value_objects::{DomainError, Price, Side, Symbol};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// =============================================================================
// Close Signal
// =============================================================================

/// Request to close every active position on one side, at a given price
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseSignal {
    /// Side to close
    pub direction: Side,
    /// Price the closure is evaluated at
    pub price: Price,
    /// When set, only positions on this symbol are closed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<Symbol>,
}

impl CloseSignal {
    /// Structured form
    pub fn new(direction: Side, price: Price) -> Self {
        Self {
            direction,
            price,
            symbol: None,
        }
    }

    /// Narrow the signal to a single symbol
    pub fn with_symbol(mut self, symbol: Symbol) -> Self {
        self.symbol = Some(symbol);
        self
    }

    /// Parse the textual command form, e.g. `"FECHE LONG"` or `"close short"`
    ///
    /// # Errors
    /// `DomainError::InvalidSignal` for malformed text, `DomainError::InvalidPrice`
    /// for a non-positive price.
    pub fn parse(command: &str, price: Decimal) -> Result<Self, DomainError> {
        let mut words = command.split_whitespace();
        let verb = words.next().map(str::to_uppercase);
        let direction = words.next();

        match (verb.as_deref(), direction, words.next()) {
            (Some("FECHE") | Some("CLOSE"), Some(direction), None) => {
                let direction = direction
                    .parse::<Side>()
                    .map_err(|_| DomainError::InvalidSignal(format!("Unknown direction in {:?}", command)))?;
                Ok(Self::new(direction, Price::new(price)?))
            }
            _ => Err(DomainError::InvalidSignal(format!(
                "Expected \"FECHE LONG\" or \"FECHE SHORT\", got {:?}",
                command
            ))),
        }
    }

    /// Whether the signal targets a position with this side and symbol
    pub fn matches(&self, side: Side, symbol: &Symbol) -> bool {
        self.direction == side && self.symbol.as_ref().map(|s| s == symbol).unwrap_or(true)
    }
}

// =============================================================================
// Market Direction (Fear & Greed)
// =============================================================================

/// Directions a new position may take given the Fear & Greed index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketDirection {
    /// Index value, 0 (extreme fear) to 100 (extreme greed)
    pub value: u8,
    /// Sides admission accepts
    pub allowed_directions: Vec<Side>,
}

impl MarketDirection {
    /// Default lower bound: below it only LONG is allowed
    pub const LONG_ONLY_BELOW: u8 = 30;
    /// Default upper bound: above it only SHORT is allowed
    pub const SHORT_ONLY_ABOVE: u8 = 80;

    /// Derive allowed directions from an index value
    pub fn from_index(value: u8, long_only_below: u8, short_only_above: u8) -> Result<Self, DomainError> {
        if value > 100 {
            return Err(DomainError::InvalidMarketDirection(format!(
                "Fear & Greed index must be within 0..=100, got {}",
                value
            )));
        }

        let allowed_directions = if value < long_only_below {
            vec![Side::Long]
        } else if value > short_only_above {
            vec![Side::Short]
        } else {
            vec![Side::Long, Side::Short]
        };

        Ok(Self { value, allowed_directions })
    }

    /// Both sides allowed; used when no index is available
    pub fn neutral(value: u8) -> Self {
        Self {
            value,
            allowed_directions: vec![Side::Long, Side::Short],
        }
    }

    pub fn allows(&self, side: Side) -> bool {
        self.allowed_directions.contains(&side)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_textual_command() {
        let signal = CloseSignal::parse("FECHE LONG", dec!(66000)).unwrap();
        assert_eq!(signal.direction, Side::Long);
        assert_eq!(signal.price.as_decimal(), dec!(66000));
        assert!(signal.symbol.is_none());

        let signal = CloseSignal::parse("  close   short ", dec!(1.5)).unwrap();
        assert_eq!(signal.direction, Side::Short);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(matches!(
            CloseSignal::parse("FECHE", dec!(100)),
            Err(DomainError::InvalidSignal(_))
        ));
        assert!(matches!(
            CloseSignal::parse("OPEN LONG", dec!(100)),
            Err(DomainError::InvalidSignal(_))
        ));
        assert!(matches!(
            CloseSignal::parse("FECHE SIDEWAYS", dec!(100)),
            Err(DomainError::InvalidSignal(_))
        ));
        assert!(matches!(
            CloseSignal::parse("FECHE LONG NOW", dec!(100)),
            Err(DomainError::InvalidSignal(_))
        ));
        assert!(matches!(
            CloseSignal::parse("FECHE LONG", dec!(0)),
            Err(DomainError::InvalidPrice(_))
        ));
    }

    #[test]
    fn test_signal_matching() {
        let btc = Symbol::from_pair("BTCUSDT").unwrap();
        let eth = Symbol::from_pair("ETHUSDT").unwrap();
        let signal = CloseSignal::new(Side::Long, Price::new(dec!(100)).unwrap());

        assert!(signal.matches(Side::Long, &btc));
        assert!(signal.matches(Side::Long, &eth));
        assert!(!signal.matches(Side::Short, &btc));

        let narrowed = signal.with_symbol(btc.clone());
        assert!(narrowed.matches(Side::Long, &btc));
        assert!(!narrowed.matches(Side::Long, &eth));
    }

    #[test]
    fn test_market_direction_bands() {
        let fear = MarketDirection::from_index(12, 30, 80).unwrap();
        assert_eq!(fear.allowed_directions, vec![Side::Long]);

        let neutral = MarketDirection::from_index(50, 30, 80).unwrap();
        assert!(neutral.allows(Side::Long) && neutral.allows(Side::Short));

        let greed = MarketDirection::from_index(91, 30, 80).unwrap();
        assert_eq!(greed.allowed_directions, vec![Side::Short]);

        // Bounds are exclusive
        assert_eq!(MarketDirection::from_index(30, 30, 80).unwrap().allowed_directions.len(), 2);
        assert_eq!(MarketDirection::from_index(80, 30, 80).unwrap().allowed_directions.len(), 2);

        assert!(MarketDirection::from_index(101, 30, 80).is_err());
    }
}
