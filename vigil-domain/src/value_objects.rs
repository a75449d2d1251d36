//! Value Objects for the Vigil domain
//!
//! Immutable, validated domain primitives.
//! All value objects enforce invariants at construction time.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Domain errors for value object and entity validation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomainError {
    /// Price must be positive
    #[error("Invalid price: {0}")]
    InvalidPrice(String),

    /// Quantity must be positive
    #[error("Invalid quantity: {0}")]
    InvalidQuantity(String),

    /// Leverage must be at least 1x
    #[error("Invalid leverage: {0}")]
    InvalidLeverage(String),

    /// Symbol must be valid trading pair
    #[error("Invalid symbol: {0}")]
    InvalidSymbol(String),

    /// Take-profit / stop-loss thresholds must be positive
    #[error("Invalid threshold: {0}")]
    InvalidThreshold(String),

    /// Malformed close signal
    #[error("Invalid signal: {0}")]
    InvalidSignal(String),

    /// Fear & Greed index outside 0..=100
    #[error("Invalid market direction: {0}")]
    InvalidMarketDirection(String),

    /// Invalid state transition
    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    /// Unknown enum tag while decoding persisted data
    #[error("Unknown {kind}: {value}")]
    UnknownVariant {
        /// Which enum failed to decode
        kind: &'static str,
        /// The offending value
        value: String,
    },
}

// =============================================================================
// Price
// =============================================================================

/// Price represents a positive decimal price
///
/// # Invariants
/// - Must be > 0
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Price(Decimal);

impl Price {
    /// Create a new Price with validation
    ///
    /// # Errors
    /// Returns `DomainError::InvalidPrice` if value <= 0
    pub fn new(value: Decimal) -> Result<Self, DomainError> {
        if value <= Decimal::ZERO {
            return Err(DomainError::InvalidPrice(format!("Price must be positive, got {}", value)));
        }
        Ok(Self(value))
    }

    /// Get the underlying Decimal value
    pub fn as_decimal(&self) -> Decimal {
        self.0
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Quantity
// =============================================================================

/// Quantity is the position size in quote currency (USD notional)
///
/// # Invariants
/// - Must be > 0
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Quantity(Decimal);

impl Quantity {
    /// Create a new Quantity with validation
    ///
    /// # Errors
    /// Returns `DomainError::InvalidQuantity` if value <= 0
    pub fn new(value: Decimal) -> Result<Self, DomainError> {
        if value <= Decimal::ZERO {
            return Err(DomainError::InvalidQuantity(format!(
                "Quantity must be positive, got {}",
                value
            )));
        }
        Ok(Self(value))
    }

    /// Get the underlying Decimal value
    pub fn as_decimal(&self) -> Decimal {
        self.0
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Leverage
// =============================================================================

/// Leverage multiplier applied to PnL percentages
///
/// # Invariants
/// - Must be >= 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Leverage(u32);

impl Leverage {
    /// Highest leverage the supervisor accepts
    pub const MAX: u32 = 125;

    /// Create a new Leverage with validation
    pub fn new(value: u32) -> Result<Self, DomainError> {
        if value == 0 || value > Self::MAX {
            return Err(DomainError::InvalidLeverage(format!(
                "Leverage must be between 1 and {}, got {}",
                Self::MAX,
                value
            )));
        }
        Ok(Self(value))
    }

    /// Get the multiplier
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Multiplier as Decimal
    pub fn as_decimal(&self) -> Decimal {
        Decimal::from(self.0)
    }
}

impl fmt::Display for Leverage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x", self.0)
    }
}

// =============================================================================
// Symbol
// =============================================================================

/// Symbol represents a trading pair (e.g., BTCUSDT)
///
/// # Invariants
/// - Must be valid format (base + quote)
/// - Base and quote must be non-empty
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Symbol {
    base: String,
    quote: String,
}

impl Symbol {
    /// Create a Symbol from a trading pair string
    ///
    /// # Examples
    /// ```
    /// # use vigil_domain::value_objects::Symbol;
    /// let symbol = Symbol::from_pair("btcusdt").unwrap();
    /// assert_eq!(symbol.base(), "BTC");
    /// assert_eq!(symbol.quote(), "USDT");
    /// ```
    ///
    /// # Errors
    /// Returns `DomainError::InvalidSymbol` if format is invalid
    pub fn from_pair(pair: &str) -> Result<Self, DomainError> {
        const QUOTE_CURRENCIES: &[&str] = &["USDT", "USDC", "BUSD", "BRL", "BTC", "ETH"];

        let pair = pair.trim().to_uppercase();
        for quote in QUOTE_CURRENCIES {
            if let Some(base) = pair.strip_suffix(quote) {
                if !base.is_empty() && base.chars().all(|c| c.is_ascii_alphanumeric()) {
                    return Ok(Self {
                        base: base.to_string(),
                        quote: quote.to_string(),
                    });
                }
            }
        }

        Err(DomainError::InvalidSymbol(format!("Cannot parse trading pair: {}", pair)))
    }

    /// Get the base currency
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Get the quote currency
    pub fn quote(&self) -> &str {
        &self.quote
    }

    /// Get the trading pair as string (e.g., "BTCUSDT")
    pub fn as_pair(&self) -> String {
        format!("{}{}", self.base, self.quote)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.base, self.quote)
    }
}

// =============================================================================
// Side
// =============================================================================

/// Side represents the position direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    /// Long position (buy low, sell high)
    Long,
    /// Short position (sell high, buy low)
    Short,
}

impl Side {
    /// Storage / wire representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Long => "LONG",
            Side::Short => "SHORT",
        }
    }

    /// Sign applied to the raw price move (+1 long, -1 short)
    pub fn sign(&self) -> Decimal {
        match self {
            Side::Long => Decimal::ONE,
            Side::Short => Decimal::NEGATIVE_ONE,
        }
    }
}

impl FromStr for Side {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "LONG" | "BUY" => Ok(Side::Long),
            "SHORT" | "SELL" => Ok(Side::Short),
            other => Err(DomainError::UnknownVariant {
                kind: "side",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Thresholds
// =============================================================================

/// Take-profit / stop-loss thresholds, in leveraged PnL percent
///
/// `stop_loss_percent` is stored as a positive magnitude; the stop fires at
/// `pnl_percent <= -stop_loss_percent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thresholds {
    /// Close when PnL% reaches this value
    pub take_profit_percent: Decimal,
    /// Close when PnL% falls to minus this value
    pub stop_loss_percent: Decimal,
}

impl Thresholds {
    /// Create validated thresholds
    pub fn new(take_profit_percent: Decimal, stop_loss_percent: Decimal) -> Result<Self, DomainError> {
        if take_profit_percent <= Decimal::ZERO {
            return Err(DomainError::InvalidThreshold(format!(
                "Take-profit must be positive, got {}",
                take_profit_percent
            )));
        }
        if stop_loss_percent <= Decimal::ZERO {
            return Err(DomainError::InvalidThreshold(format!(
                "Stop-loss must be positive, got {}",
                stop_loss_percent
            )));
        }
        Ok(Self {
            take_profit_percent,
            stop_loss_percent,
        })
    }
}

impl fmt::Display for Thresholds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TP {}% / SL {}%", self.take_profit_percent, self.stop_loss_percent)
    }
}

// =============================================================================
// Pnl
// =============================================================================

/// Unrealized (or, once closed, realized) profit and loss of a position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Pnl {
    /// Profit in quote currency (USD)
    pub usd: Decimal,
    /// Leveraged profit percentage
    pub percent: Decimal,
}

impl Pnl {
    /// Whether the position is in profit (strictly positive)
    pub fn is_profit(&self) -> bool {
        self.usd > Decimal::ZERO
    }
}

impl fmt::Display for Pnl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} USD ({}%)", self.usd, self.percent)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_price_validation() {
        assert!(Price::new(dec!(66000)).is_ok());
        assert!(Price::new(dec!(0)).is_err());
        assert!(Price::new(dec!(-1)).is_err());
    }

    #[test]
    fn test_quantity_validation() {
        assert_eq!(Quantity::new(dec!(1000)).unwrap().as_decimal(), dec!(1000));
        assert!(Quantity::new(Decimal::ZERO).is_err());
    }

    #[test]
    fn test_leverage_bounds() {
        assert!(Leverage::new(0).is_err());
        assert!(Leverage::new(Leverage::MAX + 1).is_err());
        let lev = Leverage::new(5).unwrap();
        assert_eq!(lev.as_decimal(), dec!(5));
        assert_eq!(lev.to_string(), "5x");
    }

    #[test]
    fn test_symbol_from_pair() {
        let symbol = Symbol::from_pair("BTCUSDT").unwrap();
        assert_eq!(symbol.base(), "BTC");
        assert_eq!(symbol.quote(), "USDT");
        assert_eq!(symbol.as_pair(), "BTCUSDT");
    }

    #[test]
    fn test_symbol_normalizes_case() {
        let symbol = Symbol::from_pair(" ethusdt ").unwrap();
        assert_eq!(symbol.to_string(), "ETHUSDT");
    }

    #[test]
    fn test_symbol_invalid() {
        assert!(Symbol::from_pair("USDT").is_err());
        assert!(Symbol::from_pair("BTC-XYZ").is_err());
        assert!(Symbol::from_pair("BTC/USDT").is_err());
    }

    #[test]
    fn test_side_parse_and_sign() {
        assert_eq!("long".parse::<Side>().unwrap(), Side::Long);
        assert_eq!("SELL".parse::<Side>().unwrap(), Side::Short);
        assert!("sideways".parse::<Side>().is_err());
        assert_eq!(Side::Long.sign(), dec!(1));
        assert_eq!(Side::Short.sign(), dec!(-1));
    }

    #[test]
    fn test_side_serde_uppercase() {
        let json = serde_json::to_string(&Side::Short).unwrap();
        assert_eq!(json, "\"SHORT\"");
    }

    #[test]
    fn test_thresholds_validation() {
        assert!(Thresholds::new(dec!(15), dec!(10)).is_ok());
        assert!(Thresholds::new(dec!(0), dec!(10)).is_err());
        assert!(Thresholds::new(dec!(15), dec!(-10)).is_err());
    }
}
