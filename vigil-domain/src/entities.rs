//! Domain Entities for Vigil
//!
//! Core business entities with lifecycle management.
//! All entities have identity and state transitions.

use crate::orders::OrderPayload;
use crate::value_objects::{
    DomainError, Leverage, Pnl, Price, Quantity, Side, Symbol, Thresholds,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// =============================================================================
// Identifiers
// =============================================================================

/// Unique identifier for a Position (also the commission operation id)
pub type PositionId = Uuid;

/// Unique identifier for a user of the platform
pub type UserId = Uuid;

/// Unique identifier for a queued downstream order
pub type PendingOrderId = Uuid;

/// Implements `as_str` / `FromStr` / `Display` for a storage-mapped enum.
macro_rules! storage_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            /// Storage / wire representation
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(DomainError::UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

// =============================================================================
// Position
// =============================================================================

/// A leveraged position supervised by the engine
///
/// Key concepts:
/// - Status only moves forward: `PENDING → OPEN → CLOSED`
/// - Once closed, trading fields are frozen; only the two pipeline flags
///   (`commission_calculated`, `downstream_notified`) may still flip to true
/// - `quantity` is the USD amount the PnL formula is applied to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    pub user_id: UserId,
    pub symbol: Symbol,
    pub side: Side,
    pub status: PositionStatus,

    // Entry parameters
    pub entry_price: Price,
    pub quantity: Quantity,
    pub leverage: Leverage,
    pub take_profit_percent: Decimal,
    pub stop_loss_percent: Decimal,

    // Live evaluation
    pub current_price: Option<Price>,
    pub pnl_usd: Decimal,
    pub pnl_percent: Decimal,

    // Closure
    pub exit_price: Option<Price>,
    pub close_reason: Option<CloseReason>,

    // Closure pipeline flags
    pub commission_calculated: bool,
    pub downstream_notified: bool,

    /// Fear & Greed value observed when the position was admitted
    pub fear_greed_index: Option<u8>,

    // Audit
    pub opened_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Position {
    /// Create a new PENDING position
    pub fn new(
        user_id: UserId,
        symbol: Symbol,
        side: Side,
        entry_price: Price,
        quantity: Quantity,
        leverage: Leverage,
        thresholds: Thresholds,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            user_id,
            symbol,
            side,
            status: PositionStatus::Pending,
            entry_price,
            quantity,
            leverage,
            take_profit_percent: thresholds.take_profit_percent,
            stop_loss_percent: thresholds.stop_loss_percent,
            current_price: Some(entry_price),
            pnl_usd: Decimal::ZERO,
            pnl_percent: Decimal::ZERO,
            exit_price: None,
            close_reason: None,
            commission_calculated: false,
            downstream_notified: false,
            fear_greed_index: None,
            opened_at: None,
            closed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Thresholds configured for this position
    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            take_profit_percent: self.take_profit_percent,
            stop_loss_percent: self.stop_loss_percent,
        }
    }

    /// Current PnL snapshot
    pub fn pnl(&self) -> Pnl {
        Pnl {
            usd: self.pnl_usd,
            percent: self.pnl_percent,
        }
    }

    /// PENDING or OPEN
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Check if position is closed
    pub fn is_closed(&self) -> bool {
        matches!(self.status, PositionStatus::Closed)
    }

    /// Transition PENDING → OPEN
    pub fn open(&mut self) -> Result<(), DomainError> {
        if self.status != PositionStatus::Pending {
            return Err(DomainError::InvalidStateTransition(format!(
                "Cannot open position {} from {}",
                self.id, self.status
            )));
        }
        let now = Utc::now();
        self.status = PositionStatus::Open;
        self.opened_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Record a fresh price observation and the PnL computed from it
    pub fn mark_price(&mut self, price: Price, pnl: Pnl) -> Result<(), DomainError> {
        if self.is_closed() {
            return Err(DomainError::InvalidStateTransition(format!(
                "Position {} is closed, price updates are rejected",
                self.id
            )));
        }
        self.current_price = Some(price);
        self.pnl_usd = pnl.usd;
        self.pnl_percent = pnl.percent;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Transition PENDING/OPEN → CLOSED
    ///
    /// The PnL passed in is the realized PnL at `exit_price`.
    pub fn close(&mut self, exit_price: Price, pnl: Pnl, reason: CloseReason) -> Result<(), DomainError> {
        if self.is_closed() {
            return Err(DomainError::InvalidStateTransition(format!(
                "Position {} is already closed ({:?})",
                self.id, self.close_reason
            )));
        }
        let now = Utc::now();
        self.status = PositionStatus::Closed;
        self.current_price = Some(exit_price);
        self.exit_price = Some(exit_price);
        self.pnl_usd = pnl.usd;
        self.pnl_percent = pnl.percent;
        self.close_reason = Some(reason);
        self.closed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Closed with a strictly positive profit: commission applies
    pub fn is_commissionable(&self) -> bool {
        self.is_closed() && self.pnl_usd > Decimal::ZERO
    }

    /// Closed, commissionable, and the commission step has not run yet
    pub fn needs_commission(&self) -> bool {
        self.is_commissionable() && !self.commission_calculated
    }

    /// Every step after the closure has been carried out
    pub fn is_pipeline_complete(&self) -> bool {
        self.is_closed()
            && (self.commission_calculated || !self.is_commissionable())
            && self.downstream_notified
    }
}

// =============================================================================
// Position Status
// =============================================================================

/// Position lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionStatus {
    /// Accepted, waiting for the entry fill
    Pending,
    /// Live, monitored every cycle
    Open,
    /// Terminal
    Closed,
}

impl PositionStatus {
    /// PENDING or OPEN
    pub fn is_active(&self) -> bool {
        matches!(self, PositionStatus::Pending | PositionStatus::Open)
    }
}

storage_enum!(PositionStatus, "position status", {
    Pending => "PENDING",
    Open => "OPEN",
    Closed => "CLOSED",
});

/// Why a position was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CloseReason {
    /// Leveraged PnL reached the take-profit threshold
    TakeProfit,
    /// Leveraged PnL fell to the stop-loss threshold
    StopLoss,
    /// External close signal for the position's direction
    ManualSignal,
}

storage_enum!(CloseReason, "close reason", {
    TakeProfit => "TAKE_PROFIT",
    StopLoss => "STOP_LOSS",
    ManualSignal => "MANUAL_SIGNAL",
});

// =============================================================================
// Commission
// =============================================================================

/// Commission category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CommissionType {
    /// Backed by a real-money payment: counts for affiliate payout and refunds
    Real,
    /// Bonus commission, recorded for accounting only
    Referent,
}

storage_enum!(CommissionType, "commission type", {
    Real => "REAL",
    Referent => "REFERENT",
});

/// Billing plan of a user, selects the commission percentage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UserPlan {
    /// Recurring subscription
    Subscription,
    /// Prepaid credit
    Prepaid,
}

storage_enum!(UserPlan, "user plan", {
    Subscription => "SUBSCRIPTION",
    Prepaid => "PREPAID",
});

/// One commission per closed, profitable operation
///
/// `operation_id` is the id of the closed position and is unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommissionRecord {
    pub operation_id: PositionId,
    pub user_id: UserId,
    pub amount: Decimal,
    pub commission_type: CommissionType,
    pub counts_for_affiliate: bool,
    pub counts_for_refund: bool,
    pub plan: UserPlan,
    pub plan_percent: Decimal,
    pub created_at: DateTime<Utc>,
}

impl CommissionRecord {
    /// Build a record; the affiliate/refund flags follow the commission type
    pub fn new(
        operation_id: PositionId,
        user_id: UserId,
        amount: Decimal,
        commission_type: CommissionType,
        plan: UserPlan,
        plan_percent: Decimal,
    ) -> Self {
        let is_real = commission_type == CommissionType::Real;
        Self {
            operation_id,
            user_id,
            amount,
            commission_type,
            counts_for_affiliate: is_real,
            counts_for_refund: is_real,
            plan,
            plan_percent,
            created_at: Utc::now(),
        }
    }
}

// =============================================================================
// Payments (read-only view of the billing ledger)
// =============================================================================

/// How a payment was made
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentKind {
    Card,
    BankTransfer,
    Pix,
    Crypto,
    Bonus,
    Voucher,
}

impl PaymentKind {
    /// Money actually entered the platform
    pub fn is_real_money(&self) -> bool {
        matches!(
            self,
            PaymentKind::Card | PaymentKind::BankTransfer | PaymentKind::Pix | PaymentKind::Crypto
        )
    }
}

storage_enum!(PaymentKind, "payment kind", {
    Card => "CARD",
    BankTransfer => "BANK_TRANSFER",
    Pix => "PIX",
    Crypto => "CRYPTO",
    Bonus => "BONUS",
    Voucher => "VOUCHER",
});

/// Settlement status of a payment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Refunded,
}

storage_enum!(PaymentStatus, "payment status", {
    Pending => "PENDING",
    Completed => "COMPLETED",
    Refunded => "REFUNDED",
});

/// A user payment as reported by the billing ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub user_id: UserId,
    pub kind: PaymentKind,
    pub status: PaymentStatus,
    pub amount: Decimal,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Payment {
    /// Completed real-money payment settled at or after `since`
    pub fn is_recent_real_payment(&self, since: DateTime<Utc>) -> bool {
        self.status == PaymentStatus::Completed
            && self.kind.is_real_money()
            && self.completed_at.map(|at| at >= since).unwrap_or(false)
    }
}

// =============================================================================
// Pending Orders
// =============================================================================

/// Delivery status of a queued downstream order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PendingOrderStatus {
    /// Waiting for a retry
    Pending,
    /// Delivered
    Sent,
    /// Gave up (attempts exhausted or past the retry horizon)
    Failed,
}

storage_enum!(PendingOrderStatus, "pending order status", {
    Pending => "PENDING",
    Sent => "SENT",
    Failed => "FAILED",
});

/// A downstream notification that could not be delivered immediately
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOrder {
    pub id: PendingOrderId,
    pub microservice_name: String,
    pub payload: OrderPayload,
    pub status: PendingOrderStatus,
    pub attempts: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl PendingOrder {
    /// Queue a payload for a microservice
    pub fn new(microservice_name: impl Into<String>, payload: OrderPayload, reason: Option<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            microservice_name: microservice_name.into(),
            payload,
            status: PendingOrderStatus::Pending,
            attempts: 0,
            last_attempt_at: None,
            last_error: reason,
            created_at: Utc::now(),
        }
    }

    /// Still eligible for retry
    pub fn is_pending(&self) -> bool {
        self.status == PendingOrderStatus::Pending
    }

    /// Delivered on retry
    pub fn mark_sent(&mut self) {
        self.attempts += 1;
        self.last_attempt_at = Some(Utc::now());
        self.last_error = None;
        self.status = PendingOrderStatus::Sent;
    }

    /// Retry failed; gives up once `max_attempts` is reached
    pub fn record_failure(&mut self, error: impl Into<String>, max_attempts: u32) {
        self.attempts += 1;
        self.last_attempt_at = Some(Utc::now());
        self.last_error = Some(error.into());
        if self.attempts >= max_attempts {
            self.status = PendingOrderStatus::Failed;
        }
    }

    /// Dropped without replay (older than the retry horizon)
    pub fn expire(&mut self) {
        self.status = PendingOrderStatus::Failed;
        self.last_error = Some("expired: older than retry horizon".to_string());
    }
}

// =============================================================================
// Microservice Health
// =============================================================================

/// Last known reachability of a downstream microservice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Online,
    Offline,
}

storage_enum!(HealthStatus, "health status", {
    Online => "online",
    Offline => "offline",
});

/// Health snapshot of one downstream microservice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MicroserviceHealth {
    pub name: String,
    pub status: HealthStatus,
    pub endpoint: String,
    pub last_check: DateTime<Utc>,
}

impl MicroserviceHealth {
    /// Snapshot taken now
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>, status: HealthStatus) -> Self {
        Self {
            name: name.into(),
            status,
            endpoint: endpoint.into(),
            last_check: Utc::now(),
        }
    }

    /// Accepting orders
    pub fn is_online(&self) -> bool {
        self.status == HealthStatus::Online
    }
}

// =============================================================================
// Tests
// =============================================================================
