//! Orders sent to downstream microservices.
//!
//! Wire form: `{"action": "...", ...fields, "timestamp": ..., "supervisor": ...}`.

use crate::entities::{CloseReason, CommissionType, PositionId, UserId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Action descriptor, discriminated by `action`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum OrderAction {
    /// Book a closed operation (accounting)
    RecordClosure {
        operation_id: PositionId,
        user_id: UserId,
        symbol: String,
        close_reason: CloseReason,
        exit_price: Decimal,
        pnl_usd: Decimal,
        pnl_percent: Decimal,
    },
    /// Charge the commission of a profitable operation (commission)
    ChargeCommission {
        operation_id: PositionId,
        user_id: UserId,
        commission_amount: Decimal,
        commission_type: CommissionType,
    },
    /// Credit the affiliate share of a REAL commission (payments)
    CreditAffiliate {
        operation_id: PositionId,
        user_id: UserId,
        commission_amount: Decimal,
    },
    /// Periodic accounting summary (accounting)
    ReconcileAccounting {
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        real_total: Decimal,
        referent_total: Decimal,
        record_count: u64,
    },
}

impl OrderAction {
    /// Value of the `action` tag
    pub fn name(&self) -> &'static str {
        match self {
            OrderAction::RecordClosure { .. } => "record_closure",
            OrderAction::ChargeCommission { .. } => "charge_commission",
            OrderAction::CreditAffiliate { .. } => "credit_affiliate",
            OrderAction::ReconcileAccounting { .. } => "reconcile_accounting",
        }
    }

    /// Operation the order refers to, if any
    pub fn operation_id(&self) -> Option<PositionId> {
        match self {
            OrderAction::RecordClosure { operation_id, .. }
            | OrderAction::ChargeCommission { operation_id, .. }
            | OrderAction::CreditAffiliate { operation_id, .. } => Some(*operation_id),
            OrderAction::ReconcileAccounting { .. } => None,
        }
    }
}

/// Full body of a `POST /orders` request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderPayload {
    #[serde(flatten)]
    pub action: OrderAction,
    pub timestamp: DateTime<Utc>,
    /// Name of the supervisor instance that emitted the order
    pub supervisor: String,
}

impl OrderPayload {
    /// Stamp an action with the current time
    pub fn new(action: OrderAction, supervisor: impl Into<String>) -> Self {
        Self {
            action,
            timestamp: Utc::now(),
            supervisor: supervisor.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    #[test]
    fn test_payload_wire_shape() {
        let operation_id = Uuid::now_v7();
        let payload = OrderPayload::new(
            OrderAction::ChargeCommission {
                operation_id,
                user_id: Uuid::now_v7(),
                commission_amount: dec!(50),
                commission_type: CommissionType::Real,
            },
            "vigil-test",
        );

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["action"], "charge_commission");
        assert_eq!(json["supervisor"], "vigil-test");
        assert_eq!(json["commission_type"], "REAL");
        assert_eq!(json["operation_id"], operation_id.to_string());
        assert!(json.get("timestamp").is_some());

        let decoded: OrderPayload = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_action_names_match_tag() {
        let action = OrderAction::ReconcileAccounting {
            window_start: Utc::now(),
            window_end: Utc::now(),
            real_total: dec!(0),
            referent_total: dec!(0),
            record_count: 0,
        };
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["action"], action.name());
        assert!(action.operation_id().is_none());
    }
}
