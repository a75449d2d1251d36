//! Commission math and REAL / REFERENT classification.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use vigil_domain::{CommissionType, Payment, UserPlan};

use crate::error::EngineError;

/// Commission percentage per billing plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionPlans {
    pub subscription_percent: Decimal,
    pub prepaid_percent: Decimal,
}

impl CommissionPlans {
    /// Validated plan table; each percentage must be within 0..=100
    pub fn new(subscription_percent: Decimal, prepaid_percent: Decimal) -> Result<Self, EngineError> {
        for (plan, value) in [
            (UserPlan::Subscription, subscription_percent),
            (UserPlan::Prepaid, prepaid_percent),
        ] {
            if value < Decimal::ZERO || value > Decimal::ONE_HUNDRED {
                return Err(EngineError::InvalidPlanPercent {
                    plan: plan.as_str(),
                    value: value.to_string(),
                });
            }
        }
        Ok(Self {
            subscription_percent,
            prepaid_percent,
        })
    }

    pub fn percent_for(&self, plan: UserPlan) -> Decimal {
        match plan {
            UserPlan::Subscription => self.subscription_percent,
            UserPlan::Prepaid => self.prepaid_percent,
        }
    }
}

impl Default for CommissionPlans {
    fn default() -> Self {
        Self {
            subscription_percent: Decimal::TEN,
            prepaid_percent: Decimal::from(20),
        }
    }
}

/// `profit_usd * plan_percent / 100`
pub fn compute_commission(profit_usd: Decimal, plan_percent: Decimal) -> Decimal {
    (profit_usd * plan_percent / Decimal::ONE_HUNDRED).normalize()
}

/// REAL iff a completed real-money payment settled within `lookback` of `now`
pub fn classify_payments(payments: &[Payment], now: DateTime<Utc>, lookback: Duration) -> CommissionType {
    let since = now - lookback;
    if payments.iter().any(|p| p.is_recent_real_payment(since)) {
        CommissionType::Real
    } else {
        CommissionType::Referent
    }
}
