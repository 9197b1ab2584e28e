// 4.0: funding accrual parameters. the revaluation pass applies the hourly rate
// to every open position it touches; longs pay a positive rate, shorts receive it.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingParams {
    // hourly rate applied to notional size. 0.0001 = 1bp/hour.
    pub hourly_rate: Decimal,
    // rates beyond this are clamped before accrual
    pub max_hourly_rate: Decimal,
}

impl Default for FundingParams {
    fn default() -> Self {
        Self {
            hourly_rate: dec!(0.0001),
            max_hourly_rate: dec!(0.01),
        }
    }
}

impl FundingParams {
    pub fn effective_rate(&self) -> Decimal {
        self.hourly_rate
            .max(-self.max_hourly_rate)
            .min(self.max_hourly_rate)
    }
}
