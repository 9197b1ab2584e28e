// 8.0: all settings in one place. read once at construction, never re-specified
// per call.

use crate::funding::FundingParams;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// how position mutations are mirrored to the external settlement target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementMode {
    // every mutation marked settled immediately, no external call
    Disabled,
    // synchronous call per mutation; failure surfaced to the caller, no retry
    Immediate,
    // mutations queue up; a background timer drains them in batches
    Batched,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub settlement_mode: SettlementMode,
    // batched mode: how often the drain timer fires
    pub batch_interval: Duration,
    // batched mode: max ids drained per tick
    pub batch_size: usize,
    // immediate mode: round-trip budget before the call counts as failed
    pub immediate_timeout: Duration,
    pub min_leverage: u32,
    pub max_leverage: u32,
    // fraction of posted margin consumed at the liquidation price. 1 = the
    // full-margin floor: 5x long from 100 liquidates at 80.
    pub maintenance_margin_ratio: Decimal,
    pub funding: FundingParams,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            settlement_mode: SettlementMode::Batched,
            batch_interval: Duration::from_secs(120),
            batch_size: 25,
            immediate_timeout: Duration::from_secs(10),
            min_leverage: 1,
            max_leverage: 100,
            maintenance_margin_ratio: dec!(1),
            funding: FundingParams::default(),
        }
    }
}

impl EngineConfig {
    pub fn with_mode(mode: SettlementMode) -> Self {
        Self {
            settlement_mode: mode,
            ..Self::default()
        }
    }

    pub fn leverage_in_bounds(&self, leverage: u32) -> bool {
        leverage >= self.min_leverage && leverage <= self.max_leverage
    }
}
