// 3.0: the position entity and its lifecycle.
// opened (entry = mark at acceptance) → revalued on every price tick → closed
// (realized pnl fixed, terminal). 3.2 has the pure liquidation verdict; the
// ledger applies it separately so the decision stays testable on its own.

use crate::calc;
use crate::calc::MarginHealth;
use crate::types::{Leverage, PositionId, Price, Quote, Side, Ticker, Timestamp, UserId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// which mutation a settlement record mirrors externally
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettleAction {
    Open,
    Close,
}

// 3.1: tracks whether the position's last mutation has been mirrored to the
// settlement target. a fresh unsettled record is installed at every mutation;
// only the coordinator flips it to settled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementRecord {
    pub action: SettleAction,
    pub settled: bool,
    pub reference: Option<String>,
    pub settled_at: Option<Timestamp>,
}

impl SettlementRecord {
    pub fn unsettled(action: SettleAction) -> Self {
        Self {
            action,
            settled: false,
            reference: None,
            settled_at: None,
        }
    }

    pub fn mark_settled(&mut self, reference: String, now: Timestamp) {
        self.settled = true;
        self.reference = Some(reference);
        self.settled_at = Some(now);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    UserClosed,
    Liquidation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    pub user_id: UserId,
    pub ticker: Ticker,
    pub side: Side,
    pub entry_price: Price,
    // notional = margin * leverage
    pub size: Quote,
    pub leverage: Leverage,
    pub margin: Quote,
    pub mark_price: Price,
    pub unrealized_pnl: Quote,
    pub unrealized_pnl_pct: Decimal,
    pub liquidation_price: Price,
    // signed: positive = this position has paid funding, negative = received
    pub funding_paid: Quote,
    pub realized_pnl: Option<Quote>,
    pub opened_at: Timestamp,
    pub last_funding_at: Timestamp,
    pub closed_at: Option<Timestamp>,
    pub close_reason: Option<CloseReason>,
    pub settlement: SettlementRecord,
}

impl Position {
    pub fn open(
        id: PositionId,
        user_id: UserId,
        ticker: Ticker,
        side: Side,
        margin: Quote,
        leverage: Leverage,
        entry_price: Price,
        maintenance_ratio: Decimal,
        now: Timestamp,
    ) -> Self {
        let size = margin.mul(leverage.as_decimal());
        let liquidation_price = calc::liquidation_price(entry_price, leverage, side, maintenance_ratio);
        Self {
            id,
            user_id,
            ticker,
            side,
            entry_price,
            size,
            leverage,
            margin,
            mark_price: entry_price,
            unrealized_pnl: Quote::zero(),
            unrealized_pnl_pct: Decimal::ZERO,
            liquidation_price,
            funding_paid: Quote::zero(),
            realized_pnl: None,
            opened_at: now,
            last_funding_at: now,
            closed_at: None,
            close_reason: None,
            settlement: SettlementRecord::unsettled(SettleAction::Open),
        }
    }

    pub fn is_open(&self) -> bool {
        self.closed_at.is_none()
    }

    pub fn was_liquidated(&self) -> bool {
        self.close_reason == Some(CloseReason::Liquidation)
    }

    // recompute derived fields at a new mark price. no-op on a closed position.
    pub fn revalue(&mut self, mark_price: Price) {
        if !self.is_open() {
            return;
        }
        self.mark_price = mark_price;
        self.unrealized_pnl = calc::unrealized_pnl(self.side, self.entry_price, self.size, mark_price);
        self.unrealized_pnl_pct = calc::pnl_percent(self.unrealized_pnl, self.margin);
    }

    // longs pay a positive rate, shorts receive it. accrual is proportional to
    // elapsed hours since the last pass.
    pub fn accrue_funding(&mut self, hourly_rate: Decimal, now: Timestamp) {
        if !self.is_open() {
            return;
        }
        let hours = self.last_funding_at.elapsed_hours(&now);
        if hours.is_zero() {
            return;
        }
        let payment = self.side.sign() * self.size.value() * hourly_rate * hours;
        self.funding_paid = self.funding_paid.add(Quote::new(payment));
        self.last_funding_at = now;
    }

    pub fn health(&self) -> MarginHealth {
        if !self.is_open() {
            return MarginHealth::Healthy;
        }
        calc::margin_health(self.side, self.entry_price, self.mark_price, self.liquidation_price)
    }

    // 3.2: pure transition decision. the ledger applies the verdict separately.
    pub fn decide_liquidation(&self, mark_price: Price) -> LiquidationVerdict {
        if !self.is_open() {
            return LiquidationVerdict::Keep;
        }
        if !calc::is_liquidated(self.side, mark_price, self.liquidation_price) {
            return LiquidationVerdict::Keep;
        }
        let raw = calc::unrealized_pnl(self.side, self.entry_price, self.size, mark_price);
        LiquidationVerdict::ForceClose {
            close_price: mark_price,
            realized_pnl: calc::floor_realized_loss(raw, self.margin),
        }
    }

    // terminal transition. freezes the close price, fixes realized pnl, zeroes
    // unrealized, installs a fresh unsettled close record.
    pub fn apply_close(&mut self, close_price: Price, realized_pnl: Quote, reason: CloseReason, now: Timestamp) {
        debug_assert!(self.is_open(), "close applied to a closed position");
        self.mark_price = close_price;
        self.realized_pnl = Some(realized_pnl);
        self.unrealized_pnl = Quote::zero();
        self.unrealized_pnl_pct = Decimal::ZERO;
        self.closed_at = Some(now);
        self.close_reason = Some(reason);
        self.settlement = SettlementRecord::unsettled(SettleAction::Close);
    }

    // margin + realized pnl, floored at zero. zero while still open.
    pub fn settlement_amount(&self) -> Quote {
        match self.realized_pnl {
            Some(realized) => calc::final_settlement(self.margin, realized),
            None => Quote::zero(),
        }
    }
}

// verdict of the liquidation check for one position at one mark price
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiquidationVerdict {
    Keep,
    ForceClose {
        close_price: Price,
        realized_pnl: Quote,
    },
}
