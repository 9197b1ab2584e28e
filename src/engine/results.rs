// 13.0.2: result types and errors for engine operations.

use crate::calc::MarginHealth;
use crate::ledger::LedgerError;
use crate::position::Position;
use crate::store::StoreError;
use crate::types::{PositionId, Price, Quote, Side, Ticker, Timestamp, UserId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// read-only projection handed to the CRUD shell. never exposes the entry
// struct itself, so callers cannot mutate ledger state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionView {
    pub id: PositionId,
    pub user_id: UserId,
    pub ticker: Ticker,
    pub side: Side,
    pub entry_price: Price,
    pub size: Quote,
    pub leverage: u32,
    pub margin: Quote,
    pub mark_price: Price,
    pub unrealized_pnl: Quote,
    pub unrealized_pnl_pct: Decimal,
    pub liquidation_price: Price,
    pub funding_paid: Quote,
    pub realized_pnl: Option<Quote>,
    pub health: MarginHealth,
    pub is_open: bool,
    pub settled: bool,
    pub opened_at: Timestamp,
    pub closed_at: Option<Timestamp>,
}

impl From<&Position> for PositionView {
    fn from(p: &Position) -> Self {
        Self {
            id: p.id,
            user_id: p.user_id,
            ticker: p.ticker.clone(),
            side: p.side,
            entry_price: p.entry_price,
            size: p.size,
            leverage: p.leverage.get(),
            margin: p.margin,
            mark_price: p.mark_price,
            unrealized_pnl: p.unrealized_pnl,
            unrealized_pnl_pct: p.unrealized_pnl_pct,
            liquidation_price: p.liquidation_price,
            funding_paid: p.funding_paid,
            realized_pnl: p.realized_pnl,
            health: p.health(),
            is_open: p.is_open(),
            settled: p.settlement.settled,
            opened_at: p.opened_at,
            closed_at: p.closed_at,
        }
    }
}

// trade success is definitive even when settlement is pending or failed;
// the flag and error field carry settlement status separately.
#[derive(Debug, Clone)]
pub struct OpenOutcome {
    pub view: PositionView,
    pub settled: bool,
    pub settlement_error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CloseOutcome {
    pub view: PositionView,
    pub realized_pnl: Quote,
    pub settlement_amount: Quote,
    pub was_liquidated: bool,
    pub settled: bool,
    pub settlement_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSummary {
    pub positions: Vec<PositionView>,
    pub open_count: usize,
    pub total_unrealized_pnl: Quote,
    pub total_margin_posted: Quote,
}

#[derive(Debug, Clone, Default)]
pub struct RecoveryReport {
    pub open_positions: usize,
    pub unsettled_enqueued: usize,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error("leverage {requested} outside bounds {min}..={max}")]
    InvalidLeverage { requested: u32, min: u32, max: u32 },

    #[error("margin must be positive, got {0}")]
    InvalidMargin(Quote),

    #[error("no price registered for ticker {0}")]
    UnknownTicker(Ticker),

    #[error("position {0} not found")]
    NotFound(PositionId),

    #[error("caller {caller:?} does not own position {id}")]
    NotOwner { id: PositionId, caller: UserId },

    #[error("position {0} is already closed")]
    AlreadyClosed(PositionId),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl From<LedgerError> for EngineError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InvalidLeverage { requested, min, max } => {
                EngineError::InvalidLeverage { requested, min, max }
            }
            LedgerError::InvalidMargin(m) => EngineError::InvalidMargin(m),
            LedgerError::UnknownTicker(t) => EngineError::UnknownTicker(t),
            LedgerError::NotFound(id) => EngineError::NotFound(id),
            LedgerError::AlreadyClosed(id) => EngineError::AlreadyClosed(id),
            LedgerError::Store(e) => EngineError::Store(e),
        }
    }
}
